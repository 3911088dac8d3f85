// Lease scheduler
//
// Owns one lease session. A single driver task holds the LeaseState; caller
// commands, request completions and timer expiries all arrive on its
// channels, so guid and timer bookkeeping is only ever touched from that
// task. Requests run on the request queue and report back as signals.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::client::LeaseClient;
use super::error::{LeaseError, LeaseResult};
use super::state::{Completion, LeaseState, RequestId, RequestTicket, StartDecision, TimerId};
use super::types::{LeaseEvent, LeaseGrant, LeaseSnapshot, StartOutcome};
use crate::config::{EndpointConfig, NO_UDP_PORT, UdpEndpoint};

enum Command {
    Start {
        config: EndpointConfig,
        reply: oneshot::Sender<StartOutcome>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<LeaseSnapshot>,
    },
}

enum Signal {
    Completed {
        id: RequestId,
        result: LeaseResult<LeaseGrant>,
    },
    TimerFired {
        id: TimerId,
    },
}

/// Handle to a running lease session
///
/// # Example
/// ```no_run
/// use pitv_viewer::config::EndpointConfig;
/// use pitv_viewer::lease::{LeaseClient, LeaseEvent, LeaseScheduler, LeaseTiming};
///
/// # async fn example() -> pitv_viewer::lease::LeaseResult<()> {
/// let config = EndpointConfig::new("https://10.0.2.2:8080", "viewer", "secret", "10.0.0.5:5000");
/// let client = LeaseClient::for_config(&config, LeaseTiming::default())?;
/// let (scheduler, mut events) = LeaseScheduler::spawn(client);
///
/// scheduler.start(config).await?;
/// while let Some(event) = events.recv().await {
///     if let LeaseEvent::Acquired { endpoint, .. } = event {
///         println!("start receiving on {}", endpoint);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct LeaseScheduler {
    commands: mpsc::UnboundedSender<Command>,
    driver: JoinHandle<()>,
}

impl LeaseScheduler {
    /// Spawn the driver task on the current runtime
    ///
    /// Returns the handle and the receiver for lease events.
    pub fn spawn(client: LeaseClient) -> (Self, mpsc::UnboundedReceiver<LeaseEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            client: Arc::new(client),
            state: LeaseState::new(),
            config: EndpointConfig::default(),
            timer_task: None,
            signals: signal_tx,
            events: event_tx,
        };
        let handle = tokio::spawn(driver.run(command_rx, signal_rx));

        (
            Self {
                commands: command_tx,
                driver: handle,
            },
            event_rx,
        )
    }

    /// Request a lease for `config`, or renew the one already held
    ///
    /// Without a server URL nothing is sent and [`StartOutcome::Disabled`] is
    /// returned. While a request is in flight further starts are coalesced.
    pub async fn start(&self, config: EndpointConfig) -> LeaseResult<StartOutcome> {
        self.call(|reply| Command::Start { config, reply }).await
    }

    /// Return to idle
    ///
    /// Once this returns no armed timer can issue another request, and the
    /// result of a request still in flight is discarded. Nothing is sent to
    /// the server.
    pub async fn stop(&self) -> LeaseResult<()> {
        self.call(|reply| Command::Stop { reply }).await
    }

    pub async fn snapshot(&self) -> LeaseResult<LeaseSnapshot> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    /// Stop the session and wait for the driver task to exit
    pub async fn shutdown(self) {
        let _ = self.stop().await;
        let Self { commands, driver } = self;
        drop(commands);
        let _ = driver.await;
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> LeaseResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| LeaseError::invalid_state("lease scheduler is not running"))?;
        rx.await
            .map_err(|_| LeaseError::invalid_state("lease scheduler is not running"))
    }
}

struct Driver {
    client: Arc<LeaseClient>,
    state: LeaseState,
    config: EndpointConfig,
    timer_task: Option<(TimerId, JoinHandle<()>)>,
    signals: mpsc::UnboundedSender<Signal>,
    events: mpsc::UnboundedSender<LeaseEvent>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(signal) = signals.recv() => self.handle_signal(signal),
            }
        }

        self.state.stop();
        self.reconcile_timer();
        log::debug!("Lease scheduler exited");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { config, reply } => {
                let outcome = match self.state.start(config.lease_enabled()) {
                    StartDecision::Disabled => {
                        log::info!("No lease server configured, camera lease disabled");
                        self.emit(LeaseEvent::Disabled);
                        StartOutcome::Disabled
                    }
                    StartDecision::Coalesced => {
                        log::debug!("Lease request already in flight, start coalesced");
                        StartOutcome::Coalesced
                    }
                    StartDecision::Request(ticket) => {
                        self.config = config;
                        self.submit(ticket);
                        StartOutcome::Requested
                    }
                };
                self.reconcile_timer();
                let _ = reply.send(outcome);
            }
            Command::Stop { reply } => {
                self.state.stop();
                self.reconcile_timer();
                log::info!("Camera lease session stopped");
                self.emit(LeaseEvent::Stopped);
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
        }
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Completed { id, result } => {
                let completion = match result {
                    Ok(grant) => self.state.on_success(id, grant.guid),
                    Err(error) => self.state.on_failure(id, error),
                };
                self.report(id, completion);
            }
            Signal::TimerFired { id } => match self.state.on_timer_fired(id) {
                Some(StartDecision::Request(ticket)) => self.submit(ticket),
                Some(_) | None => log::debug!("Ignoring expiry of stale renewal timer {}", id),
            },
        }
        self.reconcile_timer();
    }

    fn report(&mut self, id: RequestId, completion: Completion) {
        match completion {
            Completion::Stale => {
                log::debug!("Discarding result of stale lease request {}", id);
            }
            Completion::Acquired { guid } => {
                let endpoint = self.config.udp_endpoint().unwrap_or_else(|_| UdpEndpoint {
                    address: self.config.local_udp_address().to_string(),
                    port: NO_UDP_PORT,
                });
                log::info!("Camera lease {} acquired, receiving on {}", guid, endpoint);
                self.emit(LeaseEvent::Acquired { guid, endpoint });
            }
            Completion::Renewed { guid } => {
                log::debug!("Camera lease {} renewed", guid);
                self.emit(LeaseEvent::Renewed { guid });
            }
            Completion::Failed { error } if error.is_fatal() => {
                log::error!("Lease server broke the response contract: {}", error);
                self.emit(LeaseEvent::ProtocolViolation {
                    message: error.to_string(),
                });
            }
            Completion::Failed { error } => {
                log::error!("Lease request failed: {}", error);
                self.emit(LeaseEvent::Failed {
                    message: error.to_string(),
                });
            }
        }
    }

    fn submit(&self, ticket: RequestTicket) {
        if ticket.guid.is_empty() {
            log::info!("Requesting camera lease from {}", self.config.server_url());
        } else {
            log::debug!("Renewing camera lease {} at {}", ticket.guid, self.config.server_url());
        }

        let client = Arc::clone(&self.client);
        let config = self.config.clone();
        let signals = self.signals.clone();
        tokio::spawn(async move {
            let result = client.request_lease(&config, &ticket.guid).await;
            let _ = signals.send(Signal::Completed { id: ticket.id, result });
        });
    }

    /// Make the running timer task match the state's armed timer
    fn reconcile_timer(&mut self) {
        let armed = self.state.armed_timer();
        if matches!(&self.timer_task, Some((id, _)) if Some(*id) == armed) {
            return;
        }

        if let Some((id, handle)) = self.timer_task.take() {
            if !handle.is_finished() {
                handle.abort();
                log::debug!("Renewal timer {} disarmed", id);
            }
        }

        if let Some(id) = armed {
            let period = self.client.timing().renewal_period();
            let signals = self.signals.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(period).await;
                let _ = signals.send(Signal::TimerFired { id });
            });
            log::debug!("Renewal timer {} armed for {:?}", id, period);
            self.timer_task = Some((id, handle));
        }
    }

    fn emit(&self, event: LeaseEvent) {
        let _ = self.events.send(event);
    }
}
