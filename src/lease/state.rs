// Lease lifecycle state machine
//
// Pure bookkeeping with no I/O and no clock. The scheduler feeds it commands,
// request completions and timer expiries, and performs whatever the returned
// decision asks for. Every request and every timer carries an id; a
// completion or expiry whose id is no longer current is stale and ignored.

use chrono::{DateTime, Utc};

use super::error::LeaseError;
use super::types::{LeasePhase, LeaseSnapshot};

/// Identifies one submitted lease request
pub type RequestId = u64;

/// Identifies one armed renewal timer
pub type TimerId = u64;

/// A lease request the scheduler must submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTicket {
    pub id: RequestId,
    pub guid: String,
}

/// What a start command or timer expiry asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    /// No server configured; state unchanged
    Disabled,
    /// A request is already in flight
    Coalesced,
    /// Submit this request
    Request(RequestTicket),
}

/// What a request completion amounts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The request is no longer current; nothing changed
    Stale,
    /// First grant of the session
    Acquired { guid: String },
    /// A held lease was extended
    Renewed { guid: String },
    /// The request failed and renewal stopped
    Failed { error: LeaseError },
}

/// Lease bookkeeping for one scheduler
#[derive(Debug, Clone)]
pub struct LeaseState {
    phase: LeasePhase,
    guid: String,
    in_flight: Option<RequestId>,
    timer: Option<TimerId>,
    next_id: u64,
    acquired: bool,
    renewals: u64,
    acquired_at: Option<DateTime<Utc>>,
    renewed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl Default for LeaseState {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseState {
    pub fn new() -> Self {
        Self {
            phase: LeasePhase::Idle,
            guid: String::new(),
            in_flight: None,
            timer: None,
            next_id: 1,
            acquired: false,
            renewals: 0,
            acquired_at: None,
            renewed_at: None,
            last_error: None,
        }
    }

    pub fn phase(&self) -> LeasePhase {
        self.phase
    }

    /// Current lease identifier, empty before the first grant
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// The armed renewal timer, if any
    pub fn armed_timer(&self) -> Option<TimerId> {
        self.timer
    }

    pub fn in_flight(&self) -> Option<RequestId> {
        self.in_flight
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Begin a lease request
    ///
    /// A start while a request is in flight is coalesced into it. Starting
    /// from an active lease disarms the pending renewal; the completion arms a
    /// fresh one.
    pub fn start(&mut self, lease_enabled: bool) -> StartDecision {
        if !lease_enabled {
            return StartDecision::Disabled;
        }
        if self.phase == LeasePhase::Pending {
            return StartDecision::Coalesced;
        }

        self.timer = None;
        self.phase = LeasePhase::Pending;
        let id = self.allocate_id();
        self.in_flight = Some(id);

        StartDecision::Request(RequestTicket {
            id,
            guid: self.guid.clone(),
        })
    }

    /// A request completed with a lease identifier
    pub fn on_success(&mut self, id: RequestId, guid: String) -> Completion {
        if self.in_flight != Some(id) {
            return Completion::Stale;
        }

        self.in_flight = None;
        self.phase = LeasePhase::Active;
        self.guid = guid.clone();
        self.last_error = None;
        self.arm_timer();

        let now = Utc::now();
        if self.acquired {
            self.renewals += 1;
            self.renewed_at = Some(now);
            Completion::Renewed { guid }
        } else {
            self.acquired = true;
            self.acquired_at = Some(now);
            Completion::Acquired { guid }
        }
    }

    /// A request failed
    ///
    /// The lease counts as lost: a later successful start reports a fresh
    /// acquisition.
    pub fn on_failure(&mut self, id: RequestId, error: LeaseError) -> Completion {
        if self.in_flight != Some(id) {
            return Completion::Stale;
        }

        self.in_flight = None;
        self.timer = None;
        self.acquired = false;
        self.phase = LeasePhase::Failed;
        self.last_error = Some(error.to_string());
        Completion::Failed { error }
    }

    /// The renewal timer `id` expired
    ///
    /// Expiry of a timer that was disarmed or replaced changes nothing.
    pub fn on_timer_fired(&mut self, id: TimerId) -> Option<StartDecision> {
        if self.timer != Some(id) {
            return None;
        }
        self.timer = None;
        if self.phase != LeasePhase::Active {
            return None;
        }
        Some(self.start(true))
    }

    /// Drop back to idle; in-flight results and armed timers become stale
    ///
    /// The guid is kept so a later start presents it again.
    pub fn stop(&mut self) {
        self.phase = LeasePhase::Idle;
        self.in_flight = None;
        self.timer = None;
        self.acquired = false;
    }

    /// Arm a renewal timer unless one is already armed
    fn arm_timer(&mut self) -> Option<TimerId> {
        if self.timer.is_some() {
            return None;
        }
        let id = self.allocate_id();
        self.timer = Some(id);
        Some(id)
    }

    pub fn snapshot(&self) -> LeaseSnapshot {
        LeaseSnapshot {
            phase: self.phase,
            guid: self.guid.clone(),
            renewals: self.renewals,
            timer_armed: self.timer.is_some(),
            acquired_at: self.acquired_at,
            renewed_at: self.renewed_at,
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::error::TransportError;

    fn request(decision: StartDecision) -> RequestTicket {
        match decision {
            StartDecision::Request(ticket) => ticket,
            other => panic!("expected a request, got {:?}", other),
        }
    }

    #[test]
    fn test_disabled_start_stays_idle() {
        let mut state = LeaseState::new();
        assert_eq!(state.start(false), StartDecision::Disabled);
        assert_eq!(state.phase(), LeasePhase::Idle);
        assert_eq!(state.in_flight(), None);
        assert_eq!(state.armed_timer(), None);
    }

    #[test]
    fn test_first_grant_arms_one_timer() {
        let mut state = LeaseState::new();
        let ticket = request(state.start(true));
        assert_eq!(ticket.guid, "");
        assert_eq!(state.phase(), LeasePhase::Pending);

        let completion = state.on_success(ticket.id, "abc123".to_string());
        assert_eq!(completion, Completion::Acquired { guid: "abc123".to_string() });
        assert_eq!(state.phase(), LeasePhase::Active);
        assert!(state.armed_timer().is_some());
    }

    #[test]
    fn test_duplicate_success_does_not_arm_twice() {
        let mut state = LeaseState::new();
        let ticket = request(state.start(true));

        state.on_success(ticket.id, "abc123".to_string());
        let timer = state.armed_timer();
        assert_eq!(state.on_success(ticket.id, "abc123".to_string()), Completion::Stale);

        assert_eq!(state.armed_timer(), timer);
        assert_eq!(state.snapshot().renewals, 0);
    }

    #[test]
    fn test_arm_only_when_unarmed() {
        let mut state = LeaseState::new();
        let first = state.arm_timer();
        assert!(first.is_some());
        assert_eq!(state.arm_timer(), None);
        assert_eq!(state.armed_timer(), first);
    }

    #[test]
    fn test_start_while_pending_is_coalesced() {
        let mut state = LeaseState::new();
        let ticket = request(state.start(true));
        assert_eq!(state.start(true), StartDecision::Coalesced);
        assert_eq!(state.in_flight(), Some(ticket.id));
    }

    #[test]
    fn test_timer_renews_with_guid() {
        let mut state = LeaseState::new();
        let ticket = request(state.start(true));
        state.on_success(ticket.id, "abc123".to_string());

        let timer = state.armed_timer().unwrap();
        let renewal = request(state.on_timer_fired(timer).unwrap());
        assert_eq!(renewal.guid, "abc123");
        assert_eq!(state.armed_timer(), None);

        let completion = state.on_success(renewal.id, "abc123".to_string());
        assert_eq!(completion, Completion::Renewed { guid: "abc123".to_string() });
        assert!(state.armed_timer().is_some());
        assert_eq!(state.snapshot().renewals, 1);
    }

    #[test]
    fn test_server_may_reissue_guid() {
        let mut state = LeaseState::new();
        let ticket = request(state.start(true));
        state.on_success(ticket.id, "abc123".to_string());
        let renewal = request(state.on_timer_fired(state.armed_timer().unwrap()).unwrap());
        state.on_success(renewal.id, "def456".to_string());
        assert_eq!(state.guid(), "def456");
    }

    #[test]
    fn test_failure_disarms_and_stops() {
        let mut state = LeaseState::new();
        let ticket = request(state.start(true));
        state.on_success(ticket.id, "abc123".to_string());
        let timer = state.armed_timer().unwrap();
        let renewal = request(state.on_timer_fired(timer).unwrap());

        let error = LeaseError::from(TransportError::Timeout);
        assert_eq!(
            state.on_failure(renewal.id, error.clone()),
            Completion::Failed { error }
        );
        assert_eq!(state.phase(), LeasePhase::Failed);
        assert_eq!(state.armed_timer(), None);
        assert_eq!(state.guid(), "abc123");
        assert_eq!(state.on_timer_fired(timer), None);
        assert_eq!(state.snapshot().last_error.as_deref(), Some("Request timed out"));
    }

    #[test]
    fn test_restart_after_failure_reuses_guid() {
        let mut state = LeaseState::new();
        let ticket = request(state.start(true));
        state.on_success(ticket.id, "abc123".to_string());
        let renewal = request(state.start(true));
        state.on_failure(renewal.id, LeaseError::protocol_violation("no guid"));

        let retry = request(state.start(true));
        assert_eq!(retry.guid, "abc123");
        assert_eq!(state.phase(), LeasePhase::Pending);
    }

    #[test]
    fn test_manual_start_replaces_armed_timer() {
        let mut state = LeaseState::new();
        let ticket = request(state.start(true));
        state.on_success(ticket.id, "abc123".to_string());
        let old_timer = state.armed_timer().unwrap();

        let manual = request(state.start(true));
        assert_eq!(state.armed_timer(), None);
        assert_eq!(state.on_timer_fired(old_timer), None);

        state.on_success(manual.id, "abc123".to_string());
        let new_timer = state.armed_timer().unwrap();
        assert_ne!(new_timer, old_timer);
    }

    #[test]
    fn test_stop_discards_in_flight_result() {
        let mut state = LeaseState::new();
        let ticket = request(state.start(true));
        state.stop();

        assert_eq!(state.on_success(ticket.id, "abc123".to_string()), Completion::Stale);
        assert_eq!(state.phase(), LeasePhase::Idle);
        assert_eq!(state.guid(), "");
        assert_eq!(state.armed_timer(), None);

        let failed = request(state.start(true));
        state.stop();
        assert_eq!(state.on_failure(failed.id, TransportError::Dropped.into()), Completion::Stale);
        assert_eq!(state.phase(), LeasePhase::Idle);
    }

    #[test]
    fn test_stop_disarms_timer() {
        let mut state = LeaseState::new();
        let ticket = request(state.start(true));
        state.on_success(ticket.id, "abc123".to_string());
        let timer = state.armed_timer().unwrap();

        state.stop();
        assert_eq!(state.armed_timer(), None);
        assert_eq!(state.on_timer_fired(timer), None);
        assert_eq!(state.phase(), LeasePhase::Idle);
    }

    #[test]
    fn test_acquired_again_after_stop() {
        let mut state = LeaseState::new();
        let ticket = request(state.start(true));
        state.on_success(ticket.id, "abc123".to_string());
        state.stop();

        let restart = request(state.start(true));
        assert_eq!(restart.guid, "abc123");
        assert!(matches!(
            state.on_success(restart.id, "abc123".to_string()),
            Completion::Acquired { .. }
        ));
    }
}
