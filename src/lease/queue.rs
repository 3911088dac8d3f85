// Outbound HTTP request queue
//
// Every lease exchange goes through a RequestQueue. Requests execute on tokio
// worker tasks, bounded by a small permit pool, and each submission completes
// its oneshot receiver exactly once. One process-wide queue owns the shared
// connection pool; queues with their own TLS material can be built explicitly.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Semaphore, oneshot};

use super::error::TransportError;
use crate::config::EndpointConfig;

/// Maximum number of exchanges running at once
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Per-request timeout applied by the reqwest transport
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one HTTP exchange
pub type DispatchResult = Result<HttpReply, TransportError>;

static SHARED_QUEUE: OnceLock<RequestQueue> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A transport-neutral HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl OutboundRequest {
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First header value with the given name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status and body of a completed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes a single HTTP exchange
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: OutboundRequest) -> DispatchResult;
}

/// Production transport backed by a pooled reqwest client
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build a client trusting the configured CA and presenting the
    /// configured client identity, when present
    pub fn with_tls(config: &EndpointConfig) -> Result<Self, TransportError> {
        let mut builder = Self::builder();

        if !config.tls_ca_data().is_empty() {
            let ca = reqwest::Certificate::from_pem(config.tls_ca_data().as_bytes())
                .map_err(|e| TransportError::tls(format!("invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(ca);
        }

        if config.has_client_identity() {
            let pem = format!(
                "{}\n{}",
                config.tls_client_private_key_data().trim_end(),
                config.tls_client_public_key_data().trim_end()
            );
            let identity = reqwest::Identity::from_pem(pem.as_bytes())
                .map_err(|e| TransportError::tls(format!("invalid client identity: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::tls(e.to_string()))?;
        Ok(Self { client })
    }

    fn builder() -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .pool_max_idle_per_host(2)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        let client = Self::builder().build().unwrap_or_else(|e| {
            log::warn!("Falling back to a default HTTP client: {}", e);
            reqwest::Client::new()
        });
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: OutboundRequest) -> DispatchResult {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.body(request.body).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpReply { status, body })
    }
}

struct QueueInner {
    transport: Arc<dyn HttpTransport>,
    permits: Arc<Semaphore>,
    submitted: AtomicU64,
    completed: AtomicU64,
}

/// Dispatcher for outbound HTTP work
///
/// Cloning is cheap; clones share the transport and the permit pool.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_capacity(transport, DEFAULT_MAX_IN_FLIGHT)
    }

    pub fn with_capacity(transport: Arc<dyn HttpTransport>, max_in_flight: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                transport,
                permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Process-wide queue, created on first use
    pub fn shared() -> &'static RequestQueue {
        SHARED_QUEUE.get_or_init(|| {
            log::debug!("Creating shared request queue");
            RequestQueue::new(Arc::new(ReqwestTransport::default()))
        })
    }

    /// Queue for a configuration: a dedicated one when it carries TLS
    /// material, the shared one otherwise
    pub fn for_config(config: &EndpointConfig) -> Result<Self, TransportError> {
        if config.tls_ca_data().is_empty() && !config.has_client_identity() {
            return Ok(Self::shared().clone());
        }
        Self::with_tls(config)
    }

    /// Dedicated queue whose transport carries the configuration's TLS material
    pub fn with_tls(config: &EndpointConfig) -> Result<Self, TransportError> {
        Ok(Self::new(Arc::new(ReqwestTransport::with_tls(config)?)))
    }

    /// Submit a request; the receiver resolves exactly once
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, request: OutboundRequest) -> oneshot::Receiver<DispatchResult> {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        inner.submitted.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let result = match Arc::clone(&inner.permits).acquire_owned().await {
                Ok(_permit) => inner.transport.execute(request).await,
                Err(_) => Err(TransportError::Dropped),
            };
            inner.completed.fetch_add(1, Ordering::Relaxed);
            let _ = tx.send(result);
        });

        rx
    }

    /// Submit a request and wait for its completion
    pub async fn dispatch(&self, request: OutboundRequest) -> DispatchResult {
        self.enqueue(request)
            .await
            .unwrap_or(Err(TransportError::Dropped))
    }

    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Requests submitted but not yet completed
    pub fn pending(&self) -> u64 {
        self.submitted().saturating_sub(self.completed())
    }

    /// Whether two handles share the same underlying queue
    pub fn same_queue(&self, other: &RequestQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("submitted", &self.submitted())
            .field("completed", &self.completed())
            .finish()
    }
}
