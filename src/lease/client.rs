// Lease request exchange
//
// Builds the authenticated lease POST, submits it through the request queue
// and interprets the server's answer. No retries happen here; the scheduler
// decides what a failure means.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use super::error::{LeaseError, LeaseResult};
use super::queue::{HttpReply, OutboundRequest, RequestQueue};
use super::types::{LeaseGrant, LeaseRequestBody, LeaseTiming};
use crate::config::EndpointConfig;

/// `Authorization` header value for HTTP Basic authentication
pub fn basic_authorization(username: &str, password: &str) -> String {
    let credentials = format!("{}:{}", username, password);
    format!("Basic {}", STANDARD.encode(credentials.as_bytes()))
}

/// Interpret a lease response
///
/// Non-success statuses are ordinary failures. A success status whose body
/// lacks a string `guid` breaks the server contract and is reported as a
/// protocol violation.
pub fn parse_lease_reply(reply: HttpReply) -> LeaseResult<LeaseGrant> {
    if !reply.is_success() {
        return Err(LeaseError::Status {
            status: reply.status,
            body: reply.body.trim().to_string(),
        });
    }

    let value: Value = serde_json::from_str(&reply.body).map_err(|e| {
        LeaseError::protocol_violation(format!("lease response is not JSON: {}", e))
    })?;

    match value.get("guid").and_then(Value::as_str) {
        Some(guid) => Ok(LeaseGrant { guid: guid.to_string() }),
        None => Err(LeaseError::protocol_violation(
            "lease response has no 'guid' string field",
        )),
    }
}

/// Performs lease requests against a lease server
#[derive(Debug, Clone)]
pub struct LeaseClient {
    queue: RequestQueue,
    timing: LeaseTiming,
}

impl LeaseClient {
    pub fn new(queue: RequestQueue) -> Self {
        Self::with_timing(queue, LeaseTiming::default())
    }

    pub fn with_timing(queue: RequestQueue, timing: LeaseTiming) -> Self {
        Self { queue, timing }
    }

    /// Client using the queue appropriate for the configuration's TLS settings
    pub fn for_config(config: &EndpointConfig, timing: LeaseTiming) -> LeaseResult<Self> {
        Ok(Self::with_timing(RequestQueue::for_config(config)?, timing))
    }

    pub fn timing(&self) -> LeaseTiming {
        self.timing
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Build the lease request for `config`, renewing `existing_guid` when it
    /// is not empty
    pub fn build_request(
        &self,
        config: &EndpointConfig,
        existing_guid: &str,
    ) -> LeaseResult<OutboundRequest> {
        if !config.lease_enabled() {
            return Err(LeaseError::configuration("server URL is empty"));
        }
        url::Url::parse(config.server_url()).map_err(|e| {
            LeaseError::configuration(format!(
                "invalid server URL '{}': {}",
                config.server_url(),
                e
            ))
        })?;

        let body = LeaseRequestBody {
            lease_guid: existing_guid.to_string(),
            udp_address: config.local_udp_address().to_string(),
            udp_port: config.local_udp_port()?,
            lease_time: self.timing.lease_time_ms(),
        };
        let body = serde_json::to_string(&body)
            .map_err(|e| LeaseError::configuration(format!("cannot encode lease request: {}", e)))?;

        Ok(OutboundRequest::post(config.server_url())
            .with_header(
                "Authorization",
                basic_authorization(config.username(), config.password()),
            )
            .with_header("Content-Type", "application/json")
            .with_header("Accept", "application/json")
            .with_body(body))
    }

    /// Request a new lease, or renew `existing_guid`
    pub async fn request_lease(
        &self,
        config: &EndpointConfig,
        existing_guid: &str,
    ) -> LeaseResult<LeaseGrant> {
        let request = self.build_request(config, existing_guid)?;

        log::debug!("Requesting camera lease from {}", config.server_url());
        let reply = self.queue.dispatch(request).await?;
        parse_lease_reply(reply)
    }
}
