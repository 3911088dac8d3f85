// Lease protocol types
//
// Wire bodies of the lease exchange plus the values the scheduler reports to
// its owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{LeaseError, LeaseResult};
use crate::config::UdpEndpoint;

/// Lease duration requested from the server
pub const DEFAULT_LEASE_TIME: Duration = Duration::from_millis(10_000);

/// Interval between renewal attempts
pub const DEFAULT_RENEWAL_PERIOD: Duration = Duration::from_millis(5_000);

/// Lease duration and renewal cadence
///
/// The renewal period is always shorter than the lease so the lease is
/// renewed before the server lets it expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTiming {
    lease_time: Duration,
    renewal_period: Duration,
}

impl LeaseTiming {
    pub fn new(lease_time: Duration, renewal_period: Duration) -> LeaseResult<Self> {
        if renewal_period.is_zero() {
            return Err(LeaseError::configuration("Renewal period must be greater than 0"));
        }
        if renewal_period >= lease_time {
            return Err(LeaseError::configuration(format!(
                "Renewal period {:?} must be shorter than the lease time {:?}",
                renewal_period, lease_time
            )));
        }
        Ok(Self { lease_time, renewal_period })
    }

    pub fn lease_time(&self) -> Duration {
        self.lease_time
    }

    pub fn renewal_period(&self) -> Duration {
        self.renewal_period
    }

    /// Lease duration as sent on the wire
    pub fn lease_time_ms(&self) -> u64 {
        self.lease_time.as_millis() as u64
    }
}

impl Default for LeaseTiming {
    fn default() -> Self {
        Self {
            lease_time: DEFAULT_LEASE_TIME,
            renewal_period: DEFAULT_RENEWAL_PERIOD,
        }
    }
}

/// JSON body of a lease request
///
/// Field order is the order on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRequestBody {
    pub lease_guid: String,
    pub udp_address: String,
    pub udp_port: i32,
    pub lease_time: u64,
}

/// A lease granted by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseGrant {
    pub guid: String,
}

/// Scheduler lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeasePhase {
    /// No lease and no timer
    Idle,
    /// A lease request is in flight
    Pending,
    /// A lease is held and the renewal timer is armed
    Active,
    /// The last request failed; nothing is scheduled
    Failed,
}

impl std::fmt::Display for LeasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeasePhase::Idle => write!(f, "idle"),
            LeasePhase::Pending => write!(f, "pending"),
            LeasePhase::Active => write!(f, "active"),
            LeasePhase::Failed => write!(f, "failed"),
        }
    }
}

/// Result of asking the scheduler to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// No server configured; nothing was sent
    Disabled,
    /// A lease request was submitted
    Requested,
    /// A request is already in flight; this call was folded into it
    Coalesced,
}

/// Notifications delivered to the scheduler's owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseEvent {
    /// `start` was called without a server URL
    Disabled,
    /// First grant of the session; media reception may begin on `endpoint`
    Acquired { guid: String, endpoint: UdpEndpoint },
    /// An existing lease was extended
    Renewed { guid: String },
    /// A request failed; renewal has stopped
    Failed { message: String },
    /// The server broke the response contract; renewal has stopped
    ProtocolViolation { message: String },
    /// `stop` was called
    Stopped,
}

/// Point-in-time view of a scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseSnapshot {
    pub phase: LeasePhase,
    pub guid: String,
    pub renewals: u64,
    pub timer_armed: bool,
    pub acquired_at: Option<DateTime<Utc>>,
    pub renewed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let timing = LeaseTiming::default();
        assert_eq!(timing.lease_time_ms(), 10_000);
        assert_eq!(timing.renewal_period(), Duration::from_millis(5_000));
    }

    #[test]
    fn test_timing_rejects_late_renewal() {
        assert!(LeaseTiming::new(Duration::from_secs(10), Duration::from_secs(10)).is_err());
        assert!(LeaseTiming::new(Duration::from_secs(10), Duration::ZERO).is_err());
        assert!(LeaseTiming::new(Duration::from_secs(30), Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_request_body_wire_format() {
        let body = LeaseRequestBody {
            lease_guid: String::new(),
            udp_address: "10.0.0.5".to_string(),
            udp_port: 5000,
            lease_time: 10_000,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"lease_guid":"","udp_address":"10.0.0.5","udp_port":5000,"lease_time":10000}"#
        );
    }
}
