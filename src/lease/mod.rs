// Camera lease module
//
// Obtains a time-limited permission from the camera server to stream media to
// a local UDP endpoint, and keeps it alive by renewing it on a fixed cadence
// until stopped or until a request fails.

pub mod client;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod types;

pub use client::{LeaseClient, basic_authorization, parse_lease_reply};
pub use error::{LeaseError, LeaseResult, TransportError};
pub use queue::{
    DispatchResult, HttpMethod, HttpReply, HttpTransport, OutboundRequest, RequestQueue,
    ReqwestTransport,
};
pub use scheduler::LeaseScheduler;
pub use state::LeaseState;
pub use types::{
    DEFAULT_LEASE_TIME, DEFAULT_RENEWAL_PERIOD, LeaseEvent, LeaseGrant, LeasePhase,
    LeaseRequestBody, LeaseSnapshot, LeaseTiming, StartOutcome,
};
