pub mod config;
pub mod lease;

pub use config::{ConfigError, ConfigStore, EndpointConfig, ServerList, UdpEndpoint};
pub use lease::{LeaseClient, LeaseError, LeaseEvent, LeaseScheduler, LeaseTiming, RequestQueue};
