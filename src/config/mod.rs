// Viewer endpoint configuration
//
// Holds the lease server settings and the local UDP endpoint the media
// receiver listens on. Configurations survive restarts through the server
// list store.

pub mod error;
pub mod store;

pub use error::{ConfigError, ConfigResult};
pub use store::{ConfigStore, ServerList};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, UdpSocket};

/// Port used when the local endpoint names an address only
pub const DEFAULT_UDP_PORT: i32 = 80;

/// Port reported when no local endpoint is configured
pub const NO_UDP_PORT: i32 = -1;

/// Port the receiver is placed on when an endpoint is guessed
pub const DEFAULT_RECEIVE_PORT: u16 = 5000;

/// Settings for one lease server and the local receiver
///
/// Every field is a plain string. An empty `server_url` disables the lease
/// flow entirely; an empty `local_udp_endpoint` means no receive port.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the lease-granting server
    #[serde(default)]
    pub server_url: String,
    /// Basic authentication user
    #[serde(default)]
    pub username: String,
    /// Basic authentication password
    #[serde(default)]
    pub password: String,
    /// `address:port`, `address`, or empty
    #[serde(default)]
    pub local_udp_endpoint: String,
    /// PEM encoded CA certificate trusted for the server
    #[serde(default)]
    pub tls_ca_data: String,
    /// PEM encoded client certificate
    #[serde(default)]
    pub tls_client_public_key_data: String,
    /// PEM encoded client private key
    #[serde(default)]
    pub tls_client_private_key_data: String,
}

/// Address/port pair the media receiver listens on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UdpEndpoint {
    pub address: String,
    pub port: i32,
}

impl fmt::Display for UdpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl EndpointConfig {
    /// Create a configuration with the lease fields set
    pub fn new(
        server_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        local_udp_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            username: username.into(),
            password: password.into(),
            local_udp_endpoint: local_udp_endpoint.into(),
            ..Default::default()
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn set_server_url(&mut self, server_url: impl Into<String>) {
        self.server_url = server_url.into();
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = username.into();
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    pub fn local_udp_endpoint(&self) -> &str {
        &self.local_udp_endpoint
    }

    pub fn set_local_udp_endpoint(&mut self, endpoint: impl Into<String>) {
        self.local_udp_endpoint = endpoint.into();
    }

    pub fn tls_ca_data(&self) -> &str {
        &self.tls_ca_data
    }

    pub fn set_tls_ca_data(&mut self, data: impl Into<String>) {
        self.tls_ca_data = data.into();
    }

    pub fn tls_client_public_key_data(&self) -> &str {
        &self.tls_client_public_key_data
    }

    pub fn set_tls_client_public_key_data(&mut self, data: impl Into<String>) {
        self.tls_client_public_key_data = data.into();
    }

    pub fn tls_client_private_key_data(&self) -> &str {
        &self.tls_client_private_key_data
    }

    pub fn set_tls_client_private_key_data(&mut self, data: impl Into<String>) {
        self.tls_client_private_key_data = data.into();
    }

    /// Whether a lease server is configured at all
    pub fn lease_enabled(&self) -> bool {
        !self.server_url.is_empty()
    }

    /// Whether both halves of a client identity are present
    pub fn has_client_identity(&self) -> bool {
        !self.tls_client_public_key_data.is_empty() && !self.tls_client_private_key_data.is_empty()
    }

    /// Address part of the local endpoint, empty when none is configured
    pub fn local_udp_address(&self) -> &str {
        self.local_udp_endpoint.split(':').next().unwrap_or_default()
    }

    /// Port part of the local endpoint
    ///
    /// Returns [`NO_UDP_PORT`] for an empty endpoint and [`DEFAULT_UDP_PORT`]
    /// when the endpoint carries no port.
    pub fn local_udp_port(&self) -> ConfigResult<i32> {
        if self.local_udp_endpoint.is_empty() {
            return Ok(NO_UDP_PORT);
        }

        match self.local_udp_endpoint.split(':').nth(1) {
            None | Some("") => Ok(DEFAULT_UDP_PORT),
            Some(port) => port.parse::<i32>().map_err(|_| ConfigError::InvalidPort {
                endpoint: self.local_udp_endpoint.clone(),
                port: port.to_string(),
            }),
        }
    }

    /// Both endpoint parts as one value
    pub fn udp_endpoint(&self) -> ConfigResult<UdpEndpoint> {
        Ok(UdpEndpoint {
            address: self.local_udp_address().to_string(),
            port: self.local_udp_port()?,
        })
    }

    /// Problems that would stop a lease request from being built
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.lease_enabled() {
            if let Err(e) = url::Url::parse(&self.server_url) {
                errors.push(format!("Server URL '{}' is invalid: {}", self.server_url, e));
            }
            if self.local_udp_endpoint.is_empty() {
                errors.push(format!(
                    "Server '{}' has no local UDP endpoint",
                    self.server_url
                ));
            }
        }

        if let Err(e) = self.local_udp_port() {
            errors.push(e.to_string());
        }

        if self.tls_client_public_key_data.is_empty() != self.tls_client_private_key_data.is_empty() {
            errors.push("Client certificate and private key must be given together".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

// Credentials and key material stay out of logs.
impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redacted(value: &str) -> &'static str {
            if value.is_empty() { "" } else { "<redacted>" }
        }

        f.debug_struct("EndpointConfig")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("local_udp_endpoint", &self.local_udp_endpoint)
            .field("tls_ca_data", &self.tls_ca_data.len())
            .field("tls_client_public_key_data", &self.tls_client_public_key_data.len())
            .field("tls_client_private_key_data", &redacted(&self.tls_client_private_key_data))
            .finish()
    }
}

/// Best guess at the address other hosts use to reach this machine
///
/// Connecting a UDP socket selects the outbound interface without sending
/// anything.
pub fn guess_local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// Default receive endpoint built from the guessed local address
pub fn guess_local_endpoint() -> String {
    let ip = guess_local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string());
    format!("{}:{}", ip, DEFAULT_RECEIVE_PORT)
}
