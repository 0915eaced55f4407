// Shared transport configuration for ebusd line connections.
//
// Every connection a loop owns is built from the same host, port and
// deadlines, so the tuning lives in one place.

use std::time::Duration;

/// Default ebusd TCP port.
pub const DEFAULT_PORT: u16 = 8888;

/// Connection parameters for a single ebusd TCP connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Deadline for a single request/response exchange.
    pub request_timeout: Duration,
    /// Maximum silence tolerated on a listening connection before it is
    /// considered dead.
    pub idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl TransportConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// `host:port` as used for connecting and in log fields.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
