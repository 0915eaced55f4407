// ── Runtime gateway configuration ──
//
// Describes what to connect to and how often to poll. Never touches disk:
// the config crate (or a test) builds a `GatewayConfig` and hands it in.

use std::time::Duration;

use ebuswatch_api::{ReconnectConfig, SocketConfig, TransportConfig};
use url::Url;

use crate::circuit_map::CircuitMap;
use crate::poll::PollSettings;

/// Configuration for one daemon plus an optional device gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Daemon address and per-connection deadlines. `request_timeout`
    /// doubles as the poll read timeout; `idle_timeout` bounds the
    /// listening stream.
    pub transport: TransportConfig,
    /// Configured circuits and their labels.
    pub circuits: CircuitMap,
    /// Pause between poll reads and grace after connect. Zero disables
    /// the Poll loop.
    pub poll_interval: Duration,
    /// Freshness timeout.
    pub timeout: Duration,
    /// Zero disables the Status loop.
    pub status_interval: Duration,
    pub reconnect: ReconnectConfig,
    pub device_gateway: Option<DeviceGatewayConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            circuits: CircuitMap::default(),
            poll_interval: Duration::from_secs(20),
            timeout: Duration::from_secs(300),
            status_interval: Duration::from_secs(20),
            reconnect: ReconnectConfig::default(),
            device_gateway: None,
        }
    }
}

impl GatewayConfig {
    pub fn poll_enabled(&self) -> bool {
        !self.poll_interval.is_zero()
    }

    pub fn status_enabled(&self) -> bool {
        !self.status_interval.is_zero()
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.poll_interval,
            timeout: self.timeout,
            read_timeout: self.transport.request_timeout,
        }
    }
}

/// WebSocket device gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceGatewayConfig {
    /// `ws://host:port/ws`
    pub url: Url,
    /// Display name.
    pub name: String,
    /// JSON frames sent after every connect.
    pub init_commands: Vec<serde_json::Value>,
    pub connect_timeout: Duration,
    /// Silence tolerated before reconnecting. Pings go out halfway.
    pub idle_timeout: Duration,
}

impl DeviceGatewayConfig {
    /// A gateway at `url` with default deadlines and no init commands.
    pub fn new(url: Url, name: impl Into<String>) -> Self {
        let defaults = SocketConfig::default();
        Self {
            url,
            name: name.into(),
            init_commands: Vec::new(),
            connect_timeout: defaults.connect_timeout,
            idle_timeout: defaults.idle_timeout,
        }
    }

    pub fn socket_config(&self, reconnect: &ReconnectConfig) -> SocketConfig {
        SocketConfig {
            reconnect: reconnect.clone(),
            connect_timeout: self.connect_timeout,
            idle_timeout: self.idle_timeout,
            init_commands: self.init_commands.clone(),
        }
    }
}
