// ebuswatch-api: Async transports for the ebusd line protocol and device gateways

pub mod backoff;
pub mod daemon;
pub mod error;
pub mod transport;
pub mod websocket;

pub use backoff::{Backoff, BackoffStep, ReconnectConfig};
pub use daemon::{DaemonConnection, LineConnection};
pub use error::Error;
pub use transport::{DEFAULT_PORT, TransportConfig};
pub use websocket::{DeviceCommand, DeviceMessage, DeviceSocket, SocketConfig};
