use thiserror::Error;

/// Top-level error type for the `ebuswatch-api` crate.
///
/// Covers every failure mode of both transports: the ebusd line protocol
/// and the device-gateway WebSocket. `ebuswatch-core` decides which of these
/// tear down a connection and which only affect a single field.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// TCP or WebSocket connect failed (refused, DNS failure, etc.)
    #[error("Cannot connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// Socket-level I/O failure on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request or read exceeded its deadline.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Peer closed the connection (EOF or close frame).
    #[error("Connection closed by peer")]
    Closed,

    /// Operation attempted without an open connection.
    #[error("Not connected")]
    NotConnected,

    // ── Daemon protocol ─────────────────────────────────────────────
    /// The daemon answered a command with `ERR: <message>`.
    #[error("Command failed: {message}")]
    Command { message: String },

    /// The daemon answered with something the protocol does not allow.
    #[error("Unexpected response: {0}")]
    Protocol(String),

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket handshake or framing failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON (de)serialization failed.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Returns `true` if the connection this error came from is no longer
    /// usable and must be re-established.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::Io(_)
                | Self::Timeout { .. }
                | Self::Closed
                | Self::NotConnected
                | Self::Protocol(_)
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the daemon rejected the command itself.
    pub fn is_command(&self) -> bool {
        matches!(self, Self::Command { .. })
    }

    /// Returns `true` if the daemon reported that the bus has no signal.
    ///
    /// This is a bus-wide condition, not a statement about a single field.
    pub fn is_no_signal(&self) -> bool {
        matches!(self, Self::Command { message } if message == "no signal")
    }

    pub(crate) fn timeout(deadline: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
