// ── Core error types ──
//
// `DecodeError` is per-line and never tears down a connection.
// `CoreError` is what one-shot callers (CLI) see; the `From` impl
// translates transport-layer errors into domain variants.

use thiserror::Error;

/// A single line or reply could not be turned into value updates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The line does not have the expected shape, or the value does not
    /// parse for its unit.
    #[error("Malformed line {line:?}: {reason}")]
    Format { line: String, reason: String },

    /// The line parsed, but names a circuit or field the catalog does not know.
    #[error("Unknown field {field:?} on circuit {circuit:?}")]
    Unknown { circuit: String, field: String },
}

impl DecodeError {
    pub(crate) fn format(line: &str, reason: impl Into<String>) -> Self {
        Self::Format {
            line: line.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    #[error("Connection lost: {reason}")]
    Disconnected { reason: String },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Daemon errors ────────────────────────────────────────────────
    #[error("Daemon rejected command: {message}")]
    Rejected { message: String },

    #[error("No signal on the bus")]
    NoSignal,

    // ── Data errors ──────────────────────────────────────────────────
    #[error(transparent)]
    Decode(#[from] DecodeError),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<ebuswatch_api::Error> for CoreError {
    fn from(err: ebuswatch_api::Error) -> Self {
        use ebuswatch_api::Error as Api;
        match err {
            Api::Connect { addr, reason } => CoreError::ConnectionFailed { addr, reason },
            Api::Timeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            Api::Command { message } if message == "no signal" => CoreError::NoSignal,
            Api::Command { message } => CoreError::Rejected { message },
            Api::Io(e) => CoreError::Disconnected {
                reason: e.to_string(),
            },
            e @ (Api::Closed | Api::NotConnected) => CoreError::Disconnected {
                reason: e.to_string(),
            },
            Api::Protocol(msg) => CoreError::Internal(format!("Protocol error: {msg}")),
            Api::WebSocket(reason) => CoreError::Disconnected {
                reason: format!("WebSocket: {reason}"),
            },
            Api::Json(e) => CoreError::Internal(format!("Deserialization error: {e}")),
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_signal_maps_to_dedicated_variant() {
        let err: CoreError = ebuswatch_api::Error::Command {
            message: "no signal".into(),
        }
        .into();
        assert!(matches!(err, CoreError::NoSignal));
    }

    #[test]
    fn command_error_is_rejection() {
        let err: CoreError = ebuswatch_api::Error::Command {
            message: "element not found".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Rejected { ref message } if message == "element not found"));
    }

    #[test]
    fn closed_is_disconnected() {
        let err: CoreError = ebuswatch_api::Error::Closed.into();
        assert!(matches!(err, CoreError::Disconnected { .. }));
    }
}
