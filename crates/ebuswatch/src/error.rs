//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use ebuswatch_config::ConfigError;
use ebuswatch_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to ebusd at {addr}")]
    #[diagnostic(
        code(ebuswatch::connection_failed),
        help(
            "Check that ebusd is running with --enabletcp and reachable.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { addr: String, reason: String },

    #[error("Connection lost: {reason}")]
    #[diagnostic(code(ebuswatch::disconnected))]
    Disconnected { reason: String },

    #[error("Request timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(ebuswatch::timeout),
        help("Raise daemon.read_timeout or check the bus load.")
    )]
    Timeout { timeout_ms: u64 },

    // ── Daemon ───────────────────────────────────────────────────────
    #[error("ebusd rejected the command: {message}")]
    #[diagnostic(
        code(ebuswatch::rejected),
        help("Run: ebuswatch info  to check which circuits the daemon knows")
    )]
    Rejected { message: String },

    #[error("No signal on the bus")]
    #[diagnostic(
        code(ebuswatch::no_signal),
        help("ebusd is running but does not see the bus adapter. Check the adapter and wiring.")
    )]
    NoSignal,

    #[error("Unexpected daemon reply: {message}")]
    #[diagnostic(code(ebuswatch::protocol))]
    Protocol { message: String },

    // ── Device gateway ───────────────────────────────────────────────
    #[error("No device gateway configured")]
    #[diagnostic(
        code(ebuswatch::no_device_gateway),
        help("Add a [device_gateway] section with at least `host` to {path}")
    )]
    NoDeviceGateway { path: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ebuswatch::validation))]
    Validation { field: String, reason: String },

    #[error("Configuration could not be loaded")]
    #[diagnostic(
        code(ebuswatch::config),
        help("Check the file at {path} and any EBUSWATCH_* environment variables.")
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected { .. } | Self::NoSignal => {
                exit_code::CONNECTION
            }
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Rejected { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::NoDeviceGateway { .. } | Self::Config { .. } => {
                exit_code::USAGE
            }
            Self::Protocol { .. } | Self::Io(_) => exit_code::GENERAL,
        }
    }

    pub fn config(path: &std::path::Path, source: ConfigError) -> Self {
        match source {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            source => Self::Config {
                path: path.display().to_string(),
                source,
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { addr, reason } => Self::ConnectionFailed { addr, reason },
            CoreError::Disconnected { reason } => Self::Disconnected { reason },
            CoreError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            CoreError::Rejected { message } => Self::Rejected { message },
            CoreError::NoSignal => Self::NoSignal,
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            other => Self::Protocol {
                message: other.to_string(),
            },
        }
    }
}

impl From<ebuswatch_api::Error> for CliError {
    fn from(err: ebuswatch_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
