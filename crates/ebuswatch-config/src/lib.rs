//! Configuration for the ebuswatch binary.
//!
//! TOML file + `EBUSWATCH_` environment merging, validation, and
//! translation to the runtime types of `ebuswatch_core`: a
//! [`GatewayConfig`], a [`StaticCatalog`] and a [`UnitTable`].

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use ebuswatch_api::{DEFAULT_PORT, ReconnectConfig, TransportConfig};
use ebuswatch_core::{
    CircuitMap, DeviceGatewayConfig, FieldDescriptor, GatewayConfig, StaticCatalog, Unit,
    UnitTable,
};

/// Environment prefix; nested keys are separated by `__`, e.g.
/// `EBUSWATCH_DAEMON__HOST`.
pub const ENV_PREFIX: &str = "EBUSWATCH_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonSection,

    /// Field catalog, one entry per circuit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catalog: Vec<CatalogEntry>,

    /// Overrides and additions to the built-in unit table.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub units: BTreeMap<String, Unit>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_gateway: Option<DeviceGatewaySection>,
}

/// `[daemon]`: the ebusd instance to watch. Intervals are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DaemonSection {
    /// Hostname or IP address. Required.
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Pause between poll reads. 0 disables polling.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// How long a value stays fresh.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Deadline for a single read request.
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,

    /// Maximum silence on the listen stream before reconnecting.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Pause between `info` refreshes. 0 disables the status loop.
    #[serde(default = "default_status_interval")]
    pub status_interval: u64,

    /// Circuit identifier → human label.
    #[serde(default)]
    pub circuits: BTreeMap<String, String>,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            poll_interval: default_poll_interval(),
            timeout: default_timeout(),
            read_timeout: default_read_timeout(),
            idle_timeout: default_idle_timeout(),
            status_interval: default_status_interval(),
            circuits: BTreeMap::new(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_poll_interval() -> u64 {
    20
}
fn default_timeout() -> u64 {
    300
}
fn default_read_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_status_interval() -> u64 {
    20
}

/// `[[catalog]]`: the fields one circuit exposes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CatalogEntry {
    pub circuit: String,
    #[serde(default)]
    pub fields: Vec<FieldEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldEntry {
    /// Field name as the daemon knows it.
    pub name: String,
    /// Display title. Defaults to the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Key into the unit table.
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Status fields report themselves on the listen stream.
    #[serde(default)]
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

fn default_unit() -> String {
    "text".into()
}

/// `[device_gateway]`: optional WebSocket I/O gateway.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceGatewaySection {
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default = "default_gateway_name")]
    pub name: String,
    /// JSON frames sent after every connect.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_commands: Vec<serde_json::Value>,
    /// Deadline for the WebSocket handshake, in seconds.
    #[serde(default = "default_gateway_connect_timeout")]
    pub connect_timeout: u64,
    /// Maximum silence before reconnecting, in seconds.
    #[serde(default = "default_gateway_idle_timeout")]
    pub idle_timeout: u64,
}

fn default_gateway_port() -> u16 {
    80
}
fn default_gateway_connect_timeout() -> u64 {
    10
}
fn default_gateway_idle_timeout() -> u64 {
    120
}
fn default_gateway_name() -> String {
    "UniPi".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "ebuswatch", "ebuswatch").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("ebuswatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from defaults, the TOML file and the environment, in
/// that order of precedence (later wins).
///
/// An explicit `path` must exist; the default path may be missing.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) if !p.exists() => {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", p.display()),
            )));
        }
        Some(p) => p.to_path_buf(),
        None => config_path(),
    };
    debug!(path = %path.display(), "loading config");

    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    Ok(config)
}

impl Config {
    /// Render as TOML, as `config show` prints it.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check everything that can be checked without connecting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_host("daemon.host", &self.daemon.host)?;
        validate_port("daemon.port", self.daemon.port)?;
        validate_seconds("daemon.timeout", self.daemon.timeout)?;
        validate_seconds("daemon.read_timeout", self.daemon.read_timeout)?;
        validate_seconds("daemon.idle_timeout", self.daemon.idle_timeout)?;
        if let Some(gateway) = &self.device_gateway {
            validate_host("device_gateway.host", &gateway.host)?;
            validate_port("device_gateway.port", gateway.port)?;
            validate_seconds("device_gateway.connect_timeout", gateway.connect_timeout)?;
            validate_seconds("device_gateway.idle_timeout", gateway.idle_timeout)?;
        }
        for entry in &self.catalog {
            for field in &entry.fields {
                if field.name.trim().is_empty() {
                    return Err(ConfigError::validation(
                        format!("catalog.{}", entry.circuit),
                        "field name must not be empty",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Validate and build the runtime gateway configuration.
    pub fn gateway_config(&self) -> Result<GatewayConfig, ConfigError> {
        self.validate()?;
        let daemon = &self.daemon;

        let transport = TransportConfig {
            request_timeout: Duration::from_secs(daemon.read_timeout),
            idle_timeout: Duration::from_secs(daemon.idle_timeout),
            ..TransportConfig::new(daemon.host.trim(), daemon.port)
        };

        let device_gateway = self
            .device_gateway
            .as_ref()
            .map(DeviceGatewaySection::to_runtime)
            .transpose()?;

        Ok(GatewayConfig {
            transport,
            circuits: CircuitMap::new(daemon.circuits.clone()),
            poll_interval: Duration::from_secs(daemon.poll_interval),
            timeout: Duration::from_secs(daemon.timeout),
            status_interval: Duration::from_secs(daemon.status_interval),
            reconnect: ReconnectConfig::default(),
            device_gateway,
        })
    }

    /// The configured field catalog. Entries for circuits that are not
    /// listed under `[daemon.circuits]` are kept but logged.
    pub fn field_catalog(&self) -> StaticCatalog {
        let mut catalog = StaticCatalog::new();
        for entry in &self.catalog {
            if !self.daemon.circuits.contains_key(&entry.circuit) {
                warn!(circuit = %entry.circuit, "catalog entry for unconfigured circuit");
            }
            for field in &entry.fields {
                catalog.insert(entry.circuit.clone(), field.to_descriptor());
            }
        }
        catalog
    }

    /// Built-in units with the configured overrides applied.
    pub fn unit_table(&self) -> UnitTable {
        let mut units = UnitTable::builtin();
        units.merge(self.units.clone());
        units
    }
}

impl FieldEntry {
    fn to_descriptor(&self) -> FieldDescriptor {
        let title = self.title.clone().unwrap_or_else(|| self.name.clone());
        let mut field = FieldDescriptor::new(self.name.clone(), title, self.unit.clone());
        if self.status {
            field = field.status();
        }
        if let Some(icon) = &self.icon {
            field = field.with_icon(icon.clone());
        }
        field
    }
}

impl DeviceGatewaySection {
    /// `ws://host:port/ws`.
    pub fn url(&self) -> Result<url::Url, ConfigError> {
        let host = self.host.trim();
        let host = match host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
            _ => host.to_owned(),
        };
        format!("ws://{host}:{}/ws", self.port)
            .parse()
            .map_err(|e: url::ParseError| ConfigError::validation("device_gateway.host", e.to_string()))
    }

    /// Runtime form, without the `[daemon]` checks of [`Config::validate`].
    pub fn to_runtime(&self) -> Result<DeviceGatewayConfig, ConfigError> {
        Ok(DeviceGatewayConfig {
            url: self.url()?,
            name: self.name.clone(),
            init_commands: self.init_commands.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            idle_timeout: Duration::from_secs(self.idle_timeout),
        })
    }
}

// ── Validation helpers ──────────────────────────────────────────────

/// Timeouts are whole seconds and must be non-zero.
fn validate_seconds(field: &str, seconds: u64) -> Result<(), ConfigError> {
    if seconds == 0 {
        return Err(ConfigError::validation(field, "must be at least 1 second"));
    }
    Ok(())
}

fn validate_port(field: &str, port: u16) -> Result<(), ConfigError> {
    if port == 0 {
        return Err(ConfigError::validation(field, "port must be non-zero"));
    }
    Ok(())
}

/// Accept an IP address or an RFC 1123 hostname.
fn validate_host(field: &str, host: &str) -> Result<(), ConfigError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ConfigError::validation(field, "host is required"));
    }
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    let host = host.strip_suffix('.').unwrap_or(host);
    if host.len() > 253 {
        return Err(ConfigError::validation(field, "hostname too long"));
    }
    let valid = host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if valid {
        Ok(())
    } else {
        Err(ConfigError::validation(
            field,
            format!("'{host}' is neither an IP address nor a valid hostname"),
        ))
    }
}
