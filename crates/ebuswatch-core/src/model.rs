// ── Domain model ──
//
// Field descriptors, tracked keys, decoded values and per-key state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ── FieldDescriptor ──────────────────────────────────────────────────

/// Static description of one field on a circuit, as provided by a
/// [`FieldCatalog`](crate::catalog::FieldCatalog).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name as the daemon knows it (e.g. `FlowTempDesired`).
    pub name: String,
    /// Human title.
    pub title: String,
    /// Key into the [`UnitTable`](crate::units::UnitTable).
    pub unit_name: String,
    /// `true` if the daemon pushes this field on its own; such fields are
    /// never polled once seen.
    pub is_status: bool,
    /// Optional icon hint overriding the unit's icon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, title: impl Into<String>, unit_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            unit_name: unit_name.into(),
            is_status: false,
            icon: None,
        }
    }

    /// Mark as a self-reporting status field.
    pub fn status(mut self) -> Self {
        self.is_status = true;
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

// ── CircuitKey ───────────────────────────────────────────────────────

/// Identity of one tracked data point: a field on a circuit.
///
/// Equality and hashing are structural, so two keys built from equal
/// descriptors address the same state entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CircuitKey {
    pub circuit: String,
    pub field: Arc<FieldDescriptor>,
}

impl CircuitKey {
    pub fn new(circuit: impl Into<String>, field: Arc<FieldDescriptor>) -> Self {
        Self {
            circuit: circuit.into(),
            field,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field.name
    }
}

impl fmt::Display for CircuitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.circuit, self.field.name)
    }
}

// ── Value ────────────────────────────────────────────────────────────

/// A decoded scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("on"),
            Self::Bool(false) => f.write_str("off"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Auxiliary decoded attributes, e.g. schedule time frames.
pub type Attrs = BTreeMap<String, Value>;

// ── ValueUpdate ──────────────────────────────────────────────────────

/// One decoded value for one key, produced by a [`Decoder`](crate::decoder::Decoder).
#[derive(Debug, Clone, PartialEq)]
pub struct ValueUpdate {
    pub circuit: String,
    pub field: Arc<FieldDescriptor>,
    pub value: Value,
    pub attrs: Attrs,
}

impl ValueUpdate {
    pub fn key(&self) -> CircuitKey {
        CircuitKey::new(self.circuit.clone(), Arc::clone(&self.field))
    }
}

// ── Availability ─────────────────────────────────────────────────────

/// Whether a key is known to exist on the installation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Nothing heard yet, or state was reset after an outage.
    #[default]
    Unknown,
    /// A fresh value was decoded.
    Available,
    /// The daemon rejected a read for this key, or its reply did not decode.
    Unavailable,
}

impl Availability {
    pub fn is_available(self) -> bool {
        self == Self::Available
    }

    pub fn is_unavailable(self) -> bool {
        self == Self::Unavailable
    }
}

// ── StateEntry ───────────────────────────────────────────────────────

/// Current state of one key.
///
/// Invariant: `availability == Available` implies `last_seen.is_some()` and
/// `value.is_some()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateEntry {
    pub value: Option<Value>,
    pub attrs: Attrs,
    pub availability: Availability,
    /// Monotonic time of the last successful decode.
    pub last_seen: Option<Instant>,
    /// Wall-clock time of the last successful decode, for display.
    pub updated_at: Option<DateTime<Utc>>,
}

impl StateEntry {
    /// `true` if a value was decoded within `timeout` before `now`.
    pub fn is_fresh(&self, now: Instant, timeout: std::time::Duration) -> bool {
        self.last_seen
            .is_some_and(|seen| now.saturating_duration_since(seen) < timeout)
    }
}
