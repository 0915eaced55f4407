//! Connection supervision, polling and reactive state for ebusd.
//!
//! This crate owns everything between the raw transports in
//! `ebuswatch-api` and a consumer (the CLI, or any embedding service):
//!
//! - **[`Gateway`]**: facade that builds the [`StateStore`] from the
//!   configured circuits and the [`FieldCatalog`], then spawns the
//!   long-running loops on [`start()`](Gateway::start) and joins them on
//!   [`shutdown()`](Gateway::shutdown).
//!
//! - **Loops**: [`run_monitor`] decodes the daemon's push stream,
//!   [`run_poll`] explicitly reads stale fields and sleeps adaptively
//!   ([`idle_wait`]), [`run_status`] publishes the daemon `info` report.
//!   All three reconnect with the shared exponential backoff and escalate a
//!   sustained outage to a single [`StateStore::reset_all`].
//!
//! - **[`StateStore`]**: per-key value, attributes, [`Availability`] and
//!   freshness, with ordered per-key observers ([`Subscription`] handles)
//!   and whole-table snapshots via [`StateStream`].
//!
//! - **[`Decoder`]** / **[`LineDecoder`]**: turns one daemon line into
//!   typed [`ValueUpdate`]s using the catalog and the [`UnitTable`].
//!
//! - **[`Writer`]**: fire-and-forget value writes.
//!
//! - **[`DeviceDispatcher`]**: routes WebSocket device-gateway messages to
//!   per-device callbacks.

pub mod catalog;
pub mod circuit_map;
pub mod config;
pub mod decoder;
pub mod devices;
pub mod error;
pub mod gateway;
pub mod model;
pub mod monitor;
pub mod observer;
pub mod poll;
pub mod status;
pub mod store;
pub mod stream;
pub mod units;
pub mod writer;

mod supervise;
#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use catalog::{FieldCatalog, StaticCatalog};
pub use circuit_map::CircuitMap;
pub use config::{DeviceGatewayConfig, GatewayConfig};
pub use decoder::{Decoder, LineDecoder};
pub use devices::{DeviceDispatcher, DeviceKey, norm_circuit, set_output};
pub use error::{CoreError, DecodeError};
pub use gateway::Gateway;
pub use model::{
    Attrs, Availability, CircuitKey, FieldDescriptor, StateEntry, Value, ValueUpdate,
};
pub use monitor::run_monitor;
pub use observer::{ObserverError, ObserverResult, Subscription};
pub use poll::{PollSettings, idle_wait, needs_poll, run_poll};
pub use status::{DaemonStatus, parse_info, run_status};
pub use store::{KeyedState, Snapshot, StateStore};
pub use stream::StateStream;
pub use units::{Unit, UnitKind, UnitTable};
pub use writer::Writer;
