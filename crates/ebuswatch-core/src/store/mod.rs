// ── State Store ──
//
// The single place Monitor and Poll loops write decoded values into.
// Each key's entry lives in a concurrent map, so writers to different keys
// never contend and writers to the same key resolve last-write-wins.

mod table;

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::debug;

use crate::catalog::FieldCatalog;
use crate::circuit_map::CircuitMap;
use crate::model::{Availability, CircuitKey, StateEntry, ValueUpdate};
use crate::observer::{ObserverResult, Registry, Subscription};
use crate::stream::StateStream;

pub use table::{KeyedState, Snapshot};

use table::StateTable;

/// Shared table of current values, availability and freshness per key,
/// plus the observer registry notified on every change.
pub struct StateStore {
    table: StateTable,
    observers: Registry<CircuitKey, ()>,
}

impl StateStore {
    /// Track exactly `keys`, in the given order.
    pub fn new(keys: impl IntoIterator<Item = CircuitKey>) -> Self {
        Self {
            table: StateTable::new(keys),
            observers: Registry::new(),
        }
    }

    /// Track the cross product of configured circuits and their catalog
    /// fields.
    pub fn from_catalog(circuits: &CircuitMap, catalog: &dyn FieldCatalog) -> Self {
        let keys = circuits.iter_circuits().flat_map(|circuit| {
            catalog
                .fields_for(circuit)
                .into_iter()
                .map(move |field| CircuitKey::new(circuit, field))
        });
        Self::new(keys.collect::<Vec<_>>())
    }

    /// Tracked keys in stable order.
    pub fn keys(&self) -> &[CircuitKey] {
        self.table.keys()
    }

    pub fn get(&self, key: &CircuitKey) -> Option<StateEntry> {
        self.table.get(key)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Store a decoded value and notify the key's observers.
    ///
    /// Sets the entry `Available` and stamps `last_seen` with the current
    /// time. Returns `false` (and notifies nobody) for untracked keys.
    pub async fn apply(&self, update: ValueUpdate) -> bool {
        let key = update.key();
        let ValueUpdate { value, attrs, .. } = update;
        let applied = self.table.update(&key, |entry| {
            entry.value = Some(value);
            entry.attrs = attrs;
            entry.availability = Availability::Available;
            entry.last_seen = Some(Instant::now());
            entry.updated_at = Some(Utc::now());
        });
        if !applied {
            debug!(key = %key, "ignoring update for untracked key");
            return false;
        }
        self.observers.notify(&key, ()).await;
        true
    }

    /// Mark one key as absent on the installation. Value and `last_seen`
    /// are kept. Observers are not notified.
    pub fn mark_unavailable(&self, key: &CircuitKey) -> bool {
        self.table.update(key, |entry| {
            entry.availability = Availability::Unavailable;
        })
    }

    /// Clear every entry back to `Unknown` and notify every observer of
    /// every key, in key order.
    pub async fn reset_all(&self) {
        self.table.clear_all();
        for key in self.table.keys() {
            self.observers.notify(key, ()).await;
        }
    }

    // ── Observers ────────────────────────────────────────────────────

    /// Register `callback` to run after every `apply` to `key` and on
    /// `reset_all`. The callback takes no arguments and is expected to
    /// re-read state through [`get`](Self::get).
    pub fn add_observer<F, Fut>(&self, key: CircuitKey, callback: F) -> Subscription
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ObserverResult> + Send + 'static,
    {
        self.observers.register(key, move |()| callback())
    }

    pub fn observer_count(&self, key: &CircuitKey) -> usize {
        self.observers.count(key)
    }

    // ── Snapshots ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Snapshot {
        self.table.snapshot()
    }

    /// Subscribe to snapshot changes of the whole table.
    pub fn subscribe(&self) -> StateStream {
        StateStream::new(self.table.subscribe())
    }

    /// Mutation counter, bumped on every change.
    pub fn version(&self) -> u64 {
        self.table.version()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("keys", &self.table.len())
            .field("version", &self.table.version())
            .finish_non_exhaustive()
    }
}
