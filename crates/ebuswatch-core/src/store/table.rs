// ── Reactive state table ──
//
// Concurrent per-key storage with a stable key order and push-based
// change notification via `watch` channels.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{CircuitKey, StateEntry};

/// One row of a [`Snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedState {
    pub key: CircuitKey,
    pub state: StateEntry,
}

/// Every tracked key with its state, in stable key order.
pub type Snapshot = Arc<Vec<Arc<KeyedState>>>;

/// Fixed set of keys, created once. Entries are mutated in place and never
/// removed.
pub(crate) struct StateTable {
    /// Stable iteration order, as configured.
    order: Vec<CircuitKey>,

    entries: DashMap<CircuitKey, StateEntry>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,

    /// Full snapshot, rebuilt on mutation for cheap subscription reads.
    snapshot: watch::Sender<Snapshot>,
}

impl StateTable {
    /// Build with one `Unknown` entry per distinct key. Duplicates keep
    /// their first position.
    pub(crate) fn new(keys: impl IntoIterator<Item = CircuitKey>) -> Self {
        let entries = DashMap::new();
        let mut order = Vec::new();
        for key in keys {
            if entries.insert(key.clone(), StateEntry::default()).is_none() {
                order.push(key);
            }
        }

        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let table = Self {
            order,
            entries,
            version,
            snapshot,
        };
        table.rebuild_snapshot();
        table
    }

    pub(crate) fn keys(&self) -> &[CircuitKey] {
        &self.order
    }

    pub(crate) fn get(&self, key: &CircuitKey) -> Option<StateEntry> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    /// Mutate one entry. Returns `false` if the key is not tracked.
    pub(crate) fn update(&self, key: &CircuitKey, f: impl FnOnce(&mut StateEntry)) -> bool {
        {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return false;
            };
            f(entry.value_mut());
        }
        self.rebuild_snapshot();
        self.bump_version();
        true
    }

    /// Replace every entry with `Unknown`.
    pub(crate) fn clear_all(&self) {
        for mut entry in self.entries.iter_mut() {
            *entry.value_mut() = StateEntry::default();
        }
        self.rebuild_snapshot();
        self.bump_version();
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Rebuild under the channel's write lock so concurrent writers publish
    /// in completion order.
    fn rebuild_snapshot(&self) {
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| {
            let rows: Vec<Arc<KeyedState>> = self
                .order
                .iter()
                .filter_map(|key| {
                    self.entries.get(key).map(|state| {
                        Arc::new(KeyedState {
                            key: key.clone(),
                            state: state.value().clone(),
                        })
                    })
                })
                .collect();
            *snap = Arc::new(rows);
        });
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}
