// ── Observer registry ──
//
// Keyed lists of async callbacks, invoked sequentially in registration
// order. A callback returning `Err` is logged and the fan-out continues.
// Registration returns a `Subscription`; dropping it unregisters.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tracing::warn;

/// Error type observers may return.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Result every observer future resolves to.
pub type ObserverResult = Result<(), ObserverError>;

type Callback<A> = Arc<dyn Fn(A) -> BoxFuture<'static, ObserverResult> + Send + Sync>;

struct Entry<A> {
    id: u64,
    callback: Callback<A>,
}

struct Inner<K, A> {
    by_key: DashMap<K, Vec<Entry<A>>>,
    next_id: AtomicU64,
}

/// Registry of async callbacks keyed by `K`, each receiving an `A`.
///
/// Duplicate registrations are allowed and each one fires.
pub struct Registry<K, A> {
    inner: Arc<Inner<K, A>>,
}

impl<K, A> Registry<K, A>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    A: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                by_key: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Append `callback` to the list for `key`.
    pub fn register<F, Fut>(&self, key: K, callback: F) -> Subscription
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ObserverResult> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback<A> =
            Arc::new(move |arg: A| -> BoxFuture<'static, ObserverResult> { Box::pin(callback(arg)) });
        self.inner
            .by_key
            .entry(key.clone())
            .or_default()
            .push(Entry { id, callback });

        let weak: Weak<Inner<K, A>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Some(mut entries) = inner.by_key.get_mut(&key) {
                    entries.retain(|e| e.id != id);
                }
            }
        })
    }

    /// Number of callbacks currently registered for `key`.
    pub fn count(&self, key: &K) -> usize {
        self.inner.by_key.get(key).map_or(0, |e| e.len())
    }

    /// Invoke every callback for `key` in registration order, awaiting each.
    ///
    /// Returns how many callbacks failed.
    pub async fn notify(&self, key: &K, arg: A) -> usize
    where
        K: fmt::Display,
    {
        // Clone the callbacks out so no map guard is held across an await.
        let callbacks: Vec<Callback<A>> = self
            .inner
            .by_key
            .get(key)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.callback)).collect())
            .unwrap_or_default();

        let mut failed = 0;
        for callback in callbacks {
            if let Err(e) = callback(arg.clone()).await {
                failed += 1;
                warn!(key = %key, error = %e, "observer failed");
            }
        }
        failed
    }
}

impl<K, A> Default for Registry<K, A>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    A: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Handle returned by a registration. Dropping it unregisters the callback;
/// [`detach`](Self::detach) keeps it registered for the registry's lifetime.
#[must_use = "dropping a Subscription unregisters the observer immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Unregister now.
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }

    /// Keep the observer registered after this handle is gone.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
