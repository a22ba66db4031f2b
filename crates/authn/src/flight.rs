//! Single-flight deduplication of cache fills.
//!
//! When many callers miss the same cache entry at once, only the first one
//! starts a fetch; the rest await its result. The fetch runs as its own Tokio
//! task, so a caller that gives up (request cancelled, handler dropped) does
//! not abort the fetch other callers are waiting on. The task still finishes
//! or times out on its own deadline.
//!
//! ```text
//! caller A ──┐                  ┌── spawn(load) ── result ──┐
//! caller B ──┼── run(key) ──────┤                           ├── A, B, C
//! caller C ──┘   (joins A)      └── remove(key) on finish ──┘
//! ```
//!
//! Loaders are expected to populate their cache before returning and to
//! re-check it first, so a caller arriving just after a flight lands reads
//! the cache instead of starting another fetch.

use std::{collections::HashMap, future::Future, hash::Hash, sync::Arc};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::{AuthError, Result};

type SharedLoad<V> = Shared<BoxFuture<'static, Result<V>>>;

/// Keyed single-flight executor.
pub struct SingleFlight<K, V> {
    inflight: Arc<Mutex<HashMap<K, SharedLoad<V>>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an executor with no flights.
    #[must_use]
    pub fn new() -> Self {
        Self { inflight: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Returns the result of the flight for `key`, starting one with `load`
    /// if none is running.
    ///
    /// `load` is only invoked by the caller that starts the flight.
    ///
    /// # Errors
    ///
    /// Returns the loader's error to every waiter, or [`AuthError::Internal`]
    /// if the fetch task panicked.
    pub async fn run<F, Fut>(&self, key: K, load: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some(existing) => {
                    tracing::debug!(flight = "join", "awaiting in-flight fetch");
                    existing.clone()
                },
                None => {
                    let fetch = load();
                    let registry = Arc::clone(&self.inflight);
                    let task_key = key.clone();
                    // The entry is inserted below while this lock is held, so
                    // the task's removal can never precede the insert.
                    let handle = tokio::spawn(async move {
                        let result = fetch.await;
                        registry.lock().remove(&task_key);
                        result
                    });
                    let flight = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(err) => Err(AuthError::internal(format!("fetch task failed: {err}"))),
                        }
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, flight.clone());
                    flight
                },
            }
        };
        flight.await
    }

    /// Number of flights currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for SingleFlight<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight").field("in_flight", &self.inflight.lock().len()).finish()
    }
}
