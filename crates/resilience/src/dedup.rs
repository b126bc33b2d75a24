//! Request deduplication: single-flight plus a short reuse window.
//!
//! Concurrent callers with the same key share one in-flight execution. A
//! successful result stays reusable for a TTL after it settles, so a read that
//! arrives just after an identical one completed is answered without another
//! external call. Failures are shared with everyone already waiting, then
//! dropped so the next caller tries again.

use sheetgate_core::Error;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

/// Whether a caller ran the work itself or received another caller's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Executed,
    Shared,
}

/// An outcome together with how this caller obtained it.
#[derive(Debug)]
pub struct Deduped<V> {
    pub outcome: Result<V, Error>,
    pub origin: Origin,
}

impl<V> Deduped<V> {
    pub fn is_shared(&self) -> bool {
        self.origin == Origin::Shared
    }
}

struct Settled<V> {
    outcome: Result<V, Error>,
    at: Instant,
}

struct Slot<V> {
    cell: OnceCell<Settled<V>>,
    ttl: Duration,
}

impl<V> Slot<V> {
    fn new(ttl: Duration) -> Self {
        Self {
            cell: OnceCell::new(),
            ttl,
        }
    }

    fn is_settled(&self) -> bool {
        self.cell.initialized()
    }

    /// In-flight slots never expire.
    fn expired(&self, now: Instant) -> bool {
        self.cell
            .get()
            .is_some_and(|s| now.saturating_duration_since(s.at) >= self.ttl)
    }
}

/// Keyed single-flight cache shared across every caller of the engine.
pub struct RequestDeduplicator<V> {
    default_ttl: Duration,
    entries: Mutex<HashMap<String, Arc<Slot<V>>>>,
}

impl<V: Clone + Send + Sync + 'static> RequestDeduplicator<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot<V>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` once per key, sharing its outcome with concurrent callers and
    /// with callers that arrive within the default TTL after it succeeded.
    pub async fn dedupe<F, Fut>(&self, key: &str, f: F) -> Result<V, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, Error>>,
    {
        self.dedupe_with_ttl(key, self.default_ttl, f).await
    }

    /// Like [`dedupe`](Self::dedupe) with a per-call reuse window. The TTL is
    /// fixed by whichever caller creates the entry.
    pub async fn dedupe_with_ttl<F, Fut>(&self, key: &str, ttl: Duration, f: F) -> Result<V, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, Error>>,
    {
        self.dedupe_tracked(key, ttl, f).await.outcome
    }

    /// Like [`dedupe_with_ttl`](Self::dedupe_with_ttl), also reporting whether
    /// this caller executed `f` or joined someone else's execution.
    pub async fn dedupe_tracked<F, Fut>(&self, key: &str, ttl: Duration, f: F) -> Deduped<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, Error>>,
    {
        let slot = {
            let now = Instant::now();
            let mut entries = self.lock();
            entries.retain(|_, slot| !slot.expired(now));
            match entries.get(key) {
                Some(existing) => {
                    debug!(key, settled = existing.is_settled(), "Joining deduplicated request");
                    existing.clone()
                }
                None => {
                    let slot = Arc::new(Slot::new(ttl));
                    entries.insert(key.to_string(), slot.clone());
                    slot
                }
            }
        };

        let executed = AtomicBool::new(false);
        let executed_ref = &executed;
        let settled = slot
            .cell
            .get_or_init(|| async move {
                executed_ref.store(true, Ordering::Relaxed);
                Settled {
                    outcome: f().await,
                    at: Instant::now(),
                }
            })
            .await;
        let outcome = settled.outcome.clone();

        if outcome.is_err() {
            let mut entries = self.lock();
            if entries.get(key).is_some_and(|cur| Arc::ptr_eq(cur, &slot)) {
                entries.remove(key);
            }
        }

        let origin = if executed.load(Ordering::Relaxed) {
            Origin::Executed
        } else {
            Origin::Shared
        };
        Deduped { outcome, origin }
    }

    /// Drop settled entries whose key matches `predicate`. In-flight entries
    /// are left alone so their waiters still share one execution.
    pub fn invalidate(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, slot| !(slot.is_settled() && predicate(key)));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Invalidated deduplicated results");
        }
        removed
    }

    /// Live entries, including in-flight ones and not-yet-purged expired ones.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
