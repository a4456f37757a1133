//! Heuristic consistency guard.
//!
//! Right after a bucket's usage has been flushed to the backend, a cached
//! "authorized" decision for that credential may be stale: the flush could
//! have pushed it over a limit. The guard opens a short window per bucket
//! during which the orchestrator must verify with the backend instead of
//! trusting the cache.

use crate::application::ports::{Clock, Storage};
use crate::domain::fingerprint::BucketKey;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tracks forced re-verification windows per bucket.
///
/// Stores the instant at which each window closes. Closed windows are
/// dropped lazily on lookup and in bulk by `prune`.
#[derive(Clone)]
pub struct ConsistencyGuard<S>
where
    S: Storage<BucketKey, Instant> + Clone,
{
    storage: S,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl<S> ConsistencyGuard<S>
where
    S: Storage<BucketKey, Instant> + Clone,
{
    pub fn new(storage: S, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            storage,
            clock,
            window,
        }
    }

    /// Whether requests in `bucket` must bypass the cache right now.
    pub fn is_forced_sync(&self, bucket: &BucketKey) -> bool {
        let now = self.clock.now();
        match self.storage.update(bucket, |until| *until) {
            Some(until) if now < until => true,
            Some(_) => {
                self.storage.remove_if(bucket, |until| now >= *until);
                false
            }
            None => false,
        }
    }

    /// Open (or restart) the forced-sync window for `bucket`.
    pub fn mark_flushed(&self, bucket: &BucketKey) {
        let until = self.clock.now() + self.window;
        self.storage.insert(bucket.clone(), until);
        tracing::trace!(%bucket, window = ?self.window, "forced sync window opened");
    }

    /// Drop every closed window. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.storage.retain(|_, until| {
            let open = now < *until;
            if !open {
                removed += 1;
            }
            open
        });
        removed
    }

    /// Number of tracked windows, closed ones included until pruned.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
