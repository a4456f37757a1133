//! Observability metrics for the authrep subsystem.
//!
//! Counters are shared by every component of one configured policy instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking cache, authorization and reporting statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,
    forced_syncs: AtomicU64,
    denials: AtomicU64,
    transport_errors: AtomicU64,
    records_queued: AtomicU64,
    records_rejected: AtomicU64,
    payloads_built: AtomicU64,
    full_signals: AtomicU64,
    payloads_delivered: AtomicU64,
    payloads_failed: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.inner.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forced_sync(&self) {
        self.inner.forced_syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denial(&self) {
        self.inner.denials.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transport_error(&self) {
        self.inner.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queued(&self) {
        self.inner.records_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self, count: u64) {
        self.inner
            .records_rejected
            .fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_payload_built(&self) {
        self.inner.payloads_built.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_full_signal(&self) {
        self.inner.full_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.inner
            .payloads_delivered
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery_failed(&self) {
        self.inner.payloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> u64 {
        self.inner.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.inner.cache_misses.load(Ordering::Relaxed)
    }

    pub fn forced_syncs(&self) -> u64 {
        self.inner.forced_syncs.load(Ordering::Relaxed)
    }

    pub fn records_queued(&self) -> u64 {
        self.inner.records_queued.load(Ordering::Relaxed)
    }

    pub fn full_signals(&self) -> u64 {
        self.inner.full_signals.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let inner = &self.inner;
        MetricsSnapshot {
            cache_hits: load(&inner.cache_hits),
            cache_misses: load(&inner.cache_misses),
            cache_evictions: load(&inner.cache_evictions),
            forced_syncs: load(&inner.forced_syncs),
            denials: load(&inner.denials),
            transport_errors: load(&inner.transport_errors),
            records_queued: load(&inner.records_queued),
            records_rejected: load(&inner.records_rejected),
            payloads_built: load(&inner.payloads_built),
            full_signals: load(&inner.full_signals),
            payloads_delivered: load(&inner.payloads_delivered),
            payloads_failed: load(&inner.payloads_failed),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        let inner = &self.inner;
        for counter in [
            &inner.cache_hits,
            &inner.cache_misses,
            &inner.cache_evictions,
            &inner.forced_syncs,
            &inner.denials,
            &inner.transport_errors,
            &inner.records_queued,
            &inner.records_rejected,
            &inner.payloads_built,
            &inner.full_signals,
            &inner.payloads_delivered,
            &inner.payloads_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Authorizations served from the cache
    pub cache_hits: u64,
    /// Cache lookups that found nothing usable
    pub cache_misses: u64,
    /// Entries evicted for capacity
    pub cache_evictions: u64,
    /// Authorizations that bypassed the cache after a flush
    pub forced_syncs: u64,
    /// Requests denied, from cache or backend
    pub denials: u64,
    /// Backend authorize calls that failed or timed out
    pub transport_errors: u64,
    /// Records accepted by the batcher
    pub records_queued: u64,
    /// Records dropped while building payloads
    pub records_rejected: u64,
    /// Payloads produced by drains
    pub payloads_built: u64,
    /// Full-threshold notifications fired
    pub full_signals: u64,
    /// Payloads acknowledged by the backend
    pub payloads_delivered: u64,
    /// Payloads the backend did not accept
    pub payloads_failed: u64,
}

impl MetricsSnapshot {
    /// Ratio of cache hits to cache-eligible lookups (0.0 to 1.0).
    ///
    /// Returns 0.0 if no lookups have been made.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits.saturating_add(self.cache_misses);
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}
