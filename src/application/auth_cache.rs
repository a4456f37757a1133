//! Authorization result cache.
//!
//! Stores prior backend decisions keyed by request fingerprint so that repeat
//! requests can be answered without a network call. Entries expire after a
//! TTL measured from when the backend produced the decision, and the cache
//! stays within a fixed capacity by evicting the least recently used entry.
//!
//! Storage is a `moka` cache with an LRU eviction policy. Its time-to-live
//! drops decisions that are never looked up again; reads additionally check
//! the TTL against the injected clock.

use crate::application::metrics::Metrics;
use crate::application::ports::Clock;
use crate::domain::decision::AuthDecision;
use crate::domain::error::ConfigError;
use crate::domain::fingerprint::RequestFingerprint;
use ahash::RandomState;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for the authorization cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCacheConfig {
    /// Maximum number of cached decisions
    pub capacity: usize,
    /// How long a decision stays valid after the backend produced it
    pub ttl: Duration,
    /// Whether negative decisions are cached as well
    pub cache_denials: bool,
}

impl Default for AuthCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000_000,
            ttl: Duration::from_secs(600),
            cache_denials: false,
        }
    }
}

impl AuthCacheConfig {
    /// Check that capacity and TTL are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroValue("cache.capacity"));
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroValue("cache.ttl_secs"));
        }
        Ok(())
    }
}

fn is_expired(decision: &AuthDecision, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(decision.created_at) >= ttl
}

/// Concurrent TTL and capacity bounded decision cache.
///
/// Safe to share between request handlers without external locking. There is
/// no pending state: concurrent misses for one fingerprint each go to the
/// backend, and the last write wins.
#[derive(Clone)]
pub struct AuthorizationCache {
    decisions: Cache<RequestFingerprint, AuthDecision, RandomState>,
    clock: Arc<dyn Clock>,
    config: AuthCacheConfig,
    metrics: Metrics,
}

impl AuthorizationCache {
    pub fn new(clock: Arc<dyn Clock>, config: AuthCacheConfig, metrics: Metrics) -> Self {
        let evictions = metrics.clone();
        let decisions = Cache::<RequestFingerprint, AuthDecision>::builder()
            .max_capacity(config.capacity as u64)
            .time_to_live(config.ttl)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |fingerprint, _, cause| {
                if cause == RemovalCause::Size {
                    tracing::trace!(%fingerprint, "evicted authorization decision");
                    evictions.record_eviction();
                }
            })
            .build_with_hasher(RandomState::new());

        Self {
            decisions,
            clock,
            config,
            metrics,
        }
    }

    /// Look up a live decision.
    ///
    /// Expired entries are removed on the way out and reported as misses.
    pub fn get(&self, fingerprint: &RequestFingerprint) -> Option<AuthDecision> {
        let now = self.clock.now();
        match self.decisions.get(fingerprint) {
            Some(decision) if !is_expired(&decision, now, self.config.ttl) => {
                self.metrics.record_cache_hit();
                Some(decision)
            }
            Some(_) => {
                self.decisions.invalidate(fingerprint);
                tracing::trace!(%fingerprint, "cached decision expired");
                self.metrics.record_cache_miss();
                None
            }
            None => {
                self.metrics.record_cache_miss();
                None
            }
        }
    }

    /// Store a decision, replacing any previous one for the fingerprint.
    ///
    /// Denials are dropped unless `cache_denials` is set. At capacity the
    /// least recently used decision is evicted.
    pub fn put(&self, fingerprint: RequestFingerprint, decision: AuthDecision) {
        if !decision.authorized && !self.config.cache_denials {
            return;
        }
        self.decisions.insert(fingerprint, decision);
    }

    /// Remove a decision. Returns whether one was present.
    pub fn invalidate(&self, fingerprint: &RequestFingerprint) -> bool {
        self.decisions.remove(fingerprint).is_some()
    }

    /// Remove every expired entry. Returns how many were dropped by this call.
    ///
    /// Also applies pending evictions, including entries past their TTL that
    /// were never read again.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.ttl;
        let mut removed = 0;
        for (fingerprint, decision) in self.decisions.iter() {
            if is_expired(&decision, now, ttl) {
                self.decisions.invalidate(fingerprint.as_ref());
                removed += 1;
            }
        }
        self.decisions.run_pending_tasks();
        if removed > 0 {
            tracing::debug!(removed, "dropped expired authorization decisions");
        }
        removed
    }

    /// Number of cached decisions, after applying pending maintenance.
    pub fn len(&self) -> usize {
        self.decisions.run_pending_tasks();
        self.decisions.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.decisions.invalidate_all();
        self.decisions.run_pending_tasks();
    }

    pub fn config(&self) -> &AuthCacheConfig {
        &self.config
    }
}

impl std::fmt::Debug for AuthorizationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCache")
            .field("config", &self.config)
            .field("entry_count", &self.decisions.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credentials::Identity;
    use crate::domain::fingerprint::RouteSignature;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::mocks::MockClock;

    fn cache_with(config: AuthCacheConfig, clock: &MockClock) -> AuthorizationCache {
        AuthorizationCache::new(Arc::new(clock.clone()), config, Metrics::new())
    }

    fn fp(key: &str) -> RequestFingerprint {
        RequestFingerprint::new("api", &Identity::user_key(key), RouteSignature::new(vec![0]))
    }

    #[test]
    fn test_put_then_get() {
        let clock = MockClock::new(Instant::now());
        let cache = cache_with(AuthCacheConfig::default(), &clock);

        cache.put(fp("abc"), AuthDecision::new(true, clock.now()));
        let decision = cache.get(&fp("abc")).expect("cached");
        assert!(decision.authorized);
        assert!(cache.get(&fp("other")).is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let clock = MockClock::new(Instant::now());
        let config = AuthCacheConfig {
            ttl: Duration::from_secs(10),
            ..AuthCacheConfig::default()
        };
        let cache = cache_with(config, &clock);

        cache.put(fp("abc"), AuthDecision::new(true, clock.now()));
        clock.advance(Duration::from_secs(9));
        assert!(cache.get(&fp("abc")).is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get(&fp("abc")).is_none());
        assert!(cache.is_empty(), "expired entry is removed lazily");
    }

    #[test]
    fn test_access_does_not_extend_ttl() {
        let clock = MockClock::new(Instant::now());
        let config = AuthCacheConfig {
            ttl: Duration::from_secs(10),
            ..AuthCacheConfig::default()
        };
        let cache = cache_with(config, &clock);

        cache.put(fp("abc"), AuthDecision::new(true, clock.now()));
        for _ in 0..3 {
            clock.advance(Duration::from_secs(4));
            cache.get(&fp("abc"));
        }
        assert!(cache.get(&fp("abc")).is_none());
    }

    #[test]
    fn test_invalidate() {
        let clock = MockClock::new(Instant::now());
        let cache = cache_with(AuthCacheConfig::default(), &clock);

        cache.put(fp("abc"), AuthDecision::new(true, clock.now()));
        assert!(cache.invalidate(&fp("abc")));
        assert!(!cache.invalidate(&fp("abc")));
        assert!(cache.get(&fp("abc")).is_none());
    }

    #[test]
    fn test_denials_skipped_by_default() {
        let clock = MockClock::new(Instant::now());
        let cache = cache_with(AuthCacheConfig::default(), &clock);

        cache.put(fp("abc"), AuthDecision::new(false, clock.now()));
        assert!(cache.is_empty());

        let caching = cache_with(
            AuthCacheConfig {
                cache_denials: true,
                ..AuthCacheConfig::default()
            },
            &clock,
        );
        caching.put(fp("abc"), AuthDecision::new(false, clock.now()));
        assert_eq!(caching.get(&fp("abc")).map(|d| d.authorized), Some(false));
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let clock = MockClock::new(Instant::now());
        let metrics = Metrics::new();
        let config = AuthCacheConfig {
            capacity: 64,
            ..AuthCacheConfig::default()
        };
        let cache = AuthorizationCache::new(Arc::new(clock.clone()), config, metrics.clone());

        for i in 0..64 {
            cache.put(fp(&format!("k{i}")), AuthDecision::new(true, clock.now()));
        }
        assert_eq!(cache.len(), 64);

        // Every entry except k0 is read, leaving k0 as the only cold one
        for i in 1..64 {
            assert!(cache.get(&fp(&format!("k{i}"))).is_some());
        }
        assert_eq!(cache.len(), 64);

        cache.put(fp("k64"), AuthDecision::new(true, clock.now()));
        assert_eq!(cache.len(), 64);
        assert!(cache.get(&fp("k0")).is_none());
        for i in 1..=64 {
            assert!(cache.get(&fp(&format!("k{i}"))).is_some(), "k{i} was evicted");
        }
        assert_eq!(metrics.snapshot().cache_evictions, 1);
    }

    #[test]
    fn test_replacing_does_not_evict() {
        let clock = MockClock::new(Instant::now());
        let config = AuthCacheConfig {
            capacity: 1,
            ..AuthCacheConfig::default()
        };
        let cache = cache_with(config, &clock);

        cache.put(fp("a"), AuthDecision::new(true, clock.now()));
        cache.put(fp("a"), AuthDecision::new(true, clock.now()));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&fp("a")).is_some());
    }

    #[test]
    fn test_evict_expired() {
        let clock = MockClock::new(Instant::now());
        let config = AuthCacheConfig {
            ttl: Duration::from_secs(5),
            ..AuthCacheConfig::default()
        };
        let cache = cache_with(config, &clock);

        cache.put(fp("old"), AuthDecision::new(true, clock.now()));
        clock.advance(Duration::from_secs(3));
        cache.put(fp("new"), AuthDecision::new(true, clock.now()));
        clock.advance(Duration::from_secs(3));

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&fp("new")).is_some());
    }

    #[test]
    fn test_unread_decisions_expire_in_real_time() {
        let config = AuthCacheConfig {
            ttl: Duration::from_millis(50),
            ..AuthCacheConfig::default()
        };
        let cache = AuthorizationCache::new(Arc::new(SystemClock::new()), config, Metrics::new());

        for i in 0..10 {
            cache.put(fp(&format!("k{i}")), AuthDecision::new(true, Instant::now()));
        }
        assert_eq!(cache.len(), 10);

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_hit_and_miss_metrics() {
        let clock = MockClock::new(Instant::now());
        let metrics = Metrics::new();
        let cache =
            AuthorizationCache::new(Arc::new(clock.clone()), AuthCacheConfig::default(), metrics.clone());

        cache.get(&fp("abc"));
        cache.put(fp("abc"), AuthDecision::new(true, clock.now()));
        cache.get(&fp("abc"));

        assert_eq!(metrics.cache_hits(), 1);
        assert_eq!(metrics.cache_misses(), 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(AuthCacheConfig::default().validate().is_ok());
        let zero = AuthCacheConfig {
            capacity: 0,
            ..AuthCacheConfig::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::ZeroValue("cache.capacity")));
    }
}
