//! Policy assembly.
//!
//! `AuthRepPolicy` wires one configured service: a shared cache, guard and
//! batcher, the orchestrator that uses them, and the flusher that delivers
//! batched usage and reopens forced-sync windows. Nothing is global; build
//! one policy per service and share it behind an `Arc`.

use crate::application::auth_cache::AuthorizationCache;
use crate::application::authrep::AuthRep;
use crate::application::batcher::ReportBatcher;
use crate::application::flusher::{FlushSummary, FlusherHandle, ReportFlusher, ShutdownError};
use crate::application::guard::ConsistencyGuard;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, RemoteBackend};
use crate::domain::error::ConfigError;
use crate::domain::fingerprint::BucketKey;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::config::AuthRepConfig;
use crate::infrastructure::storage::ShardedStorage;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

/// Storage backing the forced-sync windows.
pub type FlushMarkers = Arc<ShardedStorage<BucketKey, Instant>>;

/// Orchestrator over the default storage.
pub type DefaultAuthRep<B> = AuthRep<B, FlushMarkers>;

/// Flusher over the default storage.
pub type DefaultFlusher<B> = ReportFlusher<B, FlushMarkers>;

/// Builder for an `AuthRepPolicy`.
pub struct AuthRepPolicyBuilder<B>
where
    B: RemoteBackend,
{
    config: AuthRepConfig,
    backend: Arc<B>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Metrics>,
}

impl<B> AuthRepPolicyBuilder<B>
where
    B: RemoteBackend + 'static,
{
    /// Use a custom clock, typically a `MockClock` in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share metrics with other components.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the policy.
    ///
    /// Does not start the flusher; call `AuthRepPolicy::start_flusher` from
    /// within a tokio runtime.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn build(self) -> Result<AuthRepPolicy<B>, ConfigError> {
        self.config.validate()?;

        let metrics = self.metrics.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let cache = Arc::new(AuthorizationCache::new(
            Arc::clone(&clock),
            self.config.cache_config(),
            metrics.clone(),
        ));
        let guard = Arc::new(ConsistencyGuard::new(
            Arc::new(ShardedStorage::new()),
            Arc::clone(&clock),
            self.config.forced_sync_window(),
        ));

        let wakeup = Arc::new(Notify::new());
        let full_wakeup = Arc::clone(&wakeup);
        let batcher = Arc::new(
            ReportBatcher::new(self.config.batch_config(), metrics.clone()).with_full_handler(
                Arc::new(move |_bucket: &BucketKey| full_wakeup.notify_one()),
            ),
        );

        let flusher = ReportFlusher::new(
            Arc::clone(&batcher),
            Arc::clone(&guard),
            Arc::clone(&cache),
            Arc::clone(&self.backend),
            metrics.clone(),
            self.config.flusher_config()?,
        )
        .with_wakeup(wakeup);

        let authrep = Arc::new(AuthRep::new(
            self.config.settings()?,
            self.backend,
            cache,
            guard,
            batcher,
            clock,
            metrics.clone(),
        ));

        tracing::debug!(
            service_id = %self.config.service_id,
            rules = self.config.proxy_rules.len(),
            auth_type = %self.config.auth_type,
            "authrep policy built"
        );

        Ok(AuthRepPolicy {
            authrep,
            flusher: Arc::new(flusher),
            flusher_handle: Mutex::new(None),
            metrics,
        })
    }
}

/// A fully wired authrep policy for one service.
pub struct AuthRepPolicy<B>
where
    B: RemoteBackend,
{
    authrep: Arc<DefaultAuthRep<B>>,
    flusher: Arc<DefaultFlusher<B>>,
    flusher_handle: Mutex<Option<FlusherHandle>>,
    metrics: Metrics,
}

impl<B> AuthRepPolicy<B>
where
    B: RemoteBackend + 'static,
{
    /// Create a builder for `config`, talking to `backend`.
    pub fn builder(config: AuthRepConfig, backend: Arc<B>) -> AuthRepPolicyBuilder<B> {
        AuthRepPolicyBuilder {
            config,
            backend,
            clock: None,
            metrics: None,
        }
    }

    /// The orchestrator handling `authorize` and `report`.
    pub fn authrep(&self) -> &Arc<DefaultAuthRep<B>> {
        &self.authrep
    }

    pub fn flusher(&self) -> &Arc<DefaultFlusher<B>> {
        &self.flusher
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Flush queued usage now, outside the periodic schedule.
    pub async fn flush(&self) -> FlushSummary {
        self.flusher.flush_once().await
    }

    /// Start the background flusher. Does nothing if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_flusher(&self) {
        let mut handle = self.flusher_handle.lock();
        if handle.is_none() {
            *handle = Some(Arc::clone(&self.flusher).start());
        }
    }

    /// Stop the background flusher after flushing all queued usage.
    ///
    /// When the flusher was never started, queued usage is flushed here
    /// instead so that nothing is left behind.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the flusher task panicked or was cancelled.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        // Take the handle before awaiting so the lock is not held across it
        let handle = self.flusher_handle.lock().take();
        match handle {
            Some(handle) => handle.shutdown().await,
            None => {
                self.flusher.flush_all().await;
                Ok(())
            }
        }
    }
}

impl<B> std::fmt::Debug for AuthRepPolicy<B>
where
    B: RemoteBackend,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRepPolicy")
            .field("authrep", &self.authrep)
            .field("flusher_running", &self.flusher_handle.lock().is_some())
            .finish()
    }
}
