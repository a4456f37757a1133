//! Report flushing.
//!
//! The flusher owns delivery of batched usage: it drains the batcher on a
//! fixed interval (and early when a bucket signals it is full), sends each
//! payload through the backend, and opens a forced-sync window on the guard
//! for every bucket the backend acknowledged. Each cycle also drops closed
//! windows and expired cache entries.

use crate::application::auth_cache::AuthorizationCache;
use crate::application::batcher::ReportBatcher;
use crate::application::guard::ConsistencyGuard;
use crate::application::metrics::Metrics;
use crate::application::ports::{RemoteBackend, Storage};
use crate::domain::error::{ConfigError, TransportError};
use crate::domain::fingerprint::BucketKey;
use crate::domain::report::BatchPayload;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

/// Error returned when the flusher task could not be stopped cleanly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShutdownError {
    /// The flusher task panicked
    #[error("flusher task panicked")]
    TaskPanicked,
    /// The flusher task was cancelled before it could finish
    #[error("flusher task was cancelled")]
    TaskCancelled,
}

/// Configuration for periodic flushing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlusherConfig {
    /// How often queued usage is flushed
    pub interval: Duration,
    /// Upper bound on one report delivery
    pub report_timeout: Duration,
}

impl Default for FlusherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            report_timeout: Duration::from_secs(5),
        }
    }
}

impl FlusherConfig {
    /// # Errors
    /// Returns `ConfigError::ZeroValue` if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroValue("flush_interval_ms"));
        }
        Ok(Self {
            interval,
            ..Self::default()
        })
    }

    pub fn with_report_timeout(mut self, report_timeout: Duration) -> Self {
        self.report_timeout = report_timeout;
        self
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Payloads handed to the backend
    pub payloads: usize,
    /// Payloads the backend acknowledged
    pub delivered: usize,
    /// Payloads the backend did not accept
    pub failed: usize,
    /// Transactions across acknowledged payloads
    pub transactions: usize,
}

impl AddAssign for FlushSummary {
    fn add_assign(&mut self, other: Self) {
        self.payloads += other.payloads;
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.transactions += other.transactions;
    }
}

/// Drains the batcher and delivers payloads to the backend.
pub struct ReportFlusher<B, GS>
where
    B: RemoteBackend,
    GS: Storage<BucketKey, Instant> + Clone,
{
    batcher: Arc<ReportBatcher>,
    guard: Arc<ConsistencyGuard<GS>>,
    cache: Arc<AuthorizationCache>,
    backend: Arc<B>,
    metrics: Metrics,
    config: FlusherConfig,
    wakeup: Arc<Notify>,
}

impl<B, GS> ReportFlusher<B, GS>
where
    B: RemoteBackend,
    GS: Storage<BucketKey, Instant> + Clone,
{
    pub fn new(
        batcher: Arc<ReportBatcher>,
        guard: Arc<ConsistencyGuard<GS>>,
        cache: Arc<AuthorizationCache>,
        backend: Arc<B>,
        metrics: Metrics,
        config: FlusherConfig,
    ) -> Self {
        Self {
            batcher,
            guard,
            cache,
            backend,
            metrics,
            config,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Use an externally created wake-up signal.
    ///
    /// The batcher's full handler notifies this to trigger an early flush.
    pub fn with_wakeup(mut self, wakeup: Arc<Notify>) -> Self {
        self.wakeup = wakeup;
        self
    }

    /// Signal that wakes a running flusher.
    pub fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    async fn deliver(&self, payload: &BatchPayload) -> Result<(), TransportError> {
        let limit = self.config.report_timeout;
        match timeout(limit, self.backend.report(payload)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        }
    }

    /// Drain the batcher once and deliver every payload.
    ///
    /// Each bucket contributes at most `max_records` transactions. Failed
    /// deliveries are logged and counted; their records are not requeued.
    pub async fn flush_once(&self) -> FlushSummary {
        let payloads = self.batcher.drain();
        let mut summary = FlushSummary {
            payloads: payloads.len(),
            ..FlushSummary::default()
        };

        for payload in payloads {
            match self.deliver(&payload).await {
                Ok(()) => {
                    self.guard.mark_flushed(payload.bucket());
                    self.metrics.record_delivered();
                    summary.delivered += 1;
                    summary.transactions += payload.len();
                }
                Err(error) => {
                    tracing::warn!(
                        bucket = %payload.bucket(),
                        transactions = payload.len(),
                        %error,
                        "failed to deliver usage report"
                    );
                    self.metrics.record_delivery_failed();
                    summary.failed += 1;
                }
            }
        }

        if summary.payloads > 0 {
            tracing::debug!(
                delivered = summary.delivered,
                failed = summary.failed,
                transactions = summary.transactions,
                "flushed usage reports"
            );
        }
        summary
    }

    /// Flush repeatedly until the batcher is empty.
    ///
    /// Stops early when a cycle delivers nothing, logging whatever is still
    /// queued.
    pub async fn flush_all(&self) -> FlushSummary {
        let mut total = FlushSummary::default();
        loop {
            let summary = self.flush_once().await;
            total += summary;
            if summary.payloads == 0 || summary.delivered == 0 || self.batcher.pending() == 0 {
                break;
            }
        }

        let remaining = self.batcher.pending();
        if remaining > 0 {
            tracing::warn!(remaining, "usage records left queued after final flush");
        }
        total
    }

    /// Start flushing in a background task.
    ///
    /// The task runs until `FlusherHandle::shutdown` is called, which flushes
    /// everything still queued. Dropping the handle detaches the task without
    /// stopping it.
    pub fn start(self: Arc<Self>) -> FlusherHandle
    where
        B: 'static,
        GS: Send + Sync + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut detached = false;

            loop {
                tokio::select! {
                    biased;
                    result = &mut shutdown_rx, if !detached => {
                        if result.is_ok() {
                            self.flush_all().await;
                            tracing::debug!("report flusher stopped");
                            break;
                        }
                        detached = true;
                        continue;
                    }
                    _ = self.wakeup.notified() => {
                        tracing::trace!("flush requested by full bucket");
                    }
                    _ = ticker.tick() => {}
                }

                self.flush_once().await;
                self.guard.prune();
                self.cache.evict_expired();
            }
        });

        FlusherHandle {
            shutdown_tx: Some(shutdown_tx),
            join,
        }
    }

    pub fn config(&self) -> &FlusherConfig {
        &self.config
    }
}

/// Handle to a running flusher task.
#[derive(Debug)]
pub struct FlusherHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl FlusherHandle {
    /// Stop the flusher after flushing all queued usage and wait for it to
    /// finish.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the task panicked or was cancelled.
    pub async fn shutdown(mut self) -> Result<(), ShutdownError> {
        if let Some(tx) = self.shutdown_tx.take() {
            // The task may already have ended; the join result reports why.
            let _ = tx.send(());
        }
        self.join.await.map_err(|error| {
            if error.is_panic() {
                ShutdownError::TaskPanicked
            } else {
                ShutdownError::TaskCancelled
            }
        })
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
