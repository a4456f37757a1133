//! Bucketed report queue and batcher.
//!
//! Usage records are queued per `BucketKey` (service and credential) and
//! drained into bounded, transport-ready payloads. Adding a record never
//! blocks on I/O and draining performs none; sending is the flusher's job.

use crate::application::metrics::Metrics;
use crate::application::ports::FullHandler;
use crate::domain::error::{ConfigError, RecordError};
use crate::domain::fingerprint::BucketKey;
use crate::domain::report::{BatchPayload, PayloadHeader, ReportRecord, ServiceAuthParam};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Configuration for batching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Queue length at which a bucket signals that it should be flushed
    pub full_threshold: usize,
    /// Maximum number of transactions per payload
    pub max_records: usize,
    /// Where payloads are sent
    pub endpoint: String,
    /// Header field carrying the service token
    pub auth_param: ServiceAuthParam,
}

impl BatchConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            full_threshold: 500,
            max_records: 1000,
            endpoint: endpoint.into(),
            auth_param: ServiceAuthParam::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.full_threshold == 0 {
            return Err(ConfigError::ZeroValue("batch.full_threshold"));
        }
        if self.max_records == 0 {
            return Err(ConfigError::ZeroValue("batch.max_records"));
        }
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingField("report_endpoint"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct BucketQueue {
    records: Mutex<VecDeque<ReportRecord>>,
    /// Set once the queue crosses the full threshold, cleared by a drain
    signalled: AtomicBool,
}

impl BucketQueue {
    /// Append a record. Returns true if this push crossed `threshold`.
    fn push(&self, record: ReportRecord, threshold: usize) -> bool {
        let len = {
            let mut records = self.records.lock();
            records.push_back(record);
            records.len()
        };
        len >= threshold && !self.signalled.swap(true, Ordering::AcqRel)
    }

    /// Pop up to `max` records from the front.
    fn take(&self, max: usize, threshold: usize) -> Vec<ReportRecord> {
        let mut records = self.records.lock();
        let count = records.len().min(max);
        let batch: Vec<ReportRecord> = records.drain(..count).collect();
        if records.len() < threshold {
            self.signalled.store(false, Ordering::Release);
        }
        batch
    }

    fn len(&self) -> usize {
        self.records.lock().len()
    }
}

/// Concurrent per-bucket FIFO queues of usage records.
pub struct ReportBatcher {
    buckets: DashMap<BucketKey, Arc<BucketQueue>, RandomState>,
    config: BatchConfig,
    metrics: Metrics,
    on_full: Option<FullHandler>,
}

impl ReportBatcher {
    pub fn new(config: BatchConfig, metrics: Metrics) -> Self {
        Self {
            buckets: DashMap::with_hasher(RandomState::new()),
            config,
            metrics,
            on_full: None,
        }
    }

    /// Register a callback fired when a bucket reaches the full threshold.
    ///
    /// Fires once per crossing; a drain that takes the bucket back below the
    /// threshold re-arms it. The callback runs on the caller of `add_record`
    /// and must not block.
    pub fn with_full_handler(mut self, handler: FullHandler) -> Self {
        self.on_full = Some(handler);
        self
    }

    /// Queue a record in its bucket, creating the bucket on first use.
    pub fn add_record(&self, record: ReportRecord) {
        let bucket = record.bucket().clone();
        let threshold = self.config.full_threshold;

        // The shard guard is held while pushing so a concurrent drain cannot
        // drop the bucket between lookup and push.
        let crossed = match self.buckets.get(&bucket) {
            Some(queue) => queue.push(record, threshold),
            None => self
                .buckets
                .entry(bucket.clone())
                .or_default()
                .push(record, threshold),
        };
        self.metrics.record_queued();

        if crossed {
            self.metrics.record_full_signal();
            tracing::debug!(%bucket, threshold, "report bucket reached full threshold");
            if let Some(handler) = &self.on_full {
                handler(&bucket);
            }
        }
    }

    /// Drain every non-empty bucket into at most one payload each.
    ///
    /// Each payload holds up to `max_records` records in FIFO order; anything
    /// beyond stays queued for the next drain. Invalid records are logged,
    /// counted and left out. A failure while encoding one bucket never
    /// affects the others.
    pub fn drain(&self) -> Vec<BatchPayload> {
        let mut queues: Vec<(BucketKey, Arc<BucketQueue>)> = self
            .buckets
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        queues.sort_by(|a, b| a.0.cmp(&b.0));

        let mut payloads = Vec::with_capacity(queues.len());
        for (bucket, queue) in queues {
            let batch = queue.take(self.config.max_records, self.config.full_threshold);
            if batch.is_empty() {
                self.buckets
                    .remove_if(&bucket, |_, queue| queue.records.lock().is_empty());
                continue;
            }

            let count = batch.len();
            let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                self.build_payload(&bucket, batch)
            }));
            match result {
                Ok(Some(payload)) => {
                    self.metrics.record_payload_built();
                    payloads.push(payload);
                }
                Ok(None) => {}
                Err(_) => {
                    tracing::warn!(%bucket, dropped = count, "failed to encode report batch");
                    self.metrics.record_rejected(count as u64);
                }
            }
        }
        payloads
    }

    fn build_payload(&self, bucket: &BucketKey, batch: Vec<ReportRecord>) -> Option<BatchPayload> {
        let mut header: Option<PayloadHeader> = None;
        let mut accepted = Vec::with_capacity(batch.len());

        for record in batch {
            // The first valid record fixes the header for the whole payload.
            if header.is_none() && record.validate().is_ok() {
                header = Some(PayloadHeader::of(&record));
            }
            let admitted = match &header {
                Some(header) => header.admits(&record),
                None => record.validate(),
            };
            match admitted {
                Ok(()) => accepted.push(record),
                Err(error) => self.reject(bucket, &error),
            }
        }

        let header = header?;
        Some(BatchPayload::encode(
            &self.config.endpoint,
            bucket.clone(),
            header,
            self.config.auth_param,
            &accepted,
        ))
    }

    fn reject(&self, bucket: &BucketKey, error: &RecordError) {
        tracing::warn!(%bucket, %error, "rejected usage record");
        self.metrics.record_rejected(1);
    }

    /// Total number of queued records across all buckets.
    pub fn pending(&self) -> usize {
        self.buckets.iter().map(|entry| entry.value().len()).sum()
    }

    /// Number of queued records in one bucket.
    pub fn pending_in(&self, bucket: &BucketKey) -> usize {
        self.buckets
            .get(bucket)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }
}

impl std::fmt::Debug for ReportBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportBatcher")
            .field("buckets", &self.buckets.len())
            .field("config", &self.config)
            .finish()
    }
}
