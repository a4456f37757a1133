//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::credentials::Identity;
use crate::domain::decision::BackendVerdict;
use crate::domain::error::TransportError;
use crate::domain::fingerprint::BucketKey;
use crate::domain::report::BatchPayload;
use crate::domain::usage::MetricDeltaMap;
use async_trait::async_trait;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

/// Port for obtaining current time.
///
/// Infrastructure provides `SystemClock`; tests use `MockClock`.
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Port for concurrent key-value storage.
///
/// Implementations must be safe for unsynchronized use from many threads.
/// Infrastructure provides `ShardedStorage`.
pub trait Storage<K, V>: Send + Sync + Debug
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Access an existing entry with mutable access.
    ///
    /// Returns `None` without calling `accessor` if the key is absent.
    fn update<F, R>(&self, key: &K, accessor: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R;

    /// Insert or replace a value.
    fn insert(&self, key: K, value: V);

    /// Remove a key, returning its value.
    fn remove(&self, key: &K) -> Option<V>;

    /// Remove a key only if `predicate` holds for its current value.
    fn remove_if<F>(&self, key: &K, predicate: F) -> bool
    where
        F: FnOnce(&V) -> bool;

    /// Get the number of entries in the storage.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Clear all entries from the storage.
    fn clear(&self);

    /// Remove entries for which the predicate returns false.
    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool;
}

/// Authorize call sent to the remote backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeRequest {
    pub api_id: String,
    pub service_id: String,
    pub service_token: String,
    pub identity: Identity,
    /// Usage the request is about to consume, for limit checks
    pub usage: MetricDeltaMap,
}

/// Port for the remote metering backend.
///
/// Implementations own transport concerns: connection handling, retries and
/// their own timeouts. The orchestrator additionally bounds `authorize` with
/// its configured timeout.
#[async_trait]
pub trait RemoteBackend: Send + Sync + Debug {
    /// Ask the backend whether a request may proceed.
    async fn authorize(&self, request: &AuthorizeRequest) -> Result<BackendVerdict, TransportError>;

    /// Deliver one batched usage payload.
    async fn report(&self, payload: &BatchPayload) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: RemoteBackend + ?Sized> RemoteBackend for Arc<T> {
    async fn authorize(&self, request: &AuthorizeRequest) -> Result<BackendVerdict, TransportError> {
        (**self).authorize(request).await
    }

    async fn report(&self, payload: &BatchPayload) -> Result<(), TransportError> {
        (**self).report(payload).await
    }
}

/// Callback invoked when a bucket crosses the batcher's full threshold.
pub type FullHandler = Arc<dyn Fn(&BucketKey) + Send + Sync>;
