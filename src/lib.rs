//! # authrep-cache
//!
//! Authorization caching and usage batching for API gateways that meter
//! traffic against a remote "authrep" backend.
//!
//! Asking the backend on every request is too slow, and never asking it
//! breaks rate limits and billing. This crate sits in between:
//!
//! - **Authorization cache**: prior backend decisions, keyed by request
//!   fingerprint (API, credential, matched route), bounded by TTL and capacity.
//! - **Consistency guard**: right after a bucket's usage is flushed, its
//!   requests are verified with the backend again for a short window, since
//!   the flush may have pushed the credential over a limit.
//! - **Metric aggregation**: proxy rules map each request to metric deltas.
//! - **Report batching**: usage records queue per (service, credential)
//!   bucket and drain into bounded form-encoded payloads.
//! - **Flushing**: a background task delivers payloads periodically, or
//!   early when a bucket fills up.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use authrep_cache::{ApiRequest, ApiResponse, AuthRepConfig, AuthRepPolicy};
//! # use authrep_cache::infrastructure::mocks::MockBackend;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthRepConfig::from_yaml(r#"
//! service_id: "42"
//! service_token: secret
//! report_endpoint: https://su1.3scale.net/transactions.xml
//! proxy_rules:
//!   - http_method: GET
//!     pattern: /widgets
//!     metric_system_name: hits
//! "#)?;
//!
//! # let backend = Arc::new(MockBackend::new());
//! let policy = AuthRepPolicy::builder(config, backend).build()?;
//! policy.start_flusher();
//!
//! let request = ApiRequest::new("my-api", "GET", "/widgets")
//!     .with_header("user_key", "abc123");
//!
//! // Before forwarding upstream
//! let authorized = policy.authrep().authorize(&request).await?;
//!
//! // Once the upstream response is known
//! policy.authrep().report(authorized, &ApiResponse::with_status(200));
//!
//! // Final flush before exit
//! policy.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure Model
//!
//! - Configuration problems are reported by `AuthRepConfig::validate` and
//!   `AuthRepPolicyBuilder::build` as `ConfigError`.
//! - `authorize` returns `AuthRepError::Authentication` for missing
//!   credentials and denials, and `AuthRepError::Transport` when the backend
//!   cannot answer in time. Transport failures are never cached.
//! - `report` never fails. Records that cannot be encoded are dropped at
//!   drain time with a warning and counted in `MetricsSnapshot::records_rejected`.
//! - Delivery failures are logged and counted; retrying is left to the
//!   `RemoteBackend` implementation.
//!
//! ## Backends
//!
//! Implement `RemoteBackend` for your transport, or enable the
//! `http-backend` feature for a `reqwest`-based adapter.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    credentials::{AuthType, CredentialExtractor, CredentialParams, CredentialsLocation, Identity},
    decision::{AuthDecision, AuthSource, Authorized, BackendVerdict},
    error::{AuthRepError, AuthenticationFailure, ConfigError, RecordError, TransportError},
    fingerprint::{BucketKey, RequestFingerprint, RouteSignature},
    report::{BatchPayload, PayloadHeader, ReportRecord, ServiceAuthParam},
    request::{ApiRequest, ApiResponse},
    rule::{match_paths, match_rules, PathPattern, ProxyRule},
    usage::{compute_deltas, MetricDeltaMap},
};

pub use application::{
    auth_cache::{AuthCacheConfig, AuthorizationCache},
    authrep::{AuthRep, AuthRepSettings},
    batcher::{BatchConfig, ReportBatcher},
    flusher::{FlushSummary, FlusherConfig, FlusherHandle, ReportFlusher, ShutdownError},
    guard::ConsistencyGuard,
    metrics::{Metrics, MetricsSnapshot},
    ports::{AuthorizeRequest, Clock, FullHandler, RemoteBackend, Storage},
};

pub use infrastructure::{
    clock::SystemClock,
    config::{AuthRepConfig, BatchSection, CacheSection},
    policy::{AuthRepPolicy, AuthRepPolicyBuilder, DefaultAuthRep, DefaultFlusher, FlushMarkers},
    storage::ShardedStorage,
};

#[cfg(feature = "http-backend")]
pub use infrastructure::http_backend::HttpBackend;
