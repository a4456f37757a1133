//! AuthRep orchestration.
//!
//! Composes credential extraction, the consistency guard, the authorization
//! cache, the remote backend and the report batcher around the lifecycle of
//! one request: `authorize` before it is forwarded upstream, `report` once
//! the response is known.

use crate::application::auth_cache::AuthorizationCache;
use crate::application::batcher::ReportBatcher;
use crate::application::guard::ConsistencyGuard;
use crate::application::metrics::Metrics;
use crate::application::ports::{AuthorizeRequest, Clock, RemoteBackend, Storage};
use crate::domain::credentials::{CredentialExtractor, Identity};
use crate::domain::decision::{AuthDecision, AuthSource, Authorized, BackendVerdict};
use crate::domain::error::{AuthRepError, AuthenticationFailure, TransportError};
use crate::domain::fingerprint::{BucketKey, RequestFingerprint, RouteSignature};
use crate::domain::report::ReportRecord;
use crate::domain::request::{ApiRequest, ApiResponse};
use crate::domain::rule::{match_rules, ProxyRule};
use crate::domain::usage::compute_deltas;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reason attached to denials served from the cache.
const CACHED_DENIAL: &str = "denied by cached backend decision";

/// Reason used when the backend denies without giving one.
const BACKEND_DENIAL: &str = "denied by backend";

/// Per-service settings of an orchestrator.
#[derive(Debug, Clone)]
pub struct AuthRepSettings {
    pub service_id: String,
    pub service_token: String,
    pub extractor: CredentialExtractor,
    pub rules: Arc<[ProxyRule]>,
    /// Upper bound on one backend authorize call
    pub backend_timeout: Duration,
}

/// Drives authorization and usage reporting for one configured service.
pub struct AuthRep<B, GS>
where
    B: RemoteBackend,
    GS: Storage<BucketKey, Instant> + Clone,
{
    settings: AuthRepSettings,
    backend: Arc<B>,
    cache: Arc<AuthorizationCache>,
    guard: Arc<ConsistencyGuard<GS>>,
    batcher: Arc<ReportBatcher>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl<B, GS> AuthRep<B, GS>
where
    B: RemoteBackend,
    GS: Storage<BucketKey, Instant> + Clone,
{
    pub fn new(
        settings: AuthRepSettings,
        backend: Arc<B>,
        cache: Arc<AuthorizationCache>,
        guard: Arc<ConsistencyGuard<GS>>,
        batcher: Arc<ReportBatcher>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            settings,
            backend,
            cache,
            guard,
            batcher,
            clock,
            metrics,
        }
    }

    /// Decide whether `request` may proceed.
    ///
    /// Served from the cache when a live decision exists and the bucket is not
    /// inside a forced-sync window; otherwise the backend is asked under the
    /// configured timeout and its verdict written through to the cache.
    /// Transport failures are returned as-is and nothing is cached for them.
    ///
    /// The returned token is required by `report`.
    pub async fn authorize(&self, request: &ApiRequest) -> Result<Authorized, AuthRepError> {
        let identity = self.settings.extractor.extract(request).ok_or_else(|| {
            tracing::debug!(
                api_id = request.api_id(),
                auth_type = %self.settings.extractor.auth_type(),
                "request carries no credential"
            );
            self.metrics.record_denial();
            AuthenticationFailure::MissingCredential
        })?;

        let matched = match_rules(request.destination(), request.method(), &self.settings.rules);
        let fingerprint =
            RequestFingerprint::new(request.api_id(), &identity, RouteSignature::new(matched));
        let bucket = BucketKey::new(
            self.settings.service_id.as_str(),
            identity.credential().unwrap_or_default(),
        );

        if self.guard.is_forced_sync(&bucket) {
            self.metrics.record_forced_sync();
            tracing::debug!(%fingerprint, %bucket, "bucket recently flushed, verifying with backend");
        } else if let Some(decision) = self.cache.get(&fingerprint) {
            tracing::trace!(%fingerprint, authorized = decision.authorized, "authorization cache hit");
            if !decision.authorized {
                self.metrics.record_denial();
                return Err(AuthenticationFailure::Denied {
                    reason: CACHED_DENIAL.to_string(),
                }
                .into());
            }
            return Ok(self.approve(request, fingerprint, bucket, identity, AuthSource::Cache));
        }

        let verdict = self
            .call_backend(request, &identity)
            .await
            .map_err(|error| {
                self.metrics.record_transport_error();
                tracing::warn!(%fingerprint, %error, "backend authorize failed");
                error
            })?;

        self.cache.put(
            fingerprint.clone(),
            AuthDecision::new(verdict.authorized, self.clock.now()),
        );

        if verdict.authorized {
            Ok(self.approve(request, fingerprint, bucket, identity, AuthSource::Backend))
        } else {
            self.metrics.record_denial();
            let reason = verdict.reason.unwrap_or_else(|| BACKEND_DENIAL.to_string());
            tracing::debug!(%fingerprint, %reason, "backend denied request");
            Err(AuthenticationFailure::Denied { reason }.into())
        }
    }

    async fn call_backend(
        &self,
        request: &ApiRequest,
        identity: &Identity,
    ) -> Result<BackendVerdict, TransportError> {
        let call = AuthorizeRequest {
            api_id: request.api_id().to_string(),
            service_id: self.settings.service_id.clone(),
            service_token: self.settings.service_token.clone(),
            identity: identity.clone(),
            usage: compute_deltas(request.destination(), request.method(), &self.settings.rules),
        };
        let timeout = self.settings.backend_timeout;
        match tokio::time::timeout(timeout, self.backend.authorize(&call)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    fn approve(
        &self,
        request: &ApiRequest,
        fingerprint: RequestFingerprint,
        bucket: BucketKey,
        identity: Identity,
        source: AuthSource,
    ) -> Authorized {
        Authorized {
            fingerprint,
            bucket,
            identity,
            method: request.method().to_string(),
            destination: request.destination().to_string(),
            source,
        }
    }

    /// Record the usage of an authorized request.
    ///
    /// Never blocks on I/O and never fails: the record is queued for the next
    /// flush. Requests matching no proxy rule have nothing to report.
    pub fn report(&self, authorized: Authorized, response: &ApiResponse) {
        let usage = compute_deltas(
            &authorized.destination,
            &authorized.method,
            &self.settings.rules,
        );
        if usage.is_empty() {
            tracing::debug!(
                bucket = %authorized.bucket,
                destination = %authorized.destination,
                "no proxy rule matched, nothing to report"
            );
            return;
        }

        let record = ReportRecord::new(
            self.settings.service_token.as_str(),
            self.settings.service_id.as_str(),
            authorized.identity,
            usage,
        )
        .with_response_code(response.status);
        self.batcher.add_record(record);
    }

    pub fn settings(&self) -> &AuthRepSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<AuthorizationCache> {
        &self.cache
    }

    pub fn guard(&self) -> &Arc<ConsistencyGuard<GS>> {
        &self.guard
    }

    pub fn batcher(&self) -> &Arc<ReportBatcher> {
        &self.batcher
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl<B, GS> std::fmt::Debug for AuthRep<B, GS>
where
    B: RemoteBackend,
    GS: Storage<BucketKey, Instant> + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRep")
            .field("service_id", &self.settings.service_id)
            .field("rules", &self.settings.rules.len())
            .field("backend", &self.backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::auth_cache::AuthCacheConfig;
    use crate::application::batcher::BatchConfig;
    use crate::domain::credentials::{AuthType, CredentialParams, CredentialsLocation};
    use crate::infrastructure::mocks::{MockBackend, MockClock};
    use crate::infrastructure::storage::ShardedStorage;

    type TestAuthRep = AuthRep<MockBackend, Arc<ShardedStorage<BucketKey, Instant>>>;

    struct Fixture {
        authrep: TestAuthRep,
        backend: Arc<MockBackend>,
        clock: MockClock,
    }

    fn fixture() -> Fixture {
        let clock = MockClock::new(Instant::now());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let metrics = Metrics::new();
        let backend = Arc::new(MockBackend::new());
        let rules: Vec<ProxyRule> = vec![
            ProxyRule::new("GET", "/widgets", "hits", 1).unwrap(),
            ProxyRule::new("GET", "/widgets/{id}", "widget_reads", 2).unwrap(),
            ProxyRule::new("POST", "/widgets", "hits", 5).unwrap(),
        ];
        let settings = AuthRepSettings {
            service_id: "svc".to_string(),
            service_token: "tok".to_string(),
            extractor: CredentialExtractor::new(
                CredentialsLocation::Header,
                AuthType::ApiKey,
                CredentialParams::default(),
            )
            .unwrap(),
            rules: rules.into(),
            backend_timeout: Duration::from_millis(100),
        };
        let cache = Arc::new(AuthorizationCache::new(
            Arc::clone(&shared_clock),
            AuthCacheConfig::default(),
            metrics.clone(),
        ));
        let guard = Arc::new(ConsistencyGuard::new(
            Arc::new(ShardedStorage::new()),
            Arc::clone(&shared_clock),
            Duration::from_secs(1),
        ));
        let batcher = Arc::new(ReportBatcher::new(BatchConfig::new("e"), metrics.clone()));
        let authrep = AuthRep::new(
            settings,
            Arc::clone(&backend),
            cache,
            guard,
            batcher,
            shared_clock,
            metrics,
        );
        Fixture {
            authrep,
            backend,
            clock,
        }
    }

    fn request(key: &str) -> ApiRequest {
        ApiRequest::new("api", "GET", "/widgets").with_header("user_key", key)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let f = fixture();

        let first = f.authrep.authorize(&request("abc123")).await.unwrap();
        assert_eq!(first.source(), AuthSource::Backend);
        assert_eq!(f.backend.authorize_calls(), 1);

        let second = f.authrep.authorize(&request("abc123")).await.unwrap();
        assert!(second.is_cached());
        assert_eq!(f.backend.authorize_calls(), 1);
    }

    #[tokio::test]
    async fn test_backend_receives_usage_and_service() {
        let f = fixture();
        f.authrep.authorize(&request("abc123")).await.unwrap();

        let sent = f.backend.last_authorize_request().unwrap();
        assert_eq!(sent.service_id, "svc");
        assert_eq!(sent.service_token, "tok");
        assert_eq!(sent.identity.user_key.as_deref(), Some("abc123"));
        assert_eq!(sent.usage.get("hits"), Some(1));
    }

    #[tokio::test]
    async fn test_missing_credential_makes_no_call() {
        let f = fixture();
        let result = f
            .authrep
            .authorize(&ApiRequest::new("api", "GET", "/widgets"))
            .await;

        assert_eq!(
            result.unwrap_err(),
            AuthRepError::Authentication(AuthenticationFailure::MissingCredential)
        );
        assert_eq!(f.backend.authorize_calls(), 0);
    }

    #[tokio::test]
    async fn test_denial_is_not_cached_by_default() {
        let f = fixture();
        f.backend.set_verdict("bad", BackendVerdict::denied("user key invalid"));

        let err = f.authrep.authorize(&request("bad")).await.unwrap_err();
        assert!(err.is_denial());
        assert_eq!(
            err,
            AuthRepError::Authentication(AuthenticationFailure::Denied {
                reason: "user key invalid".to_string()
            })
        );

        f.authrep.authorize(&request("bad")).await.unwrap_err();
        assert_eq!(f.backend.authorize_calls(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_caches_nothing() {
        let f = fixture();
        f.backend
            .fail_authorize(Some(TransportError::Unreachable("connection refused".into())));

        let err = f.authrep.authorize(&request("abc123")).await.unwrap_err();
        assert!(matches!(err, AuthRepError::Transport(TransportError::Unreachable(_))));
        assert!(f.authrep.cache().is_empty());

        f.backend.fail_authorize(None);
        f.authrep.authorize(&request("abc123")).await.unwrap();
        assert_eq!(f.backend.authorize_calls(), 2);
    }

    #[tokio::test]
    async fn test_timeout() {
        let f = fixture();
        f.backend.set_delay(Some(Duration::from_secs(5)));

        let err = f.authrep.authorize(&request("abc123")).await.unwrap_err();
        assert_eq!(
            err,
            AuthRepError::Transport(TransportError::Timeout(Duration::from_millis(100)))
        );
        assert!(f.authrep.cache().is_empty());
        assert_eq!(f.authrep.metrics().snapshot().transport_errors, 1);
    }

    #[tokio::test]
    async fn test_forced_sync_bypasses_cache() {
        let f = fixture();
        f.authrep.authorize(&request("abc123")).await.unwrap();

        f.authrep.guard().mark_flushed(&BucketKey::new("svc", "abc123"));
        let during = f.authrep.authorize(&request("abc123")).await.unwrap();
        assert_eq!(during.source(), AuthSource::Backend);
        assert_eq!(f.backend.authorize_calls(), 2);

        f.clock.advance(Duration::from_secs(1));
        let after = f.authrep.authorize(&request("abc123")).await.unwrap();
        assert!(after.is_cached());
        assert_eq!(f.backend.authorize_calls(), 2);
        assert_eq!(f.authrep.metrics().forced_syncs(), 1);
    }

    #[tokio::test]
    async fn test_distinct_routes_cached_separately() {
        let f = fixture();
        f.authrep.authorize(&request("abc123")).await.unwrap();
        let item = ApiRequest::new("api", "GET", "/widgets/7").with_header("user_key", "abc123");
        f.authrep.authorize(&item).await.unwrap();
        assert_eq!(f.backend.authorize_calls(), 2);
    }

    #[tokio::test]
    async fn test_report_enqueues_usage() {
        let f = fixture();
        let req = ApiRequest::new("api", "GET", "/widgets/7").with_header("user_key", "abc123");
        let authorized = f.authrep.authorize(&req).await.unwrap();

        f.authrep.report(authorized, &ApiResponse::with_status(200));
        let batcher = f.authrep.batcher();
        assert_eq!(batcher.pending_in(&BucketKey::new("svc", "abc123")), 1);

        let payloads = batcher.drain();
        assert_eq!(payloads.len(), 1);
        let body = payloads[0].body();
        assert!(body.contains("transactions%5B0%5D%5Busage%5D%5Bhits%5D=1"));
        assert!(body.contains("transactions%5B0%5D%5Busage%5D%5Bwidget_reads%5D=2"));
        assert!(body.contains("transactions%5B0%5D%5Blog%5D%5Bcode%5D=200"));
    }

    #[tokio::test]
    async fn test_report_without_matching_rule_is_skipped() {
        let f = fixture();
        let req = ApiRequest::new("api", "DELETE", "/gadgets").with_header("user_key", "abc123");
        let authorized = f.authrep.authorize(&req).await.unwrap();

        f.authrep.report(authorized, &ApiResponse::default());
        assert_eq!(f.authrep.batcher().pending(), 0);
    }
}
