//! Mock remote backend for testing.

use crate::application::ports::{AuthorizeRequest, RemoteBackend};
use crate::domain::decision::BackendVerdict;
use crate::domain::error::TransportError;
use crate::domain::report::BatchPayload;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory backend with scripted verdicts.
///
/// Authorizes every credential unless told otherwise, counts calls and keeps
/// every authorize request and report payload it receives for inspection.
///
/// ```
/// use authrep_cache::infrastructure::mocks::MockBackend;
/// use authrep_cache::BackendVerdict;
///
/// let backend = MockBackend::new();
/// backend.set_verdict("revoked", BackendVerdict::denied("user key revoked"));
/// assert_eq!(backend.authorize_calls(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MockBackend {
    verdicts: Mutex<HashMap<String, BackendVerdict>>,
    delay: Mutex<Option<Duration>>,
    report_delay: Mutex<Option<Duration>>,
    authorize_failure: Mutex<Option<TransportError>>,
    report_failure: Mutex<Option<TransportError>>,
    authorize_requests: Mutex<Vec<AuthorizeRequest>>,
    reports: Mutex<Vec<BatchPayload>>,
    authorize_calls: AtomicUsize,
    report_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `verdict` for requests carrying `credential`.
    pub fn set_verdict(&self, credential: impl Into<String>, verdict: BackendVerdict) {
        self.verdicts.lock().insert(credential.into(), verdict);
    }

    /// Delay every authorize answer.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Delay every report acknowledgement.
    pub fn set_report_delay(&self, delay: Option<Duration>) {
        *self.report_delay.lock() = delay;
    }

    /// Fail every authorize call with `error`, or stop failing with `None`.
    pub fn fail_authorize(&self, error: Option<TransportError>) {
        *self.authorize_failure.lock() = error;
    }

    /// Fail every report call with `error`, or stop failing with `None`.
    pub fn fail_reports(&self, error: Option<TransportError>) {
        *self.report_failure.lock() = error;
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn report_calls(&self) -> usize {
        self.report_calls.load(Ordering::SeqCst)
    }

    pub fn last_authorize_request(&self) -> Option<AuthorizeRequest> {
        self.authorize_requests.lock().last().cloned()
    }

    /// Payloads received so far, including rejected ones.
    pub fn reports(&self) -> Vec<BatchPayload> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl RemoteBackend for MockBackend {
    async fn authorize(&self, request: &AuthorizeRequest) -> Result<BackendVerdict, TransportError> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);
        self.authorize_requests.lock().push(request.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.authorize_failure.lock().clone() {
            return Err(error);
        }

        let credential = request.identity.credential().unwrap_or_default();
        Ok(self
            .verdicts
            .lock()
            .get(credential)
            .cloned()
            .unwrap_or_else(BackendVerdict::authorized))
    }

    async fn report(&self, payload: &BatchPayload) -> Result<(), TransportError> {
        self.report_calls.fetch_add(1, Ordering::SeqCst);
        self.reports.lock().push(payload.clone());

        let delay = *self.report_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.report_failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
