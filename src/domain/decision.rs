//! Authorization decisions.

use crate::domain::credentials::Identity;
use crate::domain::fingerprint::{BucketKey, RequestFingerprint};
use std::time::Instant;

/// A decision taken by the backend, as stored in the authorization cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthDecision {
    /// Whether the request was authorized
    pub authorized: bool,
    /// When the backend produced the decision
    pub created_at: Instant,
}

impl AuthDecision {
    pub fn new(authorized: bool, created_at: Instant) -> Self {
        Self {
            authorized,
            created_at,
        }
    }
}

/// Verdict returned by the remote backend's authorize call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendVerdict {
    pub authorized: bool,
    /// Rejection reason, when the backend gives one
    pub reason: Option<String>,
}

impl BackendVerdict {
    pub fn authorized() -> Self {
        Self {
            authorized: true,
            reason: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            authorized: false,
            reason: Some(reason.into()),
        }
    }
}

/// Where an approval came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    /// Served from the authorization cache without a network call
    Cache,
    /// Verified synchronously with the backend
    Backend,
}

/// Proof that a request was authorized.
///
/// Only `AuthRep::authorize` can create one, and reporting requires it, so a
/// denied request can never be reported.
#[derive(Debug, Clone)]
pub struct Authorized {
    pub(crate) fingerprint: RequestFingerprint,
    pub(crate) bucket: BucketKey,
    pub(crate) identity: Identity,
    pub(crate) method: String,
    pub(crate) destination: String,
    pub(crate) source: AuthSource,
}

impl Authorized {
    pub fn source(&self) -> AuthSource {
        self.source
    }

    pub fn fingerprint(&self) -> &RequestFingerprint {
        &self.fingerprint
    }

    pub fn bucket(&self) -> &BucketKey {
        &self.bucket
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_cached(&self) -> bool {
        self.source == AuthSource::Cache
    }
}
