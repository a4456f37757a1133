//! Error taxonomy for the authrep subsystem.
//!
//! Only configuration errors are fatal. Authentication and transport failures
//! are surfaced to the caller of `authorize` as ordinary negative results,
//! while record errors never leave the batcher: they are logged and counted.

use std::time::Duration;
use thiserror::Error;

/// Error raised while building or validating the policy configuration.
///
/// These are fatal at setup time and never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The selected auth type has no implementation.
    #[error("auth type {0} is not supported")]
    UnsupportedAuthType(String),

    /// A proxy rule pattern could not be compiled.
    #[error("invalid proxy rule pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Why it was rejected
        reason: String,
    },

    /// A proxy rule names no HTTP method or metric.
    #[error("invalid proxy rule: {0}")]
    InvalidRule(String),

    /// A mandatory field is empty.
    #[error("missing required setting `{0}`")]
    MissingField(&'static str),

    /// A numeric threshold that must be positive is zero.
    #[error("`{0}` must be greater than 0")]
    ZeroValue(&'static str),

    /// The configuration document could not be read or parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Failure talking to the remote backend.
///
/// Retry policy belongs to the transport, so these are reported once and
/// never retried by the orchestrator or the flusher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The call did not complete within the configured timeout.
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// The backend could not be reached.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered with something we could not interpret.
    #[error("unexpected backend response: {0}")]
    Protocol(String),
}

/// Negative authentication outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthenticationFailure {
    /// The request carried no credential at the configured location.
    #[error("no credential present in request")]
    MissingCredential,

    /// The backend (or a cached backend verdict) rejected the credential.
    #[error("request denied: {reason}")]
    Denied {
        /// Reason reported by the backend, or a generic one for cached denials
        reason: String,
    },
}

/// Error returned by `AuthRep::authorize`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthRepError {
    /// Setup problem detected at request time.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// The request is not authorized.
    #[error(transparent)]
    Authentication(#[from] AuthenticationFailure),

    /// The backend could not produce a verdict.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl AuthRepError {
    /// Whether this is a definitive denial rather than an infrastructure failure.
    pub fn is_denial(&self) -> bool {
        matches!(self, AuthRepError::Authentication(_))
    }
}

/// Reason a queued record was rejected while building a payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    /// `service_id` or the service token is empty.
    #[error("record has no {0}")]
    MissingServiceField(&'static str),

    /// The record carries neither a user key nor an app id.
    #[error("record has no credential")]
    MissingCredential,

    /// Nothing to report.
    #[error("record has an empty usage map")]
    EmptyUsage,

    /// The record belongs to a different service than the payload header.
    #[error("record service {found:?} does not match payload service {expected:?}")]
    HeaderMismatch {
        /// Service id of the payload header
        expected: String,
        /// Service id of the record
        found: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::UnsupportedAuthType("OAUTH".to_string());
        assert_eq!(err.to_string(), "auth type OAUTH is not supported");

        let err = ConfigError::ZeroValue("batch.max_records");
        assert_eq!(err.to_string(), "`batch.max_records` must be greater than 0");
    }

    #[test]
    fn test_authrep_error_is_denial() {
        let denied: AuthRepError = AuthenticationFailure::MissingCredential.into();
        assert!(denied.is_denial());

        let transport: AuthRepError =
            TransportError::Timeout(Duration::from_millis(50)).into();
        assert!(!transport.is_denial());
        assert_eq!(transport.to_string(), "backend call timed out after 50ms");
    }
}
