//! Cache and bucket keys.
//!
//! A `RequestFingerprint` identifies a class of requests whose authorization
//! outcome can be shared: same API, same credential, same matched route.
//! Keys compare structurally, so two different requests can never alias the
//! same cache entry through a hash collision.
//!
//! `Display` prints a digest instead of the fields so that credentials never
//! end up in logs.

use crate::domain::credentials::Identity;
use ahash::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

// Fixed seeds keep digests stable across the process lifetime.
const DIGEST_SEEDS: (u64, u64, u64, u64) = (
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

fn digest_of<T: Hash>(value: &T) -> u64 {
    let (a, b, c, d) = DIGEST_SEEDS;
    let mut hasher = RandomState::with_seeds(a, b, c, d).build_hasher();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Indices of the proxy rules a request matched, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RouteSignature(Vec<usize>);

impl RouteSignature {
    pub fn new(mut matched: Vec<usize>) -> Self {
        matched.sort_unstable();
        matched.dedup();
        Self(matched)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }
}

/// Authorization cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint {
    api_id: String,
    credential: String,
    secret: Option<String>,
    route: RouteSignature,
}

impl RequestFingerprint {
    /// Build a fingerprint from the API, the request identity and its route.
    ///
    /// Only the credential fields take part: the app key is included so that a
    /// wrong key cannot reuse a decision cached for the right one.
    pub fn new(api_id: &str, identity: &Identity, route: RouteSignature) -> Self {
        Self {
            api_id: api_id.to_string(),
            credential: identity.credential().unwrap_or_default().to_string(),
            secret: identity.app_key.clone(),
            route,
        }
    }

    pub fn api_id(&self) -> &str {
        &self.api_id
    }

    pub fn route(&self) -> &RouteSignature {
        &self.route
    }

    /// Stable, non-reversible digest for diagnostics.
    pub fn digest(&self) -> u64 {
        digest_of(self)
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.digest())
    }
}

/// Key of a report bucket: all records for one service and credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    service_id: String,
    credential: String,
}

impl BucketKey {
    pub fn new(service_id: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            credential: credential.into(),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:016x}", self.service_id, digest_of(&self.credential))
    }
}
