//! Domain layer - pure business logic with no I/O.
//!
//! This layer contains the core concepts of the authrep subsystem:
//! - Proxy rules, path patterns and usage aggregation
//! - Credential extraction and request identity
//! - Cache fingerprints and report bucket keys
//! - Report records and the batched wire encoding
//!
//! All types in this layer are pure and easily testable.

pub mod credentials;
pub mod decision;
pub mod error;
pub mod fingerprint;
pub mod report;
pub mod request;
pub mod rule;
pub mod usage;
