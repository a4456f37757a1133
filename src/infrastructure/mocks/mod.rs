//! Mock implementations for testing.
//!
//! This module provides test doubles for infrastructure adapters,
//! enabling controlled testing of application logic.

pub mod backend;
pub mod clock;

pub use backend::MockBackend;
pub use clock::MockClock;
