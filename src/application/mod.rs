//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Authorization cache (TTL and capacity bounded decisions)
//! - Consistency guard (forced re-verification after a flush)
//! - Report batcher (per-bucket queues drained into payloads)
//! - AuthRep orchestrator (authorize and report lifecycle)
//! - Report flusher (periodic delivery)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod auth_cache;
pub mod authrep;
pub mod batcher;
pub mod flusher;
pub mod guard;
pub mod metrics;
pub mod ports;
