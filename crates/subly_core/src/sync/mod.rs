//! Remote synchronization: backend contract, backends and reconciliation.
//!
//! # Invariants
//! - Sync failures degrade to local-only operation; they are logged, never
//!   surfaced to coordinator callers.

pub mod http_remote;
pub mod memory_remote;
pub mod reconciler;
pub mod remote;
