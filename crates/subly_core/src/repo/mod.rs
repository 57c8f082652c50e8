//! Local persistence contracts and implementations.
//!
//! # Responsibility
//! - Define the record/settings store contracts used by the coordinator.
//! - Isolate SQLite details from sync and service orchestration.

pub mod record_store;
