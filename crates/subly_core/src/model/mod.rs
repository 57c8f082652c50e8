//! Domain model for tracked subscriptions and budgets.
//!
//! # Responsibility
//! - Define canonical data structures used by sync, scheduling and services.
//!
//! # Invariants
//! - Every subscription is identified by a stable `SubscriptionId`.
//! - Deletion is a soft-delete flag; physical removal is an explicit purge.

pub mod budget;
pub mod subscription;
pub mod usage;
