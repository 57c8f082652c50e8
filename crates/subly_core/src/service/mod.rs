//! Use-case services on top of storage, sync and scheduling.
//!
//! # Responsibility
//! - Own the canonical record set and its mutation pipeline.
//! - Derive budget and spending figures.
//! - Define contracts for external collaborators (add gate, cancellation
//!   catalog).

pub mod budget_service;
pub mod collaborators;
pub mod coordinator;
