//! Reminder scheduling derived from the record set.
//!
//! # Responsibility
//! - Derive reminder entries purely from active records.
//! - Keep the platform reminder center in lockstep with that derivation.

pub mod adapter;
pub mod center;
pub mod reminder;
