//! External collaborator contracts consumed by the coordinator.
//!
//! # Responsibility
//! - Gate record creation behind a purchase limit.
//! - Resolve cancellation references for a service by name.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static NON_ALNUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid service name regex"));

/// Active records allowed before the gate is unlocked.
pub const DEFAULT_FREE_LIMIT: usize = 4;

/// Decides whether another active record may be added.
pub trait AddRecordGate: Send + Sync {
    fn can_add_record(&self, active_count: usize) -> bool;
}

/// Free tier allows `free_limit` active records until unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeTierGate {
    pub free_limit: usize,
    pub unlocked: bool,
}

impl Default for FreeTierGate {
    fn default() -> Self {
        Self {
            free_limit: DEFAULT_FREE_LIMIT,
            unlocked: false,
        }
    }
}

impl AddRecordGate for FreeTierGate {
    fn can_add_record(&self, active_count: usize) -> bool {
        self.unlocked || active_count < self.free_limit
    }
}

/// Looks up where a service can be cancelled.
pub trait CancellationCatalog: Send + Sync {
    fn find_cancellation_reference(&self, service_name: &str) -> Option<String>;
}

/// Catalog backed by a fixed name-to-reference map.
#[derive(Debug, Clone, Default)]
pub struct StaticCancellationCatalog {
    entries: HashMap<String, String>,
}

impl StaticCancellationCatalog {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, reference)| (normalize_service_name(name.as_ref()), reference.into()))
                .filter(|(name, _)| !name.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CancellationCatalog for StaticCancellationCatalog {
    fn find_cancellation_reference(&self, service_name: &str) -> Option<String> {
        self.entries.get(&normalize_service_name(service_name)).cloned()
    }
}

/// Lowercases and strips everything but ASCII letters and digits.
pub fn normalize_service_name(name: &str) -> String {
    NON_ALNUM_RE
        .replace_all(&name.to_lowercase(), "")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_service_name, AddRecordGate, CancellationCatalog, FreeTierGate,
        StaticCancellationCatalog,
    };

    #[test]
    fn free_tier_blocks_at_limit_until_unlocked() {
        let gate = FreeTierGate::default();
        assert!(gate.can_add_record(3));
        assert!(!gate.can_add_record(4));

        let unlocked = FreeTierGate {
            unlocked: true,
            ..gate
        };
        assert!(unlocked.can_add_record(30));
    }

    #[test]
    fn catalog_matches_normalized_names() {
        assert_eq!(normalize_service_name("Disney+ Plus"), "disneyplus");

        let catalog =
            StaticCancellationCatalog::new([("Apple Music", "https://example.com/cancel")]);
        assert_eq!(
            catalog.find_cancellation_reference("apple-music").as_deref(),
            Some("https://example.com/cancel")
        );
        assert!(catalog.find_cancellation_reference("Spotify").is_none());
    }
}
