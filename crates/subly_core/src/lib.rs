//! Core of Subly: an offline-first subscription tracker.
//! Local snapshots are authoritative until a remote sync confirms them.

pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod schedule;
pub mod service;
pub mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConfigResult, CoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::budget::{BudgetImpact, BudgetSettings, BudgetStatus, BudgetStatusLevel};
pub use model::subscription::{
    BillingCycle, ServiceCategory, Subscription, SubscriptionId, SubscriptionValidationError,
};
pub use model::usage::UsageResponses;
pub use repo::record_store::{
    RecordStore, SettingsStore, SqliteLocalStore, StoreError, StoreResult,
};
pub use schedule::adapter::{ScheduleReport, SchedulerAdapter};
pub use schedule::center::{InMemoryReminderCenter, ReminderCenter, ReminderError};
pub use schedule::reminder::{ReminderId, ReminderPolicy, ScheduleEntry, Trigger};
pub use service::collaborators::{
    AddRecordGate, CancellationCatalog, FreeTierGate, StaticCancellationCatalog,
};
pub use service::coordinator::{
    CoordinatorDeps, CoordinatorError, CoordinatorResult, SubscriptionCoordinator, SyncReport,
};
pub use sync::http_remote::{HttpRemoteConfig, HttpRemoteStore};
pub use sync::memory_remote::InMemoryRemoteStore;
pub use sync::reconciler::{merge, MergeOutcome, Reconciler, RemoteOp, SyncStatus};
pub use sync::remote::{OfflineRemoteStore, RemoteError, RemoteResult, RemoteStore};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
