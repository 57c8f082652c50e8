//! TOML configuration for the core runtime.
//!
//! # Responsibility
//! - Deserialize the optional config file; every field has a default.
//! - Validate and convert sections into runtime values (reminder policy,
//!   budget defaults, add gate, remote endpoint, cancellation catalog).

use crate::model::budget::{BudgetSettings, DEFAULT_NOTIFY_PERCENTAGE};
use crate::schedule::reminder::{ReminderPolicy, DEFAULT_DAYS_BEFORE};
use crate::service::collaborators::{FreeTierGate, StaticCancellationCatalog, DEFAULT_FREE_LIMIT};
use crate::sync::http_remote::HttpRemoteConfig;
use chrono::{FixedOffset, NaiveTime};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_REMINDER_HOUR: u32 = 17;
const DEFAULT_REMINDER_MINUTE: u32 = 30;
const DEFAULT_USAGE_CHECK_HOUR: u32 = 20;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 15;
/// Largest supported UTC offset, in minutes.
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    /// A value parsed but is out of range.
    Invalid { field: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config file `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid { field, message } => write!(f, "invalid config `{field}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    pub days_before: Vec<u32>,
    pub hour: u32,
    pub minute: u32,
    pub usage_check_hour: u32,
    pub utc_offset_minutes: i32,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            days_before: DEFAULT_DAYS_BEFORE.to_vec(),
            hour: DEFAULT_REMINDER_HOUR,
            minute: DEFAULT_REMINDER_MINUTE,
            usage_check_hour: DEFAULT_USAGE_CHECK_HOUR,
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub monthly_limit: Option<f64>,
    pub notify_at_percentage: f64,
    pub enabled: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_limit: None,
            notify_at_percentage: DEFAULT_NOTIFY_PERCENTAGE,
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub free_limit: usize,
    pub unlocked: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            free_limit: DEFAULT_FREE_LIMIT,
            unlocked: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Remote base URL; no remote sync when unset.
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            auth_token: None,
            timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub reminders: ReminderConfig,
    pub budget: BudgetConfig,
    pub limits: LimitsConfig,
    pub remote: RemoteConfig,
    /// Service name to cancellation reference (usually a URL).
    pub cancellation_links: BTreeMap<String, String>,
}

impl CoreConfig {
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates the config file at `path`.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.reminder_policy().map(|_| ())?;
        if let Some(limit) = self.budget.monthly_limit {
            if !limit.is_finite() || limit < 0.0 {
                return Err(ConfigError::Invalid {
                    field: "budget.monthly_limit",
                    message: format!("expected a non-negative amount, got {limit}"),
                });
            }
        }
        if self.remote.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "remote.timeout_secs",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Builds the reminder policy from `[reminders]`.
    pub fn reminder_policy(&self) -> ConfigResult<ReminderPolicy> {
        let reminders = &self.reminders;
        let fire_time = NaiveTime::from_hms_opt(reminders.hour, reminders.minute, 0)
            .ok_or_else(|| ConfigError::Invalid {
                field: "reminders.hour",
                message: format!("{}:{} is not a time of day", reminders.hour, reminders.minute),
            })?;
        let usage_check_time = NaiveTime::from_hms_opt(reminders.usage_check_hour, 0, 0)
            .ok_or_else(|| ConfigError::Invalid {
                field: "reminders.usage_check_hour",
                message: format!("{} is not an hour of day", reminders.usage_check_hour),
            })?;
        let out_of_range = || ConfigError::Invalid {
            field: "reminders.utc_offset_minutes",
            message: format!("{} is out of range", reminders.utc_offset_minutes),
        };
        if reminders.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(out_of_range());
        }
        let utc_offset =
            FixedOffset::east_opt(reminders.utc_offset_minutes * 60).ok_or_else(out_of_range)?;

        let mut days_before = reminders.days_before.clone();
        days_before.sort_unstable_by(|left, right| right.cmp(left));
        days_before.dedup();

        Ok(ReminderPolicy {
            days_before,
            fire_time,
            usage_check_time,
            utc_offset,
        })
    }

    /// Budget settings used until the user saves their own.
    pub fn default_budget(&self) -> BudgetSettings {
        let mut settings = BudgetSettings {
            monthly_limit: self.budget.monthly_limit,
            notify_at_percentage: DEFAULT_NOTIFY_PERCENTAGE,
            enabled: self.budget.enabled,
        };
        settings.set_notify_percentage(self.budget.notify_at_percentage);
        settings
    }

    pub fn add_gate(&self) -> FreeTierGate {
        FreeTierGate {
            free_limit: self.limits.free_limit,
            unlocked: self.limits.unlocked,
        }
    }

    /// HTTP remote settings, `None` when no base URL is configured.
    pub fn http_remote(&self) -> Option<HttpRemoteConfig> {
        let base_url = self.remote.base_url.as_deref()?.trim();
        if base_url.is_empty() {
            return None;
        }
        Some(HttpRemoteConfig {
            base_url: base_url.to_string(),
            auth_token: self.remote.auth_token.clone(),
            timeout: Duration::from_secs(self.remote.timeout_secs),
        })
    }

    pub fn cancellation_catalog(&self) -> StaticCancellationCatalog {
        StaticCancellationCatalog::new(&self.cancellation_links)
    }
}
