//! Remote store contract, error taxonomy and wire record shape.
//!
//! # Responsibility
//! - Define the async CRUD contract every remote backend implements.
//! - Encode/decode the remote record shape (0/1 flags, string enums).
//!
//! # Invariants
//! - `delete` is idempotent: an absent id is not an error.
//! - Decoding never defaults an unrecognized enum value; the record is dropped.

use crate::model::subscription::{
    BillingCycle, ServiceCategory, Subscription, SubscriptionId, DEFAULT_CURRENCY,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Remote backend failure classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    NetworkUnavailable,
    ServiceUnavailable,
    NotAuthenticated,
    QuotaExceeded,
    /// Target record does not exist remotely.
    NotFound(SubscriptionId),
    /// One remote record failed validation and was dropped.
    Malformed(String),
    Other(String),
}

impl RemoteError {
    /// Stable machine-readable code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NetworkUnavailable => "network_unavailable",
            Self::ServiceUnavailable => "service_unavailable",
            Self::NotAuthenticated => "not_authenticated",
            Self::QuotaExceeded => "quota_exceeded",
            Self::NotFound(_) => "not_found",
            Self::Malformed(_) => "malformed_record",
            Self::Other(_) => "other",
        }
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NetworkUnavailable => write!(f, "network unavailable"),
            Self::ServiceUnavailable => write!(f, "remote service unavailable"),
            Self::NotAuthenticated => write!(f, "not authenticated to remote store"),
            Self::QuotaExceeded => write!(f, "remote storage quota exceeded"),
            Self::NotFound(id) => write!(f, "remote record not found: {id}"),
            Self::Malformed(message) => write!(f, "malformed remote record: {message}"),
            Self::Other(message) => write!(f, "remote store error: {message}"),
        }
    }
}

impl Error for RemoteError {}

/// Async CRUD contract against the single remote database.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Checks whether the backend is reachable and authorized.
    async fn check_availability(&self) -> bool;
    /// Returns all remote records ordered by `next_billing_date` ascending.
    async fn fetch_all(&self) -> RemoteResult<Vec<Subscription>>;
    /// Creates or replaces the record with `record.id`.
    async fn upsert(&self, record: &Subscription) -> RemoteResult<()>;
    /// Removes the record; absent ids succeed.
    async fn delete(&self, id: SubscriptionId) -> RemoteResult<()>;
}

/// Remote wire shape of one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub record_name: String,
    pub service_name: Option<String>,
    #[serde(default)]
    pub custom_name: Option<String>,
    pub cost: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    pub billing_cycle: Option<String>,
    pub next_billing_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_active: Option<i64>,
    pub category: Option<String>,
    #[serde(default)]
    pub is_essential: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemoteRecord {
    /// Encodes a subscription into the remote shape.
    pub fn encode(record: &Subscription) -> Self {
        Self {
            record_name: record.id.to_string(),
            service_name: Some(record.service_name.clone()),
            custom_name: record.custom_name.clone(),
            cost: Some(record.amount),
            currency: Some(record.currency.clone()),
            billing_cycle: Some(record.billing_cycle.as_str().to_string()),
            next_billing_date: Some(record.next_billing_date),
            notes: record.notes.clone(),
            is_active: Some(flag_to_int(record.is_active)),
            category: Some(record.category.as_str().to_string()),
            is_essential: Some(flag_to_int(record.is_essential)),
            created_at: Some(record.created_at),
            updated_at: Some(record.updated_at),
        }
    }

    /// Decodes the remote shape.
    ///
    /// Missing optional fields default (`EUR`, active, non-essential,
    /// timestamps = `read_at`). Missing required fields, an unparsable id or
    /// an unrecognized cycle/category reject the record.
    ///
    /// # Errors
    /// - Returns [`RemoteError::Malformed`] describing the first problem.
    pub fn decode(&self, read_at: DateTime<Utc>) -> RemoteResult<Subscription> {
        let id = Uuid::parse_str(&self.record_name)
            .ok()
            .filter(|id| !id.is_nil())
            .ok_or_else(|| malformed(&self.record_name, "invalid record name"))?;
        let service_name = self
            .service_name
            .clone()
            .ok_or_else(|| malformed(&self.record_name, "missing serviceName"))?;
        let amount = self
            .cost
            .ok_or_else(|| malformed(&self.record_name, "missing cost"))?;
        let billing_cycle = self
            .billing_cycle
            .as_deref()
            .and_then(BillingCycle::parse)
            .ok_or_else(|| malformed(&self.record_name, "unrecognized billingCycle"))?;
        let next_billing_date = self
            .next_billing_date
            .ok_or_else(|| malformed(&self.record_name, "missing nextBillingDate"))?;
        let category = self
            .category
            .as_deref()
            .and_then(ServiceCategory::parse)
            .ok_or_else(|| malformed(&self.record_name, "unrecognized category"))?;

        let record = Subscription {
            id,
            service_name,
            custom_name: self.custom_name.clone(),
            amount,
            currency: self
                .currency
                .clone()
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            billing_cycle,
            next_billing_date,
            notes: self.notes.clone(),
            is_active: self.is_active.unwrap_or(1) == 1,
            category,
            is_essential: self.is_essential.unwrap_or(0) == 1,
            created_at: self.created_at.unwrap_or(read_at),
            updated_at: self.updated_at.unwrap_or(read_at),
        };
        record
            .validate()
            .map_err(|err| malformed(&self.record_name, &err.to_string()))?;
        Ok(record)
    }
}

/// Decodes a batch, dropping malformed records and sorting by due date.
///
/// Partial failure is tolerated: every valid record is returned.
pub fn decode_batch(records: &[RemoteRecord], read_at: DateTime<Utc>) -> Vec<Subscription> {
    let mut decoded: Vec<Subscription> = records
        .iter()
        .filter_map(|record| match record.decode(read_at) {
            Ok(subscription) => Some(subscription),
            Err(err) => {
                warn!(
                    "event=remote_decode module=sync status=dropped error_code={} error={err}",
                    err.code()
                );
                None
            }
        })
        .collect();
    decoded.sort_by(|left, right| left.next_billing_date.cmp(&right.next_billing_date));
    decoded
}

fn malformed(record_name: &str, reason: &str) -> RemoteError {
    RemoteError::Malformed(format!("{record_name}: {reason}"))
}

fn flag_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

/// Remote store used when no backend is configured: always unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemoteStore;

#[async_trait]
impl RemoteStore for OfflineRemoteStore {
    async fn check_availability(&self) -> bool {
        false
    }

    async fn fetch_all(&self) -> RemoteResult<Vec<Subscription>> {
        Err(RemoteError::NetworkUnavailable)
    }

    async fn upsert(&self, _record: &Subscription) -> RemoteResult<()> {
        Err(RemoteError::NetworkUnavailable)
    }

    async fn delete(&self, _id: SubscriptionId) -> RemoteResult<()> {
        Err(RemoteError::NetworkUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_batch, RemoteError, RemoteRecord};
    use crate::model::subscription::{BillingCycle, ServiceCategory, Subscription};
    use chrono::{Duration, TimeZone, Utc};

    fn sample() -> Subscription {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut record = Subscription::new("Netflix", 12.99, now + Duration::days(5), now)
            .with_cycle(BillingCycle::Monthly)
            .with_category(ServiceCategory::Streaming);
        record.is_essential = true;
        record
    }

    #[test]
    fn encode_uses_integer_flags_and_string_enums() {
        let record = sample();
        let json = serde_json::to_value(RemoteRecord::encode(&record)).unwrap();

        assert_eq!(json["recordName"], record.id.to_string());
        assert_eq!(json["isActive"], 1);
        assert_eq!(json["isEssential"], 1);
        assert_eq!(json["billingCycle"], "monthly");
        assert_eq!(json["category"], "streaming");
    }

    #[test]
    fn decode_restores_encoded_record() {
        let record = sample();
        let decoded = RemoteRecord::encode(&record).decode(Utc::now()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn decode_rejects_unknown_category_instead_of_defaulting() {
        let mut wire = RemoteRecord::encode(&sample());
        wire.category = Some("podcasts".to_string());

        let err = wire.decode(Utc::now()).unwrap_err();
        assert!(matches!(err, RemoteError::Malformed(_)));
    }

    #[test]
    fn decode_defaults_missing_optional_fields() {
        let mut wire = RemoteRecord::encode(&sample());
        wire.currency = None;
        wire.is_active = None;
        wire.is_essential = None;
        wire.updated_at = None;
        let read_at = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();

        let decoded = wire.decode(read_at).unwrap();
        assert_eq!(decoded.currency, "EUR");
        assert!(decoded.is_active);
        assert!(!decoded.is_essential);
        assert_eq!(decoded.updated_at, read_at);
    }

    #[test]
    fn decode_batch_drops_only_malformed_records() {
        let good = RemoteRecord::encode(&sample());
        let mut bad = RemoteRecord::encode(&sample());
        bad.record_name = "not-a-uuid".to_string();

        let decoded = decode_batch(&[bad, good.clone()], Utc::now());
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id.to_string(), good.record_name);
    }
}
