//! JSON-over-HTTP remote store.
//!
//! # Endpoints
//! - `GET {base}/health` availability check (2xx = available).
//! - `GET {base}/records` array of wire records.
//! - `PUT {base}/records/{id}` create-or-update.
//! - `DELETE {base}/records/{id}` remove; 404 is treated as success.
//!
//! # Invariants
//! - Transport failures map onto the `RemoteError` taxonomy, never panic.
//! - Malformed array elements are dropped individually.

use crate::model::subscription::{Subscription, SubscriptionId};
use crate::sync::remote::{decode_batch, RemoteError, RemoteRecord, RemoteResult, RemoteStore};
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Connection settings for [`HttpRemoteStore`].
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

/// Remote store speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemoteStore {
    /// Builds the HTTP client.
    ///
    /// # Errors
    /// - Returns [`RemoteError::Other`] when the TLS/client setup fails.
    pub fn new(config: HttpRemoteConfig) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| RemoteError::Other(format!("http client setup failed: {err}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        self.authorized(request)
            .send()
            .await
            .map_err(map_transport_error)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn check_availability(&self) -> bool {
        match self.send(self.client.get(self.url("health"))).await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                let err = map_status(response.status(), None);
                warn!(
                    "event=remote_health module=sync status=unavailable error_code={}",
                    err.code()
                );
                false
            }
            Err(err) => {
                warn!(
                    "event=remote_health module=sync status=unavailable error_code={}",
                    err.code()
                );
                false
            }
        }
    }

    async fn fetch_all(&self) -> RemoteResult<Vec<Subscription>> {
        let response = self.send(self.client.get(self.url("records"))).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(map_status(status, None));
        }

        let values: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|err| RemoteError::Other(format!("invalid records payload: {err}")))?;
        let total = values.len();
        let wire: Vec<RemoteRecord> = values
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<RemoteRecord>(value) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!("event=remote_decode module=sync status=dropped error_code=malformed_record error={err}");
                    None
                }
            })
            .collect();

        let records = decode_batch(&wire, Utc::now());
        info!(
            "event=remote_fetch module=sync status=ok fetched={} accepted={}",
            total,
            records.len()
        );
        Ok(records)
    }

    async fn upsert(&self, record: &Subscription) -> RemoteResult<()> {
        let body = RemoteRecord::encode(record);
        let request = self
            .client
            .put(self.url(&format!("records/{}", record.id)))
            .json(&body);
        let response = self.send(request).await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(map_status(status, Some(record.id)))
        }
    }

    async fn delete(&self, id: SubscriptionId) -> RemoteResult<()> {
        let request = self.client.delete(self.url(&format!("records/{id}")));
        let response = self.send(request).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(map_status(status, Some(id)))
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_connect() || err.is_timeout() {
        RemoteError::NetworkUnavailable
    } else {
        RemoteError::Other(err.to_string())
    }
}

fn map_status(status: StatusCode, id: Option<SubscriptionId>) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::NotAuthenticated,
        StatusCode::NOT_FOUND => match id {
            Some(id) => RemoteError::NotFound(id),
            None => RemoteError::ServiceUnavailable,
        },
        StatusCode::TOO_MANY_REQUESTS | StatusCode::INSUFFICIENT_STORAGE => {
            RemoteError::QuotaExceeded
        }
        status if status.is_server_error() => RemoteError::ServiceUnavailable,
        status => RemoteError::Other(format!("unexpected status {status}")),
    }
}
