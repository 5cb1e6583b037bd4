//! Record Store Client — minimal REST client for the external tabular record
//! store (create/update/get/find_one/list primitives only).
//!
//! Records are `{id, fields: map<string,value>}`. The live field schema of a
//! table is NOT trusted at build time; the Schema-Tolerant Writer samples it
//! at run start. Reads retry on transient failures; writes are single-shot
//! here because the writer layer owns its own fallback chain.

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

const DEFAULT_API_URL: &str = "https://api.airtable.com/v0";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_READ_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("record store API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid record store base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("record store did not return a record id")]
    MissingId,
}

impl StoreError {
    /// The known enum-option failure mode: a value outside an enumerated
    /// field's allowed option set. Triggers the writer's scoped fallback.
    pub fn is_invalid_option(&self) -> bool {
        matches!(self, StoreError::Api { message, .. }
            if message.contains("INVALID_MULTIPLE_CHOICE_OPTIONS"))
    }
}

/// One record in a table.
#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// String view of a field, trimmed; None when absent, null, or blank.
    pub fn text_field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct RecordPage {
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: Value,
}

/// The record-store seam consumed by the writer and the orchestrator.
/// Implemented by [`RecordStoreClient`] in production and by in-memory
/// stores in tests.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, table: &str, fields: Map<String, Value>) -> Result<Record, StoreError>;
    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Record, StoreError>;
    async fn get(&self, table: &str, id: &str) -> Result<Record, StoreError>;
    async fn find_one(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<Record>, StoreError>;
    async fn list(
        &self,
        table: &str,
        max_records: u32,
        filter: Option<&str>,
    ) -> Result<Vec<Record>, StoreError>;
}

/// Builds a `{Field}="value"` equality filter expression. The store's
/// formulas prefer double-quoted strings; embedded quotes are escaped.
pub fn equality_filter(field: &str, value: &str) -> String {
    format!("{{{field}}}=\"{}\"", value.replace('"', "\\\""))
}

/// REST client for the record store.
#[derive(Clone)]
pub struct RecordStoreClient {
    client: Client,
    base: Url,
    token: String,
}

impl RecordStoreClient {
    pub fn new(token: String, base_id: &str, api_url: Option<String>) -> Result<Self, StoreError> {
        let api_url = api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let base = Url::parse(&format!("{}/{base_id}", api_url.trim_end_matches('/')))
            .map_err(|e| StoreError::InvalidBaseUrl(e.to_string()))?;

        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client"),
            base,
            token,
        })
    }

    /// Table names can include spaces; Url::push percent-encodes segments.
    fn table_url(&self, table: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(table);
        }
        url
    }

    fn record_url(&self, table: &str, id: &str) -> Url {
        let mut url = self.table_url(table);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(id);
        }
        url
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
            .map(|e| e.error.to_string())
            .unwrap_or(body);
        Err(StoreError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Reads retry on 429/5xx and network errors with a short backoff.
    async fn get_with_retry(&self, url: Url) -> Result<reqwest::Response, StoreError> {
        let mut last_error: Option<StoreError> = None;

        for attempt in 0..MAX_READ_RETRIES {
            if attempt > 0 {
                let delay = std::time::Duration::from_millis(500 * (1 << (attempt - 1)));
                warn!(
                    "record store read attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .request(Method::GET, url.clone())
                .bearer_auth(&self.token)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(StoreError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = Some(StoreError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            return Self::check(response).await;
        }

        Err(last_error.unwrap_or(StoreError::Api {
            status: 0,
            message: "retries exhausted".to_string(),
        }))
    }

    async fn write(
        &self,
        method: Method,
        url: Url,
        fields: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        let payload = serde_json::json!({ "fields": fields });
        let response = self
            .client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let record: Record = response.json().await?;
        if record.id.is_empty() {
            return Err(StoreError::MissingId);
        }
        Ok(record)
    }
}

#[async_trait]
impl RecordStore for RecordStoreClient {
    async fn create(&self, table: &str, fields: Map<String, Value>) -> Result<Record, StoreError> {
        self.write(Method::POST, self.table_url(table), fields).await
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        self.write(Method::PATCH, self.record_url(table, id), fields)
            .await
    }

    async fn get(&self, table: &str, id: &str) -> Result<Record, StoreError> {
        let response = self.get_with_retry(self.record_url(table, id)).await?;
        Ok(response.json().await?)
    }

    async fn find_one(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<Record>, StoreError> {
        let mut url = self.table_url(table);
        url.query_pairs_mut()
            .append_pair("filterByFormula", &equality_filter(field, value))
            .append_pair("maxRecords", "1");

        let response = self.get_with_retry(url).await?;
        let page: RecordPage = response.json().await?;
        Ok(page.records.into_iter().next())
    }

    async fn list(
        &self,
        table: &str,
        max_records: u32,
        filter: Option<&str>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut url = self.table_url(table);
        url.query_pairs_mut()
            .append_pair("maxRecords", &max_records.to_string());
        if let Some(filter) = filter {
            url.query_pairs_mut().append_pair("filterByFormula", filter);
        }

        let response = self.get_with_retry(url).await?;
        let page: RecordPage = response.json().await?;
        Ok(page.records)
    }
}
