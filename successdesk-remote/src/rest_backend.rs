//! PostgREST implementation of [`Backend`].
//!
//! - INSERT: `POST /rest/v1/{table}` with the record as body
//! - UPDATE: `PATCH /rest/v1/{table}?{column}=eq.{value}`
//! - DELETE: `DELETE /rest/v1/{table}?{column}=eq.{value}`
//!
//! Transport failures map to [`BackendError::Network`], non-2xx responses
//! to [`BackendError::Rejected`]. Retrying is the coordinator's job.

use crate::config::RemoteConfig;
use crate::error::RemoteResult;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use successdesk_sync::{Backend, BackendError, BackendResult, MatchKey};
use tracing::debug;

/// HTTP client for the hosted tables.
#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    config: RemoteConfig,
}

impl RestBackend {
    pub fn new(config: RemoteConfig) -> RemoteResult<Self> {
        config.validate()?;
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn table_url(&self, table: &str) -> BackendResult<String> {
        if table.is_empty() || table.contains(['/', '?', '#']) {
            return Err(BackendError::InvalidRequest(format!(
                "invalid table name '{table}'"
            )));
        }
        Ok(format!("{}/{table}", self.config.rest_root()))
    }

    /// Adds auth headers and asks the server not to echo the row back.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
            .header("Prefer", "return=minimal")
    }

    async fn send(&self, label: &str, request: RequestBuilder) -> BackendResult<()> {
        let resp = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        check_status(label, resp).await
    }
}

fn filter(key: &MatchKey) -> [(String, String); 1] {
    [(key.column.clone(), format!("eq.{}", key.value_text()))]
}

async fn check_status(label: &str, resp: Response) -> BackendResult<()> {
    let status = resp.status();
    if status.is_success() {
        debug!("[SYNC] {label} -> {status}");
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<Value>(&body) {
        Ok(json) => json
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(body),
        Err(_) => body,
    };
    Err(BackendError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl Backend for RestBackend {
    async fn insert(&self, table: &str, record: &Value) -> BackendResult<()> {
        let url = self.table_url(table)?;
        self.send(&format!("INSERT {table}"), self.client.post(&url).json(record))
            .await
    }

    async fn update(&self, table: &str, key: &MatchKey, record: &Value) -> BackendResult<()> {
        let url = self.table_url(table)?;
        let request = self.client.patch(&url).query(&filter(key)).json(record);
        self.send(&format!("UPDATE {table} [{key}]"), request).await
    }

    async fn delete(&self, table: &str, key: &MatchKey) -> BackendResult<()> {
        let url = self.table_url(table)?;
        let request = self.client.delete(&url).query(&filter(key));
        self.send(&format!("DELETE {table} [{key}]"), request).await
    }

    async fn ping(&self) -> BackendResult<()> {
        let url = format!("{}/", self.config.rest_root());
        self.send("PING", self.client.get(&url)).await
    }
}
