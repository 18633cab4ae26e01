//! Remote backend configuration.

use crate::error::{RemoteError, RemoteResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for the hosted database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Project URL (e.g., "https://abc.supabase.co"). The REST API lives under `/rest/v1`.
    pub base_url: String,

    /// Anonymous or service key, sent as both `apikey` and bearer token.
    pub api_key: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn validate(&self) -> RemoteResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(RemoteError::Config("base_url must not be empty".into()));
        }
        if self.api_key.is_empty() {
            return Err(RemoteError::Config("api_key must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(RemoteError::Config("timeout_secs must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `base_url` without trailing slashes.
    pub(crate) fn rest_root(&self) -> String {
        format!("{}/rest/v1", self.base_url.trim_end_matches('/'))
    }
}
