//! HTTP client for the shared store

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{StoreState, SyncError};

/// Response to `PUT/POST /state`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAck {
    pub success: bool,
    pub timestamp: i64,
    #[serde(default)]
    pub version: u64,
}

/// Response to `GET /health`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: String,
    pub active_trade_count: usize,
    pub total_trades: usize,
    /// Seconds since the store process started
    pub uptime: u64,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    #[serde(default)]
    version: u64,
}

#[derive(Debug, Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    base_url: String,
}

impl StoreClient {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get_state(&self) -> Result<StoreState, SyncError> {
        let response = self.http.get(self.url("/state")).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::Status(response.status().as_u16()));
        }
        let state = response.json::<StoreState>().await?;
        Ok(state)
    }

    pub async fn put_state(&self, state: &StoreState) -> Result<SaveAck, SyncError> {
        let response = self.http.put(self.url("/state")).json(state).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::CONFLICT {
            let remote = response
                .json::<ConflictBody>()
                .await
                .map(|b| b.version)
                .unwrap_or_default();
            return Err(SyncError::Conflict {
                local: state.version,
                remote,
            });
        }
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }

        let ack = response.json::<SaveAck>().await?;
        if !ack.success {
            return Err(SyncError::Status(status.as_u16()));
        }
        Ok(ack)
    }

    pub async fn health(&self) -> Result<HealthSnapshot, SyncError> {
        let response = self.http.get(self.url("/health")).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::Status(response.status().as_u16()));
        }
        Ok(response.json::<HealthSnapshot>().await?)
    }
}
