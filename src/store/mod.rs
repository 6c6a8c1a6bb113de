//! Store Synchronizer
//!
//! The whole engine state travels as one JSON blob ([`StoreState`]) to and
//! from the shared store. `load()` fetches the full snapshot and adopts its
//! version; `save()` pushes the full snapshot. Every call is bounded by a
//! short timeout.
//!
//! Writes carry an optimistic `version`; the store rejects stale versions
//! with `409 Conflict`. Only a [`SyncRole::Writer`] synchronizer may save.

mod client;
mod writer;

pub use client::{HealthSnapshot, SaveAck, StoreClient};
pub use writer::{spawn_writer, SyncConflict};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::position::PositionSetup;
use crate::recorder::{PerformanceAggregate, TradeRecord};
use crate::types::Asset;

/// Full persisted state. Missing keys fall back to empty defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreState {
    pub trades: Vec<TradeRecord>,
    pub active_trades: BTreeMap<Asset, Option<PositionSetup>>,
    pub performance: PerformanceAggregate,
    pub version: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StoreState {
    /// Recompute derived fields from the trade list
    pub fn normalize(&mut self) {
        self.performance = PerformanceAggregate::from_trades(&self.trades);
    }

    pub fn active_count(&self) -> usize {
        self.active_trades
            .values()
            .filter(|slot| slot.as_ref().map(|s| s.is_active()).unwrap_or(false))
            .count()
    }

    pub fn active(&self, asset: Asset) -> Option<&PositionSetup> {
        self.active_trades
            .get(&asset)
            .and_then(|slot| slot.as_ref())
            .filter(|s| s.is_active())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store request timed out")]
    Timeout,
    #[error("store transport error: {0}")]
    Transport(String),
    #[error("store returned HTTP {0}")]
    Status(u16),
    #[error("stale write: local version {local}, store version {remote}")]
    Conflict { local: u64, remote: u64 },
    #[error("could not decode store response: {0}")]
    Decode(String),
    #[error("synchronizer is read-only")]
    ReadOnly,
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout
        } else if e.is_decode() {
            SyncError::Decode(e.to_string())
        } else {
            SyncError::Transport(e.to_string())
        }
    }
}

/// Whether this process may push state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRole {
    Writer,
    ReadOnly,
}

/// Pull/push the state blob, tracking the last version seen
#[derive(Debug, Clone)]
pub struct StoreSynchronizer {
    client: StoreClient,
    role: SyncRole,
    version: Arc<AtomicU64>,
}

impl StoreSynchronizer {
    pub fn new(client: StoreClient, role: SyncRole) -> Self {
        Self {
            client,
            role,
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Fetch the remote snapshot and adopt its version.
    pub async fn load(&self) -> Result<StoreState, SyncError> {
        let mut state = self.client.get_state().await?;
        state.normalize();
        self.version.store(state.version, Ordering::SeqCst);
        tracing::info!(
            version = state.version,
            trades = state.trades.len(),
            active = state.active_count(),
            "💾 [STORE] State loaded"
        );
        Ok(state)
    }

    /// Push `state` stamped with the last version this synchronizer saw.
    pub async fn save(&self, state: &StoreState) -> Result<SaveAck, SyncError> {
        if self.role == SyncRole::ReadOnly {
            return Err(SyncError::ReadOnly);
        }
        let mut outgoing = state.clone();
        outgoing.version = self.version();
        outgoing.updated_at = Some(Utc::now());

        let ack = self.client.put_state(&outgoing).await?;
        self.version.store(ack.version, Ordering::SeqCst);
        tracing::debug!(version = ack.version, "💾 [STORE] State saved");
        Ok(ack)
    }

    pub async fn health(&self) -> Result<HealthSnapshot, SyncError> {
        self.client.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let state: StoreState = serde_json::from_str(r#"{"trades": []}"#).unwrap();
        assert!(state.active_trades.is_empty());
        assert_eq!(state.performance, PerformanceAggregate::default());
        assert_eq!(state.version, 0);

        let empty: StoreState = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, StoreState::default());
    }

    #[test]
    fn null_slots_round_trip_as_null() {
        let mut state = StoreState::default();
        state.active_trades.insert(Asset::BTC, None);
        let json = serde_json::to_value(&state).unwrap();
        assert!(json["activeTrades"]["BTC"].is_null());
        assert_eq!(state.active_count(), 0);
    }

    #[test]
    fn read_only_save_makes_no_request() {
        // Unroutable URL: a network attempt would fail with Transport, not ReadOnly
        let client = StoreClient::new("http://127.0.0.1:1", 100).unwrap();
        let sync = StoreSynchronizer::new(client, SyncRole::ReadOnly);
        let result = tokio_test::block_on(sync.save(&StoreState::default()));
        assert!(matches!(result, Err(SyncError::ReadOnly)));
    }
}
