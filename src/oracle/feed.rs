//! Price feed WebSocket client
//!
//! Connects to the upstream tick stream, normalizes JSON frames into
//! [`PriceTick`]s and forwards them over an mpsc channel. Reconnects with
//! linear backoff; a run of consecutive failures is logged but never
//! terminates the process.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::FeedConfig;
use crate::types::{Asset, PriceTick};

/// Events emitted by a price feed
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Tick(PriceTick),
    Connected(String),
    Disconnected(String),
    Error(String, String),
}

/// Trait for price feed transports
#[async_trait]
pub trait PriceFeed: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stream events into `tx` until the receiver is dropped
    async fn connect(&mut self, tx: Sender<FeedEvent>) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Bounded linear backoff with a cap on consecutive failures
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_consecutive_failures: u32,
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        std::cmp::min(self.base_delay * attempt.max(1), self.max_delay)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_consecutive_failures
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_consecutive_failures: 10,
        }
    }
}

impl From<&FeedConfig> for ReconnectPolicy {
    fn from(cfg: &FeedConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_consecutive_failures: cfg.max_consecutive_failures,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeedMessage {
    asset: String,
    price: f64,
    #[serde(default, alias = "change", alias = "pct_change")]
    pct_change: f64,
    #[serde(default)]
    timestamp: i64,
}

/// Decode one text frame. Malformed frames and non-positive prices yield `None`.
pub fn parse_feed_message(text: &str) -> Option<PriceTick> {
    let raw: RawFeedMessage = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(error = %e, "[FEED] Dropping malformed message");
            return None;
        }
    };

    let asset = Asset::from_str(&raw.asset)?;
    if !raw.price.is_finite() || raw.price <= 0.0 || !raw.pct_change.is_finite() {
        tracing::debug!(asset = %asset, price = raw.price, "[FEED] Dropping non-positive price");
        return None;
    }

    Some(PriceTick {
        asset,
        price: raw.price,
        pct_change: raw.pct_change,
        timestamp: raw.timestamp,
    })
}

/// WebSocket client for the tick stream
#[derive(Debug, Clone)]
pub struct FeedClient {
    url: String,
    policy: ReconnectPolicy,
    connected: bool,
}

impl FeedClient {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            url: url.into(),
            policy,
            connected: false,
        }
    }

    async fn backoff(&self, attempts: &mut u32) {
        *attempts += 1;
        if self.policy.exhausted(*attempts) {
            tracing::error!(
                source = %"feed",
                failures = *attempts,
                cap = self.policy.max_consecutive_failures,
                "[FEED] Consecutive failure cap reached, cooling down before retrying"
            );
            tokio::time::sleep(self.policy.max_delay).await;
            *attempts = 0;
            return;
        }

        let delay = self.policy.delay_for(*attempts);
        tracing::info!(
            source = %"feed",
            delay_secs = delay.as_secs(),
            attempt = *attempts,
            "🔄 [FEED] Reconnecting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl PriceFeed for FeedClient {
    fn name(&self) -> &'static str {
        "feed"
    }

    async fn connect(&mut self, tx: Sender<FeedEvent>) -> Result<()> {
        let mut attempts = 0u32;

        loop {
            if tx.is_closed() {
                return Ok(());
            }

            tracing::info!(url = %self.url, attempt = attempts, "[FEED] Connecting...");

            let (ws_stream, _) = match connect_async(self.url.as_str()).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "[FEED] Connection failed");
                    let _ = tx
                        .send(FeedEvent::Error(self.name().to_string(), e.to_string()))
                        .await;
                    self.backoff(&mut attempts).await;
                    continue;
                }
            };

            let (mut write, mut read) = ws_stream.split();
            self.connected = true;
            attempts = 0;
            let _ = tx.send(FeedEvent::Connected(self.name().to_string())).await;
            tracing::info!("✅ [FEED] Connected");

            let receiver_gone = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(tick) = parse_feed_message(&text) {
                            if tx.send(FeedEvent::Tick(tick)).await.is_err() {
                                break true;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::warn!("[FEED] Connection closed by server");
                        break false;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "[FEED] WebSocket error");
                        let _ = tx
                            .send(FeedEvent::Error(self.name().to_string(), e.to_string()))
                            .await;
                        break false;
                    }
                    None => {
                        tracing::warn!("[FEED] Stream ended");
                        break false;
                    }
                    _ => {}
                }
            };

            self.connected = false;
            if receiver_gone {
                return Ok(());
            }
            let _ = tx
                .send(FeedEvent::Disconnected(self.name().to_string()))
                .await;
            self.backoff(&mut attempts).await;
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_frame() {
        let tick =
            parse_feed_message(r#"{"asset":"btc","price":64000.5,"pctChange":0.42,"timestamp":1}"#)
                .unwrap();
        assert_eq!(tick.asset, Asset::BTC);
        assert_eq!(tick.price, 64000.5);
        assert_eq!(tick.pct_change, 0.42);
    }

    #[test]
    fn drops_malformed_and_non_positive_frames() {
        assert!(parse_feed_message("not json").is_none());
        assert!(parse_feed_message(r#"{"asset":"ETH","price":0,"pctChange":1}"#).is_none());
        assert!(parse_feed_message(r#"{"asset":"ETH","price":-3,"pctChange":1}"#).is_none());
        assert!(parse_feed_message(r#"{"asset":"DOGE","price":1,"pctChange":1}"#).is_none());
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
            max_consecutive_failures: 3,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(7), Duration::from_secs(5));
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
