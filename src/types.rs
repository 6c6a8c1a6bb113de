//! Core types used throughout PaperTrail
//!
//! Defines assets, directions, regime labels, outcomes and price samples.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tracked assets (one price stream each)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
    BTC,
    ETH,
}

impl Default for Asset {
    fn default() -> Self {
        Asset::BTC
    }
}

impl Asset {
    pub const ALL: [Asset; 2] = [Asset::BTC, Asset::ETH];

    /// Parse from string (case-insensitive, tolerates quote/pair suffixes)
    pub fn from_str(s: &str) -> Option<Self> {
        let upper = s.trim().trim_matches('"').to_uppercase();
        if upper.starts_with("BTC") {
            Some(Asset::BTC)
        } else if upper.starts_with("ETH") {
            Some(Asset::ETH)
        } else {
            None
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::BTC => write!(f, "BTC"),
            Asset::ETH => write!(f, "ETH"),
        }
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    /// Whether `price` is at or beyond `level` in the profitable direction.
    pub fn reached(&self, price: f64, level: f64) -> bool {
        match self {
            Direction::Bullish => price >= level,
            Direction::Bearish => price <= level,
        }
    }

    /// Whether `price` is at or beyond `level` in the losing direction.
    pub fn breached(&self, price: f64, level: f64) -> bool {
        match self {
            Direction::Bullish => price <= level,
            Direction::Bearish => price >= level,
        }
    }

    /// +1 for bullish, -1 for bearish
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bullish => write!(f, "BULLISH"),
            Direction::Bearish => write!(f, "BEARISH"),
        }
    }
}

/// Trend label derived from the rolling window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketCondition {
    TrendingUp,
    TrendingDown,
    Ranging,
}

impl fmt::Display for MarketCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketCondition::TrendingUp => write!(f, "TRENDING_UP"),
            MarketCondition::TrendingDown => write!(f, "TRENDING_DOWN"),
            MarketCondition::Ranging => write!(f, "RANGING"),
        }
    }
}

/// Volatility label derived from mean absolute percent change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityLevel {
    Low,
    Normal,
    High,
    Extreme,
}

impl VolatilityLevel {
    pub fn is_elevated(&self) -> bool {
        matches!(self, VolatilityLevel::High | VolatilityLevel::Extreme)
    }
}

impl fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityLevel::Low => write!(f, "LOW"),
            VolatilityLevel::Normal => write!(f, "NORMAL"),
            VolatilityLevel::High => write!(f, "HIGH"),
            VolatilityLevel::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// Current trend/volatility classification for one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRegime {
    pub condition: MarketCondition,
    pub volatility: VolatilityLevel,
}

impl Default for MarketRegime {
    fn default() -> Self {
        Self {
            condition: MarketCondition::Ranging,
            volatility: VolatilityLevel::Normal,
        }
    }
}

/// Trading session bucket, derived from the UTC hour at admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionTag {
    Asia,
    London,
    NewYork,
    OffHours,
}

impl SessionTag {
    pub fn at(ts: DateTime<Utc>) -> Self {
        match ts.hour() {
            0..=7 => SessionTag::Asia,
            8..=12 => SessionTag::London,
            13..=20 => SessionTag::NewYork,
            _ => SessionTag::OffHours,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, SessionTag::OffHours)
    }
}

impl fmt::Display for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionTag::Asia => write!(f, "ASIA"),
            SessionTag::London => write!(f, "LONDON"),
            SessionTag::NewYork => write!(f, "NEW_YORK"),
            SessionTag::OffHours => write!(f, "OFF_HOURS"),
        }
    }
}

/// Result of a closed position.
///
/// `Active`/`Open` only appear on payloads coming from outside (manual closes,
/// legacy blobs); the recorder refuses anything that is not terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Win,
    Loss,
    Breakeven,
    Active,
    Open,
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Win | Outcome::Loss | Outcome::Breakeven)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "WIN" => Some(Outcome::Win),
            "LOSS" => Some(Outcome::Loss),
            "BREAKEVEN" | "BE" => Some(Outcome::Breakeven),
            "ACTIVE" => Some(Outcome::Active),
            "OPEN" => Some(Outcome::Open),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Win => write!(f, "WIN"),
            Outcome::Loss => write!(f, "LOSS"),
            Outcome::Breakeven => write!(f, "BREAKEVEN"),
            Outcome::Active => write!(f, "ACTIVE"),
            Outcome::Open => write!(f, "OPEN"),
        }
    }
}

/// Lifecycle status of a position setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetupStatus {
    Active,
    Closed,
}

/// Who closed a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClosedBy {
    Engine,
    Manual,
}

impl fmt::Display for ClosedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosedBy::Engine => write!(f, "ENGINE"),
            ClosedBy::Manual => write!(f, "MANUAL"),
        }
    }
}

/// Raw tick from the price feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTick {
    pub asset: Asset,
    pub price: f64,
    pub pct_change: f64,
    /// Exchange timestamp in milliseconds (informational)
    #[serde(default)]
    pub timestamp: i64,
}

/// One entry of the rolling window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSample {
    pub asset: Asset,
    pub price: f64,
    pub pct_change: f64,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn asset_parses_pairs_and_case() {
        assert_eq!(Asset::from_str("btc"), Some(Asset::BTC));
        assert_eq!(Asset::from_str("ETHUSDT"), Some(Asset::ETH));
        assert_eq!(Asset::from_str("SOL"), None);
    }

    #[test]
    fn bearish_levels_are_mirrored() {
        assert!(Direction::Bearish.reached(98.0, 99.0));
        assert!(!Direction::Bearish.reached(99.5, 99.0));
        assert!(Direction::Bearish.breached(100.6, 100.5));
        assert!(Direction::Bullish.breached(99.5, 99.5));
    }

    #[test]
    fn session_buckets_follow_utc_hour() {
        let at = |h| Utc.with_ymd_and_hms(2026, 1, 5, h, 0, 0).unwrap();
        assert_eq!(SessionTag::at(at(3)), SessionTag::Asia);
        assert_eq!(SessionTag::at(at(9)), SessionTag::London);
        assert_eq!(SessionTag::at(at(15)), SessionTag::NewYork);
        assert_eq!(SessionTag::at(at(22)), SessionTag::OffHours);
        assert!(!SessionTag::OffHours.is_active());
    }

    #[test]
    fn outcome_serializes_upper_case() {
        let json = serde_json::to_string(&Outcome::Breakeven).unwrap();
        assert_eq!(json, "\"BREAKEVEN\"");
        assert!(!Outcome::Active.is_terminal());
    }
}
