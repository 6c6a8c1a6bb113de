//! Persistence Module
//!
//! Durable snapshot file for the store process and the `trades.csv` export.

use anyhow::{Context, Result};
use csv::{QuoteStyle, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::recorder::TradeRecord;
use crate::store::StoreState;

/// `trades.csv` row; field order is the column order.
///
/// `profit` is the realized PnL in currency units, the same value the
/// aggregate sums. The raw price distance travels in the blob as `priceMove`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCsvRow {
    pub timestamp: String,
    pub asset: String,
    pub direction: String,
    pub entry_min: f64,
    pub entry_max: f64,
    pub stop: f64,
    pub target1: f64,
    pub target2: f64,
    #[serde(rename = "entryPrice")]
    pub entry_price: f64,
    pub outcome: String,
    pub profit: f64,
    #[serde(rename = "marketCondition")]
    pub market_condition: String,
    #[serde(rename = "volatilityLevel")]
    pub volatility_level: String,
    #[serde(rename = "sessionActive")]
    pub session_active: bool,
}

impl From<&TradeRecord> for TradeCsvRow {
    fn from(trade: &TradeRecord) -> Self {
        let setup = &trade.setup_snapshot;
        Self {
            timestamp: trade.closed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            asset: trade.asset.to_string(),
            direction: setup.direction.to_string(),
            entry_min: setup.entry_band.min,
            entry_max: setup.entry_band.max,
            stop: setup.initial_stop(),
            target1: setup.target1,
            target2: setup.target2,
            entry_price: setup.entry_price,
            outcome: trade.outcome.to_string(),
            profit: trade.realized_pnl,
            market_condition: setup.regime_snapshot.condition.to_string(),
            volatility_level: setup.regime_snapshot.volatility.to_string(),
            session_active: setup.session_tag.is_active(),
        }
    }
}

/// Render every trade as RFC4180 CSV with a header row
pub fn render_trades_csv(trades: &[TradeRecord]) -> Result<String> {
    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .quote_style(QuoteStyle::Necessary)
        .from_writer(Vec::new());

    if trades.is_empty() {
        // serde only emits headers alongside the first record
        writer.write_record([
            "timestamp",
            "asset",
            "direction",
            "entry_min",
            "entry_max",
            "stop",
            "target1",
            "target2",
            "entryPrice",
            "outcome",
            "profit",
            "marketCondition",
            "volatilityLevel",
            "sessionActive",
        ])?;
    }
    for trade in trades {
        writer
            .serialize(TradeCsvRow::from(trade))
            .context("Failed to write trade row")?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV buffer: {}", e))?;
    String::from_utf8(bytes).context("CSV output was not UTF-8")
}

/// JSON snapshot file replaced atomically on every write
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        Ok(Self {
            path: data_dir.join("state.json"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file is a clean boot, not an error
    pub fn load(&self) -> Result<Option<StoreState>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "💾 [STORE] No snapshot found, starting fresh");
            return Ok(None);
        }
        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let mut state: StoreState =
            serde_json::from_str(&json).context("Failed to parse snapshot")?;
        state.normalize();
        Ok(Some(state))
    }

    /// Write to a sibling temp file, fsync, then rename over the snapshot.
    /// A failure leaves the previous snapshot intact.
    pub fn write_atomic(&self, state: &StoreState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)
                .with_context(|| format!("Failed to open {}", tmp.display()))?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PositionSetup;
    use crate::strategy::SizingPreset;
    use crate::types::{
        Asset, ClosedBy, Direction, MarketCondition, MarketRegime, Outcome, VolatilityLevel,
    };
    use chrono::{TimeZone, Utc};

    fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "papertrail_persistence_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ))
    }

    fn sample_trade() -> TradeRecord {
        let opened = Utc.with_ymd_and_hms(2026, 3, 2, 14, 5, 0).unwrap();
        let regime = MarketRegime {
            condition: MarketCondition::TrendingUp,
            volatility: VolatilityLevel::High,
        };
        let mut setup = PositionSetup::open(
            Asset::BTC,
            Direction::Bullish,
            100.0,
            &SizingPreset::Conservative.profile(),
            13.0,
            regime,
            opened,
        );
        setup.recorded = true;
        TradeRecord {
            asset: Asset::BTC,
            setup_snapshot: setup,
            outcome: Outcome::Win,
            realized_pnl: 25.0,
            price_move: 1.25,
            exit_price: 101.3,
            closed_at: Utc.with_ymd_and_hms(2026, 3, 2, 14, 9, 7).unwrap(),
            closed_by: ClosedBy::Engine,
        }
    }

    #[test]
    fn csv_has_fixed_columns_and_formatted_timestamp() {
        let csv = render_trades_csv(&[sample_trade()]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,asset,direction,entry_min,entry_max,stop,target1,target2,entryPrice,outcome,profit,marketCondition,volatilityLevel,sessionActive"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("2026-03-02 14:09:07,BTC,BULLISH,"), "row = {}", row);
        assert!(row.ends_with(",WIN,25.0,TRENDING_UP,HIGH,true"), "row = {}", row);
    }

    #[test]
    fn empty_trade_list_still_has_header() {
        let csv = render_trades_csv(&[]).unwrap();
        assert!(csv.starts_with("timestamp,asset,direction"));
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn snapshot_write_then_load() {
        let dir = temp_data_dir("snapshot");
        let file = SnapshotFile::new(&dir).unwrap();
        assert!(file.load().unwrap().is_none());

        let mut state = StoreState::default();
        state.trades.push(sample_trade());
        state.version = 4;
        file.write_atomic(&state).unwrap();

        let loaded = file.load().unwrap().unwrap();
        assert_eq!(loaded.version, 4);
        assert_eq!(loaded.trades.len(), 1);
        assert_eq!(loaded.performance.winners, 1);
        assert!(!file.path().with_extension("json.tmp").exists());

        let _ = fs::remove_dir_all(dir);
    }
}
