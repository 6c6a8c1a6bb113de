//! Outcome Recorder
//!
//! Converts terminal position setups into [`TradeRecord`]s exactly once and
//! recomputes [`PerformanceAggregate`] from the full trade list after every
//! append. The aggregate is never updated incrementally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::position::{ExitResolution, PositionSetup};
use crate::types::{Asset, ClosedBy, Outcome};

/// Per-trade money at risk
pub const DEFAULT_RISK_CAPITAL: f64 = 10.0;
/// Entry prices closer than this (same asset, same outcome) count as the same trade
pub const DUPLICATE_ENTRY_TOLERANCE: f64 = 0.5;
/// Stand-in for an infinite profit factor (wins, no losses)
pub const PROFIT_FACTOR_INFINITE: f64 = 999.0;
/// WIN payout multiple of risk capital when stop/target distances are degenerate
const DEGENERATE_WIN_MULTIPLE: f64 = 3.0;

/// A closed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub asset: Asset,
    pub setup_snapshot: PositionSetup,
    pub outcome: Outcome,
    #[serde(rename = "realizedPnL", alias = "realizedPnl")]
    pub realized_pnl: f64,
    #[serde(default)]
    pub price_move: f64,
    #[serde(default)]
    pub exit_price: f64,
    pub closed_at: DateTime<Utc>,
    pub closed_by: ClosedBy,
}

/// Performance statistics, a pure function of the trade list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceAggregate {
    pub total_trades: u32,
    pub winners: u32,
    pub losers: u32,
    pub breakeven_trades: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub breakeven_rate: f64,
    pub total_profit: f64,
}

impl PerformanceAggregate {
    /// Replay every record from scratch
    pub fn from_trades(trades: &[TradeRecord]) -> Self {
        let mut agg = Self::default();
        let mut win_amount = 0.0;
        let mut loss_amount = 0.0;

        for trade in trades {
            let pnl = sanitize(trade.realized_pnl);
            agg.total_trades += 1;
            agg.total_profit += pnl;
            match trade.outcome {
                Outcome::Win => {
                    agg.winners += 1;
                    win_amount += pnl.abs();
                }
                Outcome::Loss => {
                    agg.losers += 1;
                    loss_amount += pnl.abs();
                }
                Outcome::Breakeven => agg.breakeven_trades += 1,
                Outcome::Active | Outcome::Open => {}
            }
        }

        if agg.total_trades > 0 {
            let total = agg.total_trades as f64;
            agg.win_rate = agg.winners as f64 / total * 100.0;
            agg.breakeven_rate = agg.breakeven_trades as f64 / total * 100.0;
        }
        if agg.winners > 0 {
            agg.avg_win = win_amount / agg.winners as f64;
        }
        if agg.losers > 0 {
            agg.avg_loss = loss_amount / agg.losers as f64;
        }
        agg.profit_factor = if loss_amount > 0.0 {
            win_amount / loss_amount
        } else if win_amount > 0.0 {
            PROFIT_FACTOR_INFINITE
        } else {
            0.0
        };
        agg.total_profit = sanitize(agg.total_profit);
        agg
    }
}

/// Why a record call did nothing
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordSkip {
    #[error("outcome {0} is not terminal")]
    NonTerminal(Outcome),
    #[error("setup already recorded")]
    AlreadyRecorded,
    #[error("matching trade already recorded for {asset} at {entry_price:.2}")]
    Duplicate { asset: Asset, entry_price: f64 },
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Idempotent trade recorder
#[derive(Debug, Clone)]
pub struct OutcomeRecorder {
    risk_capital: f64,
}

impl Default for OutcomeRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_RISK_CAPITAL)
    }
}

impl OutcomeRecorder {
    pub fn new(risk_capital: f64) -> Self {
        Self { risk_capital }
    }

    /// Realized PnL in currency units for `outcome`.
    ///
    /// WIN scales risk capital by target distance over the initial stop
    /// distance; LOSS always costs exactly the risk capital.
    pub fn realized_pnl(&self, setup: &PositionSetup, outcome: Outcome) -> f64 {
        let pnl = match outcome {
            Outcome::Win => {
                let entry = setup.entry_price;
                let (stop_pct, target_pct) = if entry > 0.0 {
                    (
                        (setup.initial_stop() - entry).abs() / entry,
                        (setup.target2 - entry).abs() / entry,
                    )
                } else {
                    (0.0, 0.0)
                };
                if stop_pct > 0.0 && target_pct > 0.0 {
                    let position_value = self.risk_capital / stop_pct;
                    position_value * target_pct
                } else {
                    self.risk_capital * DEGENERATE_WIN_MULTIPLE
                }
            }
            Outcome::Loss => -self.risk_capital,
            Outcome::Breakeven | Outcome::Active | Outcome::Open => 0.0,
        };
        sanitize(pnl)
    }

    /// Check every idempotency guard without mutating anything
    pub fn check(
        &self,
        trades: &[TradeRecord],
        setup: &PositionSetup,
        outcome: Outcome,
    ) -> Result<(), RecordSkip> {
        if !outcome.is_terminal() {
            return Err(RecordSkip::NonTerminal(outcome));
        }
        if setup.recorded {
            return Err(RecordSkip::AlreadyRecorded);
        }

        let duplicate = trades.iter().any(|t| {
            let prior = &t.setup_snapshot;
            let same_id = !setup.id.is_nil() && prior.id == setup.id;
            let same_open = t.asset == setup.asset && prior.opened_at == setup.opened_at;
            let near_entry = t.asset == setup.asset
                && t.outcome == outcome
                && (prior.entry_price - setup.entry_price).abs() <= DUPLICATE_ENTRY_TOLERANCE;
            same_id || same_open || near_entry
        });
        if duplicate {
            return Err(RecordSkip::Duplicate {
                asset: setup.asset,
                entry_price: setup.entry_price,
            });
        }
        Ok(())
    }

    /// Record a closed setup.
    ///
    /// The `recorded` flag and the appended record change together, in memory,
    /// before anything is persisted. On a skip nothing is mutated.
    pub fn record(
        &self,
        trades: &mut Vec<TradeRecord>,
        performance: &mut PerformanceAggregate,
        setup: &mut PositionSetup,
        resolution: &ExitResolution,
        closed_by: ClosedBy,
        now: DateTime<Utc>,
    ) -> Result<TradeRecord, RecordSkip> {
        if let Err(skip) = self.check(trades, setup, resolution.outcome) {
            tracing::info!(
                asset = %setup.asset,
                outcome = %resolution.outcome,
                reason = %skip,
                "[RECORDER] Skipping record"
            );
            return Err(skip);
        }

        let realized_pnl = self.realized_pnl(setup, resolution.outcome);
        setup.recorded = true;

        let record = TradeRecord {
            asset: setup.asset,
            setup_snapshot: setup.clone(),
            outcome: resolution.outcome,
            realized_pnl,
            price_move: sanitize(resolution.price_move),
            exit_price: sanitize(resolution.exit_price),
            closed_at: now,
            closed_by,
        };
        trades.push(record.clone());
        *performance = PerformanceAggregate::from_trades(trades);

        tracing::info!(
            asset = %record.asset,
            outcome = %record.outcome,
            pnl = %format!("${:+.2}", record.realized_pnl),
            closed_by = %closed_by,
            total_trades = performance.total_trades,
            win_rate = %format!("{:.1}%", performance.win_rate),
            "💰 [RECORDER] Trade recorded"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SizingPreset;
    use crate::types::{Direction, MarketRegime, SetupStatus};
    use chrono::Duration;

    fn closed_setup(asset: Asset, entry: f64) -> PositionSetup {
        let mut setup = PositionSetup::open(
            asset,
            Direction::Bullish,
            entry,
            &SizingPreset::Conservative.profile(),
            10.0,
            MarketRegime::default(),
            Utc::now(),
        );
        setup.status = SetupStatus::Closed;
        setup
    }

    fn resolution(outcome: Outcome) -> ExitResolution {
        ExitResolution {
            outcome,
            exit_price: 100.0,
            price_move: 0.0,
        }
    }

    #[test]
    fn win_pnl_uses_implied_position_value() {
        let recorder = OutcomeRecorder::default();
        let mut setup = closed_setup(Asset::BTC, 100.0);
        // Breakeven-armed: live stop moved to entry, original kept
        setup.original_stop = Some(setup.stop);
        setup.stop = 100.0;
        let pnl = recorder.realized_pnl(&setup, Outcome::Win);
        assert!((pnl - 25.0).abs() < 1e-6, "pnl = {}", pnl);
    }

    #[test]
    fn degenerate_win_falls_back_to_triple_risk() {
        let recorder = OutcomeRecorder::default();
        let mut setup = closed_setup(Asset::BTC, 100.0);
        setup.stop = 100.0;
        setup.original_stop = None;
        assert_eq!(recorder.realized_pnl(&setup, Outcome::Win), 30.0);
    }

    #[test]
    fn loss_is_always_minus_risk_capital() {
        let recorder = OutcomeRecorder::default();
        let mut setup = closed_setup(Asset::ETH, 3000.0);
        assert_eq!(recorder.realized_pnl(&setup, Outcome::Loss), -10.0);
        setup.stop = 2000.0;
        assert_eq!(recorder.realized_pnl(&setup, Outcome::Loss), -10.0);
        assert_eq!(recorder.realized_pnl(&setup, Outcome::Breakeven), 0.0);
    }

    #[test]
    fn non_finite_pnl_is_sanitized() {
        let recorder = OutcomeRecorder::new(f64::INFINITY);
        let setup = closed_setup(Asset::BTC, 100.0);
        assert_eq!(recorder.realized_pnl(&setup, Outcome::Loss), 0.0);
    }

    #[test]
    fn recording_twice_yields_one_record() {
        let recorder = OutcomeRecorder::default();
        let mut trades = Vec::new();
        let mut perf = PerformanceAggregate::default();
        let mut setup = closed_setup(Asset::BTC, 100.0);

        let first = recorder.record(
            &mut trades,
            &mut perf,
            &mut setup,
            &resolution(Outcome::Loss),
            ClosedBy::Engine,
            Utc::now(),
        );
        assert!(first.is_ok());
        assert!(setup.recorded);

        let second = recorder.record(
            &mut trades,
            &mut perf,
            &mut setup,
            &resolution(Outcome::Loss),
            ClosedBy::Engine,
            Utc::now(),
        );
        assert_eq!(second, Err(RecordSkip::AlreadyRecorded));
        assert_eq!(trades.len(), 1);
        assert_eq!(perf.total_trades, 1);
    }

    #[test]
    fn near_entry_same_outcome_is_duplicate_even_with_new_id() {
        let recorder = OutcomeRecorder::default();
        let mut trades = Vec::new();
        let mut perf = PerformanceAggregate::default();

        let mut first = closed_setup(Asset::BTC, 100.0);
        recorder
            .record(
                &mut trades,
                &mut perf,
                &mut first,
                &resolution(Outcome::Loss),
                ClosedBy::Engine,
                Utc::now(),
            )
            .unwrap();

        let mut copy = closed_setup(Asset::BTC, 100.3);
        copy.opened_at = first.opened_at + Duration::seconds(90);
        let result = recorder.record(
            &mut trades,
            &mut perf,
            &mut copy,
            &resolution(Outcome::Loss),
            ClosedBy::Engine,
            Utc::now(),
        );
        assert!(matches!(result, Err(RecordSkip::Duplicate { .. })));
        assert!(!copy.recorded);

        // Different outcome at the same price is a different trade
        let mut other = closed_setup(Asset::BTC, 100.3);
        other.opened_at = first.opened_at + Duration::seconds(180);
        assert!(recorder
            .record(
                &mut trades,
                &mut perf,
                &mut other,
                &resolution(Outcome::Breakeven),
                ClosedBy::Engine,
                Utc::now(),
            )
            .is_ok());
        assert_eq!(trades.len(), 2);
    }

    #[test]
    fn same_id_is_duplicate() {
        let recorder = OutcomeRecorder::default();
        let mut trades = Vec::new();
        let mut perf = PerformanceAggregate::default();
        let mut setup = closed_setup(Asset::ETH, 3000.0);
        let mut replica = setup.clone();

        recorder
            .record(
                &mut trades,
                &mut perf,
                &mut setup,
                &resolution(Outcome::Win),
                ClosedBy::Engine,
                Utc::now(),
            )
            .unwrap();
        // A stale copy of the same position (recorded flag never seen)
        replica.entry_price = 3100.0;
        let result = recorder.record(
            &mut trades,
            &mut perf,
            &mut replica,
            &resolution(Outcome::Loss),
            ClosedBy::Manual,
            Utc::now(),
        );
        assert!(matches!(result, Err(RecordSkip::Duplicate { .. })));
    }

    #[test]
    fn non_terminal_outcome_is_refused() {
        let recorder = OutcomeRecorder::default();
        let mut trades = Vec::new();
        let mut perf = PerformanceAggregate::default();
        let mut setup = closed_setup(Asset::BTC, 100.0);
        let result = recorder.record(
            &mut trades,
            &mut perf,
            &mut setup,
            &resolution(Outcome::Active),
            ClosedBy::Manual,
            Utc::now(),
        );
        assert_eq!(result, Err(RecordSkip::NonTerminal(Outcome::Active)));
        assert!(trades.is_empty());
        assert!(!setup.recorded);
    }

    #[test]
    fn aggregate_replays_trade_list() {
        let recorder = OutcomeRecorder::default();
        let mut trades = Vec::new();
        let mut perf = PerformanceAggregate::default();
        let base = Utc::now();

        for (i, outcome) in [Outcome::Win, Outcome::Loss, Outcome::Breakeven, Outcome::Win]
            .into_iter()
            .enumerate()
        {
            let mut setup = closed_setup(Asset::BTC, 100.0 + i as f64 * 10.0);
            setup.opened_at = base + Duration::minutes(i as i64);
            setup.original_stop = Some(setup.stop);
            recorder
                .record(
                    &mut trades,
                    &mut perf,
                    &mut setup,
                    &resolution(outcome),
                    ClosedBy::Engine,
                    Utc::now(),
                )
                .unwrap();
        }

        assert_eq!(perf, PerformanceAggregate::from_trades(&trades));
        assert_eq!(perf.total_trades, 4);
        assert_eq!(perf.winners, 2);
        assert_eq!(perf.losers, 1);
        assert_eq!(perf.breakeven_trades, 1);
        assert!((perf.win_rate - 50.0).abs() < 1e-9);
        assert!((perf.breakeven_rate - 25.0).abs() < 1e-9);
        assert!((perf.avg_win - 25.0).abs() < 1e-6);
        assert!((perf.avg_loss - 10.0).abs() < 1e-9);
        assert!((perf.profit_factor - 5.0).abs() < 1e-6);
        assert!((perf.total_profit - 40.0).abs() < 1e-6);
    }

    #[test]
    fn profit_factor_sentinels() {
        assert_eq!(PerformanceAggregate::from_trades(&[]).profit_factor, 0.0);

        let recorder = OutcomeRecorder::default();
        let mut trades = Vec::new();
        let mut perf = PerformanceAggregate::default();
        let mut setup = closed_setup(Asset::ETH, 2500.0);
        recorder
            .record(
                &mut trades,
                &mut perf,
                &mut setup,
                &resolution(Outcome::Win),
                ClosedBy::Engine,
                Utc::now(),
            )
            .unwrap();
        assert_eq!(perf.profit_factor, PROFIT_FACTOR_INFINITE);
    }
}
