//! Paper Trading Engine
//!
//! The context object that owns every piece of per-asset state: rolling
//! price windows, regimes, signal cooldowns and the persisted
//! [`StoreState`] (active slots, trade list, aggregate). Components receive
//! it by reference; nothing lives in globals.
//!
//! Per scheduling tick and per asset the order is fixed:
//! regime update, exit resolution on the active position, then admission
//! of a new position only if the slot is empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::oracle::PriceAggregator;
use crate::position::{ExitResolution, ExitTransition, PositionSetup};
use crate::recorder::{OutcomeRecorder, PerformanceAggregate, RecordSkip, TradeRecord};
use crate::store::StoreState;
use crate::strategy::{Admission, RegimeClassifier, SignalGenerator};
use crate::types::{Asset, ClosedBy, MarketRegime, Outcome, PriceTick, SetupStatus};

/// Something a tick changed
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Admitted(PositionSetup),
    BreakevenArmed {
        asset: Asset,
        original_stop: f64,
        new_stop: f64,
    },
    Closed(TradeRecord),
    /// The position closed but the recorder refused it; the slot is still cleared
    CloseSkipped { asset: Asset, reason: RecordSkip },
}

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub events: Vec<EngineEvent>,
}

impl TickReport {
    /// Whether the persisted state changed and should be pushed
    pub fn state_changed(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn closed(&self) -> impl Iterator<Item = &TradeRecord> {
        self.events.iter().filter_map(|e| match e {
            EngineEvent::Closed(record) => Some(record),
            _ => None,
        })
    }
}

/// Operator request to close an asset's active position
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualCloseRequest {
    pub asset: String,
    pub outcome: String,
    /// Price distance captured or given back
    #[serde(default)]
    pub profit: f64,
    pub exit_price: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CloseError {
    #[error("no active position for {0}")]
    NoActivePosition(Asset),
    #[error("outcome {0:?} is not WIN, LOSS or BREAKEVEN")]
    NonTerminalOutcome(String),
    #[error("exit price {0} must be positive and finite")]
    InvalidExitPrice(f64),
    #[error("profit must be finite")]
    NonFiniteProfit,
    #[error("unknown asset {0:?}")]
    UnknownAsset(String),
    #[error("close not recorded: {0}")]
    Skipped(#[from] RecordSkip),
}

/// Read-only view served on the control endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub performance: PerformanceAggregate,
    pub active_trades: BTreeMap<Asset, Option<PositionSetup>>,
    pub total_trades: usize,
    pub regimes: BTreeMap<Asset, MarketRegime>,
    pub summary: String,
}

pub struct PaperTradingEngine {
    assets: Vec<Asset>,
    aggregator: PriceAggregator,
    regimes: RegimeClassifier,
    signals: SignalGenerator,
    recorder: OutcomeRecorder,
    state: StoreState,
}

impl PaperTradingEngine {
    pub fn new(assets: Vec<Asset>, signals: SignalGenerator, recorder: OutcomeRecorder) -> Self {
        let mut state = StoreState::default();
        for asset in &assets {
            state.active_trades.insert(*asset, None);
        }
        Self {
            assets,
            aggregator: PriceAggregator::default(),
            regimes: RegimeClassifier::new(),
            signals,
            recorder,
            state,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.tracked_assets(),
            SignalGenerator::new(config.engine.preset, config.engine.signal_cooldown_secs),
            OutcomeRecorder::new(config.engine.risk_capital),
        )
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    /// Feed one tick into the rolling window. Untracked assets are ignored.
    pub fn ingest(&mut self, tick: &PriceTick, now: DateTime<Utc>) -> bool {
        if !self.assets.contains(&tick.asset) {
            return false;
        }
        self.aggregator.add_tick(tick, now)
    }

    /// Run one scheduling pass over every tracked asset
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        for asset in self.assets.clone() {
            let regime = self.regimes.update(asset, &self.aggregator);
            self.resolve_exit(asset, now, &mut report);
            self.admit(asset, regime, now, &mut report);
        }
        report
    }

    fn resolve_exit(&mut self, asset: Asset, now: DateTime<Utc>, report: &mut TickReport) {
        let Some(price) = self.aggregator.latest_price(asset) else {
            return;
        };
        let Some(slot) = self.state.active_trades.get_mut(&asset) else {
            return;
        };
        let Some(setup) = slot.as_mut().filter(|s| s.is_active()) else {
            return;
        };

        match setup.evaluate_exit(price) {
            None => {}
            Some(ExitTransition::BreakevenArmed {
                original_stop,
                new_stop,
            }) => {
                info!(
                    asset = %asset,
                    price = price,
                    original_stop = original_stop,
                    new_stop = new_stop,
                    "🎯 [ENGINE] Target 1 reached, stop moved to breakeven"
                );
                report.events.push(EngineEvent::BreakevenArmed {
                    asset,
                    original_stop,
                    new_stop,
                });
            }
            Some(ExitTransition::Closed(resolution)) => {
                let result = self.recorder.record(
                    &mut self.state.trades,
                    &mut self.state.performance,
                    setup,
                    &resolution,
                    ClosedBy::Engine,
                    now,
                );
                *slot = None;
                report.events.push(match result {
                    Ok(record) => EngineEvent::Closed(record),
                    Err(reason) => EngineEvent::CloseSkipped { asset, reason },
                });
            }
        }
    }

    fn admit(
        &mut self,
        asset: Asset,
        regime: MarketRegime,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let has_active = self.state.active(asset).is_some();
        match self
            .signals
            .evaluate(asset, &self.aggregator, regime, has_active, now)
        {
            Admission::Admitted(setup) => {
                self.state.active_trades.insert(asset, Some(setup.clone()));
                report.events.push(EngineEvent::Admitted(setup));
            }
            Admission::ActivePosition => {}
            Admission::Cooldown { remaining_secs } => {
                debug!(asset = %asset, remaining_secs, "[ENGINE] Signal cooldown");
            }
            Admission::InsufficientData { samples } => {
                debug!(asset = %asset, samples, "[ENGINE] Not enough samples for momentum");
            }
            Admission::LowConfidence {
                confidence,
                min_confidence,
            } => {
                debug!(
                    asset = %asset,
                    confidence = %format!("{:.1}", confidence),
                    min_confidence,
                    "[ENGINE] Confidence below preset minimum"
                );
            }
        }
    }

    /// Close `request.asset` through the recorder with `closedBy = MANUAL`.
    ///
    /// Every field is validated before anything is mutated; a rejected
    /// request leaves the state untouched.
    pub fn manual_close(
        &mut self,
        request: &ManualCloseRequest,
        now: DateTime<Utc>,
    ) -> Result<TradeRecord, CloseError> {
        let asset = Asset::from_str(&request.asset)
            .ok_or_else(|| CloseError::UnknownAsset(request.asset.clone()))?;
        let outcome = Outcome::from_str(&request.outcome)
            .filter(Outcome::is_terminal)
            .ok_or_else(|| CloseError::NonTerminalOutcome(request.outcome.clone()))?;
        if !request.exit_price.is_finite() || request.exit_price <= 0.0 {
            return Err(CloseError::InvalidExitPrice(request.exit_price));
        }
        if !request.profit.is_finite() {
            return Err(CloseError::NonFiniteProfit);
        }

        let mut closing = self
            .state
            .active(asset)
            .cloned()
            .ok_or(CloseError::NoActivePosition(asset))?;
        closing.status = SetupStatus::Closed;
        let resolution = ExitResolution {
            outcome,
            exit_price: request.exit_price,
            price_move: request.profit.abs(),
        };

        let record = self.recorder.record(
            &mut self.state.trades,
            &mut self.state.performance,
            &mut closing,
            &resolution,
            ClosedBy::Manual,
            now,
        )?;
        self.state.active_trades.insert(asset, None);
        info!(
            asset = %asset,
            outcome = %outcome,
            exit_price = request.exit_price,
            "✋ [ENGINE] Position closed manually"
        );
        Ok(record)
    }

    /// Transitions the next tick would apply, without mutating anything
    pub fn preview_exits(&self) -> Vec<(Asset, ExitTransition)> {
        self.assets
            .iter()
            .filter_map(|&asset| {
                let mut setup = self.state.active(asset)?.clone();
                let price = self.aggregator.latest_price(asset)?;
                setup.evaluate_exit(price).map(|t| (asset, t))
            })
            .collect()
    }

    pub fn snapshot(&self) -> StoreState {
        self.state.clone()
    }

    /// Replace local state wholesale with a loaded snapshot
    pub fn restore(&mut self, mut state: StoreState) {
        state.normalize();
        for asset in &self.assets {
            state.active_trades.entry(*asset).or_insert(None);
        }
        for (asset, slot) in state.active_trades.iter_mut() {
            if slot.as_ref().map(|s| !s.is_active()).unwrap_or(false) {
                warn!(asset = %asset, "[ENGINE] Dropping closed setup left in active slot");
                *slot = None;
            }
        }
        self.state = state;
        self.signals.reset_cooldowns();
        debug!(
            version = self.state.version,
            trades = self.state.trades.len(),
            active = self.state.active_count(),
            "🔄 [ENGINE] State restored from snapshot"
        );
    }

    /// Rebase local state onto a newer remote snapshot after a stale write.
    ///
    /// Local trades and active slots stay authoritative. Remote trades this
    /// engine does not hold are merged in, and an active position the remote
    /// already recorded is released so it cannot close twice. Returns the
    /// number of merged trades.
    pub fn rebase(&mut self, remote: StoreState) -> usize {
        let mut merged = 0;
        for trade in remote.trades {
            let known = self
                .state
                .trades
                .iter()
                .any(|t| same_position(&t.setup_snapshot, &trade.setup_snapshot));
            if known {
                continue;
            }
            if let Some(slot) = self.state.active_trades.get_mut(&trade.asset) {
                if slot
                    .as_ref()
                    .map(|s| same_position(s, &trade.setup_snapshot))
                    .unwrap_or(false)
                {
                    warn!(asset = %trade.asset, "[ENGINE] Active position already recorded remotely, releasing slot");
                    *slot = None;
                }
            }
            self.state.trades.push(trade);
            merged += 1;
        }
        if merged > 0 {
            self.state.trades.sort_by_key(|t| t.closed_at);
        }
        self.state.normalize();
        self.state.version = remote.version;
        info!(
            version = remote.version,
            merged,
            trades = self.state.trades.len(),
            active = self.state.active_count(),
            "🔄 [ENGINE] Rebased onto remote snapshot"
        );
        merged
    }

    pub fn active(&self, asset: Asset) -> Option<&PositionSetup> {
        self.state.active(asset)
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.state.trades
    }

    pub fn performance(&self) -> &PerformanceAggregate {
        &self.state.performance
    }

    pub fn regime(&self, asset: Asset) -> MarketRegime {
        self.regimes.current(asset)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            performance: self.state.performance.clone(),
            active_trades: self.state.active_trades.clone(),
            total_trades: self.state.trades.len(),
            regimes: self.assets.iter().map(|&a| (a, self.regime(a))).collect(),
            summary: self.summary_string(),
        }
    }

    pub fn summary_string(&self) -> String {
        let perf = &self.state.performance;
        format!(
            "📋 Paper: {}/{} ({:.0}% WR) | BE: {} | P&L: ${:+.2} | PF: {:.2} | {} open",
            perf.winners,
            perf.total_trades,
            perf.win_rate,
            perf.breakeven_trades,
            perf.total_profit,
            perf.profit_factor,
            self.state.active_count()
        )
    }
}

/// Same position by id, or by asset and open time for records without one
fn same_position(a: &PositionSetup, b: &PositionSetup) -> bool {
    if !a.id.is_nil() && a.id == b.id {
        return true;
    }
    a.asset == b.asset && a.opened_at == b.opened_at
}
