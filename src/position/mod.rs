//! Position State Machine
//!
//! One [`PositionSetup`] per asset moves through
//! `PreTarget1 -> BreakevenArmed -> {Win, Loss, Breakeven}`.
//!
//! Exit rules are evaluated in a fixed priority order on every scheduling tick:
//! 1. target1 crossed (not yet armed): arm breakeven, keep the position open
//! 2. armed and target2 crossed: close as WIN
//! 3. armed and breakeven stop crossed: close as BREAKEVEN
//! 4. not armed and original stop crossed: close as LOSS
//!
//! At most one rule fires per tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::strategy::SizingProfile;
use crate::types::{Asset, Direction, MarketRegime, Outcome, SessionTag, SetupStatus};

/// Half-width of the entry band as a fraction of price (±0.05%)
pub const ENTRY_BAND_PCT: f64 = 0.0005;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryBand {
    pub min: f64,
    pub max: f64,
}

impl EntryBand {
    pub fn around(price: f64) -> Self {
        Self {
            min: price * (1.0 - ENTRY_BAND_PCT),
            max: price * (1.0 + ENTRY_BAND_PCT),
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// A paper position, open or closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSetup {
    /// Minted at admission; nil for setups written before ids existed
    #[serde(default = "Uuid::nil")]
    pub id: Uuid,
    pub asset: Asset,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_band: EntryBand,
    pub stop: f64,
    #[serde(default)]
    pub original_stop: Option<f64>,
    pub target1: f64,
    pub target2: f64,
    #[serde(default)]
    pub reached_target1: bool,
    #[serde(default)]
    pub reached_target2: bool,
    pub confidence: f64,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub regime_snapshot: MarketRegime,
    #[serde(default = "default_session")]
    pub session_tag: SessionTag,
    #[serde(default)]
    pub recorded: bool,
    #[serde(default = "default_status")]
    pub status: SetupStatus,
}

fn default_session() -> SessionTag {
    SessionTag::OffHours
}

fn default_status() -> SetupStatus {
    SetupStatus::Active
}

/// Observable phase of a setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionPhase {
    PreTarget1,
    BreakevenArmed,
    Closed,
}

/// Terminal resolution produced by the state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitResolution {
    pub outcome: Outcome,
    pub exit_price: f64,
    /// Absolute price distance captured (WIN) or given back (LOSS)
    pub price_move: f64,
}

/// What a tick did to an active setup
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitTransition {
    BreakevenArmed { original_stop: f64, new_stop: f64 },
    Closed(ExitResolution),
}

impl PositionSetup {
    /// Build a fresh setup at `price` with stops/targets from `profile`,
    /// mirrored for bearish positions.
    pub fn open(
        asset: Asset,
        direction: Direction,
        price: f64,
        profile: &SizingProfile,
        confidence: f64,
        regime: MarketRegime,
        now: DateTime<Utc>,
    ) -> Self {
        let sign = direction.sign();
        let stop_distance = price * profile.stop_pct;

        Self {
            id: Uuid::new_v4(),
            asset,
            direction,
            entry_price: price,
            entry_band: EntryBand::around(price),
            stop: price - sign * stop_distance,
            original_stop: None,
            target1: price + sign * stop_distance * profile.target1_multiplier,
            target2: price + sign * stop_distance * profile.target2_multiplier,
            reached_target1: false,
            reached_target2: false,
            confidence,
            opened_at: now,
            regime_snapshot: regime,
            session_tag: SessionTag::at(now),
            recorded: false,
            status: SetupStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SetupStatus::Active
    }

    pub fn phase(&self) -> PositionPhase {
        match (self.status, self.reached_target1) {
            (SetupStatus::Closed, _) => PositionPhase::Closed,
            (SetupStatus::Active, false) => PositionPhase::PreTarget1,
            (SetupStatus::Active, true) => PositionPhase::BreakevenArmed,
        }
    }

    pub fn entry_midpoint(&self) -> f64 {
        self.entry_band.midpoint()
    }

    /// Stop level the position was opened with
    pub fn initial_stop(&self) -> f64 {
        self.original_stop.unwrap_or(self.stop)
    }

    /// Apply the exit rules for one tick at `price`.
    ///
    /// Only the first matching rule fires. A closing transition marks the
    /// setup `Closed`; recording it is the caller's job.
    pub fn evaluate_exit(&mut self, price: f64) -> Option<ExitTransition> {
        if !self.is_active() || !price.is_finite() || price <= 0.0 {
            return None;
        }
        let direction = self.direction;
        let midpoint = self.entry_midpoint();

        if !self.reached_target1 && direction.reached(price, self.target1) {
            let original_stop = self.stop;
            self.reached_target1 = true;
            self.original_stop = Some(original_stop);
            self.stop = midpoint;
            return Some(ExitTransition::BreakevenArmed {
                original_stop,
                new_stop: midpoint,
            });
        }

        if self.reached_target1 && !self.reached_target2 && direction.reached(price, self.target2)
        {
            self.reached_target2 = true;
            return Some(self.close(Outcome::Win, price, (self.target2 - midpoint).abs()));
        }

        if self.reached_target1 && !self.reached_target2 && direction.breached(price, self.stop) {
            return Some(self.close(Outcome::Breakeven, price, 0.0));
        }

        if !self.reached_target1 && direction.breached(price, self.stop) {
            return Some(self.close(Outcome::Loss, price, (price - midpoint).abs()));
        }

        None
    }

    fn close(&mut self, outcome: Outcome, exit_price: f64, price_move: f64) -> ExitTransition {
        self.status = SetupStatus::Closed;
        ExitTransition::Closed(ExitResolution {
            outcome,
            exit_price,
            price_move,
        })
    }
}
