//! Signal Generator - admission gate for new positions
//!
//! Momentum is the mean of the last three percent changes, clamped to ±2.
//! With fewer than three samples the asset is not eligible; there is no
//! fallback guess. Confidence is a base score in [8, 16) plus regime
//! bonuses, and must meet the active sizing preset's minimum.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::oracle::PriceAggregator;
use crate::position::PositionSetup;
use crate::types::{Asset, Direction, MarketCondition, MarketRegime};

pub const MOMENTUM_LOOKBACK: usize = 3;
pub const MOMENTUM_CLAMP: f64 = 2.0;
pub const DEFAULT_COOLDOWN_SECS: i64 = 60;

const BASE_CONFIDENCE_MIN: f64 = 8.0;
const BASE_CONFIDENCE_MAX: f64 = 16.0;
const TREND_ALIGNMENT_BONUS: f64 = 2.0;
const VOLATILITY_BONUS: f64 = 3.0;

/// Named position-sizing presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingPreset {
    Conservative,
    Aggressive,
}

impl Default for SizingPreset {
    fn default() -> Self {
        SizingPreset::Conservative
    }
}

impl SizingPreset {
    pub fn profile(&self) -> SizingProfile {
        match self {
            SizingPreset::Conservative => SizingProfile {
                stop_pct: 0.005,
                target1_multiplier: 1.5,
                target2_multiplier: 2.5,
                min_confidence: 8.0,
            },
            SizingPreset::Aggressive => SizingProfile {
                stop_pct: 0.003,
                target1_multiplier: 1.0,
                target2_multiplier: 2.0,
                min_confidence: 6.0,
            },
        }
    }
}

/// Stop distance, target multiples of that distance, and minimum confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingProfile {
    /// Stop distance as a fraction of entry price
    pub stop_pct: f64,
    pub target1_multiplier: f64,
    pub target2_multiplier: f64,
    pub min_confidence: f64,
}

/// Outcome of one admission evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted(PositionSetup),
    ActivePosition,
    Cooldown { remaining_secs: i64 },
    InsufficientData { samples: usize },
    LowConfidence { confidence: f64, min_confidence: f64 },
}

/// Mean of the last three percent changes, clamped. `None` below three samples.
pub fn momentum(aggregator: &PriceAggregator, asset: Asset) -> Option<f64> {
    let recent = aggregator.last_n(asset, MOMENTUM_LOOKBACK);
    if recent.len() < MOMENTUM_LOOKBACK {
        return None;
    }
    let mean = recent.iter().map(|s| s.pct_change).sum::<f64>() / recent.len() as f64;
    Some(mean.clamp(-MOMENTUM_CLAMP, MOMENTUM_CLAMP))
}

/// Base score plus trend-alignment and volatility bonuses
pub fn confidence_score(base: f64, momentum: f64, regime: &MarketRegime) -> f64 {
    let mut confidence = base;
    let aligned = match regime.condition {
        MarketCondition::TrendingUp => momentum > 0.0,
        MarketCondition::TrendingDown => momentum < 0.0,
        MarketCondition::Ranging => false,
    };
    if aligned {
        confidence += TREND_ALIGNMENT_BONUS;
    }
    if regime.volatility.is_elevated() {
        confidence += VOLATILITY_BONUS;
    }
    confidence
}

pub struct SignalGenerator {
    profile: SizingProfile,
    cooldown: Duration,
    last_signal: HashMap<Asset, DateTime<Utc>>,
    rng: StdRng,
}

impl SignalGenerator {
    pub fn new(preset: SizingPreset, cooldown_secs: i64) -> Self {
        Self::with_rng(preset, cooldown_secs, StdRng::from_entropy())
    }

    /// Deterministic base-confidence draws (replays and tests)
    pub fn with_seed(preset: SizingPreset, cooldown_secs: i64, seed: u64) -> Self {
        Self::with_rng(preset, cooldown_secs, StdRng::seed_from_u64(seed))
    }

    fn with_rng(preset: SizingPreset, cooldown_secs: i64, rng: StdRng) -> Self {
        Self {
            profile: preset.profile(),
            cooldown: Duration::seconds(cooldown_secs.max(0)),
            last_signal: HashMap::new(),
            rng,
        }
    }

    pub fn profile(&self) -> &SizingProfile {
        &self.profile
    }

    /// Decide whether `asset` may open a new position now.
    ///
    /// On admission the per-asset cooldown restarts at `now`.
    pub fn evaluate(
        &mut self,
        asset: Asset,
        aggregator: &PriceAggregator,
        regime: MarketRegime,
        has_active: bool,
        now: DateTime<Utc>,
    ) -> Admission {
        if has_active {
            return Admission::ActivePosition;
        }

        if let Some(last) = self.last_signal.get(&asset) {
            let elapsed = now - *last;
            if elapsed < self.cooldown {
                return Admission::Cooldown {
                    remaining_secs: (self.cooldown - elapsed).num_seconds(),
                };
            }
        }

        let (momentum, price) = match (momentum(aggregator, asset), aggregator.latest_price(asset))
        {
            (Some(m), Some(p)) => (m, p),
            _ => {
                return Admission::InsufficientData {
                    samples: aggregator.len(asset),
                }
            }
        };

        let direction = if momentum > 0.0 {
            Direction::Bullish
        } else {
            Direction::Bearish
        };
        let base = self.rng.gen_range(BASE_CONFIDENCE_MIN..BASE_CONFIDENCE_MAX);
        let confidence = confidence_score(base, momentum, &regime);

        if confidence < self.profile.min_confidence {
            return Admission::LowConfidence {
                confidence,
                min_confidence: self.profile.min_confidence,
            };
        }

        self.last_signal.insert(asset, now);
        let setup = PositionSetup::open(
            asset,
            direction,
            price,
            &self.profile,
            confidence,
            regime,
            now,
        );
        tracing::info!(
            asset = %asset,
            direction = %direction,
            entry = price,
            stop = setup.stop,
            target1 = setup.target1,
            target2 = setup.target2,
            momentum = momentum,
            confidence = %format!("{:.1}", confidence),
            "📈 [SIGNAL] Position admitted"
        );
        Admission::Admitted(setup)
    }

    /// Forget cooldown timers (after a wholesale state reload)
    pub fn reset_cooldowns(&mut self) {
        self.last_signal.clear();
    }
}
