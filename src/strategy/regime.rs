//! Regime Classifier - trend and volatility labels from the rolling window
//!
//! Thresholds are fixed for every asset.

use std::collections::HashMap;

use crate::oracle::PriceAggregator;
use crate::types::{Asset, MarketCondition, MarketRegime, PriceSample, VolatilityLevel};

/// Samples needed before a regime is (re)classified
pub const REGIME_LOOKBACK: usize = 5;
/// Net move over the lookback, as a fraction of the current price
pub const TREND_THRESHOLD: f64 = 0.02;

const VOLATILITY_EXTREME: f64 = 2.0;
const VOLATILITY_HIGH: f64 = 1.5;
const VOLATILITY_NORMAL: f64 = 0.8;

/// Keeps the last known regime per asset
#[derive(Debug, Clone, Default)]
pub struct RegimeClassifier {
    regimes: HashMap<Asset, MarketRegime>,
}

impl RegimeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify the last [`REGIME_LOOKBACK`] samples. `None` when there are fewer.
    pub fn classify(samples: &[&PriceSample]) -> Option<MarketRegime> {
        if samples.len() < REGIME_LOOKBACK {
            return None;
        }
        let recent = &samples[samples.len() - REGIME_LOOKBACK..];
        let first = recent.first()?.price;
        let current = recent.last()?.price;

        let delta = current - first;
        let band = TREND_THRESHOLD * current;
        let condition = if delta > band {
            MarketCondition::TrendingUp
        } else if delta < -band {
            MarketCondition::TrendingDown
        } else {
            MarketCondition::Ranging
        };

        let mean_abs_change =
            recent.iter().map(|s| s.pct_change.abs()).sum::<f64>() / recent.len() as f64;
        let volatility = if mean_abs_change > VOLATILITY_EXTREME {
            VolatilityLevel::Extreme
        } else if mean_abs_change > VOLATILITY_HIGH {
            VolatilityLevel::High
        } else if mean_abs_change > VOLATILITY_NORMAL {
            VolatilityLevel::Normal
        } else {
            VolatilityLevel::Low
        };

        Some(MarketRegime {
            condition,
            volatility,
        })
    }

    /// Reclassify `asset` from the aggregator window; with too few samples the
    /// previous regime is kept.
    pub fn update(&mut self, asset: Asset, aggregator: &PriceAggregator) -> MarketRegime {
        let samples = aggregator.last_n(asset, REGIME_LOOKBACK);
        if let Some(regime) = Self::classify(&samples) {
            let previous = self.regimes.insert(asset, regime);
            if previous != Some(regime) {
                tracing::debug!(
                    asset = %asset,
                    condition = %regime.condition,
                    volatility = %regime.volatility,
                    "[REGIME] Regime changed"
                );
            }
        }
        self.current(asset)
    }

    pub fn current(&self, asset: Asset) -> MarketRegime {
        self.regimes.get(&asset).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceTick;
    use chrono::Utc;

    fn feed(aggregator: &mut PriceAggregator, asset: Asset, points: &[(f64, f64)]) {
        for &(price, pct_change) in points {
            aggregator.add_tick(
                &PriceTick {
                    asset,
                    price,
                    pct_change,
                    timestamp: 0,
                },
                Utc::now(),
            );
        }
    }

    #[test]
    fn three_percent_rise_is_trending_up() {
        let mut aggregator = PriceAggregator::default();
        feed(
            &mut aggregator,
            Asset::BTC,
            &[(100.0, 0.1), (100.5, 0.5), (101.0, 0.5), (102.0, 1.0), (103.0, 1.0)],
        );
        let mut classifier = RegimeClassifier::new();
        let regime = classifier.update(Asset::BTC, &aggregator);
        assert_eq!(regime.condition, MarketCondition::TrendingUp);
        // mean |pct| = 0.62
        assert_eq!(regime.volatility, VolatilityLevel::Low);
    }

    #[test]
    fn falling_window_with_large_moves_is_trending_down_extreme() {
        let mut aggregator = PriceAggregator::default();
        feed(
            &mut aggregator,
            Asset::ETH,
            &[(100.0, -2.5), (99.0, -2.5), (98.0, -2.5), (97.0, -2.5), (96.0, -2.5)],
        );
        let regime = RegimeClassifier::new().update(Asset::ETH, &aggregator);
        assert_eq!(regime.condition, MarketCondition::TrendingDown);
        assert_eq!(regime.volatility, VolatilityLevel::Extreme);
    }

    #[test]
    fn small_moves_are_ranging() {
        let mut aggregator = PriceAggregator::default();
        feed(
            &mut aggregator,
            Asset::BTC,
            &[(100.0, 1.6), (100.2, -1.6), (99.9, 1.6), (100.1, -1.6), (100.5, 1.6)],
        );
        let regime = RegimeClassifier::new().update(Asset::BTC, &aggregator);
        assert_eq!(regime.condition, MarketCondition::Ranging);
        assert_eq!(regime.volatility, VolatilityLevel::High);
    }

    #[test]
    fn insufficient_samples_keep_previous_regime() {
        let mut classifier = RegimeClassifier::new();

        let mut sparse = PriceAggregator::default();
        feed(&mut sparse, Asset::BTC, &[(100.0, 0.0), (110.0, 0.0)]);
        assert_eq!(classifier.update(Asset::BTC, &sparse), MarketRegime::default());

        let mut full = PriceAggregator::default();
        feed(
            &mut full,
            Asset::BTC,
            &[(100.0, -2.5), (99.0, -2.5), (98.0, -2.5), (97.0, -2.5), (96.0, -2.5)],
        );
        let classified = classifier.update(Asset::BTC, &full);
        assert_eq!(classified.condition, MarketCondition::TrendingDown);

        // A window that falls back below the lookback keeps the last label
        let kept = classifier.update(Asset::BTC, &sparse);
        assert_eq!(kept, classified);
        assert_eq!(classifier.current(Asset::BTC), classified);
        assert_ne!(kept, MarketRegime::default());
    }
}
