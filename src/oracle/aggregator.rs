//! Price Aggregator - Rolling per-asset price window
//!
//! Ingests raw ticks from the feed and keeps the most recent samples for
//! each asset. Regime classification and momentum read from these windows.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

use crate::types::{Asset, PriceSample, PriceTick};

/// Default rolling window capacity per asset
pub const WINDOW_CAPACITY: usize = 50;

/// Bounded FIFO price history, one window per asset
#[derive(Debug, Clone)]
pub struct PriceAggregator {
    windows: HashMap<Asset, VecDeque<PriceSample>>,
    capacity: usize,
}

impl PriceAggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a tick to its asset's window.
    ///
    /// Non-positive or non-finite prices are dropped silently; returns whether
    /// the tick was kept.
    pub fn add_tick(&mut self, tick: &PriceTick, now: DateTime<Utc>) -> bool {
        if !tick.price.is_finite() || tick.price <= 0.0 || !tick.pct_change.is_finite() {
            tracing::debug!(
                asset = %tick.asset,
                price = tick.price,
                pct_change = tick.pct_change,
                "[FEED] Dropping invalid tick"
            );
            return false;
        }

        let capacity = self.capacity;
        let window = self
            .windows
            .entry(tick.asset)
            .or_insert_with(|| VecDeque::with_capacity(capacity + 1));

        window.push_back(PriceSample {
            asset: tick.asset,
            price: tick.price,
            pct_change: tick.pct_change,
            received_at: now,
        });

        while window.len() > capacity {
            window.pop_front();
        }
        true
    }

    /// Full window for an asset (oldest first)
    pub fn window(&self, asset: Asset) -> Option<&VecDeque<PriceSample>> {
        self.windows.get(&asset)
    }

    /// Up to `n` most recent samples, oldest first
    pub fn last_n(&self, asset: Asset, n: usize) -> Vec<&PriceSample> {
        match self.windows.get(&asset) {
            Some(window) => {
                let skip = window.len().saturating_sub(n);
                window.iter().skip(skip).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn latest_price(&self, asset: Asset) -> Option<f64> {
        self.windows
            .get(&asset)
            .and_then(|w| w.back())
            .map(|s| s.price)
    }

    pub fn len(&self, asset: Asset) -> usize {
        self.windows.get(&asset).map(|w| w.len()).unwrap_or(0)
    }
}

impl Default for PriceAggregator {
    fn default() -> Self {
        Self::new(WINDOW_CAPACITY)
    }
}
