//! Strategy module - regime classification and admission signals

pub mod regime;
pub mod signal;

pub use regime::{RegimeClassifier, REGIME_LOOKBACK, TREND_THRESHOLD};
pub use signal::{
    confidence_score, momentum, Admission, SignalGenerator, SizingPreset, SizingProfile,
    DEFAULT_COOLDOWN_SECS, MOMENTUM_LOOKBACK,
};
