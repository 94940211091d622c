//! Technical indicator implementations.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod engine;
pub mod macd;
pub mod mfi;
pub mod rsi;
pub mod sma;
pub mod williams_r;

pub use atr::Atr;
pub use bollinger::BollingerBands;
pub use engine::{IndicatorEngine, IndicatorState};
pub use macd::Macd;
pub use mfi::Mfi;
pub use williams_r::WilliamsR;

use crate::types::Candle;

/// A technical indicator computed from a candle window.
pub trait Indicator: Send + Sync {
    /// Unique identifier, used as the key in indicator extras.
    fn id(&self) -> &str;

    /// Minimum number of candles required for calculation.
    fn min_periods(&self) -> usize;

    /// Calculate the latest value. Returns None if there is not enough data.
    fn calculate(&self, candles: &[Candle]) -> Option<f64>;
}

/// Auxiliary indicators reported alongside the core state.
pub fn extra_indicators() -> Vec<Box<dyn Indicator>> {
    vec![
        Box::new(Macd::default()),
        Box::new(BollingerBands::default()),
        Box::new(Atr::default()),
        Box::new(WilliamsR::default()),
        Box::new(Mfi::default()),
    ]
}

pub(crate) fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}
