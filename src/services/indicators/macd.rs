//! MACD (Moving Average Convergence Divergence) indicator.

use super::ema::ema_series;
use super::{closes, Indicator};
use crate::types::Candle;

/// MACD line, signal line and histogram at the latest candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD indicator.
///
/// - MACD Line = EMA(fast) - EMA(slow)
/// - Signal Line = EMA(signal) of MACD Line
/// - Histogram = MACD Line - Signal Line
pub struct Macd {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
}

impl Default for Macd {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
        }
    }
}

impl Macd {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast_period,
            slow_period,
            signal_period,
        }
    }

    /// Full MACD reading, None until `slow + signal - 1` closes are available.
    pub fn value(&self, closes: &[f64]) -> Option<MacdValue> {
        let fast = ema_series(closes, self.fast_period);
        let slow = ema_series(closes, self.slow_period);
        if slow.is_empty() {
            return None;
        }

        // Align the fast series to the slow one; both end at the last close.
        let offset = fast.len().checked_sub(slow.len())?;
        let macd_line: Vec<f64> = slow
            .iter()
            .enumerate()
            .map(|(i, s)| fast[i + offset] - s)
            .collect();

        let signal_line = ema_series(&macd_line, self.signal_period);
        let line = *macd_line.last()?;
        let signal = *signal_line.last()?;

        Some(MacdValue {
            line,
            signal,
            histogram: line - signal,
        })
    }
}

impl Indicator for Macd {
    fn id(&self) -> &str {
        "macd_histogram"
    }

    fn min_periods(&self) -> usize {
        self.slow_period + self.signal_period - 1
    }

    fn calculate(&self, candles: &[Candle]) -> Option<f64> {
        self.value(&closes(candles)).map(|m| m.histogram)
    }
}
