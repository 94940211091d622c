//! Average True Range (ATR) indicator.

use super::Indicator;
use crate::types::Candle;

/// ATR with Wilder smoothing over true ranges.
pub struct Atr {
    period: usize,
}

impl Default for Atr {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self { period }
    }
}

impl Indicator for Atr {
    fn id(&self) -> &str {
        "atr"
    }

    fn min_periods(&self) -> usize {
        self.period + 1
    }

    fn calculate(&self, candles: &[Candle]) -> Option<f64> {
        if self.period == 0 || candles.len() < self.min_periods() {
            return None;
        }

        let true_ranges: Vec<f64> = candles
            .windows(2)
            .map(|w| w[1].true_range(&w[0]))
            .collect();

        let p = self.period as f64;
        let mut atr = true_ranges.iter().take(self.period).sum::<f64>() / p;
        for tr in true_ranges.iter().skip(self.period) {
            atr = (atr * (p - 1.0) + tr) / p;
        }

        Some(atr)
    }
}
