//! Bollinger Bands indicator.

use super::{closes, Indicator};
use crate::types::Candle;

/// Band levels at the latest candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerValue {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Position of the close within the bands (0 = lower, 1 = upper).
    pub percent_b: f64,
    /// (upper - lower) / middle.
    pub bandwidth: f64,
}

/// Bollinger Bands: SMA(period) ± multiplier * population std dev.
pub struct BollingerBands {
    period: usize,
    std_dev_multiplier: f64,
}

impl Default for BollingerBands {
    fn default() -> Self {
        Self {
            period: 20,
            std_dev_multiplier: 2.0,
        }
    }
}

impl BollingerBands {
    pub fn value(&self, closes: &[f64]) -> Option<BollingerValue> {
        if self.period == 0 || closes.len() < self.period {
            return None;
        }

        let recent = &closes[closes.len() - self.period..];
        let middle = recent.iter().sum::<f64>() / self.period as f64;
        let variance =
            recent.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / self.period as f64;
        let band = variance.sqrt() * self.std_dev_multiplier;

        let upper = middle + band;
        let lower = middle - band;
        let close = *closes.last()?;

        let percent_b = if upper > lower {
            (close - lower) / (upper - lower)
        } else {
            0.5
        };
        let bandwidth = if middle != 0.0 {
            (upper - lower) / middle
        } else {
            0.0
        };

        Some(BollingerValue {
            upper,
            middle,
            lower,
            percent_b,
            bandwidth,
        })
    }
}

impl Indicator for BollingerBands {
    fn id(&self) -> &str {
        "bollinger_percent_b"
    }

    fn min_periods(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Option<f64> {
        self.value(&closes(candles)).map(|b| b.percent_b)
    }
}
