//! Williams %R indicator.

use super::Indicator;
use crate::types::Candle;

/// Williams %R: where the close sits in the trailing high/low range, from -100 to 0.
pub struct WilliamsR {
    period: usize,
}

impl Default for WilliamsR {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Indicator for WilliamsR {
    fn id(&self) -> &str {
        "williams_r"
    }

    fn min_periods(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Option<f64> {
        if self.period == 0 || candles.len() < self.period {
            return None;
        }

        let recent = &candles[candles.len() - self.period..];
        let highest = recent.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lowest = recent.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let close = recent.last()?.close;

        if highest <= lowest {
            return Some(-50.0);
        }
        Some((highest - close) / (highest - lowest) * -100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_at_high_is_zero() {
        let mut candles: Vec<Candle> = (0..13)
            .map(|i| Candle::new(i * 60, 10.0, 12.0, 8.0, 10.0, 1.0))
            .collect();
        candles.push(Candle::new(13 * 60, 10.0, 12.0, 8.0, 12.0, 1.0));
        let value = WilliamsR::default().calculate(&candles).unwrap();
        assert!(value.abs() < 1e-9);
    }

    #[test]
    fn test_close_at_low_is_minus_100() {
        let mut candles: Vec<Candle> = (0..13)
            .map(|i| Candle::new(i * 60, 10.0, 12.0, 8.0, 10.0, 1.0))
            .collect();
        candles.push(Candle::new(13 * 60, 10.0, 12.0, 8.0, 8.0, 1.0));
        let value = WilliamsR::default().calculate(&candles).unwrap();
        assert!((value + 100.0).abs() < 1e-9);
    }
}
