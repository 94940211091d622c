//! Money Flow Index (MFI) indicator.

use super::Indicator;
use crate::types::Candle;

/// MFI (Money Flow Index) indicator.
///
/// Volume-weighted RSI over the trailing `period` typical-price changes:
/// MFI = 100 - (100 / (1 + Money Flow Ratio))
pub struct Mfi {
    period: usize,
}

impl Default for Mfi {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Indicator for Mfi {
    fn id(&self) -> &str {
        "mfi"
    }

    fn min_periods(&self) -> usize {
        self.period + 1
    }

    fn calculate(&self, candles: &[Candle]) -> Option<f64> {
        if self.period == 0 || candles.len() < self.min_periods() {
            return None;
        }

        let recent = &candles[candles.len() - self.min_periods()..];
        let mut positive_flow = 0.0;
        let mut negative_flow = 0.0;

        for pair in recent.windows(2) {
            let prev_tp = pair[0].typical_price();
            let current_tp = pair[1].typical_price();
            let money_flow = current_tp * pair[1].volume;

            if current_tp > prev_tp {
                positive_flow += money_flow;
            } else if current_tp < prev_tp {
                negative_flow += money_flow;
            }
        }

        let mfi = if negative_flow == 0.0 {
            100.0
        } else if positive_flow == 0.0 {
            0.0
        } else {
            100.0 - (100.0 / (1.0 + positive_flow / negative_flow))
        };

        Some(mfi)
    }
}
