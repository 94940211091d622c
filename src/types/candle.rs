use serde::{Deserialize, Serialize};

/// One OHLCV candle.
///
/// `time` is the period open in the exchange's native resolution (seconds for Huobi).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Typical price (high + low + close) / 3.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// True range against the previous candle's close.
    pub fn true_range(&self, previous: &Candle) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - previous.close).abs();
        let lc = (self.low - previous.close).abs();
        hl.max(hc).max(lc)
    }
}

/// Outcome of appending a candle to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new period started; the candle was pushed at the tail.
    Appended,
    /// The tail candle for the same period was replaced in place.
    Replaced,
    /// The candle was older than the tail and was ignored.
    Stale,
}
