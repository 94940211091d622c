use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Long,
    Short,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Long => "LONG",
            SignalType::Short => "SHORT",
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            SignalType::Long => 1.0,
            SignalType::Short => -1.0,
        }
    }
}

/// Trend label derived from the fast/slow EMA relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
}

impl Trend {
    pub fn from_emas(ema_fast: f64, ema_slow: f64) -> Self {
        if ema_fast > ema_slow {
            Trend::Bullish
        } else {
            Trend::Bearish
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Trend::Bullish => "Bullish",
            Trend::Bearish => "Bearish",
        }
    }
}

/// An immutable trading signal emitted by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    /// Close of the candle the signal fired on; profit is measured against it.
    pub entry_price: f64,
    pub entry_low: f64,
    pub entry_high: f64,
    pub stop_loss: f64,
    pub targets: [f64; 3],
    pub risk_reward_ratio: f64,
    #[serde(rename = "trendLabel")]
    pub trend: Trend,
    pub rsi_at_signal: f64,
    pub volume_ratio_at_signal: f64,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Direction-aware profit in percent for an exit at `exit_price`.
    pub fn profit_percent(&self, exit_price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (exit_price - self.entry_price) / self.entry_price * 100.0 * self.signal_type.sign()
    }

    /// Whether `low`/`high` crossed the stop loss.
    pub fn stop_hit(&self, low: f64, high: f64) -> bool {
        match self.signal_type {
            SignalType::Long => low <= self.stop_loss,
            SignalType::Short => high >= self.stop_loss,
        }
    }

    /// Whether `low`/`high` reached the final target.
    pub fn final_target_hit(&self, low: f64, high: f64) -> bool {
        let last = self.targets[2];
        match self.signal_type {
            SignalType::Long => high >= last,
            SignalType::Short => low <= last,
        }
    }
}
