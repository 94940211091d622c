//! Threshold rules, cooldown and risk levels for new signals.

use crate::config::SignalConfig;
use crate::services::indicators::IndicatorState;
use crate::types::{Candle, Signal, SignalType, Trend};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Why an evaluation did not produce a signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    /// Indicators do not have enough candles yet.
    NotReady,
    /// A signal fired for this symbol less than the cooldown ago.
    Cooldown { remaining_secs: i64 },
    /// Volume ratio did not exceed the threshold.
    LowVolume { ratio: f64 },
    /// Trend and RSI did not line up.
    NoCondition { trend: Trend, rsi: f64 },
}

/// Result of one detector evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Fired(Signal),
    Skipped(SkipReason),
}

impl Evaluation {
    pub fn signal(self) -> Option<Signal> {
        match self {
            Evaluation::Fired(signal) => Some(signal),
            Evaluation::Skipped(_) => None,
        }
    }

    pub fn is_fired(&self) -> bool {
        matches!(self, Evaluation::Fired(_))
    }
}

/// Entry zone, stop and targets for a signal at `price`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskLevels {
    pub entry_low: f64,
    pub entry_high: f64,
    pub stop_loss: f64,
    pub targets: [f64; 3],
    pub risk_reward_ratio: f64,
}

impl RiskLevels {
    pub fn compute(config: &SignalConfig, signal_type: SignalType, price: f64) -> Self {
        let sign = signal_type.sign();
        let stop_loss = price * (1.0 - sign * config.stop_loss_fraction);
        let targets = config.target_fractions.map(|f| price * (1.0 + sign * f));

        let stop_distance = (price - stop_loss).abs();
        let mean_target_distance =
            targets.iter().map(|t| (t - price).abs()).sum::<f64>() / targets.len() as f64;
        let risk_reward_ratio = if stop_distance > 0.0 {
            mean_target_distance / stop_distance
        } else {
            0.0
        };

        Self {
            entry_low: price * (1.0 - config.spread_fraction),
            entry_high: price * (1.0 + config.spread_fraction),
            stop_loss,
            targets,
            risk_reward_ratio,
        }
    }
}

/// Decides whether a closed candle produces a new signal.
///
/// Callers must serialize evaluations per symbol; the cooldown map is read and
/// written in the same call.
pub struct SignalDetector {
    config: SignalConfig,
    last_fired: DashMap<String, DateTime<Utc>>,
}

impl SignalDetector {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            config,
            last_fired: DashMap::new(),
        }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Restore a cooldown stamp, e.g. from persisted history after a restart.
    pub fn restore_cooldown(&self, symbol: &str, fired_at: DateTime<Utc>) {
        let mut entry = self
            .last_fired
            .entry(symbol.to_lowercase())
            .or_insert(fired_at);
        if fired_at > *entry {
            *entry = fired_at;
        }
    }

    pub fn last_fired(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_fired.get(&symbol.to_lowercase()).map(|t| *t)
    }

    /// Evaluate the latest closed candle of `symbol`.
    pub fn evaluate(
        &self,
        symbol: &str,
        closed: &Candle,
        state: Option<&IndicatorState>,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let Some(state) = state else {
            return Evaluation::Skipped(SkipReason::NotReady);
        };
        if state.rsi.is_empty() || state.volume_ma <= 0.0 {
            return Evaluation::Skipped(SkipReason::NotReady);
        }

        let key = symbol.to_lowercase();
        if let Some(last) = self.last_fired(&key) {
            let cooldown = ChronoDuration::from_std(self.config.cooldown)
                .unwrap_or_else(|_| ChronoDuration::hours(1));
            let elapsed = now - last;
            if elapsed < cooldown {
                return Evaluation::Skipped(SkipReason::Cooldown {
                    remaining_secs: (cooldown - elapsed).num_seconds(),
                });
            }
        }

        let trend = state.trend();
        let rsi = state.current_rsi();
        let volume_ratio = closed.volume / state.volume_ma;
        if !(volume_ratio > self.config.volume_threshold) {
            return Evaluation::Skipped(SkipReason::LowVolume {
                ratio: volume_ratio,
            });
        }

        let signal_type = match trend {
            Trend::Bullish if rsi < self.config.oversold => SignalType::Long,
            Trend::Bearish if rsi > self.config.overbought => SignalType::Short,
            _ => return Evaluation::Skipped(SkipReason::NoCondition { trend, rsi }),
        };

        let levels = RiskLevels::compute(&self.config, signal_type, closed.close);
        let signal = Signal {
            id: Uuid::new_v4().to_string(),
            symbol: key.clone(),
            signal_type,
            entry_price: closed.close,
            entry_low: levels.entry_low,
            entry_high: levels.entry_high,
            stop_loss: levels.stop_loss,
            targets: levels.targets,
            risk_reward_ratio: levels.risk_reward_ratio,
            trend,
            rsi_at_signal: rsi,
            volume_ratio_at_signal: volume_ratio,
            created_at: now,
        };

        self.last_fired.insert(key, now);
        Evaluation::Fired(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn state(ema_fast: f64, ema_slow: f64, rsi: f64, volume_ma: f64) -> IndicatorState {
        IndicatorState {
            rsi: vec![rsi],
            ema_fast,
            ema_slow,
            volume_ma,
            last_update: 0,
            extras: BTreeMap::new(),
        }
    }

    fn candle(close: f64, volume: f64) -> Candle {
        Candle::new(0, close, close, close, close, volume)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_not_ready_never_fires() {
        let detector = SignalDetector::new(SignalConfig::default());
        let eval = detector.evaluate("btcusdt", &candle(100.0, 1e9), None, t0());
        assert_eq!(eval, Evaluation::Skipped(SkipReason::NotReady));
    }

    #[test]
    fn test_long_signal_levels() {
        let detector = SignalDetector::new(SignalConfig::default());
        let s = state(105.0, 100.0, 25.0, 100.0);
        let signal = detector
            .evaluate("BTCUSDT", &candle(100.0, 200.0), Some(&s), t0())
            .signal()
            .unwrap();

        assert_eq!(signal.symbol, "btcusdt");
        assert_eq!(signal.signal_type, SignalType::Long);
        assert_eq!(signal.trend, Trend::Bullish);
        assert!((signal.entry_low - 99.8).abs() < 1e-9);
        assert!((signal.entry_high - 100.2).abs() < 1e-9);
        assert!((signal.stop_loss - 98.0).abs() < 1e-9);
        assert!((signal.targets[0] - 102.0).abs() < 1e-9);
        assert!((signal.targets[2] - 106.0).abs() < 1e-9);
        assert!((signal.risk_reward_ratio - 2.0).abs() < 1e-9);
        assert!((signal.volume_ratio_at_signal - 2.0).abs() < 1e-9);
        assert_eq!(signal.rsi_at_signal, 25.0);
        assert_eq!(signal.created_at, t0());
    }

    #[test]
    fn test_short_signal_levels() {
        let detector = SignalDetector::new(SignalConfig::default());
        let s = state(95.0, 100.0, 80.0, 100.0);
        let signal = detector
            .evaluate("ethusdt", &candle(100.0, 300.0), Some(&s), t0())
            .signal()
            .unwrap();

        assert_eq!(signal.signal_type, SignalType::Short);
        assert!((signal.stop_loss - 102.0).abs() < 1e-9);
        assert!(signal.targets[0] > signal.targets[1]);
        assert!(signal.targets[1] > signal.targets[2]);
        assert!((signal.targets[2] - 94.0).abs() < 1e-9);
    }

    #[test]
    fn test_low_volume_rejected() {
        let detector = SignalDetector::new(SignalConfig::default());
        let s = state(105.0, 100.0, 25.0, 100.0);
        let eval = detector.evaluate("btcusdt", &candle(100.0, 150.0), Some(&s), t0());
        assert!(matches!(eval, Evaluation::Skipped(SkipReason::LowVolume { .. })));
    }

    #[test]
    fn test_trend_gates_conditions() {
        let detector = SignalDetector::new(SignalConfig::default());
        // Oversold but bearish: no long, and not overbought either
        let s = state(95.0, 100.0, 20.0, 100.0);
        let eval = detector.evaluate("btcusdt", &candle(100.0, 200.0), Some(&s), t0());
        assert!(matches!(eval, Evaluation::Skipped(SkipReason::NoCondition { .. })));

        // Overbought but bullish: no short
        let s = state(105.0, 100.0, 85.0, 100.0);
        let eval = detector.evaluate("btcusdt", &candle(100.0, 200.0), Some(&s), t0());
        assert!(matches!(eval, Evaluation::Skipped(SkipReason::NoCondition { .. })));
    }

    #[test]
    fn test_cooldown_boundary() {
        let detector = SignalDetector::new(SignalConfig::default());
        let s = state(105.0, 100.0, 25.0, 100.0);
        let c = candle(100.0, 200.0);

        assert!(detector.evaluate("btcusdt", &c, Some(&s), t0()).is_fired());

        let almost = t0() + ChronoDuration::seconds(3599);
        let eval = detector.evaluate("btcusdt", &c, Some(&s), almost);
        assert_eq!(
            eval,
            Evaluation::Skipped(SkipReason::Cooldown { remaining_secs: 1 })
        );

        // Other symbols are unaffected
        assert!(detector.evaluate("ethusdt", &c, Some(&s), almost).is_fired());

        let elapsed = t0() + ChronoDuration::seconds(3600);
        assert!(detector.evaluate("btcusdt", &c, Some(&s), elapsed).is_fired());
    }

    #[test]
    fn test_restore_cooldown_keeps_latest() {
        let detector = SignalDetector::new(SignalConfig::default());
        let later = t0() + ChronoDuration::minutes(10);
        detector.restore_cooldown("BTCUSDT", later);
        detector.restore_cooldown("btcusdt", t0());
        assert_eq!(detector.last_fired("btcusdt"), Some(later));

        let s = state(105.0, 100.0, 25.0, 100.0);
        let eval = detector.evaluate("btcusdt", &candle(100.0, 200.0), Some(&s), later);
        assert!(matches!(eval, Evaluation::Skipped(SkipReason::Cooldown { .. })));
    }
}
