//! Computes the per-symbol indicator state from a candle window.

use super::ema::ema;
use super::rsi::rsi_series;
use super::sma::sma;
use super::{closes, extra_indicators, Indicator};
use crate::config::SignalConfig;
use crate::types::{Candle, Trend};
use serde::Serialize;
use std::collections::BTreeMap;

/// Derived indicator values for one symbol at one candle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorState {
    /// Trailing RSI values, oldest first. Never empty.
    pub rsi: Vec<f64>,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub volume_ma: f64,
    /// Time of the candle the state was computed at.
    pub last_update: i64,
    /// Auxiliary indicators that had enough data, keyed by indicator id.
    pub extras: BTreeMap<String, f64>,
}

impl IndicatorState {
    /// Latest RSI value.
    pub fn current_rsi(&self) -> f64 {
        self.rsi.last().copied().unwrap_or(50.0)
    }

    pub fn trend(&self) -> Trend {
        Trend::from_emas(self.ema_fast, self.ema_slow)
    }
}

/// Indicator engine: one instance per process, shared by every symbol worker.
pub struct IndicatorEngine {
    config: SignalConfig,
    extras: Vec<Box<dyn Indicator>>,
}

impl IndicatorEngine {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            config,
            extras: extra_indicators(),
        }
    }

    /// Engine without auxiliary indicators.
    pub fn core_only(config: SignalConfig) -> Self {
        Self {
            config,
            extras: Vec::new(),
        }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Candles required before `compute` returns a state.
    pub fn min_candles(&self) -> usize {
        self.config.min_candles()
    }

    /// Recompute the state for `window`. `None` means not ready.
    pub fn compute(&self, window: &[Candle]) -> Option<IndicatorState> {
        if window.len() < self.min_candles() {
            return None;
        }

        let closes = closes(window);
        let volumes: Vec<f64> = window.iter().map(|c| c.volume).collect();

        let rsi_all = rsi_series(&closes, self.config.rsi_period);
        let keep = self.config.rsi_history.max(1);
        let rsi = rsi_all[rsi_all.len().saturating_sub(keep)..].to_vec();
        if rsi.is_empty() {
            return None;
        }

        let ema_fast = ema(&closes, self.config.ema_fast_period)?;
        let ema_slow = ema(&closes, self.config.ema_slow_period)?;
        let volume_ma = sma(&volumes, self.config.volume_ma_period)?;

        let extras = self
            .extras
            .iter()
            .filter(|i| window.len() >= i.min_periods())
            .filter_map(|i| i.calculate(window).map(|v| (i.id().to_string(), v)))
            .filter(|(_, v)| v.is_finite())
            .collect();

        Some(IndicatorState {
            rsi,
            ema_fast,
            ema_slow,
            volume_ma,
            last_update: window.last()?.time,
            extras,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::indicators::test_support::{downtrend, uptrend};

    fn small_config() -> SignalConfig {
        SignalConfig {
            rsi_period: 5,
            ema_fast_period: 3,
            ema_slow_period: 6,
            volume_ma_period: 4,
            ..SignalConfig::default()
        }
    }

    #[test]
    fn test_not_ready_below_min_candles() {
        let engine = IndicatorEngine::new(SignalConfig::default());
        for n in 0..engine.min_candles() {
            assert!(engine.compute(&uptrend(n)).is_none(), "ready at {} candles", n);
        }
        assert!(engine.compute(&uptrend(engine.min_candles())).is_some());
    }

    #[test]
    fn test_state_fields() {
        let engine = IndicatorEngine::new(small_config());
        let candles = uptrend(30);
        let state = engine.compute(&candles).unwrap();

        assert_eq!(state.rsi.len(), 5);
        assert_eq!(state.current_rsi(), 100.0);
        assert_eq!(state.trend(), Trend::Bullish);
        assert!((state.volume_ma - 1000.0).abs() < 1e-9);
        assert_eq!(state.last_update, candles.last().unwrap().time);
    }

    #[test]
    fn test_downtrend_is_bearish() {
        let engine = IndicatorEngine::new(small_config());
        let state = engine.compute(&downtrend(30)).unwrap();
        assert_eq!(state.trend(), Trend::Bearish);
        assert_eq!(state.current_rsi(), 0.0);
    }

    #[test]
    fn test_extras_only_when_enough_data() {
        let engine = IndicatorEngine::new(small_config());
        let short = engine.compute(&uptrend(10)).unwrap();
        assert!(!short.extras.contains_key("macd_histogram"));

        let long = engine.compute(&uptrend(60)).unwrap();
        for key in ["macd_histogram", "bollinger_percent_b", "atr", "williams_r", "mfi"] {
            assert!(long.extras.contains_key(key), "missing {}", key);
        }

        let core = IndicatorEngine::core_only(small_config());
        assert!(core.compute(&uptrend(60)).unwrap().extras.is_empty());
    }
}
