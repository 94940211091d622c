//! Per-symbol bounded rolling windows of OHLCV candles.

use crate::types::{AppendOutcome, Candle};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Ordered, bounded candle window. Ascending by time, no duplicate times.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append or replace-in-place, then evict from the head on overflow.
    pub fn append(&mut self, candle: Candle) -> AppendOutcome {
        if let Some(last) = self.candles.back_mut() {
            if last.time == candle.time {
                *last = candle;
                return AppendOutcome::Replaced;
            }
            if candle.time < last.time {
                // Late correction for a period we still hold.
                if let Ok(idx) = self
                    .candles
                    .binary_search_by_key(&candle.time, |c| c.time)
                {
                    self.candles[idx] = candle;
                    return AppendOutcome::Replaced;
                }
                return AppendOutcome::Stale;
            }
        }

        self.candles.push_back(candle);
        while self.candles.len() > self.capacity {
            self.candles.pop_front();
        }
        AppendOutcome::Appended
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }
}

/// Candle windows for every tracked symbol.
pub struct CandleStore {
    windows: DashMap<String, CandleWindow>,
    capacity: usize,
}

impl CandleStore {
    /// Create a new candle store whose windows hold at most `capacity` candles.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            windows: DashMap::new(),
            capacity,
        })
    }

    /// Add or update a candle for a symbol.
    pub fn append(&self, symbol: &str, candle: Candle) -> AppendOutcome {
        let mut entry = self
            .windows
            .entry(symbol.to_lowercase())
            .or_insert_with(|| CandleWindow::new(self.capacity));
        let outcome = entry.append(candle);
        if outcome == AppendOutcome::Stale {
            debug!(
                "Ignoring stale candle for {} at {} (tail {:?})",
                symbol,
                candle.time,
                entry.last().map(|c| c.time)
            );
        }
        outcome
    }

    /// Seed a symbol from historical candles in any order.
    pub fn seed(&self, symbol: &str, mut candles: Vec<Candle>) -> usize {
        candles.sort_by_key(|c| c.time);
        for candle in candles {
            self.append(symbol, candle);
        }
        self.len(symbol)
    }

    /// Snapshot of a symbol's window, oldest first. Empty for unknown symbols.
    pub fn window(&self, symbol: &str) -> Vec<Candle> {
        self.windows
            .get(&symbol.to_lowercase())
            .map(|w| w.to_vec())
            .unwrap_or_default()
    }

    pub fn last(&self, symbol: &str) -> Option<Candle> {
        self.windows
            .get(&symbol.to_lowercase())
            .and_then(|w| w.last().copied())
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.windows
            .get(&symbol.to_lowercase())
            .map(|w| w.len())
            .unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(time: i64, close: f64) -> Candle {
        Candle::new(time, close, close + 1.0, close - 1.0, close, 10.0)
    }

    #[test]
    fn test_append_and_window() {
        let store = CandleStore::new(10);
        assert_eq!(store.append("BTCUSDT", candle(60, 1.0)), AppendOutcome::Appended);
        assert_eq!(store.append("btcusdt", candle(120, 2.0)), AppendOutcome::Appended);

        let window = store.window("btcusdt");
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].time, 60);
        assert_eq!(window[1].time, 120);
    }

    #[test]
    fn test_unknown_symbol_is_empty() {
        let store = CandleStore::new(10);
        assert!(store.window("nope").is_empty());
        assert!(store.last("nope").is_none());
        assert_eq!(store.len("nope"), 0);
    }

    #[test]
    fn test_same_time_replaces_tail() {
        let store = CandleStore::new(10);
        store.append("eth", candle(60, 1.0));
        let partial = Candle::new(120, 2.0, 2.5, 1.9, 2.1, 5.0);
        let closed = Candle::new(120, 2.0, 3.0, 1.5, 2.8, 12.0);

        assert_eq!(store.append("eth", partial), AppendOutcome::Appended);
        assert_eq!(store.append("eth", closed), AppendOutcome::Replaced);

        let window = store.window("eth");
        assert_eq!(window.len(), 2);
        assert_eq!(window.iter().filter(|c| c.time == 120).count(), 1);
        assert_eq!(window[1], closed);
    }

    #[test]
    fn test_window_is_bounded_and_fifo() {
        let store = CandleStore::new(5);
        for i in 0..50 {
            store.append("sol", candle(i * 60, i as f64));
            assert!(store.len("sol") <= 5);
        }
        let window = store.window("sol");
        assert_eq!(window.len(), 5);
        assert_eq!(window[0].time, 45 * 60);
        assert_eq!(window[4].time, 49 * 60);
    }

    #[test]
    fn test_stale_candle_ignored() {
        let store = CandleStore::new(10);
        store.append("xrp", candle(120, 1.0));
        store.append("xrp", candle(240, 1.0));
        assert_eq!(store.append("xrp", candle(60, 9.0)), AppendOutcome::Stale);
        assert_eq!(store.append("xrp", candle(120, 5.0)), AppendOutcome::Replaced);

        let window = store.window("xrp");
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].close, 5.0);
    }

    #[test]
    fn test_seed_sorts_and_dedups() {
        let store = CandleStore::new(10);
        let seeded = store.seed(
            "ada",
            vec![candle(180, 3.0), candle(60, 1.0), candle(120, 2.0), candle(120, 2.5)],
        );
        assert_eq!(seeded, 3);

        let window = store.window("ada");
        let times: Vec<i64> = window.iter().map(|c| c.time).collect();
        assert_eq!(times, vec![60, 120, 180]);
        assert_eq!(window[1].close, 2.5);
    }
}
