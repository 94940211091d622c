//! Per-symbol processing: candle store, indicators, detection, recording, alerting.

use crate::config::SignalConfig;
use crate::services::indicators::IndicatorEngine;
use crate::services::{
    CandleStore, Evaluation, NotificationDispatcher, SignalDetector, SignalHistoryStore,
    SkipReason, TrackRecordStore,
};
use crate::sources::KlineUpdate;
use crate::types::{AppendOutcome, Candle, Signal};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Everything a symbol worker needs, shared by all workers.
pub struct SignalPipeline {
    candles: Arc<CandleStore>,
    engine: IndicatorEngine,
    detector: SignalDetector,
    track_record: Arc<TrackRecordStore>,
    history: Arc<SignalHistoryStore>,
    dispatcher: Arc<NotificationDispatcher>,
    signal_ttl: ChronoDuration,
    closed_candles: AtomicU64,
    signals: AtomicU64,
}

impl SignalPipeline {
    pub fn new(
        config: SignalConfig,
        candles: Arc<CandleStore>,
        track_record: Arc<TrackRecordStore>,
        history: Arc<SignalHistoryStore>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Arc<Self> {
        let signal_ttl =
            ChronoDuration::from_std(config.signal_ttl).unwrap_or_else(|_| ChronoDuration::hours(24));
        Arc::new(Self {
            candles,
            engine: IndicatorEngine::new(config.clone()),
            detector: SignalDetector::new(config),
            track_record,
            history,
            dispatcher,
            signal_ttl,
            closed_candles: AtomicU64::new(0),
            signals: AtomicU64::new(0),
        })
    }

    pub fn candles(&self) -> &Arc<CandleStore> {
        &self.candles
    }

    pub fn detector(&self) -> &SignalDetector {
        &self.detector
    }

    pub fn track_record(&self) -> &Arc<TrackRecordStore> {
        &self.track_record
    }

    pub fn history(&self) -> &Arc<SignalHistoryStore> {
        &self.history
    }

    pub fn closed_candles(&self) -> u64 {
        self.closed_candles.load(Ordering::Relaxed)
    }

    pub fn signals_emitted(&self) -> u64 {
        self.signals.load(Ordering::Relaxed)
    }

    /// Seed cooldowns from previously emitted signals.
    pub fn restore_cooldowns(&self) -> usize {
        let latest = self.history.latest_by_symbol();
        for (symbol, fired_at) in &latest {
            self.detector.restore_cooldown(symbol, *fired_at);
        }
        latest.len()
    }

    pub fn process_update(&self, symbol: &str, candle: Candle) -> Option<Signal> {
        self.process_update_at(symbol, candle, Utc::now())
    }

    /// Apply one kline update. When it starts a new period, the previous
    /// candle is final and gets evaluated.
    pub fn process_update_at(
        &self,
        symbol: &str,
        candle: Candle,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        match self.candles.append(symbol, candle) {
            AppendOutcome::Appended => {}
            AppendOutcome::Replaced | AppendOutcome::Stale => return None,
        }

        let window = self.candles.window(symbol);
        if window.len() < 2 {
            return None;
        }
        self.evaluate_closed(symbol, &window[..window.len() - 1], now)
    }

    /// Evaluate a window whose last candle is closed.
    pub fn evaluate_closed(
        &self,
        symbol: &str,
        window: &[Candle],
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        let closed = *window.last()?;
        self.closed_candles.fetch_add(1, Ordering::Relaxed);

        // Outcomes of earlier signals first, so a new signal is only judged by later candles
        self.track_record
            .evaluate_candle(symbol, &closed, self.signal_ttl, now);

        let state = self.engine.compute(window);
        match self.detector.evaluate(symbol, &closed, state.as_ref(), now) {
            Evaluation::Fired(signal) => {
                info!(
                    "{} signal for {} at {} (RSI {:.1}, volume {:.2}x, R/R {:.2})",
                    signal.signal_type.as_str(),
                    signal.symbol,
                    signal.entry_price,
                    signal.rsi_at_signal,
                    signal.volume_ratio_at_signal,
                    signal.risk_reward_ratio
                );
                self.signals.fetch_add(1, Ordering::Relaxed);
                self.track_record.record_new(signal.clone());
                self.history.append(signal.clone());
                self.dispatcher
                    .send(&signal, state.as_ref().map(|s| &s.extras));
                Some(signal)
            }
            Evaluation::Skipped(SkipReason::NotReady) => {
                trace!(
                    "{}: indicators not ready ({} of {} candles)",
                    symbol,
                    window.len(),
                    self.engine.min_candles()
                );
                None
            }
            Evaluation::Skipped(reason) => {
                debug!("{}: no signal ({:?})", symbol, reason);
                None
            }
        }
    }

    /// Start the worker that owns `symbol`. Updates are processed strictly in
    /// arrival order. The worker exits when the sender side is dropped.
    pub fn spawn_worker(
        self: &Arc<Self>,
        symbol: &str,
        capacity: usize,
    ) -> (mpsc::Sender<KlineUpdate>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<KlineUpdate>(capacity.max(1));
        let pipeline = Arc::clone(self);
        let symbol = symbol.to_lowercase();

        let handle = tokio::spawn(async move {
            debug!("Worker for {} started", symbol);
            while let Some(update) = rx.recv().await {
                pipeline.process_update(&symbol, update.candle);
            }
            debug!("Worker for {} stopped", symbol);
        });
        (tx, handle)
    }
}
