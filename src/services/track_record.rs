//! Durable ledger of emitted signals and their outcomes.

use crate::error::Result;
use crate::services::store::{PersistentState, Store};
use crate::types::{
    Candle, ExitReason, Signal, SignalHistory, TrackRecord, TrackRecordEntry, TrackRecordStats,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Active and completed signals with running win/loss counters.
pub struct TrackRecordStore {
    state: Arc<PersistentState<TrackRecord>>,
}

impl TrackRecordStore {
    /// Start from the state saved in `store`.
    pub async fn open(store: Arc<dyn Store<TrackRecord>>) -> Arc<Self> {
        let state = PersistentState::load("track record", store).await;
        let this = Arc::new(Self { state });
        let stats = this.stats();
        info!(
            "Track record loaded: {} total, {} active, {} wins, {} losses",
            stats.total_signals, stats.active_signals, stats.wins, stats.losses
        );
        this
    }

    /// Start empty without reading `store`.
    pub fn new(store: Arc<dyn Store<TrackRecord>>) -> Arc<Self> {
        Arc::new(Self {
            state: PersistentState::new("track record", store, TrackRecord::default()),
        })
    }

    /// Add an active entry for a freshly emitted signal.
    pub fn record_new(&self, signal: Signal) {
        let id = signal.id.clone();
        self.state.update(|record| {
            record.active.push(TrackRecordEntry::active(signal));
            record.total_signals += 1;
            Some(())
        });
        info!("Tracking signal {}", id);
    }

    /// Complete an active signal at `exit_price` reported from outside the engine.
    ///
    /// Unknown or already completed ids are logged and ignored.
    pub fn complete(&self, signal_id: &str, exit_price: f64) -> Option<TrackRecordEntry> {
        self.complete_with(signal_id, exit_price, ExitReason::External, Utc::now())
    }

    pub fn complete_with(
        &self,
        signal_id: &str,
        exit_price: f64,
        reason: ExitReason,
        at: DateTime<Utc>,
    ) -> Option<TrackRecordEntry> {
        let completed = self.state.update(|record| {
            let index = record.active.iter().position(|e| e.signal.id == signal_id)?;
            Some(complete_at(record, index, exit_price, reason, at))
        });

        match &completed {
            Some(entry) => log_completion(entry),
            None => warn!("Cannot complete signal {}: not an active signal", signal_id),
        }
        completed
    }

    /// Close out active entries for `symbol` using a closed candle.
    ///
    /// A Long completes at its stop when the candle's low reaches it, otherwise at
    /// the final target when the high reaches it. Shorts mirror this. Entries
    /// older than `ttl` complete at the candle's close.
    pub fn evaluate_candle(
        &self,
        symbol: &str,
        candle: &Candle,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Vec<TrackRecordEntry> {
        let symbol = symbol.to_lowercase();
        let completed = self.state.update(|record| {
            let mut exits = Vec::new();
            for (index, entry) in record.active.iter().enumerate() {
                if entry.signal.symbol != symbol {
                    continue;
                }
                let signal = &entry.signal;
                let exit = if signal.stop_hit(candle.low, candle.high) {
                    Some((signal.stop_loss, ExitReason::StopLoss))
                } else if signal.final_target_hit(candle.low, candle.high) {
                    Some((signal.targets[2], ExitReason::Target))
                } else if now - signal.created_at >= ttl {
                    Some((candle.close, ExitReason::Expired))
                } else {
                    None
                };
                if let Some(exit) = exit {
                    exits.push((index, exit));
                }
            }
            if exits.is_empty() {
                return None;
            }

            // Remove from the back so earlier indices stay valid
            let mut done: Vec<TrackRecordEntry> = exits
                .into_iter()
                .rev()
                .map(|(index, (price, reason))| complete_at(record, index, price, reason, now))
                .collect();
            done.reverse();
            Some(done)
        });

        let completed = completed.unwrap_or_default();
        for entry in &completed {
            log_completion(entry);
        }
        completed
    }

    /// Statistics computed from the current state.
    pub fn stats(&self) -> TrackRecordStats {
        self.state.read(|record| record.stats())
    }

    pub fn active(&self) -> Vec<TrackRecordEntry> {
        self.state.read(|record| record.active.clone())
    }

    pub fn completed(&self) -> Vec<TrackRecordEntry> {
        self.state.read(|record| record.completed.clone())
    }

    pub fn snapshot(&self) -> TrackRecord {
        self.state.read(|record| record.clone())
    }

    /// Persist the current state and wait for the write.
    pub async fn flush(&self) -> Result<()> {
        self.state.flush().await
    }
}

fn complete_at(
    record: &mut TrackRecord,
    index: usize,
    exit_price: f64,
    reason: ExitReason,
    at: DateTime<Utc>,
) -> TrackRecordEntry {
    let entry = record.active.remove(index).complete(exit_price, reason, at);
    if entry.is_win() {
        record.wins += 1;
    } else {
        record.losses += 1;
    }
    record.completed.push(entry.clone());
    entry
}

fn log_completion(entry: &TrackRecordEntry) {
    info!(
        "Signal {} {} {} completed at {:.6} ({:?}): {:+.2}%",
        entry.signal.id,
        entry.signal.symbol,
        entry.signal.signal_type.as_str(),
        entry.exit_price.unwrap_or_default(),
        entry.exit_reason.unwrap_or(ExitReason::External),
        entry.profit_percent.unwrap_or_default()
    );
}

/// Append-only list of emitted signals, keeping only the most recent `limit`.
pub struct SignalHistoryStore {
    state: Arc<PersistentState<SignalHistory>>,
    limit: usize,
}

impl SignalHistoryStore {
    pub async fn open(store: Arc<dyn Store<SignalHistory>>, limit: usize) -> Arc<Self> {
        let state = PersistentState::load("signal history", store).await;
        let this = Arc::new(Self {
            state,
            limit: limit.max(1),
        });
        info!("Signal history loaded: {} signals", this.len());
        this
    }

    pub fn new(store: Arc<dyn Store<SignalHistory>>, limit: usize) -> Arc<Self> {
        Arc::new(Self {
            state: PersistentState::new("signal history", store, SignalHistory::default()),
            limit: limit.max(1),
        })
    }

    pub fn append(&self, signal: Signal) {
        let limit = self.limit;
        self.state.update(|history| {
            history.signals.push(signal);
            if history.signals.len() > limit {
                let excess = history.signals.len() - limit;
                history.signals.drain(..excess);
            }
            Some(())
        });
    }

    /// Most recent `n` signals, newest last.
    pub fn recent(&self, n: usize) -> Vec<Signal> {
        self.state.read(|history| {
            let start = history.signals.len().saturating_sub(n);
            history.signals[start..].to_vec()
        })
    }

    pub fn len(&self) -> usize {
        self.state.read(|history| history.signals.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest emission time per symbol, used to restore cooldowns.
    pub fn latest_by_symbol(&self) -> HashMap<String, DateTime<Utc>> {
        self.state.read(|history| {
            let mut latest: HashMap<String, DateTime<Utc>> = HashMap::new();
            for signal in &history.signals {
                latest
                    .entry(signal.symbol.clone())
                    .and_modify(|t| {
                        if signal.created_at > *t {
                            *t = signal.created_at;
                        }
                    })
                    .or_insert(signal.created_at);
            }
            latest
        })
    }

    pub async fn flush(&self) -> Result<()> {
        self.state.flush().await
    }
}
