use crate::types::Signal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a track-record entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Active,
    Completed,
}

/// Why an entry was completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    Target,
    Expired,
    External,
}

/// A signal plus its realised outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecordEntry {
    #[serde(flatten)]
    pub signal: Signal,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,
}

impl TrackRecordEntry {
    pub fn active(signal: Signal) -> Self {
        Self {
            signal,
            status: EntryStatus::Active,
            exit_price: None,
            profit_percent: None,
            completed_at: None,
            exit_reason: None,
        }
    }

    /// Consume an active entry and produce its completed form.
    pub fn complete(
        mut self,
        exit_price: f64,
        reason: ExitReason,
        completed_at: DateTime<Utc>,
    ) -> Self {
        self.profit_percent = Some(self.signal.profit_percent(exit_price));
        self.exit_price = Some(exit_price);
        self.exit_reason = Some(reason);
        self.completed_at = Some(completed_at);
        self.status = EntryStatus::Completed;
        self
    }

    pub fn is_win(&self) -> bool {
        self.profit_percent.map(|p| p > 0.0).unwrap_or(false)
    }
}

/// Persisted track record: active and completed entries plus counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecord {
    pub active: Vec<TrackRecordEntry>,
    pub completed: Vec<TrackRecordEntry>,
    pub total_signals: u64,
    pub wins: u64,
    pub losses: u64,
}

/// Aggregate statistics, computed on read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecordStats {
    pub total_signals: u64,
    pub wins: u64,
    pub losses: u64,
    /// Percentage of completed signals that were profitable.
    pub win_rate: f64,
    /// Mean profit percent over completed signals.
    pub average_profit: f64,
    pub active_signals: usize,
}

impl TrackRecord {
    pub fn stats(&self) -> TrackRecordStats {
        let decided = self.wins + self.losses;
        let win_rate = if decided > 0 {
            self.wins as f64 / decided as f64 * 100.0
        } else {
            0.0
        };

        let profits: Vec<f64> = self
            .completed
            .iter()
            .filter_map(|e| e.profit_percent)
            .collect();
        let average_profit = if profits.is_empty() {
            0.0
        } else {
            profits.iter().sum::<f64>() / profits.len() as f64
        };

        TrackRecordStats {
            total_signals: self.total_signals,
            wins: self.wins,
            losses: self.losses,
            win_rate,
            average_profit,
            active_signals: self.active.len(),
        }
    }
}

/// Capped, append-only list of every emitted signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalHistory {
    pub signals: Vec<Signal>,
}
