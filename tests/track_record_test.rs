//! Track record and persistence tests

use chrono::{Duration, Utc};
use sigwatch::config::{StorageBackend, StorageConfig};
use sigwatch::services::{
    open_state_stores, JsonFileStore, MemoryStore, SignalHistoryStore, Store, TrackRecordStore,
};
use sigwatch::types::{ExitReason, Signal, SignalType, TrackRecord, Trend};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn signal(id: &str, signal_type: SignalType, entry: f64) -> Signal {
    let dir = signal_type.sign();
    Signal {
        id: id.to_string(),
        symbol: "btcusdt".to_string(),
        signal_type,
        entry_price: entry,
        entry_low: entry * (1.0 - 0.002),
        entry_high: entry * (1.0 + 0.002),
        stop_loss: entry * (1.0 - 0.02 * dir),
        targets: [
            entry * (1.0 + 0.02 * dir),
            entry * (1.0 + 0.04 * dir),
            entry * (1.0 + 0.06 * dir),
        ],
        risk_reward_ratio: 2.0,
        trend: if signal_type == SignalType::Long {
            Trend::Bullish
        } else {
            Trend::Bearish
        },
        rsi_at_signal: 28.0,
        volume_ratio_at_signal: 2.0,
        created_at: Utc::now(),
    }
}

// =============================================================================
// Profit and counters
// =============================================================================

#[test]
fn test_long_profit() {
    let store = TrackRecordStore::new(Arc::new(MemoryStore::new()));
    store.record_new(signal("long", SignalType::Long, 100.0));

    let entry = store.complete("long", 110.0).unwrap();
    assert!((entry.profit_percent.unwrap() - 10.0).abs() < 1e-9);
    assert_eq!(entry.exit_price, Some(110.0));
    assert_eq!(entry.exit_reason, Some(ExitReason::External));
    assert!(entry.completed_at.is_some());
}

#[test]
fn test_short_profit() {
    let store = TrackRecordStore::new(Arc::new(MemoryStore::new()));
    store.record_new(signal("short", SignalType::Short, 100.0));

    let entry = store.complete("short", 90.0).unwrap();
    assert!((entry.profit_percent.unwrap() - 10.0).abs() < 1e-9);
    assert_eq!(store.stats().wins, 1);
}

#[test]
fn test_loss_increments_losses_only() {
    let store = TrackRecordStore::new(Arc::new(MemoryStore::new()));
    store.record_new(signal("long", SignalType::Long, 100.0));

    let entry = store.complete("long", 90.0).unwrap();
    assert!(entry.profit_percent.unwrap() < 0.0);

    let stats = store.stats();
    assert_eq!(stats.wins, 0);
    assert_eq!(stats.losses, 1);
    assert_eq!(stats.win_rate, 0.0);
}

#[test]
fn test_stats_computed_on_read() {
    let store = TrackRecordStore::new(Arc::new(MemoryStore::new()));
    for (i, exit) in [110.0, 95.0, 104.0].iter().enumerate() {
        let id = format!("s{}", i);
        store.record_new(signal(&id, SignalType::Long, 100.0));
        store.complete(&id, *exit);
    }
    store.record_new(signal("open", SignalType::Long, 100.0));

    let stats = store.stats();
    assert_eq!(stats.total_signals, 4);
    assert_eq!(stats.wins, 2);
    assert_eq!(stats.losses, 1);
    assert_eq!(stats.active_signals, 1);
    assert!((stats.win_rate - 200.0 / 3.0).abs() < 1e-9);
    assert!((stats.average_profit - 3.0).abs() < 1e-9);
}

#[test]
fn test_unknown_signal_is_ignored() {
    let store = TrackRecordStore::new(Arc::new(MemoryStore::new()));
    assert!(store.complete("nope", 1.0).is_none());
    assert_eq!(store.stats().losses, 0);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_json_track_record_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track_record.json");

    let store = TrackRecordStore::open(Arc::new(JsonFileStore::new(&path))).await;
    store.record_new(signal("a", SignalType::Long, 100.0));
    store.record_new(signal("b", SignalType::Short, 100.0));
    store.complete("b", 95.0);
    assert_ok!(store.flush().await);

    let reopened = TrackRecordStore::open(Arc::new(JsonFileStore::new(&path))).await;
    assert_eq!(reopened.stats().total_signals, 2);
    assert_eq!(reopened.stats().wins, 1);
    assert_eq!(reopened.active()[0].signal.id, "a");
    let completed = reopened.completed();
    assert_eq!(completed[0].signal.signal_type, SignalType::Short);
    assert!((completed[0].profit_percent.unwrap() - 5.0).abs() < 1e-9);

    // Persisted field names follow the camelCase layout
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"totalSignals\""));
    assert!(raw.contains("\"riskRewardRatio\""));
    assert!(raw.contains("\"trendLabel\""));
}

#[tokio::test]
async fn test_sqlite_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        backend: StorageBackend::Sqlite,
        data_dir: dir.path().to_path_buf(),
        history_limit: 2,
    };

    let stores = open_state_stores(&config).unwrap();
    let track = TrackRecordStore::open(stores.track_record).await;
    let history = SignalHistoryStore::open(stores.history, config.history_limit).await;
    for id in ["x", "y", "z"] {
        let s = signal(id, SignalType::Long, 50.0);
        track.record_new(s.clone());
        history.append(s);
    }
    assert_ok!(track.flush().await);
    assert_ok!(history.flush().await);

    let stores = open_state_stores(&config).unwrap();
    let track = TrackRecordStore::open(stores.track_record).await;
    let history = SignalHistoryStore::open(stores.history, config.history_limit).await;
    assert_eq!(track.stats().total_signals, 3);
    let ids: Vec<String> = history.recent(10).into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["y", "z"]);
}

#[tokio::test]
async fn test_failed_write_keeps_memory_authoritative() {
    let backend = Arc::new(MemoryStore::new());
    let store = TrackRecordStore::new(backend.clone());

    backend.set_fail_writes(true);
    store.record_new(signal("a", SignalType::Long, 100.0));
    assert_err!(store.flush().await);
    assert_eq!(store.stats().total_signals, 1);
    assert!(store.complete("a", 101.0).is_some());

    backend.set_fail_writes(false);
    assert_ok!(store.flush().await);
    let saved: TrackRecord = backend.load().unwrap().unwrap();
    assert_eq!(saved.completed.len(), 1);
    assert_eq!(saved.wins, 1);
}

#[tokio::test]
async fn test_interleaved_writes_are_not_lost() {
    let backend = Arc::new(MemoryStore::new());
    let store = TrackRecordStore::new(backend.clone());

    let mut tasks = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let id = format!("s{}", i);
            store.record_new(signal(&id, SignalType::Long, 100.0));
            store.complete(&id, 100.0 + i as f64);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_ok!(store.flush().await);

    let saved: TrackRecord = backend.load().unwrap().unwrap();
    assert_eq!(saved.total_signals, 20);
    assert_eq!(saved.completed.len(), 20);
    assert_eq!(saved.wins + saved.losses, 20);
    // Exit at entry is not a win
    assert_eq!(saved.losses, 1);
}

#[tokio::test]
async fn test_expired_signal_completes_at_close() {
    let store = TrackRecordStore::new(Arc::new(MemoryStore::new()));
    let mut old = signal("old", SignalType::Short, 100.0);
    old.created_at = Utc::now() - Duration::hours(30);
    store.record_new(old);

    let candle = sigwatch::types::Candle::new(0, 99.0, 99.5, 98.5, 99.0, 1.0);
    let done = store.evaluate_candle("btcusdt", &candle, Duration::hours(24), Utc::now());
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].exit_reason, Some(ExitReason::Expired));
    assert!((done[0].profit_percent.unwrap() - 1.0).abs() < 1e-9);
}
