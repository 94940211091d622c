use sigwatch::config::Config;
use sigwatch::services::{
    notifier_from_config, open_state_stores, CandleStore, NotificationDispatcher,
    SignalHistoryStore, SignalPipeline, TrackRecordStore,
};
use sigwatch::sources::{FeedClient, HuobiClient, SubscriptionManager};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sigwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Starting sigwatch: {} symbols, {} klines",
        config.symbols.len(),
        config.feed.period
    );

    // Durable state
    let stores = open_state_stores(&config.storage)?;
    let track_record = TrackRecordStore::open(stores.track_record).await;
    let history = SignalHistoryStore::open(stores.history, config.storage.history_limit).await;

    let dispatcher = NotificationDispatcher::new(notifier_from_config(&config.notifier));
    let candles = CandleStore::new(config.signal.window_capacity());
    let pipeline = SignalPipeline::new(
        config.signal.clone(),
        candles.clone(),
        track_record.clone(),
        history.clone(),
        dispatcher.clone(),
    );
    let restored = pipeline.restore_cooldowns();
    if restored > 0 {
        info!("Restored cooldowns for {} symbols", restored);
    }

    backfill(&config, &candles).await;

    // One worker per symbol, fed by the connection's reader loop
    let subscriptions = SubscriptionManager::new(&config.feed);
    let feed = FeedClient::new(config.feed.clone(), subscriptions.clone());
    let mut workers = Vec::with_capacity(config.symbols.len());
    for symbol in &config.symbols {
        let (tx, handle) = pipeline.spawn_worker(symbol, config.feed.worker_queue);
        feed.register_handler(symbol, tx);
        workers.push(handle);
    }
    subscriptions.subscribe_all(&config.symbols).await;

    // The sender lives until main returns, so receivers only ever see `true`
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    {
        let shutdown_tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }

    // Periodic stats report
    {
        let track_record = track_record.clone();
        let pipeline = pipeline.clone();
        let dispatcher = dispatcher.clone();
        let feed = feed.clone();
        let interval = config.stats_interval.max(std::time::Duration::from_secs(1));
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
                }
                let stats = track_record.stats();
                let feed_stats = feed.stats();
                info!(
                    "Track record: {} signals, {} wins, {} losses, {:.1}% win rate, {:+.2}% avg, {} active",
                    stats.total_signals,
                    stats.wins,
                    stats.losses,
                    stats.win_rate,
                    stats.average_profit,
                    stats.active_signals
                );
                info!(
                    "Feed {:?}: {} frames, {} klines, {} dropped, {} reconnects; {} candles closed, {} alerts sent, {} failed",
                    feed.state(),
                    feed_stats.frames.load(Ordering::Relaxed),
                    feed_stats.klines.load(Ordering::Relaxed),
                    feed_stats.dropped.load(Ordering::Relaxed),
                    feed_stats.reconnects.load(Ordering::Relaxed),
                    pipeline.closed_candles(),
                    dispatcher.delivered(),
                    dispatcher.failed()
                );
            }
        });
    }

    let result = feed.run(shutdown_rx).await;

    // Let workers drain their queues
    feed.clear_handlers();
    for worker in workers {
        let _ = worker.await;
    }

    if let Err(e) = track_record.flush().await {
        warn!("Failed to save track record on exit: {}", e);
    }
    if let Err(e) = history.flush().await {
        warn!("Failed to save signal history on exit: {}", e);
    }
    drop(shutdown_tx);

    match result {
        Ok(()) => {
            info!("sigwatch stopped");
            Ok(())
        }
        Err(e) => {
            error!("sigwatch stopped: {}", e);
            Err(e.into())
        }
    }
}

/// Seed each symbol's window from the REST history. Failures leave the
/// window empty until live candles accumulate.
async fn backfill(config: &Config, candles: &Arc<CandleStore>) {
    let client = HuobiClient::new(&config.feed.rest_url);
    for symbol in &config.symbols {
        match client
            .fetch_klines(symbol, &config.feed.period, config.feed.backfill_size)
            .await
        {
            Ok(history) => {
                let seeded = candles.seed(symbol, history);
                info!("Backfilled {} candles for {}", seeded, symbol);
            }
            Err(e) => {
                warn!("Backfill failed for {}: {}; starting empty", symbol, e);
            }
        }
    }
}
