//! Paced kline subscriptions that survive reconnects.

use crate::config::FeedConfig;
use crate::sources::protocol::{is_rate_limit, kline_channel, OutboundFrame};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Batch pacing shared by every request on one connection.
#[derive(Default)]
struct Pacer {
    generation: u64,
    batch_started: Option<Instant>,
    in_batch: usize,
}

impl Pacer {
    fn reset(&mut self, generation: u64) {
        *self = Pacer {
            generation,
            ..Pacer::default()
        };
    }

    async fn wait_turn(&mut self, batch_size: usize, batch_delay: Duration) {
        if self.in_batch >= batch_size {
            if let Some(started) = self.batch_started {
                tokio::time::sleep_until(started + batch_delay).await;
            }
            self.in_batch = 0;
            self.batch_started = None;
        }
        if self.batch_started.is_none() {
            self.batch_started = Some(Instant::now());
        }
        self.in_batch += 1;
    }
}

/// Tracks subscribed symbols and issues paced subscribe requests over the
/// currently attached connection.
pub struct SubscriptionManager {
    period: String,
    batch_size: usize,
    batch_delay: Duration,
    retry_delay: Duration,
    subscribed: DashSet<String>,
    outbound: Mutex<Option<(u64, mpsc::UnboundedSender<OutboundFrame>)>>,
    generation: AtomicU64,
    pacer: tokio::sync::Mutex<Pacer>,
    /// Correlation id -> symbol for subscribe requests awaiting an answer.
    pending: DashMap<String, String>,
    /// Symbol -> connection generation it was last requested on.
    requested: DashMap<String, u64>,
    /// Symbols whose rate-limited request was already retried on this connection.
    retried: DashSet<String>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(config: &FeedConfig) -> Arc<Self> {
        Self::with_settings(
            &config.period,
            config.batch_size,
            config.batch_delay,
            config.rate_limit_retry_delay,
        )
    }

    pub fn with_settings(
        period: &str,
        batch_size: usize,
        batch_delay: Duration,
        retry_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            period: period.to_string(),
            batch_size: batch_size.max(1),
            batch_delay,
            retry_delay,
            subscribed: DashSet::new(),
            outbound: Mutex::new(None),
            generation: AtomicU64::new(0),
            pacer: tokio::sync::Mutex::new(Pacer::default()),
            pending: DashMap::new(),
            requested: DashMap::new(),
            retried: DashSet::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Channel name for a symbol's klines.
    pub fn channel(&self, symbol: &str) -> String {
        kline_channel(symbol, &self.period)
    }

    pub fn period(&self) -> &str {
        &self.period
    }

    /// Use `sender` for requests from now on. Starts a fresh pacing window and
    /// a fresh rate-limit retry allowance.
    pub fn attach(&self, sender: mpsc::UnboundedSender<OutboundFrame>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.lock_outbound() = Some((generation, sender));
        self.pending.clear();
        self.retried.clear();
        debug!("Subscription manager attached to connection {}", generation);
        generation
    }

    /// Stop sending. Subscribed symbols are kept for the next [`resubscribe`](Self::resubscribe).
    pub fn detach(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.lock_outbound() = None;
        self.pending.clear();
        self.retried.clear();
    }

    pub fn is_attached(&self) -> bool {
        self.current().is_some()
    }

    /// Subscribe one symbol. Returns false when it was already subscribed.
    pub async fn subscribe(&self, symbol: &str) -> bool {
        let symbol = symbol.to_lowercase();
        if !self.subscribed.insert(symbol.clone()) {
            return false;
        }
        self.send_paced(vec![symbol]).await;
        true
    }

    /// Subscribe many symbols in paced batches. Returns how many were new.
    pub async fn subscribe_all(&self, symbols: &[String]) -> usize {
        let mut added = Vec::new();
        for symbol in symbols {
            let symbol = symbol.to_lowercase();
            if self.subscribed.insert(symbol.clone()) {
                added.push(symbol);
            }
        }
        let count = added.len();
        if count > 0 {
            self.send_paced(added).await;
        }
        count
    }

    /// Unsubscribe one symbol. Returns false when it was not subscribed.
    pub async fn unsubscribe(&self, symbol: &str) -> bool {
        let symbol = symbol.to_lowercase();
        if self.subscribed.remove(&symbol).is_none() {
            return false;
        }
        self.retried.remove(&symbol);

        let mut pacer = self.pacer.lock().await;
        let Some((generation, sender)) = self.current() else {
            return true;
        };
        if pacer.generation != generation {
            pacer.reset(generation);
        }
        let was_requested = self
            .requested
            .remove(&symbol)
            .map(|(_, g)| g == generation)
            .unwrap_or(false);
        if was_requested {
            pacer.wait_turn(self.batch_size, self.batch_delay).await;
            let frame = OutboundFrame::Unsubscribe {
                unsub: self.channel(&symbol),
                id: self.next_id("unsub"),
            };
            if sender.send(frame).is_err() {
                debug!("Connection closed before unsubscribing {}", symbol);
            }
        }
        true
    }

    /// Re-send every tracked subscription on the attached connection.
    pub async fn resubscribe(&self) -> usize {
        let mut symbols: Vec<String> = self.subscribed.iter().map(|s| s.clone()).collect();
        symbols.sort();
        let sent = self.send_paced(symbols).await;
        info!("Subscribed {} channels", sent);
        sent
    }

    /// Symbols currently tracked, sorted.
    pub fn subscribed(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.subscribed.iter().map(|s| s.clone()).collect();
        symbols.sort();
        symbols
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.subscribed.contains(&symbol.to_lowercase())
    }

    /// Subscribe acknowledged by the exchange.
    pub fn handle_ack(&self, id: Option<&str>, channel: &str) {
        if let Some((_, symbol)) = id.and_then(|id| self.pending.remove(id)) {
            self.retried.remove(&symbol);
        }
        debug!("Subscribed to {}", channel);
    }

    /// Error frame from the exchange.
    ///
    /// A rate-limited subscribe gets one delayed retry. Any other rejection
    /// drops the symbol from the tracked set. Returns true when a retry was
    /// scheduled.
    pub fn handle_error(self: &Arc<Self>, id: Option<&str>, code: &str, message: &str) -> bool {
        let Some((_, symbol)) = id.and_then(|id| self.pending.remove(id)) else {
            warn!("Feed error {}: {}", code, message);
            return false;
        };

        if !is_rate_limit(code, message) {
            warn!(
                "Subscription for {} rejected ({}: {}), dropping it",
                symbol, code, message
            );
            self.subscribed.remove(&symbol);
            self.forget_sent(&symbol);
            return false;
        }

        if !self.retried.insert(symbol.clone()) {
            warn!(
                "Subscription for {} rate limited again, waiting for the next reconnect",
                symbol
            );
            self.forget_sent(&symbol);
            return false;
        }

        warn!(
            "Subscription for {} rate limited, retrying in {:?}",
            symbol, self.retry_delay
        );
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.retry_delay).await;
            this.forget_sent(&symbol);
            if this.is_subscribed(&symbol) {
                this.send_paced(vec![symbol]).await;
            }
        });
        true
    }

    fn forget_sent(&self, symbol: &str) {
        self.requested.remove(symbol);
    }

    async fn send_paced(&self, symbols: Vec<String>) -> usize {
        let mut pacer = self.pacer.lock().await;
        let mut sent = 0;

        for symbol in symbols {
            let Some((generation, _)) = self.current() else {
                debug!("No connection, {} will be sent on connect", symbol);
                break;
            };
            if pacer.generation != generation {
                pacer.reset(generation);
            }
            let already = self
                .requested
                .get(&symbol)
                .map(|g| *g == generation)
                .unwrap_or(false);
            if !self.is_subscribed(&symbol) || already {
                continue;
            }

            pacer.wait_turn(self.batch_size, self.batch_delay).await;

            // The connection may have changed while waiting
            let Some((current, sender)) = self.current() else {
                break;
            };
            if current != generation {
                break;
            }

            let id = self.next_id("sub");
            self.pending.insert(id.clone(), symbol.clone());
            let frame = OutboundFrame::Subscribe {
                sub: self.channel(&symbol),
                id,
            };
            if sender.send(frame).is_err() {
                break;
            }
            self.requested.insert(symbol, generation);
            sent += 1;
        }
        sent
    }

    fn current(&self) -> Option<(u64, mpsc::UnboundedSender<OutboundFrame>)> {
        self.lock_outbound().clone()
    }

    fn lock_outbound(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<(u64, mpsc::UnboundedSender<OutboundFrame>)>> {
        self.outbound.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("sym{:02}usdt", i)).collect()
    }

    fn manager() -> Arc<SubscriptionManager> {
        SubscriptionManager::with_settings(
            "1min",
            5,
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn channels(frames: &[OutboundFrame]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|f| f.channel().map(|c| c.to_string()))
            .collect()
    }

    fn subscribe_id(frame: &OutboundFrame) -> String {
        match frame {
            OutboundFrame::Subscribe { id, .. } => id.clone(),
            other => panic!("expected subscribe, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_is_idempotent() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);

        assert!(manager.subscribe("BTCUSDT").await);
        assert!(!manager.subscribe("btcusdt").await);

        let frames = drain(&mut rx);
        assert_eq!(channels(&frames), vec!["market.btcusdt.kline.1min"]);
        assert_eq!(manager.subscribed(), vec!["btcusdt"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_paced() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);

        let start = Instant::now();
        assert_eq!(manager.subscribe_all(&symbols(12)).await, 12);

        // 5 now, 5 after one delay, 2 after another
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(drain(&mut rx).len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_individual_burst_is_paced_not_dropped() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);

        let start = Instant::now();
        for symbol in symbols(7) {
            assert!(manager.subscribe(&symbol).await);
        }
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(drain(&mut rx).len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_subscribe_is_recorded_only() {
        let manager = manager();
        assert_eq!(manager.subscribe_all(&symbols(3)).await, 3);
        assert_eq!(manager.subscribed().len(), 3);
        assert!(!manager.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_replays_same_set_with_same_pacing() {
        let manager = manager();
        manager.subscribe_all(&symbols(12)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);
        let start = Instant::now();
        assert_eq!(manager.resubscribe().await, 12);
        let initial_elapsed = start.elapsed();
        let initial = channels(&drain(&mut rx));

        // Nothing to resend on the same connection
        assert_eq!(manager.resubscribe().await, 0);

        manager.detach();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);
        let start = Instant::now();
        assert_eq!(manager.resubscribe().await, 12);
        let replay_elapsed = start.elapsed();
        let replay = channels(&drain(&mut rx));

        assert_eq!(initial.len(), 12);
        assert_eq!(initial, replay);
        assert_eq!(initial_elapsed, Duration::from_secs(2));
        assert_eq!(initial_elapsed, replay_elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);

        manager.subscribe("btcusdt").await;
        assert!(manager.unsubscribe("BTCUSDT").await);
        assert!(!manager.unsubscribe("btcusdt").await);

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], OutboundFrame::Unsubscribe { .. }));
        assert!(manager.subscribed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_once() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);

        manager.subscribe("btcusdt").await;
        let id = subscribe_id(&drain(&mut rx)[0]);

        assert!(manager.handle_error(Some(&id), "too-many-request", "Too many requests"));
        assert!(drain(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        let retried = drain(&mut rx);
        assert_eq!(channels(&retried), vec!["market.btcusdt.kline.1min"]);

        // A second rate limit for the same symbol is not retried again
        let id = subscribe_id(&retried[0]);
        assert!(!manager.handle_error(Some(&id), "too-many-request", "Too many requests"));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(drain(&mut rx).is_empty());
        assert!(manager.is_subscribed("btcusdt"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retry_allowance_resets_on_reconnect() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);
        manager.subscribe("btcusdt").await;

        // Use up the retry on the first connection
        let id = subscribe_id(&drain(&mut rx)[0]);
        assert!(manager.handle_error(Some(&id), "too-many-request", "Too many requests"));
        tokio::time::sleep(Duration::from_secs(6)).await;
        let id = subscribe_id(&drain(&mut rx)[0]);
        assert!(!manager.handle_error(Some(&id), "too-many-request", "Too many requests"));

        manager.detach();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);
        assert_eq!(manager.resubscribe().await, 1);

        // The new connection gets its own retry
        let id = subscribe_id(&drain(&mut rx)[0]);
        assert!(manager.handle_error(Some(&id), "too-many-request", "Too many requests"));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            channels(&drain(&mut rx)),
            vec!["market.btcusdt.kline.1min"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_subscription_is_dropped() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);

        manager.subscribe("nosuchusdt").await;
        manager.subscribe("btcusdt").await;
        let id = subscribe_id(&drain(&mut rx)[0]);

        assert!(!manager.handle_error(Some(&id), "bad-request", "invalid topic"));
        assert_eq!(manager.subscribed(), vec!["btcusdt"]);
        assert!(!manager.handle_error(Some("unknown"), "bad-request", "invalid topic"));
    }
}
