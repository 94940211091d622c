//! Huobi market WebSocket client.

use crate::config::FeedConfig;
use crate::error::{AppError, Result};
use crate::sources::protocol::{decode_message, InboundFrame, KlineUpdate, OutboundFrame};
use crate::sources::SubscriptionManager;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Shut down on request.
    Stopped,
    /// Gave up after the maximum number of reconnect attempts.
    Failed,
}

/// How a connected session ended.
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Closed(String),
}

/// Counters for the stats log line.
#[derive(Debug, Default)]
pub struct FeedStats {
    pub frames: AtomicU64,
    pub klines: AtomicU64,
    pub dropped: AtomicU64,
    pub reconnects: AtomicU64,
}

/// Resolves once shutdown is signalled. A dropped sender never signals.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Delay before reconnect attempt `attempt` (0-based), capped at `max`.
pub fn backoff_delay(base: Duration, factor: f64, attempt: u32, max: Duration) -> Duration {
    let secs = base.as_secs_f64() * factor.powi(attempt.min(i32::MAX as u32) as i32);
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Owns the single streaming connection and routes kline updates to
/// per-symbol handlers.
pub struct FeedClient {
    config: FeedConfig,
    subscriptions: Arc<SubscriptionManager>,
    handlers: DashMap<String, mpsc::Sender<KlineUpdate>>,
    state: watch::Sender<ConnectionState>,
    stats: FeedStats,
}

impl FeedClient {
    pub fn new(config: FeedConfig, subscriptions: Arc<SubscriptionManager>) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            config,
            subscriptions,
            handlers: DashMap::new(),
            state,
            stats: FeedStats::default(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// Route `symbol`'s klines to `sender`, replacing any previous handler.
    pub fn register_handler(&self, symbol: &str, sender: mpsc::Sender<KlineUpdate>) {
        let channel = self.subscriptions.channel(symbol);
        if self.handlers.insert(channel.clone(), sender).is_some() {
            debug!("Replaced handler for {}", channel);
        }
    }

    /// Drop every handler so the workers see their queues close.
    pub fn clear_handlers(&self) {
        self.handlers.clear();
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Connect and keep reconnecting until shutdown or until reconnect
    /// attempts are exhausted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                self.set_state(ConnectionState::Stopped);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);
            match self.run_connection(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => {
                    info!("Feed connection closed for shutdown");
                    self.set_state(ConnectionState::Stopped);
                    return Ok(());
                }
                Ok(SessionEnd::Closed(reason)) => {
                    warn!("Feed disconnected: {}", reason);
                    attempt = 0;
                }
                Err(e) => {
                    error!("Feed connection error: {}", e);
                }
            }

            self.set_state(ConnectionState::Disconnected);

            if attempt >= self.config.max_reconnect_attempts {
                error!(
                    "Giving up on the feed after {} reconnect attempts",
                    attempt
                );
                self.set_state(ConnectionState::Failed);
                return Err(AppError::ReconnectExhausted { attempts: attempt });
            }

            let delay = backoff_delay(
                self.config.reconnect_base_delay,
                self.config.backoff_factor,
                attempt,
                self.config.max_reconnect_delay,
            );
            attempt += 1;
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay, attempt, self.config.max_reconnect_attempts
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => {}
            }
        }
    }

    async fn run_connection(&self, shutdown: &mut watch::Receiver<bool>) -> Result<SessionEnd> {
        info!("Connecting to {}", self.config.ws_url);
        let (ws_stream, _) = connect_async(self.config.ws_url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();
        self.set_state(ConnectionState::Connected);
        info!("Connected to {}", self.config.ws_url);

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        self.subscriptions.attach(outbound_tx);
        let resubscribe = {
            let subscriptions = Arc::clone(&self.subscriptions);
            tokio::spawn(async move { subscriptions.resubscribe().await })
        };

        let heartbeat_every = self.config.heartbeat_interval.max(Duration::from_millis(10));
        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        let mut last_alive = Instant::now();

        let end = loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) => {
                            break SessionEnd::Closed("server closed the connection".to_string());
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_alive = Instant::now();
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_alive = Instant::now();
                        }
                        Some(Ok(message)) => {
                            last_alive = Instant::now();
                            if let Some(reply) = self.handle_message(&message) {
                                match reply.encode() {
                                    Ok(text) => {
                                        if let Err(e) = write.send(Message::Text(text)).await {
                                            break SessionEnd::Closed(format!("write error: {}", e));
                                        }
                                    }
                                    Err(e) => warn!("Failed to encode reply: {}", e),
                                }
                            }
                        }
                        Some(Err(e)) => {
                            break SessionEnd::Closed(format!("read error: {}", e));
                        }
                        None => {
                            break SessionEnd::Closed("stream ended".to_string());
                        }
                    }
                }
                Some(frame) = outbound_rx.recv() => {
                    match frame.encode() {
                        Ok(text) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                break SessionEnd::Closed(format!("write error: {}", e));
                            }
                        }
                        Err(e) => warn!("Failed to encode {:?}: {}", frame, e),
                    }
                }
                _ = heartbeat.tick() => {
                    if last_alive.elapsed() > self.config.pong_timeout {
                        break SessionEnd::Closed(format!(
                            "no traffic for {:?}, assuming dead connection",
                            last_alive.elapsed()
                        ));
                    }
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        break SessionEnd::Closed(format!("heartbeat failed: {}", e));
                    }
                }
                _ = wait_for_shutdown(shutdown) => {
                    let _ = write.send(Message::Close(None)).await;
                    break SessionEnd::Shutdown;
                }
            }
        };

        resubscribe.abort();
        self.subscriptions.detach();
        Ok(end)
    }

    /// Decode and dispatch one message. Returns a reply to send, if any.
    pub fn handle_message(&self, message: &Message) -> Option<OutboundFrame> {
        self.stats.frames.fetch_add(1, Ordering::Relaxed);

        let frame = match decode_message(message) {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping malformed frame: {}", e);
                return None;
            }
        };

        match frame {
            InboundFrame::Ping(ts) => Some(OutboundFrame::Pong { pong: ts }),
            InboundFrame::Kline(update) => {
                self.route(update);
                None
            }
            InboundFrame::SubAck { id, channel } => {
                self.subscriptions.handle_ack(id.as_deref(), &channel);
                None
            }
            InboundFrame::Error { id, code, message } => {
                self.subscriptions
                    .handle_error(id.as_deref(), &code, &message);
                None
            }
            InboundFrame::Other => None,
        }
    }

    fn route(&self, update: KlineUpdate) {
        let Some(sender) = self.handlers.get(&update.channel).map(|s| s.clone()) else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("No handler for {}, dropping update", update.channel);
            return;
        };

        match sender.try_send(update) {
            Ok(()) => {
                self.stats.klines.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(update)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Worker queue for {} full, dropping update", update.symbol);
            }
            Err(mpsc::error::TrySendError::Closed(update)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Worker for {} has stopped, removing handler", update.symbol);
                self.handlers.remove(&update.channel);
            }
        }
    }
}
