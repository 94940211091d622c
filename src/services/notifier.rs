//! Alert delivery.
//!
//! Delivery is at most once. A failed send is logged and dropped.

use crate::config::NotifierConfig;
use crate::error::{body_snippet, AppError, Result};
use crate::types::{Signal, SignalType};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// An outbound text channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send_text(&self, text: &str) -> Result<()>;
}

/// Telegram Bot API `sendMessage`.
pub struct TelegramNotifier {
    client: Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self::with_api_url(TELEGRAM_API_URL, bot_token, chat_id)
    }

    pub fn with_api_url(api_url: &str, bot_token: String, chat_id: String) -> Self {
        let client = Client::builder()
            .user_agent("sigwatch/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token,
            chat_id,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
        };

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Notification(format!(
                "telegram returned {}: {}",
                status,
                body_snippet(&text, 200)
            )));
        }
        Ok(())
    }
}

/// Writes alerts to the log. Used when no channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        info!("Signal alert:\n{}", text);
        Ok(())
    }
}

/// Build the notifier selected by configuration.
pub fn notifier_from_config(config: &NotifierConfig) -> Arc<dyn Notifier> {
    match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat_id)) => {
            info!("Alerts will be delivered to Telegram chat {}", chat_id);
            Arc::new(TelegramNotifier::new(token.clone(), chat_id.clone()))
        }
        _ => {
            info!("No alert channel configured, alerts go to the log");
            Arc::new(LogNotifier)
        }
    }
}

/// Human-readable alert text (Telegram Markdown).
pub fn format_signal(signal: &Signal, extras: Option<&BTreeMap<String, f64>>) -> String {
    let header = match signal.signal_type {
        SignalType::Long => "🟢 *LONG*",
        SignalType::Short => "🔴 *SHORT*",
    };

    let mut text = format!(
        "{} {}\n\n\
         Entry: {} - {}\n\
         Stop loss: {}\n\
         Target 1: {}\n\
         Target 2: {}\n\
         Target 3: {}\n\
         Risk/Reward: {:.2}\n\n\
         Trend: {}\n\
         RSI: {:.1}\n\
         Volume: {:.2}x average",
        header,
        escape_markdown(&signal.symbol.to_uppercase()),
        format_price(signal.entry_low),
        format_price(signal.entry_high),
        format_price(signal.stop_loss),
        format_price(signal.targets[0]),
        format_price(signal.targets[1]),
        format_price(signal.targets[2]),
        signal.risk_reward_ratio,
        signal.trend.label(),
        signal.rsi_at_signal,
        signal.volume_ratio_at_signal,
    );

    if let Some(extras) = extras.filter(|e| !e.is_empty()) {
        text.push('\n');
        for (name, value) in extras {
            text.push_str(&format!("\n{}: {:.4}", extra_label(name), value));
        }
    }

    text.push_str(&format!(
        "\n\n`{}` {}",
        signal.id,
        signal.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    text
}

/// Display name for an indicator extra.
fn extra_label(id: &str) -> String {
    match id {
        "macd_histogram" => "MACD histogram".to_string(),
        "bollinger_percent_b" => "Bollinger %B".to_string(),
        "atr" => "ATR".to_string(),
        "williams_r" => "Williams %R".to_string(),
        "mfi" => "MFI".to_string(),
        other => escape_markdown(other),
    }
}

/// Escape the entity characters of Telegram's legacy Markdown.
fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Price with precision scaled to its magnitude.
fn format_price(price: f64) -> String {
    let abs = price.abs();
    if abs >= 1000.0 {
        format!("{:.2}", price)
    } else if abs >= 1.0 {
        format!("{:.4}", price)
    } else {
        format!("{:.8}", price)
    }
}

/// Formats signals and hands them to a [`Notifier`] off the calling task.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Arc::new(Self {
            notifier,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    /// Deliver in the background. The returned handle never yields an error.
    pub fn send(
        self: &Arc<Self>,
        signal: &Signal,
        extras: Option<&BTreeMap<String, f64>>,
    ) -> JoinHandle<()> {
        let text = format_signal(signal, extras);
        let id = signal.id.clone();
        let this = Arc::clone(self);
        tokio::spawn(async move { this.deliver(&id, &text).await })
    }

    /// Deliver and wait. Failures are logged, not returned.
    pub async fn deliver(&self, signal_id: &str, text: &str) {
        match self.notifier.send_text(text).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                debug!("Delivered signal {} via {}", signal_id, self.notifier.name());
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Failed to deliver signal {} via {}: {}",
                    signal_id,
                    self.notifier.name(),
                    e
                );
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
