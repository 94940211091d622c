use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Symbols tracked when `SYMBOLS` is not set.
pub const DEFAULT_SYMBOLS: &[&str] = &[
    "btcusdt", "ethusdt", "solusdt", "xrpusdt", "dogeusdt", "adausdt", "avaxusdt", "dotusdt",
    "linkusdt", "ltcusdt", "trxusdt", "atomusdt", "uniusdt", "nearusdt", "aptusdt",
];

/// Indicator periods, thresholds and the risk policy for signal detection.
#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub rsi_period: usize,
    /// RSI below this is oversold (long candidate).
    pub oversold: f64,
    /// RSI above this is overbought (short candidate).
    pub overbought: f64,
    pub ema_fast_period: usize,
    pub ema_slow_period: usize,
    pub volume_ma_period: usize,
    /// Minimum current volume / volume MA.
    pub volume_threshold: f64,
    /// Minimum time between two signals on the same symbol.
    pub cooldown: Duration,
    /// Half-width of the entry zone as a fraction of price.
    pub spread_fraction: f64,
    pub stop_loss_fraction: f64,
    /// Reward fractions for the three targets, increasing.
    pub target_fractions: [f64; 3],
    /// Active signals older than this are closed at market.
    pub signal_ttl: Duration,
    /// How many trailing RSI values are kept in the indicator state.
    pub rsi_history: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            oversold: 30.0,
            overbought: 70.0,
            ema_fast_period: 9,
            ema_slow_period: 21,
            volume_ma_period: 20,
            volume_threshold: 1.5,
            cooldown: Duration::from_secs(3600),
            spread_fraction: 0.002,
            stop_loss_fraction: 0.02,
            target_fractions: [0.02, 0.04, 0.06],
            signal_ttl: Duration::from_secs(24 * 3600),
            rsi_history: 5,
        }
    }
}

impl SignalConfig {
    /// Maximum number of candles retained per symbol.
    pub fn window_capacity(&self) -> usize {
        (3 * self.ema_slow_period)
            .max(3 * self.rsi_period)
            .max(3 * self.volume_ma_period)
            .max(100)
    }

    /// Minimum candles before the core indicators are ready.
    pub fn min_candles(&self) -> usize {
        (self.rsi_period + 1)
            .max(self.ema_fast_period)
            .max(self.ema_slow_period)
            .max(self.volume_ma_period)
    }
}

/// Streaming feed and backfill settings.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub ws_url: String,
    pub rest_url: String,
    /// Kline period, e.g. "1min", "5min", "60min".
    pub period: String,
    /// Symbols per subscription batch.
    pub batch_size: usize,
    /// Pause between subscription batches.
    pub batch_delay: Duration,
    pub heartbeat_interval: Duration,
    /// Connection is dropped if nothing proves liveness for this long.
    pub pong_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub backoff_factor: f64,
    pub max_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub rate_limit_retry_delay: Duration,
    /// Candles requested per symbol at startup.
    pub backfill_size: usize,
    /// Capacity of each per-symbol worker queue.
    pub worker_queue: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://api.huobi.pro/ws".to_string(),
            rest_url: "https://api.huobi.pro".to_string(),
            period: "1min".to_string(),
            batch_size: 5,
            batch_delay: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(60),
            reconnect_base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_reconnect_delay: Duration::from_secs(60),
            max_reconnect_attempts: 10,
            rate_limit_retry_delay: Duration::from_secs(5),
            backfill_size: 300,
            worker_queue: 256,
        }
    }
}

/// Which backend holds the durable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Json,
    Sqlite,
}

impl StorageBackend {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" | "file" => Some(Self::Json),
            "sqlite" | "db" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Durable state configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    /// Signal history keeps at most this many entries.
    pub history_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            data_dir: PathBuf::from(".sigwatch"),
            history_limit: 1000,
        }
    }
}

/// Outbound notification channel.
#[derive(Debug, Clone, Default)]
pub struct NotifierConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl NotifierConfig {
    pub fn telegram_enabled(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Lowercase exchange pairs, e.g. "btcusdt".
    pub symbols: Vec<String>,
    pub signal: SignalConfig,
    pub feed: FeedConfig,
    pub storage: StorageConfig,
    pub notifier: NotifierConfig,
    /// Interval between track-record stats log lines.
    pub stats_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            signal: SignalConfig::default(),
            feed: FeedConfig::default(),
            storage: StorageConfig::default(),
            notifier: NotifierConfig::default(),
            stats_interval: Duration::from_secs(300),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|s| *s >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a comma-separated symbol list, lowercased and deduplicated in order.
pub fn parse_symbols(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in raw.split(',') {
        let s = s.trim().to_lowercase();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

/// Parse "0.02,0.04,0.06" into three increasing fractions.
pub fn parse_targets(raw: &str) -> Option<[f64; 3]> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    if parts.len() != 3 || parts.iter().any(|p| *p <= 0.0) {
        return None;
    }
    if !(parts[0] < parts[1] && parts[1] < parts[2]) {
        return None;
    }
    Some([parts[0], parts[1], parts[2]])
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let sd = defaults.signal;
        let fd = defaults.feed;
        let sto = defaults.storage;

        let symbols = env::var("SYMBOLS")
            .ok()
            .map(|s| parse_symbols(&s))
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.symbols);

        let signal = SignalConfig {
            rsi_period: env_or("RSI_PERIOD", sd.rsi_period),
            oversold: env_or("RSI_OVERSOLD", sd.oversold),
            overbought: env_or("RSI_OVERBOUGHT", sd.overbought),
            ema_fast_period: env_or("EMA_FAST_PERIOD", sd.ema_fast_period),
            ema_slow_period: env_or("EMA_SLOW_PERIOD", sd.ema_slow_period),
            volume_ma_period: env_or("VOLUME_MA_PERIOD", sd.volume_ma_period),
            volume_threshold: env_or("VOLUME_THRESHOLD", sd.volume_threshold),
            cooldown: env_secs("SIGNAL_COOLDOWN_SECS", sd.cooldown),
            spread_fraction: env_or("ENTRY_SPREAD_FRACTION", sd.spread_fraction),
            stop_loss_fraction: env_or("STOP_LOSS_FRACTION", sd.stop_loss_fraction),
            target_fractions: env::var("TARGET_FRACTIONS")
                .ok()
                .and_then(|v| parse_targets(&v))
                .unwrap_or(sd.target_fractions),
            signal_ttl: env_secs("SIGNAL_TTL_SECS", sd.signal_ttl),
            rsi_history: env_or("RSI_HISTORY", sd.rsi_history),
        };

        let feed = FeedConfig {
            ws_url: env_string("FEED_WS_URL").unwrap_or(fd.ws_url),
            rest_url: env_string("FEED_REST_URL").unwrap_or(fd.rest_url),
            period: env_string("KLINE_PERIOD").unwrap_or(fd.period),
            batch_size: env_or("SUBSCRIBE_BATCH_SIZE", fd.batch_size).max(1),
            batch_delay: env_secs("SUBSCRIBE_BATCH_DELAY_SECS", fd.batch_delay),
            heartbeat_interval: env_secs("HEARTBEAT_INTERVAL_SECS", fd.heartbeat_interval),
            pong_timeout: env_secs("PONG_TIMEOUT_SECS", fd.pong_timeout),
            reconnect_base_delay: env_secs("RECONNECT_BASE_DELAY_SECS", fd.reconnect_base_delay),
            backoff_factor: env_or("RECONNECT_BACKOFF_FACTOR", fd.backoff_factor),
            max_reconnect_delay: env_secs("RECONNECT_MAX_DELAY_SECS", fd.max_reconnect_delay),
            max_reconnect_attempts: env_or("MAX_RECONNECT_ATTEMPTS", fd.max_reconnect_attempts),
            rate_limit_retry_delay: env_secs("RATE_LIMIT_RETRY_SECS", fd.rate_limit_retry_delay),
            backfill_size: env_or("BACKFILL_SIZE", fd.backfill_size),
            worker_queue: env_or("WORKER_QUEUE", fd.worker_queue).max(1),
        };

        let storage = StorageConfig {
            backend: env::var("STORE_BACKEND")
                .ok()
                .and_then(|v| StorageBackend::from_str(&v))
                .unwrap_or(sto.backend),
            data_dir: env_string("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(sto.data_dir),
            history_limit: env_or("SIGNAL_HISTORY_LIMIT", sto.history_limit),
        };

        let notifier = NotifierConfig {
            telegram_bot_token: env_string("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env_string("TELEGRAM_CHAT_ID"),
        };

        Self {
            symbols,
            signal,
            feed,
            storage,
            notifier,
            stats_interval: env_secs("STATS_INTERVAL_SECS", defaults.stats_interval),
        }
    }
}
