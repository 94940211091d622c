//! Huobi market WebSocket frames.
//!
//! Server frames arrive gzip-compressed as binary messages. Client frames are
//! plain JSON text.

use crate::error::{AppError, Result};
use crate::types::Candle;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::io::Read;
use tokio_tungstenite::tungstenite::Message;

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Subscribe { sub: String, id: String },
    Unsubscribe { unsub: String, id: String },
    Pong { pong: u64 },
}

impl OutboundFrame {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Channel named by a subscribe or unsubscribe frame.
    pub fn channel(&self) -> Option<&str> {
        match self {
            OutboundFrame::Subscribe { sub, .. } => Some(sub),
            OutboundFrame::Unsubscribe { unsub, .. } => Some(unsub),
            OutboundFrame::Pong { .. } => None,
        }
    }
}

/// A kline update routed by its channel.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineUpdate {
    pub channel: String,
    pub symbol: String,
    pub period: String,
    pub candle: Candle,
}

/// Decoded server frames.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Server liveness check; must be answered with the same timestamp.
    Ping(u64),
    Kline(KlineUpdate),
    SubAck { id: Option<String>, channel: String },
    Error {
        id: Option<String>,
        code: String,
        message: String,
    },
    /// Well-formed but of no interest (unsub acks, other data channels).
    Other,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    ping: Option<u64>,
    ch: Option<String>,
    tick: Option<serde_json::Value>,
    id: Option<serde_json::Value>,
    status: Option<String>,
    subbed: Option<String>,
    #[serde(rename = "err-code")]
    err_code: Option<String>,
    #[serde(rename = "err-msg")]
    err_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTick {
    id: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    vol: f64,
}

/// `market.{symbol}.kline.{period}`
pub fn kline_channel(symbol: &str, period: &str) -> String {
    format!("market.{}.kline.{}", symbol.to_lowercase(), period)
}

/// Split a kline channel into `(symbol, period)`.
pub fn parse_kline_channel(channel: &str) -> Option<(&str, &str)> {
    let mut parts = channel.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("market"), Some(symbol), Some("kline"), Some(period), None)
            if !symbol.is_empty() && !period.is_empty() =>
        {
            Some((symbol, period))
        }
        _ => None,
    }
}

/// Whether an exchange error reports request throttling.
pub fn is_rate_limit(code: &str, message: &str) -> bool {
    let text = format!("{} {}", code, message).to_lowercase();
    text.contains("limit") || text.contains("too-many") || text.contains("too many")
}

/// Gunzip a binary payload.
pub fn decompress(payload: &[u8]) -> Result<String> {
    let mut decoder = GzDecoder::new(payload);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|e| AppError::Protocol(format!("gzip decode failed: {}", e)))?;
    Ok(text)
}

/// Decode a WebSocket message. `Ok(None)` for control messages.
pub fn decode_message(message: &Message) -> Result<Option<InboundFrame>> {
    match message {
        Message::Binary(bytes) => decode_text(&decompress(bytes)?).map(Some),
        Message::Text(text) => decode_text(text).map(Some),
        _ => Ok(None),
    }
}

/// Decode a JSON frame.
pub fn decode_text(text: &str) -> Result<InboundFrame> {
    let raw: RawFrame = serde_json::from_str(text)
        .map_err(|e| AppError::Protocol(format!("invalid frame: {}", e)))?;

    if let Some(ts) = raw.ping {
        return Ok(InboundFrame::Ping(ts));
    }

    let id = raw.id.as_ref().and_then(id_string);

    if raw.status.as_deref() == Some("error") {
        return Ok(InboundFrame::Error {
            id,
            code: raw.err_code.unwrap_or_default(),
            message: raw.err_msg.unwrap_or_default(),
        });
    }

    if let Some(channel) = raw.subbed {
        return Ok(InboundFrame::SubAck { id, channel });
    }

    match (raw.ch, raw.tick) {
        (Some(channel), Some(tick)) => {
            let Some((symbol, period)) = parse_kline_channel(&channel) else {
                return Ok(InboundFrame::Other);
            };
            let tick: RawTick = serde_json::from_value(tick)
                .map_err(|e| AppError::Protocol(format!("invalid tick on {}: {}", channel, e)))?;
            let candle = Candle::new(tick.id, tick.open, tick.high, tick.low, tick.close, tick.vol);
            if !candle_is_sane(&candle) {
                return Err(AppError::Protocol(format!(
                    "implausible candle on {}: {:?}",
                    channel, candle
                )));
            }
            Ok(InboundFrame::Kline(KlineUpdate {
                symbol: symbol.to_string(),
                period: period.to_string(),
                channel,
                candle,
            }))
        }
        (Some(channel), None) => Err(AppError::Protocol(format!(
            "data frame without tick on {}",
            channel
        ))),
        _ => Ok(InboundFrame::Other),
    }
}

fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn candle_is_sane(candle: &Candle) -> bool {
    let values = [candle.open, candle.high, candle.low, candle.close, candle.volume];
    values.iter().all(|v| v.is_finite())
        && candle.volume >= 0.0
        && candle.low <= candle.high
        && candle.low > 0.0
}
