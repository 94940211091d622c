use crate::error::{body_snippet, AppError, Result};
use crate::types::Candle;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Largest `size` the kline endpoint accepts.
const MAX_KLINE_SIZE: usize = 2000;

/// Huobi kline history response.
#[derive(Debug, Deserialize)]
struct KlineResponse {
    status: String,
    #[serde(rename = "err-msg")]
    err_msg: Option<String>,
    data: Option<Vec<HuobiKline>>,
}

#[derive(Debug, Deserialize)]
struct HuobiKline {
    id: i64,
    open: f64,
    close: f64,
    low: f64,
    high: f64,
    #[serde(default)]
    vol: f64,
}

/// Huobi REST client for historical candles.
#[derive(Clone)]
pub struct HuobiClient {
    client: Client,
    base_url: String,
}

impl HuobiClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .user_agent("sigwatch/0.1")
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch up to `size` candles for `symbol`, oldest first.
    pub async fn fetch_klines(&self, symbol: &str, period: &str, size: usize) -> Result<Vec<Candle>> {
        let url = format!("{}/market/history/kline", self.base_url);
        let size = size.clamp(1, MAX_KLINE_SIZE).to_string();
        let symbol = symbol.to_lowercase();

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol.as_str()), ("period", period), ("size", size.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!("Huobi API returned {}: {}", status, body_snippet(&text, 200));
            return Err(AppError::ExternalApi(format!("Huobi API error: {}", status)));
        }

        let body = response.text().await?;
        let candles = parse_klines(&body)?;
        debug!("Fetched {} {} candles for {}", candles.len(), period, symbol);
        Ok(candles)
    }
}

/// Validate a kline response and convert it to ascending candles.
pub fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    let data: KlineResponse = serde_json::from_str(body)?;

    if data.status != "ok" {
        return Err(AppError::ExternalApi(format!(
            "Huobi API error: {}",
            data.err_msg.unwrap_or(data.status)
        )));
    }

    let klines = match data.data {
        Some(k) if !k.is_empty() => k,
        _ => return Err(AppError::ExternalApi("Huobi returned no candles".to_string())),
    };

    let mut candles: Vec<Candle> = klines
        .into_iter()
        .map(|k| Candle::new(k.id, k.open, k.high, k.low, k.close, k.vol))
        .collect();
    // Newest first on the wire
    candles.sort_by_key(|c| c.time);
    candles.dedup_by_key(|c| c.time);
    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_klines_sorted_ascending() {
        let body = r#"{"status":"ok","ch":"market.btcusdt.kline.1min","ts":1,"data":[
            {"id":120,"open":3,"close":4,"low":2,"high":5,"amount":1,"vol":30,"count":1},
            {"id":60,"open":2,"close":3,"low":1,"high":4,"amount":1,"vol":20,"count":1},
            {"id":0,"open":1,"close":2,"low":1,"high":2,"amount":1,"vol":10,"count":1}
        ]}"#;
        let candles = parse_klines(body).unwrap();
        let times: Vec<i64> = candles.iter().map(|c| c.time).collect();
        assert_eq!(times, vec![0, 60, 120]);
        assert_eq!(candles[2].high, 5.0);
        assert_eq!(candles[2].volume, 30.0);
    }

    #[test]
    fn test_parse_klines_rejects_error_status() {
        let body = r#"{"status":"error","err-code":"invalid-parameter","err-msg":"invalid symbol"}"#;
        let err = parse_klines(body).unwrap_err();
        assert!(err.to_string().contains("invalid symbol"));
    }

    #[test]
    fn test_parse_klines_rejects_empty_data() {
        assert!(parse_klines(r#"{"status":"ok","data":[]}"#).is_err());
        assert!(parse_klines(r#"{"status":"ok"}"#).is_err());
        assert!(parse_klines("<html>").is_err());
    }

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(status: &'static str, body: String) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_fetch_klines_non_ascii_error_body() {
        // Log arguments are only formatted with a subscriber in place
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let url = serve_once("503 Service Unavailable", "€".repeat(100)).await;
        let client = HuobiClient::new(&url);

        let err = client.fetch_klines("btcusdt", "1min", 300).await.unwrap_err();
        assert!(matches!(err, AppError::ExternalApi(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_fetch_klines_ok() {
        let body = r#"{"status":"ok","data":[
            {"id":60,"open":2,"close":3,"low":1,"high":4,"vol":20},
            {"id":0,"open":1,"close":2,"low":1,"high":2,"vol":10}
        ]}"#;
        let url = serve_once("200 OK", body.to_string()).await;
        let client = HuobiClient::new(&url);

        let candles = client.fetch_klines("BTCUSDT", "1min", 2).await.unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time, 0);
        assert_eq!(candles[1].close, 3.0);
    }
}
