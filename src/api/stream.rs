use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::KlineStream;
use crate::error::StreamError;
use crate::models::Candle;

/// Kline update for one symbol/interval
#[derive(Debug, Clone, PartialEq)]
pub struct KlineEvent {
    pub symbol: String,
    pub interval: String,
    pub candle: Candle,
}

impl KlineEvent {
    pub fn is_closed(&self) -> bool {
        self.candle.closed
    }
}

// --- Wire format (`<symbol>@kline_<interval>`) ---

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    // Combined-stream endpoints wrap the payload
    Combined { data: WsKlineEvent },
    Raw(WsKlineEvent),
}

#[derive(Debug, Deserialize)]
struct WsKlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKline,
}

#[derive(Debug, Deserialize)]
struct WsKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

fn parse_number(field: &str, value: &str) -> Result<f64, StreamError> {
    value
        .parse::<f64>()
        .map_err(|e| StreamError::Parse(format!("{} '{}': {}", field, value, e)))
}

fn parse_millis(field: &str, millis: i64) -> Result<DateTime<Utc>, StreamError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StreamError::Parse(format!("{} out of range: {}", field, millis)))
}

/// Parse one text frame from a kline stream
pub fn parse_kline_event(text: &str) -> Result<KlineEvent, StreamError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| StreamError::Parse(e.to_string()))?;
    let event = match envelope {
        Envelope::Combined { data } => data,
        Envelope::Raw(event) => event,
    };

    if event.event_type != "kline" {
        return Err(StreamError::Parse(format!(
            "unexpected event type '{}'",
            event.event_type
        )));
    }

    let k = event.kline;
    let candle = Candle {
        open_time: parse_millis("open_time", k.open_time)?,
        open: parse_number("open", &k.open)?,
        high: parse_number("high", &k.high)?,
        low: parse_number("low", &k.low)?,
        close: parse_number("close", &k.close)?,
        volume: parse_number("volume", &k.volume)?,
        close_time: parse_millis("close_time", k.close_time)?,
        closed: k.is_closed,
    };

    Ok(KlineEvent {
        symbol: event.symbol,
        interval: k.interval,
        candle,
    })
}

/// Binance kline subscription over a single raw-stream WebSocket
pub struct BinanceKlineStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl BinanceKlineStream {
    /// Connect to `<ws_url>/ws/<symbol>@kline_<interval>`
    pub async fn connect(ws_url: &str, symbol: &str, interval: &str) -> Result<Self, StreamError> {
        let url = stream_url(ws_url, symbol, interval);
        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| StreamError::Connect(format!("{}: {}", url, e)))?;

        tracing::info!(url = %url, "Kline stream connected");

        Ok(Self { socket })
    }
}

pub(crate) fn stream_url(ws_url: &str, symbol: &str, interval: &str) -> String {
    format!(
        "{}/ws/{}@kline_{}",
        ws_url.trim_end_matches('/'),
        symbol.to_lowercase(),
        interval
    )
}

#[async_trait]
impl KlineStream for BinanceKlineStream {
    async fn next_message(&mut self) -> Result<String, StreamError> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes)
                        .map_err(|e| StreamError::Parse(e.to_string()));
                }
                // tungstenite queues the pong reply itself
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    tracing::warn!(?frame, "Kline stream closed by server");
                    return Err(StreamError::Closed);
                }
                Some(Err(e)) => return Err(StreamError::Transport(e)),
                None => return Err(StreamError::Closed),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            tracing::debug!(error = %e, "Kline stream close handshake failed");
        }
    }
}
