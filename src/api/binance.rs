use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::auth::sign_query;
use super::stream::BinanceKlineStream;
use super::{ExchangeGateway, KlineStream};
use crate::config::ExchangeSettings;
use crate::error::{GatewayError, StreamError};
use crate::models::{
    Candle, OrderAck, OrderSide, OrderStatus, PositionInfo, SymbolPrecision, TriggerKind,
};

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 200;
const REQUEST_TIMEOUT_SECS: u64 = 10;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance USD-M futures REST client
///
/// Cloneable; clones share the HTTP connection pool and the rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    ws_url: String,
    api_secret: String,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
}

// --- Response payloads ---

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    price_precision: u32,
    quantity_precision: u32,
}

// [openTime, open, high, low, close, volume, closeTime, quoteVolume, trades,
//  takerBuyBase, takerBuyQuote, ignore]
#[derive(Debug, Deserialize)]
struct RawKline(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
    String,
    String,
    String,
);

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    status: OrderStatus,
    #[serde(default)]
    avg_price: Option<String>,
    #[serde(default)]
    executed_qty: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: String,
    entry_price: String,
    mark_price: String,
    un_realized_profit: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

fn parse_field(field: &str, value: &str) -> Result<f64, GatewayError> {
    value
        .parse::<f64>()
        .map_err(|e| GatewayError::InvalidData(format!("{} '{}': {}", field, value, e)))
}

impl OrderResponse {
    fn into_ack(self) -> Result<OrderAck, GatewayError> {
        let avg_price = match self.avg_price.as_deref() {
            Some(v) => Some(parse_field("avgPrice", v)?),
            None => None,
        };
        let executed_qty = match self.executed_qty.as_deref() {
            Some(v) => parse_field("executedQty", v)?,
            None => 0.0,
        };

        Ok(OrderAck {
            order_id: self.order_id,
            status: self.status,
            avg_price,
            executed_qty,
        })
    }
}

impl BinanceClient {
    /// Build a client for the configured environment
    pub fn new(settings: &ExchangeSettings) -> Result<Self, GatewayError> {
        Self::with_urls(
            &settings.rest_url(),
            &settings.ws_url(),
            &settings.api_key,
            &settings.api_secret,
            settings.requests_per_minute,
            settings.recv_window_ms,
        )
    }

    pub fn with_urls(
        rest_url: &str,
        ws_url: &str,
        api_key: &str,
        api_secret: &str,
        requests_per_minute: u32,
        recv_window_ms: u64,
    ) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        if !api_key.is_empty() {
            let value = HeaderValue::from_str(api_key)
                .map_err(|e| GatewayError::InvalidData(format!("API key: {}", e)))?;
            headers.insert("X-MBX-APIKEY", value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: rest_url.trim_end_matches('/').to_string(),
            ws_url: ws_url.trim_end_matches('/').to_string(),
            api_secret: api_secret.to_string(),
            recv_window_ms,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Url-encoded query with recvWindow, timestamp and signature appended
    fn signed_query(&self, params: &[(&str, String)]) -> Result<String, GatewayError> {
        let mut pairs: Vec<(&str, String)> = params.to_vec();
        pairs.push(("recvWindow", self.recv_window_ms.to_string()));
        pairs.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query = serde_urlencoded::to_string(&pairs)
            .map_err(|e| GatewayError::InvalidData(e.to_string()))?;
        let signature = sign_query(&self.api_secret, &query);

        Ok(format!("{}&signature={}", query, signature))
    }

    fn public_request(&self, path: &str, params: &[(&str, String)]) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .query(params)
    }

    fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<RequestBuilder, GatewayError> {
        let query = self.signed_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        Ok(self.client.request(method, url))
    }

    /// Send an idempotent request, retrying on 429, 5xx and network errors
    ///
    /// The builder closure runs once per attempt so signed requests get a
    /// fresh timestamp.
    async fn send_with_retry<F>(&self, build: F) -> Result<Response, GatewayError>
    where
        F: Fn() -> Result<RequestBuilder, GatewayError>,
    {
        let mut last_error = String::new();

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match build()?.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        last_error = format!("HTTP {}", status);
                    } else {
                        return Ok(response);
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < MAX_RETRIES {
                let backoff = Duration::from_millis(RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1));
                tracing::warn!(
                    attempt,
                    max_retries = MAX_RETRIES,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %last_error,
                    "Binance request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }

        Err(GatewayError::RetriesExhausted {
            attempts: MAX_RETRIES,
            last: last_error,
        })
    }

    /// Send a non-idempotent request exactly once
    async fn send_once(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        self.rate_limiter.until_ready().await;
        Ok(request.send().await?)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return serde_json::from_str::<T>(&text)
                .map_err(|e| GatewayError::Decode(format!("{} (body: {})", e, text)));
        }

        match serde_json::from_str::<ApiErrorBody>(&text) {
            Ok(body) => Err(GatewayError::Api {
                code: body.code,
                msg: body.msg,
            }),
            Err(_) => Err(GatewayError::Api {
                code: status.as_u16() as i64,
                msg: text,
            }),
        }
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let response = self
            .send_with_retry(|| Ok(self.public_request(path, params)))
            .await?;
        Self::decode(response).await
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let response = self
            .send_with_retry(|| self.signed_request(Method::GET, path, params))
            .await?;
        Self::decode(response).await
    }

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let request = self.signed_request(method, path, params)?;
        let response = self.send_once(request).await?;
        Self::decode(response).await
    }

    async fn place_order(&self, params: &[(&str, String)]) -> Result<OrderAck, GatewayError> {
        let response: OrderResponse = self
            .send_signed(Method::POST, "/fapi/v1/order", params)
            .await?;
        response.into_ack()
    }
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    async fn symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, GatewayError> {
        let info: ExchangeInfo = self.get_public("/fapi/v1/exchangeInfo", &[]).await?;

        info.symbols
            .into_iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(symbol))
            .map(|s| SymbolPrecision {
                quantity_decimals: s.quantity_precision,
                price_decimals: s.price_precision,
            })
            .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        let _: serde_json::Value = self
            .send_signed(Method::POST, "/fapi/v1/leverage", &params)
            .await?;

        tracing::info!(symbol, leverage, "Leverage set");
        Ok(())
    }

    async fn historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        let raw: Vec<RawKline> = self.get_public("/fapi/v1/klines", &params).await?;
        let now = Utc::now();

        raw.into_iter()
            .map(|k| {
                let open_time = Utc.timestamp_millis_opt(k.0).single().ok_or_else(|| {
                    GatewayError::InvalidData(format!("Invalid open_time: {}", k.0))
                })?;
                let close_time = Utc.timestamp_millis_opt(k.6).single().ok_or_else(|| {
                    GatewayError::InvalidData(format!("Invalid close_time: {}", k.6))
                })?;

                Ok(Candle {
                    open_time,
                    open: parse_field("open", &k.1)?,
                    high: parse_field("high", &k.2)?,
                    low: parse_field("low", &k.3)?,
                    close: parse_field("close", &k.4)?,
                    volume: parse_field("volume", &k.5)?,
                    close_time,
                    closed: close_time < now,
                })
            })
            .collect()
    }

    async fn market_price(&self, symbol: &str) -> Result<f64, GatewayError> {
        let ticker: TickerPrice = self
            .get_public("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        parse_field("price", &ticker.price)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderAck, GatewayError> {
        let ack = self
            .place_order(&[
                ("symbol", symbol.to_string()),
                ("side", side.as_str().to_string()),
                ("type", "MARKET".to_string()),
                ("quantity", quantity.to_string()),
                ("newOrderRespType", "RESULT".to_string()),
            ])
            .await?;

        tracing::info!(symbol, side = side.as_str(), quantity, order_id = ack.order_id, status = ?ack.status, "Market order placed");
        Ok(ack)
    }

    async fn place_close_position_order(
        &self,
        symbol: &str,
        side: OrderSide,
        kind: TriggerKind,
        stop_price: f64,
    ) -> Result<OrderAck, GatewayError> {
        let ack = self
            .place_order(&[
                ("symbol", symbol.to_string()),
                ("side", side.as_str().to_string()),
                ("type", kind.order_type().to_string()),
                ("stopPrice", stop_price.to_string()),
                ("closePosition", "true".to_string()),
            ])
            .await?;

        tracing::info!(symbol, order_type = kind.order_type(), stop_price, order_id = ack.order_id, "Close-position order placed");
        Ok(ack)
    }

    async fn place_reduce_only_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderAck, GatewayError> {
        let ack = self
            .place_order(&[
                ("symbol", symbol.to_string()),
                ("side", side.as_str().to_string()),
                ("type", "MARKET".to_string()),
                ("quantity", quantity.to_string()),
                ("reduceOnly", "true".to_string()),
                ("newOrderRespType", "RESULT".to_string()),
            ])
            .await?;

        tracing::info!(symbol, side = side.as_str(), quantity, order_id = ack.order_id, "Reduce-only market order placed");
        Ok(ack)
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .send_signed(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                &[("symbol", symbol.to_string())],
            )
            .await?;

        tracing::info!(symbol, "All open orders cancelled");
        Ok(())
    }

    async fn open_positions(&self, symbol: &str) -> Result<Vec<PositionInfo>, GatewayError> {
        let risks: Vec<PositionRisk> = self
            .get_signed("/fapi/v2/positionRisk", &[("symbol", symbol.to_string())])
            .await?;

        let mut positions = Vec::new();
        for risk in risks {
            let info = PositionInfo {
                amount: parse_field("positionAmt", &risk.position_amt)?,
                entry_price: parse_field("entryPrice", &risk.entry_price)?,
                mark_price: parse_field("markPrice", &risk.mark_price)?,
                unrealized_pnl: parse_field("unRealizedProfit", &risk.un_realized_profit)?,
                symbol: risk.symbol,
            };
            if info.is_open() {
                positions.push(info);
            }
        }

        Ok(positions)
    }

    async fn subscribe_klines(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Box<dyn KlineStream>, StreamError> {
        let stream = BinanceKlineStream::connect(&self.ws_url, symbol, interval).await?;
        Ok(Box::new(stream))
    }

    async fn close(&self) {
        // Pooled HTTP connections are dropped with the client; nothing to flush
        tracing::debug!(base_url = %self.base_url, "Binance gateway released");
    }
}
