// Exchange gateway: REST operations plus the kline stream
pub mod auth;
pub mod binance;
pub mod stream;

pub use binance::BinanceClient;
pub use stream::{parse_kline_event, BinanceKlineStream, KlineEvent};

use async_trait::async_trait;

use crate::error::{GatewayError, StreamError};
use crate::models::{Candle, OrderAck, OrderSide, PositionInfo, SymbolPrecision, TriggerKind};

/// Everything the session needs from the exchange
///
/// Implementations must be cheap to share across tasks; the session holds an
/// `Arc<dyn ExchangeGateway>`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Quantity / price decimals for a symbol
    async fn symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, GatewayError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError>;

    /// Most recent `limit` candles, oldest first; the last one may still be open
    async fn historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError>;

    /// Latest traded price
    async fn market_price(&self, symbol: &str) -> Result<f64, GatewayError>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderAck, GatewayError>;

    /// Trigger order that closes the whole position when `stop_price` is hit
    async fn place_close_position_order(
        &self,
        symbol: &str,
        side: OrderSide,
        kind: TriggerKind,
        stop_price: f64,
    ) -> Result<OrderAck, GatewayError>;

    async fn place_reduce_only_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderAck, GatewayError>;

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<(), GatewayError>;

    /// Positions with a non-zero amount for `symbol`
    async fn open_positions(&self, symbol: &str) -> Result<Vec<PositionInfo>, GatewayError>;

    /// Open the closed-candle stream for a symbol
    async fn subscribe_klines(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Box<dyn KlineStream>, StreamError>;

    /// Release connections held for the session
    async fn close(&self);
}

/// Raw message source behind a kline subscription
#[async_trait]
pub trait KlineStream: Send {
    /// Next text frame; `Err(StreamError::Closed)` once the remote hangs up
    async fn next_message(&mut self) -> Result<String, StreamError>;

    async fn close(&mut self);
}
