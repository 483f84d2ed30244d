use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::OrderAck;

/// Errors returned by the exchange gateway (REST side)
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Exchange rejected request (code {code}): {msg}")]
    Api { code: i64, msg: String },

    #[error("Failed to decode exchange response: {0}")]
    Decode(String),

    #[error("Invalid data from exchange: {0}")]
    InvalidData(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Errors that end (or prevent) the market data stream
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("No message received for {0:?}")]
    IdleTimeout(Duration),

    #[error("Stream closed by remote")]
    Closed,

    #[error("Failed to connect stream: {0}")]
    Connect(String),

    #[error("WebSocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Malformed stream message: {0}")]
    Parse(String),
}

/// Rejected candle window push
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Candle closing at {got} does not follow last candle closing at {last}")]
pub struct InvalidCandleError {
    pub last: DateTime<Utc>,
    pub got: DateTime<Utc>,
}

/// Which leg of a bracket failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketStage {
    TakeProfit,
    StopLoss,
}

impl std::fmt::Display for BracketStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BracketStage::TakeProfit => write!(f, "take-profit"),
            BracketStage::StopLoss => write!(f, "stop-loss"),
        }
    }
}

/// Orders of a bracket that were acknowledged before a failure
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BracketProgress {
    pub entry: Option<OrderAck>,
    pub take_profit: Option<OrderAck>,
    pub stop_loss: Option<OrderAck>,
}

impl BracketProgress {
    pub fn entry_placed(&self) -> bool {
        self.entry.is_some()
    }

    pub fn take_profit_placed(&self) -> bool {
        self.take_profit.is_some()
    }

    pub fn stop_loss_placed(&self) -> bool {
        self.stop_loss.is_some()
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Entry was never accepted, nothing to roll back
    #[error("Entry order rejected: {0}")]
    EntryRejected(#[source] GatewayError),

    #[error("Quantity {raw} rounds to zero at {decimals} decimals")]
    InvalidQuantity { raw: f64, decimals: u32 },

    /// Entry was placed but the bracket is incomplete. The entry may have
    /// filled, so the caller has to verify the exchange position.
    #[error(
        "Entry placed but {stage} order failed (rollback {}): {source}",
        rollback_label(.rollback_error)
    )]
    Unbracketed {
        stage: BracketStage,
        progress: BracketProgress,
        #[source]
        source: GatewayError,
        rollback_error: Option<GatewayError>,
    },
}

fn rollback_label(rollback_error: &Option<GatewayError>) -> &'static str {
    if rollback_error.is_some() {
        "failed"
    } else {
        "ok"
    }
}

impl ExecutionError {
    pub fn is_unbracketed(&self) -> bool {
        matches!(self, ExecutionError::Unbracketed { .. })
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Failed to fetch symbol precision: {0}")]
    Precision(#[source] GatewayError),

    #[error("Failed to set leverage: {0}")]
    Leverage(#[source] GatewayError),

    #[error("Failed to fetch candle history: {0}")]
    History(#[source] GatewayError),

    #[error("Exchange returned no closed candles for warm-up")]
    EmptyHistory,

    #[error("Failed to open market stream: {0}")]
    Stream(#[source] StreamError),

    #[error("Start cancelled by stop request")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session for {0} is already running")]
    AlreadyRunning(String),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("Failed to create exchange gateway: {0}")]
    Gateway(#[source] GatewayError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
