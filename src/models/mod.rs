use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OHLCV candlestick (kline)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
    pub closed: bool, // interval finished, values final
}

/// Directional call from the strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Long,
    Short,
    None,
}

impl Signal {
    /// Position side this signal asks for, if any
    pub fn side(self) -> Option<PositionSide> {
        match self {
            Signal::Long => Some(PositionSide::Long),
            Signal::Short => Some(PositionSide::Short),
            Signal::None => None,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Long => write!(f, "LONG"),
            Signal::Short => write!(f, "SHORT"),
            Signal::None => write!(f, "NONE"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that opens this position
    pub fn entry_side(self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes this position
    pub fn exit_side(self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }

    /// +1 for long, -1 for short
    pub fn direction(self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Kind of close-position trigger order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    TakeProfit,
    Stop,
}

impl TriggerKind {
    pub fn order_type(self) -> &'static str {
        match self {
            TriggerKind::TakeProfit => "TAKE_PROFIT_MARKET",
            TriggerKind::Stop => "STOP_MARKET",
        }
    }
}

/// Decimal places the exchange accepts for a symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymbolPrecision {
    pub quantity_decimals: u32,
    pub price_decimals: u32,
}

impl SymbolPrecision {
    /// Round a price to the nearest tick
    pub fn round_price(&self, price: f64) -> f64 {
        let factor = 10f64.powi(self.price_decimals as i32);
        (price * factor).round() / factor
    }

    /// Truncate a quantity so the order never exceeds the sized notional
    pub fn floor_quantity(&self, quantity: f64) -> f64 {
        let factor = 10f64.powi(self.quantity_decimals as i32);
        // Nudge before flooring so 0.3 / 0.1 style float noise doesn't lose a step
        ((quantity * factor) + 1e-9).floor() / factor
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    #[serde(other)]
    Unknown,
}

/// Exchange acknowledgement of an order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: i64,
    pub status: OrderStatus,
    pub avg_price: Option<f64>,
    pub executed_qty: f64,
}

impl OrderAck {
    /// Fill price if the exchange already reported a fill
    pub fn fill_price(&self) -> Option<f64> {
        match self.status {
            OrderStatus::Filled => self.avg_price.filter(|p| *p > 0.0),
            _ => None,
        }
    }
}

/// Exchange-side view of an open position
#[derive(Debug, Clone, PartialEq)]
pub struct PositionInfo {
    pub symbol: String,
    pub amount: f64, // signed: positive long, negative short
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
}

impl PositionInfo {
    pub fn is_open(&self) -> bool {
        self.amount != 0.0
    }

    pub fn side(&self) -> PositionSide {
        if self.amount < 0.0 {
            PositionSide::Short
        } else {
            PositionSide::Long
        }
    }
}

/// Locally tracked position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub opened_at: DateTime<Utc>,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub extreme_price: f64, // best price seen while trailing
    pub trailing_active: bool,
}

impl Position {
    pub fn new(symbol: &str, side: PositionSide, entry_price: f64, quantity: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            entry_price,
            quantity,
            opened_at: Utc::now(),
            take_profit: None,
            stop_loss: None,
            extreme_price: entry_price,
            trailing_active: false,
        }
    }

    /// Unrealized P&L at `price` (quote currency, before fees)
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.side.direction()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    TrailingStop,
    BracketFilled, // static TP/SL filled on the exchange
    Flattened,     // emergency close of an unbracketed entry
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::TrailingStop => "TrailingStop",
            ExitReason::BracketFilled => "BracketFilled",
            ExitReason::Flattened => "Flattened",
        }
    }
}

/// Completed trade, written to the journal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub exit_reason: ExitReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn from_position(position: &Position, exit_price: f64, exit_reason: ExitReason) -> Self {
        Self {
            id: position.id,
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            pnl: position.pnl_at(exit_price),
            exit_reason,
            opened_at: position.opened_at,
            closed_at: Utc::now(),
        }
    }
}
