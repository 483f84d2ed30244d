#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{mpsc, watch};

use futuresbot::api::{ExchangeGateway, KlineStream};
use futuresbot::config::{StreamSettings, TradingSettings};
use futuresbot::error::{GatewayError, StreamError};
use futuresbot::journal::TradeJournal;
use futuresbot::models::{
    Candle, OrderAck, OrderSide, OrderStatus, PositionInfo, Signal, SymbolPrecision,
    TradeRecord, TriggerKind,
};
use futuresbot::session::{SessionController, SessionSettings, SessionStatus};
use futuresbot::strategy::Strategy;

pub const SYMBOL: &str = "BTCUSDT";
const BASE_MS: i64 = 1_700_000_000_000;
const INTERVAL_MS: i64 = 300_000;

fn candle_at(index: i64, close: f64) -> Candle {
    let open_ms = BASE_MS + index * INTERVAL_MS;
    Candle {
        open_time: Utc.timestamp_millis_opt(open_ms).unwrap(),
        open: close,
        high: close,
        low: close,
        close,
        volume: 10.0,
        close_time: Utc.timestamp_millis_opt(open_ms + INTERVAL_MS - 1).unwrap(),
        closed: true,
    }
}

/// Binance-shaped kline frame
pub fn kline_message(symbol: &str, index: i64, close: f64, closed: bool) -> String {
    let open_ms = BASE_MS + index * INTERVAL_MS;
    format!(
        r#"{{"e":"kline","E":{},"s":"{}","k":{{"t":{},"T":{},"s":"{}","i":"5m","o":"{}","c":"{}","h":"{}","l":"{}","v":"10","x":{}}}}}"#,
        open_ms + INTERVAL_MS,
        symbol,
        open_ms,
        open_ms + INTERVAL_MS - 1,
        symbol,
        close,
        close,
        close,
        close,
        closed
    )
}

/// Mutable script and call log behind the fake gateway
pub struct FakeState {
    pub calls: Vec<String>,
    pub history: Vec<Candle>,
    pub fail_precision: bool,
    pub fail_take_profit: bool,
    pub fail_reduce_only: bool,
    pub market_price: Option<f64>,
    pub fill_price: Option<f64>,
    /// Scripted position query replies: Some(amount) or None for a failure
    pub position_replies: VecDeque<Option<f64>>,
    /// Reported amount once the script is exhausted
    pub position_amount: f64,
    pub close_calls: usize,
    stream: Option<mpsc::UnboundedReceiver<String>>,
    next_order_id: i64,
}

pub struct FakeGateway {
    pub state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new(history_len: i64, stream: mpsc::UnboundedReceiver<String>) -> Self {
        let history = (0..history_len).map(|i| candle_at(i, 100.0)).collect();
        Self {
            state: Mutex::new(FakeState {
                calls: Vec::new(),
                history,
                fail_precision: false,
                fail_take_profit: false,
                fail_reduce_only: false,
                market_price: Some(100.0),
                fill_price: None,
                position_replies: VecDeque::new(),
                position_amount: 0.0,
                close_calls: 0,
                stream: Some(stream),
                next_order_id: 1,
            }),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) -> i64 {
        self.with(|s| {
            s.calls.push(call);
            s.next_order_id += 1;
            s.next_order_id
        })
    }

    fn api_error(msg: &str) -> GatewayError {
        GatewayError::Api {
            code: -1000,
            msg: msg.to_string(),
        }
    }
}

#[async_trait]
impl ExchangeGateway for FakeGateway {
    async fn symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, GatewayError> {
        self.record(format!("precision {}", symbol));
        if self.with(|s| s.fail_precision) {
            return Err(GatewayError::UnknownSymbol(symbol.to_string()));
        }
        Ok(SymbolPrecision {
            quantity_decimals: 3,
            price_decimals: 2,
        })
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
        self.record(format!("leverage {} {}", symbol, leverage));
        Ok(())
    }

    async fn historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        self.record(format!("history {} {} {}", symbol, interval, limit));
        Ok(self.with(|s| s.history.clone()))
    }

    async fn market_price(&self, symbol: &str) -> Result<f64, GatewayError> {
        self.record(format!("price {}", symbol));
        self.with(|s| s.market_price)
            .ok_or_else(|| Self::api_error("ticker unavailable"))
    }

    async fn place_market_order(
        &self,
        _symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderAck, GatewayError> {
        let order_id = self.record(format!("market {} {}", side.as_str(), quantity));
        let fill_price = self.with(|s| s.fill_price);
        Ok(OrderAck {
            order_id,
            status: if fill_price.is_some() {
                OrderStatus::Filled
            } else {
                OrderStatus::New
            },
            avg_price: fill_price,
            executed_qty: quantity,
        })
    }

    async fn place_close_position_order(
        &self,
        _symbol: &str,
        side: OrderSide,
        kind: TriggerKind,
        stop_price: f64,
    ) -> Result<OrderAck, GatewayError> {
        let order_id = self.record(format!(
            "{} {} {}",
            kind.order_type(),
            side.as_str(),
            stop_price
        ));
        if kind == TriggerKind::TakeProfit && self.with(|s| s.fail_take_profit) {
            return Err(Self::api_error("Order would immediately trigger."));
        }
        Ok(OrderAck {
            order_id,
            status: OrderStatus::New,
            avg_price: None,
            executed_qty: 0.0,
        })
    }

    async fn place_reduce_only_market_order(
        &self,
        _symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderAck, GatewayError> {
        let order_id = self.record(format!("reduce {} {}", side.as_str(), quantity));
        if self.with(|s| s.fail_reduce_only) {
            return Err(Self::api_error("ReduceOnly Order is rejected."));
        }
        self.with(|s| s.position_amount = 0.0);
        Ok(OrderAck {
            order_id,
            status: OrderStatus::New,
            avg_price: None,
            executed_qty: quantity,
        })
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<(), GatewayError> {
        self.record(format!("cancel_all {}", symbol));
        Ok(())
    }

    async fn open_positions(&self, symbol: &str) -> Result<Vec<PositionInfo>, GatewayError> {
        self.record(format!("positions {}", symbol));
        let reply = self.with(|s| {
            s.position_replies
                .pop_front()
                .unwrap_or(Some(s.position_amount))
        });
        match reply {
            None => Err(Self::api_error("positionRisk unavailable")),
            Some(amount) if amount == 0.0 => Ok(vec![]),
            Some(amount) => Ok(vec![PositionInfo {
                symbol: symbol.to_string(),
                amount,
                entry_price: 100.0,
                mark_price: 100.0,
                unrealized_pnl: 0.0,
            }]),
        }
    }

    async fn subscribe_klines(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Box<dyn KlineStream>, StreamError> {
        self.record(format!("subscribe {} {}", symbol, interval));
        let rx = self
            .with(|s| s.stream.take())
            .ok_or_else(|| StreamError::Connect("already subscribed".to_string()))?;
        Ok(Box::new(ChannelStream { rx }))
    }

    async fn close(&self) {
        self.with(|s| s.close_calls += 1);
    }
}

/// Kline stream fed from a test channel; dropping the sender closes it
pub struct ChannelStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl KlineStream for ChannelStream {
    async fn next_message(&mut self) -> Result<String, StreamError> {
        self.rx.recv().await.ok_or(StreamError::Closed)
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

/// Strategy that replays a fixed list of signals, then NONE
#[derive(Default)]
pub struct ScriptedStrategy {
    signals: Mutex<VecDeque<Signal>>,
    evaluations: Mutex<usize>,
}

impl ScriptedStrategy {
    pub fn new(signals: &[Signal]) -> Self {
        Self {
            signals: Mutex::new(signals.iter().copied().collect()),
            evaluations: Mutex::new(0),
        }
    }

    pub fn evaluations(&self) -> usize {
        *self.evaluations.lock().unwrap()
    }
}

impl Strategy for ScriptedStrategy {
    fn evaluate(&self, _candles: &[Candle]) -> Signal {
        *self.evaluations.lock().unwrap() += 1;
        self.signals.lock().unwrap().pop_front().unwrap_or(Signal::None)
    }

    fn name(&self) -> &str {
        "ScriptedStrategy"
    }

    fn min_candles_required(&self) -> usize {
        1
    }
}

#[derive(Default)]
pub struct MemoryJournal {
    pub trades: Mutex<Vec<TradeRecord>>,
}

impl MemoryJournal {
    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().unwrap().clone()
    }
}

#[async_trait]
impl TradeJournal for MemoryJournal {
    async fn record(&self, trade: &TradeRecord) -> anyhow::Result<()> {
        self.trades.lock().unwrap().push(trade.clone());
        Ok(())
    }
}

pub struct Harness {
    pub gateway: Arc<FakeGateway>,
    pub strategy: Arc<ScriptedStrategy>,
    pub journal: Arc<MemoryJournal>,
    pub session: SessionController,
    pub feed: Option<mpsc::UnboundedSender<String>>,
    pub updates: watch::Receiver<SessionStatus>,
    next_index: i64,
}

pub const HISTORY_LEN: i64 = 30;

pub fn session_settings() -> SessionSettings {
    SessionSettings {
        trading: TradingSettings {
            window_size: HISTORY_LEN as usize,
            settle_interval_ms: 0,
            ..TradingSettings::default()
        },
        stream: StreamSettings::default(),
    }
}

impl Harness {
    pub fn new(signals: &[Signal]) -> Self {
        Self::with_settings(signals, session_settings())
    }

    pub fn with_settings(signals: &[Signal], settings: SessionSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(FakeGateway::new(HISTORY_LEN, rx));
        let strategy = Arc::new(ScriptedStrategy::new(signals));
        let journal = Arc::new(MemoryJournal::default());
        let session = SessionController::new(
            SYMBOL,
            settings,
            gateway.clone(),
            strategy.clone(),
            journal.clone(),
        );
        let updates = session.subscribe();

        Self {
            gateway,
            strategy,
            journal,
            session,
            feed: Some(tx),
            updates,
            next_index: HISTORY_LEN,
        }
    }

    /// Send a raw frame without waiting for anything
    pub fn send_raw(&self, text: String) {
        if let Some(feed) = &self.feed {
            feed.send(text).expect("session stream receiver dropped");
        }
    }

    /// Send the next closed candle and wait until its tick has published
    pub async fn tick(&mut self, close: f64) -> SessionStatus {
        self.updates.borrow_and_update();
        let message = kline_message(SYMBOL, self.next_index, close, true);
        self.next_index += 1;
        self.send_raw(message);

        tokio::time::timeout(Duration::from_secs(5), self.updates.changed())
            .await
            .expect("tick did not publish a status")
            .expect("status channel closed");
        self.updates.borrow_and_update().clone()
    }

    /// Next candle index, for hand-built frames
    pub fn next_index(&mut self) -> i64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    pub async fn wait_until<F>(&mut self, predicate: F) -> SessionStatus
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), self.updates.wait_for(predicate))
            .await
            .expect("status condition not reached")
            .expect("status channel closed")
            .clone()
    }
}
