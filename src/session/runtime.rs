use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::status::StatusHandle;
use super::SessionSettings;
use crate::api::{parse_kline_event, ExchangeGateway, KlineStream};
use crate::error::{ExecutionError, StreamError};
use crate::execution::{
    BracketExecutor, CandleWindow, PositionReconciler, Reconciliation, TrailingAction,
    TrailingStop,
};
use crate::journal::TradeJournal;
use crate::models::{
    Candle, ExitReason, Position, PositionInfo, PositionSide, Signal, SymbolPrecision,
    TradeRecord,
};
use crate::strategy::Strategy;

/// Why the stream loop ended
#[derive(Debug)]
pub(crate) enum StreamEnd {
    Stopped,
    Failed(StreamError),
}

/// State owned by the streaming task of one session
///
/// Everything a tick touches lives here, so a tick runs without locks.
pub(crate) struct SessionRuntime {
    symbol: String,
    interval: String,
    notional: f64,
    idle_timeout: Duration,
    precision: SymbolPrecision,
    window: CandleWindow,
    position: Option<Position>,
    needs_verification: bool,
    last_signal: Option<Signal>,
    last_error: Option<String>,
    gateway: Arc<dyn ExchangeGateway>,
    strategy: Arc<dyn Strategy>,
    journal: Arc<dyn TradeJournal>,
    executor: BracketExecutor,
    reconciler: PositionReconciler,
    trailing: TrailingStop,
    status: StatusHandle,
}

impl SessionRuntime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        symbol: &str,
        settings: &SessionSettings,
        precision: SymbolPrecision,
        window: CandleWindow,
        gateway: Arc<dyn ExchangeGateway>,
        strategy: Arc<dyn Strategy>,
        journal: Arc<dyn TradeJournal>,
        status: StatusHandle,
    ) -> Self {
        let trading = &settings.trading;
        Self {
            symbol: symbol.to_string(),
            interval: trading.interval.clone(),
            notional: trading.notional(),
            idle_timeout: settings.stream.idle_timeout(),
            precision,
            window,
            position: None,
            needs_verification: false,
            last_signal: None,
            last_error: None,
            executor: BracketExecutor::new(
                gateway.clone(),
                trading.take_profit_pct,
                trading.stop_loss_pct,
                trading.settle_interval(),
            ),
            reconciler: PositionReconciler::new(gateway.clone()),
            trailing: TrailingStop::new(
                trading.trailing_activation_pct,
                trading.trailing_distance_pct,
            ),
            gateway,
            strategy,
            journal,
            status,
        }
    }

    pub(crate) fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Consume the stream until stop, idle timeout or disconnect
    ///
    /// Cancellation is only observed while waiting for the next message; a
    /// tick that has started always runs to completion.
    pub(crate) async fn run(
        &mut self,
        stream: &mut dyn KlineStream,
        cancel: &CancellationToken,
    ) -> StreamEnd {
        tracing::info!(
            symbol = %self.symbol,
            interval = %self.interval,
            candles = self.window.len(),
            "Streaming closed candles"
        );

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Stopped,
                received = tokio::time::timeout(self.idle_timeout, stream.next_message()) => received,
            };

            let text = match received {
                Err(_) => return StreamEnd::Failed(StreamError::IdleTimeout(self.idle_timeout)),
                Ok(Err(e)) => return StreamEnd::Failed(e),
                Ok(Ok(text)) => text,
            };

            let event = match parse_kline_event(&text) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(symbol = %self.symbol, error = %e, "Skipping malformed stream message");
                    continue;
                }
            };

            if !event.symbol.eq_ignore_ascii_case(&self.symbol) || !event.is_closed() {
                continue;
            }

            self.on_closed_candle(event.candle).await;
        }
    }

    /// Handle one closed candle: window, then position management or signal
    pub(crate) async fn on_closed_candle(&mut self, candle: Candle) {
        if let Err(e) = self.window.push(candle.clone()) {
            tracing::warn!(symbol = %self.symbol, error = %e, "Ignoring out-of-order candle");
            return;
        }

        let price = candle.close;

        if self.needs_verification {
            self.resolve_exposure(price).await;
            if self.needs_verification {
                self.publish("Exchange position unverified; signals paused".to_string());
                return;
            }
        }

        let began_seeking = self.position.is_none();

        let message = if began_seeking {
            self.seek(&candle).await
        } else {
            self.manage_position(price).await
        };

        self.publish(message);
    }

    async fn seek(&mut self, candle: &Candle) -> String {
        let signal = self.strategy.evaluate(&self.window.snapshot());
        self.last_signal = Some(signal);

        tracing::info!(symbol = %self.symbol, close = candle.close, %signal, "Signal evaluated");

        match signal.side() {
            Some(side) => self.enter(side, candle).await,
            None => format!("No signal at {}", candle.close),
        }
    }

    async fn enter(&mut self, side: PositionSide, candle: &Candle) -> String {
        let price = match self.gateway.market_price(&self.symbol).await {
            Ok(price) if price > 0.0 => price,
            Ok(price) => {
                tracing::warn!(symbol = %self.symbol, price, "Ignoring non-positive market price");
                candle.close
            }
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, error = %e, "Market price unavailable, using candle close");
                candle.close
            }
        };
        let quantity = self.notional / price;

        match self
            .executor
            .open(&self.symbol, side, quantity, price, &self.precision)
            .await
        {
            Ok(position) => {
                let message = format!(
                    "{} opened at {} (TP {:?}, SL {:?})",
                    side, position.entry_price, position.take_profit, position.stop_loss
                );
                self.position = Some(position);
                message
            }
            Err(e @ ExecutionError::Unbracketed { .. }) => {
                let alert = format!("Unbracketed {} entry: {}", side, e);
                self.last_error = Some(alert.clone());
                self.resolve_exposure(price).await;
                if self.needs_verification {
                    format!("{}; exchange position unverified", alert)
                } else {
                    alert
                }
            }
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, %side, error = %e, "Signal ignored");
                format!("{} signal ignored: {}", side, e)
            }
        }
    }

    /// Bring local state in line with whatever the exchange holds after an
    /// unbracketed entry. Flattens a reported position, adopts it if the
    /// flatten fails, and flags the session when the query itself fails.
    async fn resolve_exposure(&mut self, price: f64) {
        let positions = match self.gateway.open_positions(&self.symbol).await {
            Ok(positions) => positions,
            Err(e) => {
                tracing::error!(symbol = %self.symbol, error = %e, "Cannot verify exchange position");
                self.needs_verification = true;
                return;
            }
        };
        self.needs_verification = false;

        let Some(info) = positions.into_iter().find(|p| p.is_open()) else {
            tracing::info!(symbol = %self.symbol, "No exchange exposure after failed bracket");
            return;
        };

        let exposure = Self::position_from_exchange(&self.symbol, &info, price);
        let quantity = info.amount.abs();

        match self
            .gateway
            .place_reduce_only_market_order(&self.symbol, exposure.side.exit_side(), quantity)
            .await
        {
            Ok(ack) => {
                let exit_price = ack.fill_price().unwrap_or(price);
                tracing::warn!(
                    symbol = %self.symbol,
                    side = %exposure.side,
                    quantity,
                    exit_price,
                    "Flattened unbracketed position"
                );
                self.journal_trade(&exposure, exit_price, ExitReason::Flattened)
                    .await;
            }
            Err(e) => {
                tracing::error!(
                    symbol = %self.symbol,
                    side = %exposure.side,
                    quantity,
                    error = %e,
                    "Flatten failed, adopting unprotected position"
                );
                self.last_error = Some(format!(
                    "Unprotected {} position of {} adopted: {}",
                    exposure.side, quantity, e
                ));
                self.position = Some(exposure);
            }
        }
    }

    fn position_from_exchange(symbol: &str, info: &PositionInfo, fallback_price: f64) -> Position {
        let entry_price = if info.entry_price > 0.0 {
            info.entry_price
        } else {
            fallback_price
        };
        Position::new(symbol, info.side(), entry_price, info.amount.abs())
    }

    async fn manage_position(&mut self, price: f64) -> String {
        let Some(position) = self.position.as_mut() else {
            return "Seeking".to_string();
        };

        if let TrailingAction::Close { stop_level } = self.trailing.update(position, price) {
            tracing::info!(symbol = %self.symbol, price, stop_level, "Trailing stop hit");
            if let Some(message) = self.close_on_trailing(price).await {
                return message;
            }
        }

        let Some(position) = self.position.as_ref() else {
            return "Seeking".to_string();
        };

        match self.reconciler.reconcile(position).await {
            Reconciliation::StillOpen(info) => format!(
                "Holding {} {} @ {} (uPnL {:.4})",
                position.side, position.quantity, position.entry_price, info.unrealized_pnl
            ),
            Reconciliation::ClosedExternally => {
                let closed = position.clone();
                self.reconciler.cancel_leftovers(&self.symbol).await;
                self.journal_trade(&closed, price, ExitReason::BracketFilled)
                    .await;
                self.position = None;
                format!("{} position closed by bracket near {}", closed.side, price)
            }
            Reconciliation::Unknown(e) => format!("Holding; position check failed: {}", e),
        }
    }

    /// Close the held position with a reduce-only market order
    ///
    /// Returns the status message on success; `None` keeps the position so
    /// the trailing check repeats next tick.
    async fn close_on_trailing(&mut self, price: f64) -> Option<String> {
        let position = self.position.as_ref()?.clone();

        match self
            .gateway
            .place_reduce_only_market_order(&self.symbol, position.side.exit_side(), position.quantity)
            .await
        {
            Ok(ack) => {
                let exit_price = ack.fill_price().unwrap_or(price);
                self.reconciler.cancel_leftovers(&self.symbol).await;
                self.journal_trade(&position, exit_price, ExitReason::TrailingStop)
                    .await;
                self.position = None;
                Some(format!(
                    "{} position closed by trailing stop at {}",
                    position.side, exit_price
                ))
            }
            Err(e) => {
                tracing::error!(symbol = %self.symbol, error = %e, "Trailing close failed, keeping position");
                None
            }
        }
    }

    async fn journal_trade(&self, position: &Position, exit_price: f64, reason: ExitReason) {
        let trade = TradeRecord::from_position(position, exit_price, reason);
        if let Err(e) = self.journal.record(&trade).await {
            tracing::warn!(trade_id = %trade.id, error = %e, "Failed to journal trade");
        }
    }

    fn publish(&self, message: String) {
        self.status.update(|s| {
            s.set_position(self.position.as_ref());
            s.last_signal = self.last_signal;
            s.last_error = self.last_error.clone();
            s.status_message = message;
        });
    }
}
