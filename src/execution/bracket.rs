use std::sync::Arc;
use std::time::Duration;

use crate::api::ExchangeGateway;
use crate::error::{BracketProgress, BracketStage, ExecutionError, GatewayError};
use crate::models::{Position, PositionSide, SymbolPrecision, TriggerKind};

/// Places entry + take-profit + stop-loss as one logical unit
///
/// If anything fails after the entry order went out, all open orders for the
/// symbol are cancelled once and the caller gets `ExecutionError::Unbracketed`.
/// The entry itself may have filled in that case; cancel-all does not close it.
pub struct BracketExecutor {
    gateway: Arc<dyn ExchangeGateway>,
    take_profit_pct: f64,
    stop_loss_pct: f64,
    settle_interval: Duration,
}

impl BracketExecutor {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        take_profit_pct: f64,
        stop_loss_pct: f64,
        settle_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            take_profit_pct,
            stop_loss_pct,
            settle_interval,
        }
    }

    /// Unrounded (take_profit, stop_loss) for an entry price
    pub fn bracket_prices(&self, side: PositionSide, entry_price: f64) -> (f64, f64) {
        match side {
            PositionSide::Long => (
                entry_price * (1.0 + self.take_profit_pct),
                entry_price * (1.0 - self.stop_loss_pct),
            ),
            PositionSide::Short => (
                entry_price * (1.0 - self.take_profit_pct),
                entry_price * (1.0 + self.stop_loss_pct),
            ),
        }
    }

    /// Open a bracketed position
    ///
    /// `entry_price` is used for the bracket unless the exchange acknowledges
    /// an explicit fill, in which case the reported average price wins.
    pub async fn open(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
        entry_price: f64,
        precision: &SymbolPrecision,
    ) -> Result<Position, ExecutionError> {
        let order_qty = precision.floor_quantity(quantity);
        if order_qty <= 0.0 {
            return Err(ExecutionError::InvalidQuantity {
                raw: quantity,
                decimals: precision.quantity_decimals,
            });
        }

        let entry = self
            .gateway
            .place_market_order(symbol, side.entry_side(), order_qty)
            .await
            .map_err(ExecutionError::EntryRejected)?;

        let fill_price = entry.fill_price();
        let mut progress = BracketProgress {
            entry: Some(entry),
            ..Default::default()
        };

        let entry_price = match fill_price {
            Some(price) => price,
            None => {
                tokio::time::sleep(self.settle_interval).await;
                entry_price
            }
        };

        let (raw_tp, raw_sl) = self.bracket_prices(side, entry_price);
        let take_profit = precision.round_price(raw_tp);
        let stop_loss = precision.round_price(raw_sl);
        let exit_side = side.exit_side();

        match self
            .gateway
            .place_close_position_order(symbol, exit_side, TriggerKind::TakeProfit, take_profit)
            .await
        {
            Ok(ack) => progress.take_profit = Some(ack),
            Err(e) => return Err(self.roll_back(symbol, BracketStage::TakeProfit, progress, e).await),
        }

        match self
            .gateway
            .place_close_position_order(symbol, exit_side, TriggerKind::Stop, stop_loss)
            .await
        {
            Ok(ack) => progress.stop_loss = Some(ack),
            Err(e) => return Err(self.roll_back(symbol, BracketStage::StopLoss, progress, e).await),
        }

        let mut position = Position::new(symbol, side, entry_price, order_qty);
        position.take_profit = Some(take_profit);
        position.stop_loss = Some(stop_loss);

        tracing::info!(
            symbol,
            side = %side,
            quantity = order_qty,
            entry_price,
            take_profit,
            stop_loss,
            "Bracket placed"
        );

        Ok(position)
    }

    async fn roll_back(
        &self,
        symbol: &str,
        stage: BracketStage,
        progress: BracketProgress,
        source: GatewayError,
    ) -> ExecutionError {
        let rollback_error = self.gateway.cancel_all_open_orders(symbol).await.err();

        tracing::error!(
            symbol,
            %stage,
            error = %source,
            entry_placed = progress.entry_placed(),
            take_profit_placed = progress.take_profit_placed(),
            stop_loss_placed = progress.stop_loss_placed(),
            rollback_failed = rollback_error.is_some(),
            "Bracket incomplete, entry may be unprotected"
        );

        ExecutionError::Unbracketed {
            stage,
            progress,
            source,
            rollback_error,
        }
    }
}
