// Best-effort record of completed trades
pub mod postgres;

pub use postgres::PostgresJournal;

use async_trait::async_trait;

use crate::models::TradeRecord;

/// Sink for completed trades
///
/// Failures are reported to the caller, which logs them and carries on; a
/// journal error never changes session state.
#[async_trait]
pub trait TradeJournal: Send + Sync {
    async fn record(&self, trade: &TradeRecord) -> anyhow::Result<()>;
}

/// Journal that only emits a structured tracing event
#[derive(Debug, Clone, Default)]
pub struct LogJournal;

#[async_trait]
impl TradeJournal for LogJournal {
    async fn record(&self, trade: &TradeRecord) -> anyhow::Result<()> {
        tracing::info!(
            trade_id = %trade.id,
            symbol = %trade.symbol,
            side = %trade.side,
            entry_price = trade.entry_price,
            exit_price = trade.exit_price,
            quantity = trade.quantity,
            pnl = trade.pnl,
            exit_reason = trade.exit_reason.as_str(),
            "Trade closed"
        );
        Ok(())
    }
}
