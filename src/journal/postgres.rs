use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};

use super::TradeJournal;
use crate::models::TradeRecord;

/// Postgres-backed trade journal
pub struct PostgresJournal {
    pool: PgPool,
}

impl PostgresJournal {
    /// Connect to Postgres and run pending migrations
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Trade journal connected to Postgres");

        Ok(Self { pool })
    }
}

#[async_trait]
impl TradeJournal for PostgresJournal {
    async fn record(&self, trade: &TradeRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, symbol, side, entry_price, exit_price, quantity,
                pnl, exit_reason, opened_at, closed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(trade.id)
        .bind(&trade.symbol)
        .bind(trade.side.to_string())
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.quantity)
        .bind(trade.pnl)
        .bind(trade.exit_reason.as_str())
        .bind(trade.opened_at)
        .bind(trade.closed_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(trade_id = %trade.id, symbol = %trade.symbol, "Trade saved to Postgres");

        Ok(())
    }
}
