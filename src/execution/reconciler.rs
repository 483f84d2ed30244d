use std::sync::Arc;

use crate::api::ExchangeGateway;
use crate::error::GatewayError;
use crate::models::{Position, PositionInfo};

/// Result of comparing local position belief with the exchange
#[derive(Debug)]
pub enum Reconciliation {
    /// Exchange still reports the position
    StillOpen(PositionInfo),
    /// No position on the exchange: the static bracket closed it
    ClosedExternally,
    /// Query failed; keep the local position and retry next tick
    Unknown(GatewayError),
}

/// Detects positions closed on the exchange side by polling position state
pub struct PositionReconciler {
    gateway: Arc<dyn ExchangeGateway>,
}

impl PositionReconciler {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }

    pub async fn reconcile(&self, position: &Position) -> Reconciliation {
        match self.gateway.open_positions(&position.symbol).await {
            Ok(positions) => match positions.into_iter().find(|p| p.is_open()) {
                Some(info) => Reconciliation::StillOpen(info),
                None => {
                    tracing::info!(
                        symbol = %position.symbol,
                        side = %position.side,
                        "Position no longer reported by exchange"
                    );
                    Reconciliation::ClosedExternally
                }
            },
            Err(e) => {
                tracing::warn!(symbol = %position.symbol, error = %e, "Position query failed");
                Reconciliation::Unknown(e)
            }
        }
    }

    /// Best-effort cleanup of the bracket leg left behind after a close
    pub async fn cancel_leftovers(&self, symbol: &str) {
        if let Err(e) = self.gateway.cancel_all_open_orders(symbol).await {
            tracing::warn!(symbol, error = %e, "Failed to cancel leftover orders");
        }
    }
}
