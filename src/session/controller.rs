use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::runtime::{SessionRuntime, StreamEnd};
use super::status::{SessionState, SessionStatus, StatusHandle};
use super::SessionSettings;
use crate::api::{ExchangeGateway, KlineStream};
use crate::error::{SessionError, SetupError};
use crate::execution::CandleWindow;
use crate::journal::TradeJournal;
use crate::models::SymbolPrecision;
use crate::strategy::Strategy;

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// Start/stop control and status for one symbol's trading session
pub struct SessionController {
    symbol: String,
    settings: SessionSettings,
    gateway: Arc<dyn ExchangeGateway>,
    strategy: Arc<dyn Strategy>,
    journal: Arc<dyn TradeJournal>,
    status: StatusHandle,
    lifecycle: Mutex<Lifecycle>,
}

impl SessionController {
    pub fn new(
        symbol: &str,
        settings: SessionSettings,
        gateway: Arc<dyn ExchangeGateway>,
        strategy: Arc<dyn Strategy>,
        journal: Arc<dyn TradeJournal>,
    ) -> Self {
        let symbol = symbol.to_uppercase();
        Self {
            status: StatusHandle::new(SessionStatus::idle(&symbol)),
            symbol,
            settings,
            gateway,
            strategy,
            journal,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn status(&self) -> SessionStatus {
        self.status.current()
    }

    /// Receiver that sees every published status snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Set up the session and spawn the streaming task
    ///
    /// Any setup failure releases the gateway and leaves the session IDLE.
    pub async fn start(&self) -> Result<SessionStatus, SessionError> {
        let cancel = {
            let mut lifecycle = self.lifecycle.lock().await;
            if !self.status.try_begin_start() {
                return Err(SessionError::AlreadyRunning(self.symbol.clone()));
            }
            let cancel = CancellationToken::new();
            lifecycle.cancel = Some(cancel.clone());
            lifecycle.task = None;
            cancel
        };

        tracing::info!(symbol = %self.symbol, "Starting session");

        let (precision, window, mut stream) = match self.setup(&cancel).await {
            Ok(ready) => ready,
            Err(e) => {
                tracing::error!(symbol = %self.symbol, error = %e, "Session setup failed");
                let message = format!("Start failed: {}", e);
                teardown(&self.status, self.gateway.as_ref(), message.clone(), Some(message))
                    .await;
                return Err(SessionError::Setup(e));
            }
        };

        let mut runtime = SessionRuntime::new(
            &self.symbol,
            &self.settings,
            precision,
            window,
            self.gateway.clone(),
            self.strategy.clone(),
            self.journal.clone(),
            self.status.clone(),
        );

        let interval = self.settings.trading.interval.clone();
        let started = self.status.update(|s| {
            s.set_position(None);
            s.status_message = format!("Streaming {} {} candles", s.symbol, interval);
        });

        let status = self.status.clone();
        let gateway = self.gateway.clone();
        let symbol = self.symbol.clone();
        let task = tokio::spawn(async move {
            let end = runtime.run(stream.as_mut(), &cancel).await;
            stream.close().await;

            let (message, error) = match end {
                StreamEnd::Stopped => ("Stopped".to_string(), None),
                StreamEnd::Failed(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Market stream ended");
                    (format!("Stream ended: {}", e), Some(e.to_string()))
                }
            };

            if let Some(position) = runtime.position() {
                tracing::warn!(
                    symbol = %symbol,
                    side = %position.side,
                    quantity = position.quantity,
                    "Session ending while holding; exchange bracket stays in place"
                );
            }

            teardown(&status, gateway.as_ref(), message, error).await;
        });

        self.lifecycle.lock().await.task = Some(task);

        Ok(started)
    }

    async fn setup(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(SymbolPrecision, CandleWindow, Box<dyn KlineStream>), SetupError> {
        let trading = &self.settings.trading;

        let precision = self
            .gateway
            .symbol_precision(&self.symbol)
            .await
            .map_err(SetupError::Precision)?;
        ensure_active(cancel)?;

        self.gateway
            .set_leverage(&self.symbol, trading.leverage)
            .await
            .map_err(SetupError::Leverage)?;
        ensure_active(cancel)?;

        let history = self
            .gateway
            .historical_candles(&self.symbol, &trading.interval, trading.window_size)
            .await
            .map_err(SetupError::History)?;

        let mut window = CandleWindow::new(trading.window_size);
        if window.seed(history) == 0 {
            return Err(SetupError::EmptyHistory);
        }
        ensure_active(cancel)?;

        tracing::info!(
            symbol = %self.symbol,
            candles = window.len(),
            quantity_decimals = precision.quantity_decimals,
            price_decimals = precision.price_decimals,
            "Warm-up history loaded"
        );

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SetupError::Cancelled),
            stream = self.gateway.subscribe_klines(&self.symbol, &trading.interval) => {
                stream.map_err(SetupError::Stream)?
            }
        };

        Ok((precision, window, stream))
    }

    /// Stop the session and wait until it is IDLE
    ///
    /// No-op while IDLE or already STOPPING.
    pub async fn stop(&self) -> SessionStatus {
        let task = {
            let mut lifecycle = self.lifecycle.lock().await;
            let current = self.status.current();
            if matches!(current.state, SessionState::Idle | SessionState::Stopping) {
                return current;
            }
            if let Some(cancel) = &lifecycle.cancel {
                cancel.cancel();
            }
            lifecycle.task.take()
        };

        tracing::info!(symbol = %self.symbol, "Stop requested");

        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(symbol = %self.symbol, error = %e, "Session task aborted");
                teardown(
                    &self.status,
                    self.gateway.as_ref(),
                    "Session task aborted".to_string(),
                    Some(e.to_string()),
                )
                .await;
            }
        }

        let mut rx = self.status.subscribe();
        if rx
            .wait_for(|s| s.state == SessionState::Idle)
            .await
            .is_err()
        {
            tracing::warn!(symbol = %self.symbol, "Status channel closed while stopping");
        }

        self.status.current()
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), SetupError> {
    if cancel.is_cancelled() {
        Err(SetupError::Cancelled)
    } else {
        Ok(())
    }
}

/// STOPPING → release the gateway → IDLE
async fn teardown(
    status: &StatusHandle,
    gateway: &dyn ExchangeGateway,
    message: String,
    error: Option<String>,
) {
    status.update(|s| {
        s.set_state(SessionState::Stopping);
        s.status_message = message.clone();
        if error.is_some() {
            s.last_error = error;
        }
    });

    gateway.close().await;

    status.update(|s| {
        s.set_state(SessionState::Idle);
        s.status_message = message;
    });
}
