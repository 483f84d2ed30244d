use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{SessionController, SessionSettings, SessionStatus};
use crate::api::ExchangeGateway;
use crate::error::SessionError;
use crate::journal::TradeJournal;
use crate::strategy::Strategy;

/// Builds the gateway a new session talks to
pub type GatewayFactory =
    Arc<dyn Fn() -> Result<Arc<dyn ExchangeGateway>, crate::error::GatewayError> + Send + Sync>;

/// Explicit per-symbol session handles
///
/// Sessions are created on first start and kept afterwards so their last
/// status stays readable.
pub struct SessionRegistry {
    settings: SessionSettings,
    gateway_factory: GatewayFactory,
    strategy: Arc<dyn Strategy>,
    journal: Arc<dyn TradeJournal>,
    sessions: Mutex<HashMap<String, Arc<SessionController>>>,
}

impl SessionRegistry {
    pub fn new(
        settings: SessionSettings,
        gateway_factory: GatewayFactory,
        strategy: Arc<dyn Strategy>,
        journal: Arc<dyn TradeJournal>,
    ) -> Self {
        Self {
            settings,
            gateway_factory,
            strategy,
            journal,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Session for `symbol`, created (IDLE) if it does not exist yet
    pub async fn session(&self, symbol: &str) -> Result<Arc<SessionController>, SessionError> {
        let key = symbol.to_uppercase();
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(&key) {
            return Ok(session.clone());
        }

        let gateway = (self.gateway_factory)().map_err(SessionError::Gateway)?;
        let session = Arc::new(SessionController::new(
            &key,
            self.settings.clone(),
            gateway,
            self.strategy.clone(),
            self.journal.clone(),
        ));
        sessions.insert(key, session.clone());

        Ok(session)
    }

    pub async fn start(&self, symbol: &str) -> Result<SessionStatus, SessionError> {
        let session = self.session(symbol).await?;
        session.start().await
    }

    /// Stop a session; `None` if the symbol was never started
    pub async fn stop(&self, symbol: &str) -> Option<SessionStatus> {
        let session = self.get(symbol).await?;
        Some(session.stop().await)
    }

    pub async fn status(&self, symbol: &str) -> Option<SessionStatus> {
        self.get(symbol).await.map(|s| s.status())
    }

    /// Status of every known session, ordered by symbol
    pub async fn statuses(&self) -> Vec<SessionStatus> {
        let mut statuses: Vec<SessionStatus> = self
            .sessions
            .lock()
            .await
            .values()
            .map(|s| s.status())
            .collect();
        statuses.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        statuses
    }

    pub async fn stop_all(&self) -> Vec<SessionStatus> {
        let sessions: Vec<Arc<SessionController>> =
            self.sessions.lock().await.values().cloned().collect();

        let mut statuses = Vec::with_capacity(sessions.len());
        for session in sessions {
            statuses.push(session.stop().await);
        }
        statuses.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        statuses
    }

    async fn get(&self, symbol: &str) -> Option<Arc<SessionController>> {
        self.sessions
            .lock()
            .await
            .get(&symbol.to_uppercase())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockExchangeGateway;
    use crate::error::{GatewayError, SetupError};
    use crate::journal::LogJournal;
    use crate::session::SessionState;
    use crate::strategy::EmaCrossStrategy;

    fn registry() -> SessionRegistry {
        let factory: GatewayFactory = Arc::new(|| {
            let mut gateway = MockExchangeGateway::new();
            gateway
                .expect_symbol_precision()
                .returning(|s| Err(GatewayError::UnknownSymbol(s.to_string())));
            gateway.expect_close().return_const(());
            Ok(Arc::new(gateway) as Arc<dyn ExchangeGateway>)
        });

        SessionRegistry::new(
            SessionSettings::default(),
            factory,
            Arc::new(EmaCrossStrategy::default()),
            Arc::new(LogJournal),
        )
    }

    #[tokio::test]
    async fn test_sessions_are_keyed_by_symbol() {
        let registry = registry();

        let a = registry.session("btcusdt").await.unwrap();
        let b = registry.session("BTCUSDT").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        registry.session("ETHUSDT").await.unwrap();
        let symbols: Vec<String> = registry
            .statuses()
            .await
            .into_iter()
            .map(|s| s.symbol)
            .collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[tokio::test]
    async fn test_unknown_symbol_has_no_status() {
        let registry = registry();
        assert!(registry.status("SOLUSDT").await.is_none());
        assert!(registry.stop("SOLUSDT").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_start_keeps_idle_session() {
        let registry = registry();

        let err = registry.start("XYZUSDT").await.unwrap_err();
        assert!(matches!(err, SessionError::Setup(SetupError::Precision(_))));

        let status = registry.status("XYZUSDT").await.unwrap();
        assert_eq!(status.state, SessionState::Idle);

        let stopped = registry.stop_all().await;
        assert_eq!(stopped.len(), 1);
    }
}
