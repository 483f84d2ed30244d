// Session state machine: stream supervision, signal handling, position lifecycle
pub mod controller;
pub mod registry;
mod runtime;
pub mod status;

pub use controller::SessionController;
pub use registry::{GatewayFactory, SessionRegistry};
pub use status::{SessionState, SessionStatus, StatusHandle, StreamPhase};

use crate::config::{Settings, StreamSettings, TradingSettings};

/// Parts of the configuration a session runs with
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub trading: TradingSettings,
    pub stream: StreamSettings,
}

impl From<&Settings> for SessionSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            trading: settings.trading.clone(),
            stream: settings.stream.clone(),
        }
    }
}
