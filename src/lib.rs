// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod journal;
pub mod models;
pub mod session;
pub mod strategy;

// Re-export commonly used types
pub use api::{BinanceClient, ExchangeGateway, KlineStream};
pub use config::Settings;
pub use error::{ExecutionError, GatewayError, SessionError, SetupError, StreamError};
pub use models::*;
pub use session::{SessionController, SessionRegistry, SessionState, SessionStatus};
pub use strategy::Strategy;

// Error handling at the binary edge
pub type Result<T> = anyhow::Result<T>;
