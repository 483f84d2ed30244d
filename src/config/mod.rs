use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const ENV_PREFIX: &str = "FUTURESBOT";
const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Which Binance deployment to talk to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradingEnvironment {
    #[default]
    Test,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub environment: TradingEnvironment,
    pub api_key: String,
    pub api_secret: String,
    /// Override for the REST base URL (testnet/production chosen otherwise)
    pub rest_url: Option<String>,
    /// Override for the WebSocket base URL
    pub ws_url: Option<String>,
    pub requests_per_minute: u32,
    pub recv_window_ms: u64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            environment: TradingEnvironment::Test,
            api_key: String::new(),
            api_secret: String::new(),
            rest_url: None,
            ws_url: None,
            requests_per_minute: 600,
            recv_window_ms: 5_000,
        }
    }
}

impl ExchangeSettings {
    pub fn rest_url(&self) -> String {
        self.rest_url.clone().unwrap_or_else(|| {
            match self.environment {
                TradingEnvironment::Live => "https://fapi.binance.com",
                TradingEnvironment::Test => "https://testnet.binancefuture.com",
            }
            .to_string()
        })
    }

    pub fn ws_url(&self) -> String {
        self.ws_url.clone().unwrap_or_else(|| {
            match self.environment {
                TradingEnvironment::Live => "wss://fstream.binance.com",
                TradingEnvironment::Test => "wss://stream.binancefuture.com",
            }
            .to_string()
        })
    }
}

/// Position sizing, bracket and trailing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    pub leverage: u32,
    /// Margin committed per trade; notional = margin * leverage
    pub order_size_usdt: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub trailing_activation_pct: f64,
    pub trailing_distance_pct: f64,
    pub interval: String,
    /// Candle window capacity, also the warm-up history size
    pub window_size: usize,
    /// Pause after the entry order when no fill is acknowledged
    pub settle_interval_ms: u64,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            leverage: 10,
            order_size_usdt: 20.0,
            take_profit_pct: 0.006,
            stop_loss_pct: 0.006,
            trailing_activation_pct: 0.0015,
            trailing_distance_pct: 0.001,
            interval: "5m".to_string(),
            window_size: 100,
            settle_interval_ms: 500,
        }
    }
}

impl TradingSettings {
    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn notional(&self) -> f64 {
        self.order_size_usdt * self.leverage as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Session ends when no message arrives for this long
    pub idle_timeout_secs: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
        }
    }
}

impl StreamSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub fast_period: usize,
    pub slow_period: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            fast_period: 9,
            slow_period: 21,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub trading: TradingSettings,
    pub stream: StreamSettings,
    pub strategy: StrategySettings,
    /// Postgres URL for the trade journal; log-only journal when unset
    pub database_url: Option<String>,
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and the environment
    ///
    /// Environment keys use the `FUTURESBOT_` prefix and `__` as the section
    /// separator, e.g. `FUTURESBOT_TRADING__LEVERAGE=5`.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.apply_credential_env();
        settings.validate()?;

        Ok(settings)
    }

    /// Pick up the conventional BINANCE_API_KEY / BINANCE_API_SECRET variables
    fn apply_credential_env(&mut self) {
        if self.exchange.api_key.is_empty() {
            if let Ok(key) = std::env::var("BINANCE_API_KEY") {
                self.exchange.api_key = key;
            }
        }
        if self.exchange.api_secret.is_empty() {
            if let Ok(secret) = std::env::var("BINANCE_API_SECRET") {
                self.exchange.api_secret = secret;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let trading = &self.trading;

        if trading.leverage == 0 {
            return Err(ConfigError::Invalid("leverage must be at least 1".into()));
        }
        if trading.order_size_usdt <= 0.0 {
            return Err(ConfigError::Invalid("order_size_usdt must be positive".into()));
        }
        for (name, value) in [
            ("take_profit_pct", trading.take_profit_pct),
            ("stop_loss_pct", trading.stop_loss_pct),
            ("trailing_activation_pct", trading.trailing_activation_pct),
            ("trailing_distance_pct", trading.trailing_distance_pct),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be in (0, 1), got {}",
                    name, value
                )));
            }
        }
        if trading.window_size == 0 {
            return Err(ConfigError::Invalid("window_size must be positive".into()));
        }
        if trading.interval.trim().is_empty() {
            return Err(ConfigError::Invalid("interval must be set".into()));
        }
        if self.stream.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("idle_timeout_secs must be positive".into()));
        }
        if self.strategy.fast_period == 0 || self.strategy.fast_period >= self.strategy.slow_period
        {
            return Err(ConfigError::Invalid(format!(
                "fast_period ({}) must be positive and below slow_period ({})",
                self.strategy.fast_period, self.strategy.slow_period
            )));
        }

        Ok(())
    }

    /// Copy safe to print: secrets replaced
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.exchange.api_key = mask(&copy.exchange.api_key);
        copy.exchange.api_secret = mask(&copy.exchange.api_secret);
        copy.database_url = copy.database_url.as_ref().map(|_| "***".to_string());
        copy
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "***".to_string()
    }
}
