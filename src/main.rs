use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futuresbot::api::{BinanceClient, ExchangeGateway};
use futuresbot::journal::{LogJournal, PostgresJournal, TradeJournal};
use futuresbot::session::{GatewayFactory, SessionRegistry, SessionSettings, SessionState};
use futuresbot::strategy::EmaCrossStrategy;
use futuresbot::{Result, Settings};

#[derive(Parser)]
#[command(name = "futuresbot", about = "Single-position leveraged futures session bot")]
struct Cli {
    /// TOML config file (defaults to config/default.toml when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a trading session until Ctrl+C or the stream ends
    Run {
        #[arg(long)]
        symbol: String,
    },
    /// Print the effective configuration with secrets masked
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading configuration")?;

    setup_logging();

    match cli.command {
        Command::Run { symbol } => run(settings, &symbol).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&settings.redacted())?);
            Ok(())
        }
    }
}

async fn run(settings: Settings, symbol: &str) -> Result<()> {
    tracing::info!(
        symbol,
        environment = ?settings.exchange.environment,
        leverage = settings.trading.leverage,
        interval = %settings.trading.interval,
        "🚀 futuresbot starting"
    );

    let journal = connect_journal(settings.database_url.as_deref()).await;

    let exchange = settings.exchange.clone();
    let gateway_factory: GatewayFactory = Arc::new(move || {
        let client = BinanceClient::new(&exchange)?;
        Ok(Arc::new(client) as Arc<dyn ExchangeGateway>)
    });

    let registry = SessionRegistry::new(
        SessionSettings::from(&settings),
        gateway_factory,
        Arc::new(EmaCrossStrategy::from_settings(&settings.strategy)),
        journal,
    );

    let session = registry.session(symbol).await?;
    let mut updates = session.subscribe();

    let started = session.start().await?;
    tracing::info!(symbol = %started.symbol, message = %started.status_message, "Session started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, stopping");
                let status = session.stop().await;
                tracing::info!(message = %status.status_message, "Session stopped");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                tracing::info!(
                    state = ?status.state,
                    signal = ?status.last_signal,
                    message = %status.status_message,
                    "Status"
                );
                if let Some(alert) = &status.last_error {
                    tracing::warn!(alert = %alert, "Session alert");
                }
                if status.state == SessionState::Idle {
                    tracing::info!("Session ended");
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn connect_journal(database_url: Option<&str>) -> Arc<dyn TradeJournal> {
    let Some(database_url) = database_url else {
        tracing::info!("No database_url configured, journaling to log only");
        return Arc::new(LogJournal);
    };

    match PostgresJournal::connect(database_url).await {
        Ok(journal) => {
            tracing::info!("Trade journal: Postgres");
            Arc::new(journal)
        }
        Err(e) => {
            tracing::warn!("Postgres journal unavailable ({}), journaling to log only", e);
            Arc::new(LogJournal)
        }
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "futuresbot=info".into()),
        )
        .init();
}
