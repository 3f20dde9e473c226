//! Command Line Interface for the safeguard engine.
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use safeguard_api::{ApiServer, ServerConfig};
use safeguard_domain::enums::PositionSide;
use safeguard_engine::SafetySystem;
use safeguard_engine::alerts::AlertFilter;
use safeguard_engine::config::{SafetyConfiguration, ValidationLimits, presets};
use safeguard_engine::notify::{LogNotifier, MultiNotifier};
use safeguard_engine::store::JsonFileStore;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod paper;

use paper::{DeskSettings, PaperDesk};

#[derive(Parser)]
#[command(name = "safeguard")]
#[command(about = "Safety monitoring and auto-exit engine for trading agents", long_about = None)]
struct Cli {
    /// Configuration file (JSON). Takes precedence over --preset.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Built-in preset to start from
    #[arg(short, long, global = true, default_value = presets::BALANCED)]
    preset: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: PathBuf,
    },
    /// List the built-in presets
    Presets,
    /// Run the engine against a simulated paper desk
    Simulate {
        /// Number of ticks to run
        #[arg(short, long, default_value_t = 60)]
        ticks: u64,

        /// Annualized volatility of the simulated price
        #[arg(long, default_value_t = 0.8)]
        volatility: f64,

        /// Probability that an exit order is rejected
        #[arg(long, default_value_t = 0.0)]
        exit_failure_rate: f64,

        /// RNG seed for a repeatable path
        #[arg(long)]
        seed: Option<u64>,

        /// Instrument to trade
        #[arg(long, default_value = "BTC-USD")]
        symbol: String,

        /// Side of the supervised position
        #[arg(long, default_value = "long")]
        side: String,
    },
    /// Serve the HTTP API backed by a simulated paper desk
    Serve {
        /// Listen host (SAFEGUARD_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (SAFEGUARD_PORT)
        #[arg(long)]
        port: Option<u16>,

        /// Directory for the persisted configuration and alert history
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Milliseconds between simulated price moves
        #[arg(long, default_value_t = 1_000)]
        step_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Validate { file } => {
            let config = read_configuration(file).await?;
            let result = config.validate(&ValidationLimits::default());
            if result.valid {
                println!("✅ {} is valid", file.display());
            } else {
                println!("❌ {} is invalid:", file.display());
                for error in &result.errors {
                    println!("  - {error}");
                }
                bail!("{} validation errors", result.errors.len());
            }
        }
        Commands::Presets => {
            println!(
                "{:<14} | {:>10} | {:>10} | {:>10} | {:>10} | {:>8}",
                "Preset", "Drawdown %", "Leverage", "Loss %", "Interval", "Exit at"
            );
            println!("{}", "-".repeat(76));
            for preset in presets::builtin() {
                let t = &preset.thresholds;
                println!(
                    "{:<14} | {:>10} | {:>10} | {:>10} | {:>8}ms | {:>8}",
                    preset.name,
                    t.portfolio.drawdown_pct.critical,
                    t.portfolio.leverage.critical,
                    t.performance.loss_pct.critical,
                    preset.monitoring.interval_ms,
                    preset.exit.exit_level.to_string(),
                );
            }
        }
        Commands::Simulate {
            ticks,
            volatility,
            exit_failure_rate,
            seed,
            symbol,
            side,
        } => {
            let configuration = initial_configuration(&cli).await?;
            let side = parse_side(side)?;
            let desk = Arc::new(PaperDesk::new(DeskSettings {
                symbol: symbol.clone(),
                volatility: *volatility,
                exit_failure_rate: *exit_failure_rate,
                seed: *seed,
                ..Default::default()
            })?);

            let system = SafetySystem::builder(desk.clone(), desk.clone(), desk.clone())
                .configuration(configuration)
                .build()
                .await?;

            let registration = desk.open(side).await;
            let operation = system.register_operation(registration).await?;
            println!(
                "🚀 Supervising {} {} {} @ {} for {} ticks",
                operation.registration.side,
                operation.registration.quantity,
                operation.registration.symbol,
                operation.registration.entry_price,
                ticks
            );
            println!(
                "{:<6} | {:>12} | {:>12} | {:<9} | {:>6}",
                "Tick", "Price", "Equity", "Level", "Score"
            );
            println!("{}", "-".repeat(56));

            for _ in 0..*ticks {
                let price = desk.advance().await;
                let assessment = system.run_once().await;
                println!(
                    "{:<6} | {:>12} | {:>12.2} | {:<9} | {:>6.1}",
                    assessment.tick,
                    price,
                    desk.equity().await,
                    assessment.overall_level.to_string(),
                    assessment.overall_score
                );
                // Let subscribers react before the next tick.
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            system.shutdown().await;

            let record = system.operation_status(operation.id()).await?;
            let stats = system.alert_statistics().await;
            println!("\n📊 Simulation Results");
            println!("════════════════════════════════════");
            println!("Operation status: {}", record.status);
            if let Some(reason) = &record.last_exit_reason {
                println!("Exit reason:      {reason}");
            }
            println!("Exit attempts:    {}", record.attempts);
            println!("Final equity:     {:.2}", desk.equity().await);
            println!("Alerts raised:    {}", stats.total);
            println!("Unresolved:       {}", stats.open + stats.acknowledged);
            println!("════════════════════════════════════");
            for alert in system.list_alerts(&AlertFilter::default()).await {
                println!(
                    "  [{}] {} {} ({})",
                    alert.severity, alert.key, alert.message, alert.status
                );
            }
        }
        Commands::Serve {
            host,
            port,
            data_dir,
            step_ms,
        } => {
            let configuration = initial_configuration(&cli).await?;
            let host = host
                .clone()
                .or_else(|| env::var("SAFEGUARD_HOST").ok())
                .unwrap_or_else(|| ServerConfig::default().host);
            let port = match port {
                Some(port) => *port,
                None => match env::var("SAFEGUARD_PORT") {
                    Ok(raw) => raw.parse().context("SAFEGUARD_PORT must be a port number")?,
                    Err(_) => ServerConfig::default().port,
                },
            };
            let data_dir = data_dir
                .clone()
                .or_else(|| env::var("SAFEGUARD_DATA_DIR").ok().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("safeguard-data"));

            let desk = Arc::new(PaperDesk::new(DeskSettings::default())?);
            let store = Arc::new(JsonFileStore::open(&data_dir).await?);
            let notifier = MultiNotifier::new().with(Arc::new(LogNotifier));

            let system = Arc::new(
                SafetySystem::builder(desk.clone(), desk.clone(), desk.clone())
                    .configuration(configuration)
                    .store(store)
                    .notifier(Arc::new(notifier))
                    .build()
                    .await?,
            );
            let registration = desk.open(PositionSide::Long).await;
            system.register_operation(registration).await?;

            let stepper = {
                let desk = desk.clone();
                let step = Duration::from_millis((*step_ms).max(10));
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(step);
                    loop {
                        interval.tick().await;
                        desk.advance().await;
                    }
                })
            };

            system.start().await;
            info!(data_dir = %data_dir.display(), "Safeguard running");
            let server = ApiServer::new(
                ServerConfig {
                    host,
                    port,
                    ..Default::default()
                },
                system.clone(),
            );
            let served = server
                .run(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await;

            stepper.abort();
            system.shutdown().await;
            served?;
        }
    }

    Ok(())
}

async fn read_configuration(path: &Path) -> Result<SafetyConfiguration> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

/// The configuration file if given, otherwise the named preset.
async fn initial_configuration(cli: &Cli) -> Result<SafetyConfiguration> {
    if let Some(path) = &cli.config {
        return read_configuration(path).await;
    }
    presets::builtin()
        .into_iter()
        .find(|p| p.name == cli.preset)
        .with_context(|| format!("unknown preset: {}", cli.preset))
}

fn parse_side(raw: &str) -> Result<PositionSide> {
    match raw.to_ascii_lowercase().as_str() {
        "long" => Ok(PositionSide::Long),
        "short" => Ok(PositionSide::Short),
        other => bail!("unknown side: {other} (expected long or short)"),
    }
}
