mod config;
mod engine;
mod signals;
mod types;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::{StrategyConfig, StrategyConfigLoader};
use engine::{
    evaluate, BacktestEngine, BacktestSettings, HistoryBar, PortfolioLedger, PortfolioState,
};
use types::MarketSnapshot;

#[derive(Parser)]
#[command(name = "etf-leverage-bot")]
#[command(author = "Trading Bot")]
#[command(version = "0.1.0")]
#[command(about = "Daily risk/allocation engine for a pledged-collateral leveraged ETF portfolio", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Strategy configuration file path (JSON); defaults used when absent
    #[arg(short, long, default_value = "strategy.json")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate today's snapshot against the portfolio and print the decision
    Evaluate {
        /// Market snapshot JSON (prices + indicator series)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Portfolio state JSON; a fresh all-cash state is used when missing
        #[arg(long)]
        state: PathBuf,

        /// Starting cash for a fresh state when the state file is missing
        #[arg(long, default_value = "1000000")]
        cash: Decimal,

        /// Apply the decision, accrue interest, and write the state back
        #[arg(long)]
        apply: bool,
    },
    /// Replay the daily cycle over historical bars
    Backtest {
        /// History JSON: array of daily bars with precomputed indicators
        #[arg(long)]
        history: PathBuf,

        /// Initial cash
        #[arg(long, default_value = "1000000")]
        cash: Decimal,

        /// Monthly contribution added on each month roll
        #[arg(long, default_value = "30000")]
        contribution: Decimal,

        /// Write the full report as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate the strategy configuration and exit
    ValidateConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("ETF Leverage Bot v0.1.0");

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Evaluate {
            snapshot,
            state,
            cash,
            apply,
        } => run_evaluate(&config, &snapshot, &state, cash, apply)?,
        Commands::Backtest {
            history,
            cash,
            contribution,
            output,
        } => run_backtest(&config, &history, cash, contribution, output.as_deref())?,
        Commands::ValidateConfig => {
            info!("Configuration OK");
        }
    }

    Ok(())
}

fn load_config(path: &str) -> Result<StrategyConfig> {
    if std::path::Path::new(path).exists() {
        let mut loader = StrategyConfigLoader::new(path);
        let config = loader.load()?;
        info!("Loaded strategy configuration from {}", path);
        Ok(config.clone())
    } else {
        warn!("Config file {} not found, using built-in defaults", path);
        Ok(StrategyConfig::default())
    }
}

fn run_evaluate(
    config: &StrategyConfig,
    snapshot_path: &std::path::Path,
    state_path: &std::path::Path,
    starting_cash: Decimal,
    apply: bool,
) -> Result<()> {
    let raw = fs::read_to_string(snapshot_path)
        .with_context(|| format!("failed to read snapshot {}", snapshot_path.display()))?;
    let snapshot: MarketSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse snapshot {}", snapshot_path.display()))?;

    let state = if state_path.exists() {
        let raw = fs::read_to_string(state_path)
            .with_context(|| format!("failed to read state {}", state_path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse state {}", state_path.display()))?
    } else {
        warn!(
            "State file {} not found, starting fresh with {} cash",
            state_path.display(),
            starting_cash
        );
        PortfolioState::with_cash(starting_cash)
    };

    let decision = evaluate(&snapshot, config, &state);
    println!("{}", decision);
    println!(
        "net asset {} | margin {}% | borrow {} | exposure {}",
        decision.metrics.net_asset.round_dp(0),
        decision.metrics.maintenance_margin,
        decision.metrics.borrow_ratio,
        decision.metrics.exposure_ratio
    );

    if apply {
        let mut ledger = PortfolioLedger::new(state);
        ledger.apply(&decision, snapshot.date, &snapshot.prices, config);
        ledger.apply_daily_interest(&config.trading);
        ledger.mark_to_market(snapshot.date, &snapshot.prices, &config.trading);

        let json = serde_json::to_string_pretty(ledger.state())?;
        fs::write(state_path, json)
            .with_context(|| format!("failed to write state {}", state_path.display()))?;
        info!("State updated: {}", state_path.display());
    }

    Ok(())
}

fn run_backtest(
    config: &StrategyConfig,
    history_path: &std::path::Path,
    initial_cash: Decimal,
    contribution: Decimal,
    output: Option<&std::path::Path>,
) -> Result<()> {
    let raw = fs::read_to_string(history_path)
        .with_context(|| format!("failed to read history {}", history_path.display()))?;
    let bars: Vec<HistoryBar> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse history {}", history_path.display()))?;
    info!("Loaded {} bars from {}", bars.len(), history_path.display());

    let settings = BacktestSettings {
        initial_cash,
        monthly_contribution: contribution,
        ..BacktestSettings::default()
    };
    let engine = BacktestEngine::new(config.clone(), settings);
    let report = engine.run(&bars)?;

    println!("{}", report);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        info!("Report saved to {}", path.display());
    }

    Ok(())
}
