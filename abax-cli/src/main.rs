use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use abax_broker::FeeModel;
use abax_core::Bar;
use abax_strategy::{load_strategy, register_builtin_strategies, registered_strategies};
use abax_trader::Backtest;

mod settings;
mod telemetry;

use settings::{load_config, AppConfig};
use telemetry::init_tracing;

#[derive(Parser)]
#[command(author, version, about = "abax CLI")]
struct Cli {
    /// Increases logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Selects which configuration environment to load (maps to config/{env}.toml)
    #[arg(long, default_value = "default")]
    env: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtesting workflows
    Backtest {
        #[command(subcommand)]
        action: BacktestCommand,
    },
    /// List the registered strategies
    Strategies,
}

#[derive(Subcommand)]
enum BacktestCommand {
    /// Run a single backtest from a run file
    Run(BacktestRunArgs),
}

#[derive(Args)]
struct BacktestRunArgs {
    /// TOML run file describing the strategy and its replay bars
    #[arg(long)]
    file: PathBuf,
}

/// On-disk description of one backtest run.
#[derive(Debug, Deserialize)]
struct RunFile {
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    strategy: String,
    #[serde(default)]
    cash: Option<Decimal>,
    #[serde(default)]
    variable_transaction_fee: Option<Decimal>,
    #[serde(default)]
    fee_per_share: Option<Decimal>,
    #[serde(default)]
    fixed_transaction_fee: Option<Decimal>,
    #[serde(default)]
    params: Option<toml::Value>,
    #[serde(default)]
    bars: Vec<Bar>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app_config = load_config(Some(&cli.env))?;
    let filter = match cli.verbose {
        0 => app_config.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    init_tracing(&filter)?;
    register_builtin_strategies();

    match cli.command {
        Commands::Strategies => {
            for name in registered_strategies() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Backtest { action } => match action {
            BacktestCommand::Run(args) => run_backtest(args, &app_config).await,
        },
    }
}

async fn run_backtest(args: BacktestRunArgs, app_config: &AppConfig) -> Result<()> {
    let contents = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read run file {}", args.file.display()))?;
    let run: RunFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse run file {}", args.file.display()))?;
    if run.bars.is_empty() {
        bail!("run file declares no bars");
    }

    let params = run
        .params
        .unwrap_or_else(|| toml::Value::Table(Default::default()));
    let strategy = load_strategy(&run.strategy, params)
        .with_context(|| format!("failed to build strategy {}", run.strategy))?;

    let defaults = &app_config.backtest;
    let fees = FeeModel {
        variable_transaction_fee: run
            .variable_transaction_fee
            .unwrap_or(defaults.variable_transaction_fee),
        fee_per_share: run.fee_per_share.unwrap_or(defaults.fee_per_share),
        fixed_transaction_fee: run
            .fixed_transaction_fee
            .unwrap_or(defaults.fixed_transaction_fee),
    };
    let cash = run.cash.unwrap_or(defaults.cash);

    info!(
        strategy = %run.strategy,
        start = %run.start,
        stop = %run.stop,
        bars = run.bars.len(),
        "starting backtest"
    );
    let trader = Backtest::new(run.start, run.stop)
        .cash(cash)
        .fees(fees)
        .bars(run.bars)
        .strategy(strategy)
        .run()
        .await?;

    let snapshots = trader.snapshots();
    let ending_cash = trader.cash()?;
    println!("ticks:        {}", snapshots.len());
    println!("ending cash:  {ending_cash}");
    if let Some(last) = snapshots.last() {
        println!("ending value: {}", last.value);
        for (ticker, quantity) in &last.positions {
            if !quantity.is_zero() {
                println!("position:     {ticker} {quantity}");
            }
        }
    }
    Ok(())
}
