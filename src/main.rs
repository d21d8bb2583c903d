use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use ath_dca_optimizer::config::{RunParams, load_params};
use ath_dca_optimizer::logging::setup_logging;
use ath_dca_optimizer::series::load_prices_from_csv;
use ath_dca_optimizer::{DailySeries, SimulationOptions, aggregate_daily, optimize, simulate};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::info;

/// Generations between progress log lines.
const PROGRESS_LOG_EVERY: usize = 25;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Backtest and optimize buy-the-drawdown DCA strategies"
)]
struct Args {
    /// Debug-level logging (RUST_LOG overrides).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay one strategy over the price history.
    Backtest {
        /// CSV with `timestamp,price` rows.
        #[arg(long)]
        data_file: PathBuf,
        /// JSON object with strategy and tier settings.
        #[arg(long)]
        params: Option<PathBuf>,
        #[arg(long, default_value = "backtest_result.json")]
        out: PathBuf,
        /// Include every scheduled investment in the output.
        #[arg(long)]
        ledger: bool,
    },
    /// Search tier multipliers with a genetic algorithm.
    Optimize {
        #[arg(long)]
        data_file: PathBuf,
        #[arg(long)]
        params: Option<PathBuf>,
        #[arg(long, default_value_t = 20260226)]
        seed: u64,
        #[arg(long, default_value = "optimized_tiers.json")]
        out: PathBuf,
    },
}

fn load_series(path: &Path) -> Result<DailySeries> {
    let raw = load_prices_from_csv(path)?;
    if raw.is_empty() {
        bail!("price data is empty: {}", path.display());
    }
    let series = aggregate_daily(&raw);
    info!(
        ticks = raw.len(),
        days = series.len(),
        first = ?series.first_date(),
        last = ?series.last_date(),
        "price series ready"
    );
    Ok(series)
}

fn load_run_params(params: Option<&Path>, series: &DailySeries) -> Result<RunParams> {
    let (Some(first), Some(last)) = (series.first_date(), series.last_date()) else {
        bail!("price series has no dates");
    };
    RunParams::from_params(&load_params(params)?, first, last)
}

fn write_json(path: &Path, payload: &Value) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(payload)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "saved result");
    Ok(())
}

fn run_backtest(data_file: &Path, params: Option<&Path>, out: &Path, ledger: bool) -> Result<()> {
    let series = load_series(data_file)?;
    let run = load_run_params(params, &series)?;

    let result = simulate(
        &series,
        &run.strategy,
        &run.tiers,
        SimulationOptions {
            lite_mode: !ledger,
            series_already_canonical: true,
        },
    );

    info!(
        invested = result.total_invested,
        units = result.total_units,
        average_cost = result.average_cost,
        roi_latest = result.roi_at_latest_price,
        roi_last_event = result.roi_at_last_event,
        max_drawdown = result.max_drawdown_observed,
        depleted = result.depleted,
        "backtest finished"
    );

    let payload = json!({
        "generated_at_utc": Utc::now().to_rfc3339(),
        "data_file": data_file,
        "strategy": run.strategy,
        "tiers": run.tiers,
        "result": result,
    });
    write_json(out, &payload)
}

fn run_optimize(data_file: &Path, params: Option<&Path>, seed: u64, out: &Path) -> Result<()> {
    let series = load_series(data_file)?;
    let run = load_run_params(params, &series)?;

    let outcome = optimize(&series, &run.strategy, &run.optimizer, seed, None, |p| {
        if p.generation % PROGRESS_LOG_EVERY == 0 || p.generation == run.optimizer.generations {
            info!(
                generation = p.generation,
                percent = p.percent,
                best_roi = p.best_fitness,
                "progress"
            );
        }
    })?;

    if outcome.top.is_empty() {
        bail!("optimizer returned no strategies");
    }

    let top: Vec<Value> = outcome
        .top
        .iter()
        .enumerate()
        .map(|(i, g)| {
            json!({
                "rank": i + 1,
                "fitness_roi": g.fitness(),
                "genes": g.genes(),
                "tiers": g.tiers(),
                "metrics": g.metrics(),
            })
        })
        .collect();

    for (i, g) in outcome.top.iter().enumerate() {
        info!(rank = i + 1, roi = g.fitness(), genes = ?g.genes(), "top strategy");
    }

    let payload = json!({
        "objective": "maximize ROI at latest price",
        "generated_at_utc": Utc::now().to_rfc3339(),
        "data_file": data_file,
        "seed": seed,
        "algorithm": "genetic search over monotone depth-band multipliers",
        "strategy": run.strategy,
        "optimizer": run.optimizer,
        "generations_completed": outcome.generations_completed,
        "evaluations": outcome.evaluations,
        "cancelled": outcome.cancelled,
        "top_strategies": top,
    });
    write_json(out, &payload)
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose)?;

    match args.command {
        Command::Backtest {
            data_file,
            params,
            out,
            ledger,
        } => run_backtest(&data_file, params.as_deref(), &out, ledger),
        Command::Optimize {
            data_file,
            params,
            seed,
            out,
        } => run_optimize(&data_file, params.as_deref(), seed, &out),
    }
}
