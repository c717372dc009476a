use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use humantime::format_duration;

use rampede::config::{ExecutorKind, Options};
use rampede::executor::RampPlan;

#[derive(Parser)]
#[command(
    name = "rampede",
    about = "Ramping virtual-user load generator for HTTP services",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the configured scenarios and evaluate thresholds
    Run {
        /// Config file path (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the target URL ({n} expands to a random integer)
        #[arg(long)]
        url: Option<String>,

        /// Multiply every stage and scenario duration by this factor
        #[arg(long)]
        duration_scale: Option<f64>,

        /// Write the end-of-run summary JSON to this path
        #[arg(long)]
        summary_export: Option<PathBuf>,

        /// Skip recording this run in history
        #[arg(long)]
        no_store: bool,

        /// Run-history database path
        #[arg(long)]
        db: Option<String>,
    },

    /// Print the VU schedule without sending any traffic
    Plan {
        /// Config file path (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show recent runs from history
    History {
        /// Maximum rows to show
        #[arg(long, default_value = "10")]
        limit: u32,

        /// Run-history database path
        #[arg(long)]
        db: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            url,
            duration_scale,
            summary_export,
            no_store,
            db,
        } => {
            let options = build_options(config, url, duration_scale, summary_export, no_store, db)?;
            let outcome = rampede::run(&options).await?;
            if !outcome.passed() {
                std::process::exit(2);
            }
        }
        Commands::Plan { config } => {
            let options = load_options(config)?;
            print_plan(&options)?;
        }
        Commands::History { limit, db } => {
            let db_path = db.unwrap_or_else(|| {
                Options::load_or_default().storage.db_path
            });
            let pool = rampede::storage::open_pool(&db_path)?;
            let runs = rampede::storage::recent_runs(&pool, limit)?;
            if runs.is_empty() {
                println!("No runs recorded in {}.", db_path);
            } else {
                println!(
                    "{:<10} | {:<12} | {:<18} | {:>9} | {:>8} | {:>9} | Created",
                    "Run", "Status", "Scenarios", "Requests", "Failed", "p95 ms"
                );
                println!(
                    "{:-<10}-|-{:-<12}-|-{:-<18}-|-{:-<9}-|-{:-<8}-|-{:-<9}-|-{:-<25}",
                    "", "", "", "", "", "", ""
                );
                for run in runs {
                    let short_id = run.run_id.get(..8).unwrap_or(&run.run_id);
                    println!(
                        "{:<10} | {:<12} | {:<18} | {:>9} | {:>8} | {:>9.1} | {}",
                        short_id,
                        run.status,
                        run.scenarios,
                        run.total_requests,
                        run.failed_requests,
                        run.p95_ms,
                        run.created_at
                    );
                }
            }
        }
    }

    Ok(())
}

fn load_options(config: Option<PathBuf>) -> Result<Options> {
    Ok(match config {
        Some(path) => Options::load(&path)?,
        None => Options::load_or_default(),
    })
}

/// Load options and fold in CLI overrides, then re-validate.
fn build_options(
    config: Option<PathBuf>,
    url: Option<String>,
    duration_scale: Option<f64>,
    summary_export: Option<PathBuf>,
    no_store: bool,
    db: Option<String>,
) -> Result<Options> {
    let mut options = load_options(config)?;

    if let Some(url) = url {
        options.request.url = url;
    }
    if let Some(scale) = duration_scale {
        if scale <= 0.0 || !scale.is_finite() {
            bail!("--duration-scale must be a positive number");
        }
        options
            .scale_durations(scale)
            .context("--duration-scale out of range")?;
    }
    if let Some(path) = summary_export {
        options.output.summary_export = Some(path);
    }
    if no_store {
        options.storage.enabled = false;
    }
    if let Some(db) = db {
        options.storage.db_path = db;
    }

    options.validate().context("invalid options")?;
    Ok(options)
}

/// Describe every scenario's VU schedule as a table.
fn print_plan(options: &Options) -> Result<()> {
    println!("\n=== Run Plan ===");
    println!("URL: {}", options.request.url);

    for (name, scenario) in &options.scenarios {
        match scenario.kind()? {
            ExecutorKind::RampingVus => {
                let plan = RampPlan::from_config(scenario);
                println!(
                    "\nScenario '{}': ramping-vus, {} stages, {} total, peak {} VUs",
                    name,
                    scenario.stages.len(),
                    format_duration(plan.total_duration()),
                    plan.peak_vus()
                );
                println!("{:<6} | {:<10} | Target VUs", "Stage", "Ends at");
                println!("{:-<6}-|-{:-<10}-|-{:-<10}", "", "", "");
                for (i, (end, target)) in plan.boundaries().iter().enumerate() {
                    println!(
                        "{:<6} | {:<10} | {}",
                        i + 1,
                        format_duration(*end).to_string(),
                        target
                    );
                }
            }
            ExecutorKind::ConstantVus => {
                let duration = scenario
                    .duration
                    .map(|d| format_duration(d).to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "\nScenario '{}': constant-vus, {} VUs for {}",
                    name, scenario.vus, duration
                );
            }
        }
    }

    println!("\nThresholds:");
    for (metric, specs) in &options.thresholds {
        for spec in specs {
            let abort = if spec.abort_on_fail() {
                "  (abort_on_fail)"
            } else {
                ""
            };
            println!("{:<20} | {}{}", metric, spec.expression(), abort);
        }
    }
    println!();

    Ok(())
}
