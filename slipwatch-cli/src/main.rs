//! Slipwatch CLI: run landslide-monitoring scenarios and manage their artifacts.
//!
//! Commands:
//! - `run`: organize, analyze and export every configured area for a run time
//! - `clean`: remove the ancillary and destination artifacts of a run time
//! - `check`: validate a config and print the resolved time range

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use slipwatch_core::{parse_time, set_time};
use slipwatch_runner::{clean_scenario, run_scenario, ScenarioConfig, ScenarioReport};

#[derive(Parser)]
#[command(
    name = "slipwatch",
    about = "Slipwatch CLI: rain, soil-moisture and soil-slips scenario runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scenario pipeline for every configured area.
    Run {
        /// Path to the scenario TOML file.
        #[arg(long)]
        config: PathBuf,

        /// Run time ("YYYY-MM-DD HH:MM"). Defaults to the config, then now.
        #[arg(long)]
        time: Option<String>,
    },
    /// Remove the artifacts produced for a run time.
    Clean {
        /// Path to the scenario TOML file.
        #[arg(long)]
        config: PathBuf,

        /// Run time ("YYYY-MM-DD HH:MM"). Defaults to the config, then now.
        #[arg(long)]
        time: Option<String>,
    },
    /// Validate a config and print the time range it resolves to.
    Check {
        /// Path to the scenario TOML file.
        #[arg(long)]
        config: PathBuf,

        /// Run time ("YYYY-MM-DD HH:MM"). Defaults to the config, then now.
        #[arg(long)]
        time: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run { config, time } => run_cmd(&config, time.as_deref()),
        Commands::Clean { config, time } => clean_cmd(&config, time.as_deref()),
        Commands::Check { config, time } => check_cmd(&config, time.as_deref()),
    };
    if let Err(e) = &result {
        error!("slipwatch failed: {e:#}");
    }
    result
}

fn load(config_path: &Path, time: Option<&str>) -> Result<(ScenarioConfig, NaiveDateTime)> {
    let config = ScenarioConfig::load(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    let time_run = match time {
        Some(raw) => parse_time(raw).with_context(|| format!("invalid --time '{raw}'"))?,
        None => match config.time.time_run()? {
            Some(t) => t,
            None => chrono::Local::now().naive_local(),
        },
    };
    Ok((config, time_run))
}

fn run_cmd(config_path: &Path, time: Option<&str>) -> Result<()> {
    let (config, time_run) = load(config_path, time)?;
    let started = std::time::Instant::now();
    let report = run_scenario(&config, time_run)
        .with_context(|| format!("running scenario for {time_run}"))?;
    print_summary(&report);
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "scenario finished");
    Ok(())
}

fn clean_cmd(config_path: &Path, time: Option<&str>) -> Result<()> {
    let (config, time_run) = load(config_path, time)?;
    let removed = clean_scenario(&config, time_run)
        .with_context(|| format!("cleaning artifacts for {time_run}"))?;
    println!("Removed {removed} artifact(s) for {time_run}");
    Ok(())
}

fn check_cmd(config_path: &Path, time: Option<&str>) -> Result<()> {
    let (config, time_run) = load(config_path, time)?;
    let setup = set_time(time_run, &config.time.window_spec()?)?;
    println!("Config OK: {}", config_path.display());
    println!("  time run:   {}", setup.time_run.format("%Y-%m-%d %H:%M"));
    if let (Some(first), Some(last)) = (setup.first(), setup.last()) {
        println!(
            "  time range: {} .. {} ({} steps)",
            first.format("%Y-%m-%d %H:%M"),
            last.format("%Y-%m-%d %H:%M"),
            setup.time_range.len()
        );
    }
    let areas: Vec<&str> = config.areas.iter().map(|a| a.name.as_str()).collect();
    println!("  areas:      {}", areas.join(", "));
    Ok(())
}

fn print_summary(report: &ScenarioReport) {
    println!();
    println!("=== Scenario ===");
    println!("Time run:   {}", report.time_run.format("%Y-%m-%d %H:%M"));
    println!("Time pivot: {}", report.pivot.format("%Y-%m-%d %H:%M"));
    println!();
    for area in &report.areas {
        let status = if area.exported { "written" } else { "exists" };
        println!(
            "{:<16} {:>5} rows  {:<8} {}",
            area.area,
            area.rows,
            status,
            area.destination.display()
        );
        if let Some(ind) = &area.indicators {
            for (window, value) in &ind.rain_accumulated {
                match value {
                    Some(v) => println!("  rain {window:>4} accumulated: {v:.2}"),
                    None => println!("  rain {window:>4} accumulated: n/a"),
                }
            }
            for (metric, value) in &ind.soil_moisture {
                println!("  soil moisture {metric:?}: {value:.2}");
            }
        }
    }
}
