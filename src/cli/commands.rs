//! CLI command definitions for lead-sniper.
//!
//! This module provides the command-line interface for running the pipeline
//! once, serving the trigger API, running the daily schedule, and checking a
//! configuration.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::metrics::init_metrics;
use crate::pipeline::{
    AutoHealConfig, AutoHealSupervisor, PipelineConfig, PipelineOrchestrator, RunState,
    RunSummary,
};
use crate::scheduler::{CancelSignal, SourceSpec};
use crate::trigger::{serve, CronTrigger};

/// Autonomous lead acquisition pipeline.
#[derive(Parser)]
#[command(name = "lead-sniper")]
#[command(about = "Scrape, validate, analyse and store property leads")]
#[command(version)]
#[command(
    long_about = "lead-sniper acquires raw records from configured sources, validates them with schema, cross-reference and external checks, scores accepted leads and stores them in the configured sinks.\n\nExample usage:\n  lead-sniper --config pipeline.yaml run\n  lead-sniper --config pipeline.yaml serve --schedule"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file. `LEAD_*` environment variables override it.
    #[arg(short, long, env = "LEAD_CONFIG", global = true)]
    pub config: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the pipeline once and print the run summary.
    Run(RunArgs),

    /// Serve the HTTP trigger, run status, health and metrics endpoints.
    Serve(ServeArgs),

    /// Run only the cron schedule trigger.
    Schedule(ScheduleArgs),

    /// Validate the configuration and print it.
    #[command(name = "check-config")]
    CheckConfig(CheckConfigArgs),
}

/// Arguments for `lead-sniper run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Source to scrape as `id=locator`; replaces the configured sources.
    #[arg(short, long = "source")]
    pub sources: Vec<String>,

    /// Output JSON to stdout instead of a human-readable summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `lead-sniper serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen address; defaults to the configured `bind`.
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Also run the cron schedule trigger.
    #[arg(long)]
    pub schedule: bool,

    /// Start a fresh run after a failed one.
    #[arg(long)]
    pub auto_heal: bool,
}

/// Arguments for `lead-sniper schedule`.
#[derive(Parser, Debug)]
pub struct ScheduleArgs {
    /// Cron expression (six fields, seconds first); defaults to the configured schedule.
    #[arg(long)]
    pub cron: Option<String>,

    /// Start a fresh run after a failed one.
    #[arg(long)]
    pub auto_heal: bool,
}

/// Arguments for `lead-sniper check-config`.
#[derive(Parser, Debug)]
pub struct CheckConfigArgs {
    /// Output JSON to stdout instead of YAML.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Run(args) => run_once_command(config, args).await,
        Commands::Serve(args) => run_serve_command(config, args).await,
        Commands::Schedule(args) => run_schedule_command(config, args).await,
        Commands::CheckConfig(args) => run_check_config_command(config, args),
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path)),
        None => PipelineConfig::from_env().context("Failed to load configuration from environment"),
    }
}

fn parse_source_args(args: &[String]) -> anyhow::Result<Vec<SourceSpec>> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((id, locator)) if !id.is_empty() && !locator.is_empty() => {
                Ok(SourceSpec::new(id, locator))
            }
            _ => Err(anyhow::anyhow!(
                "Invalid --source '{}', expected id=locator",
                arg
            )),
        })
        .collect()
}

fn start_metrics() {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Prometheus metrics unavailable");
    }
}

/// Raises `stop` on Ctrl-C.
fn stop_on_ctrl_c() -> CancelSignal {
    let stop = CancelSignal::new();
    let signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            signal.cancel();
        }
    });
    stop
}

fn spawn_auto_heal(orchestrator: &PipelineOrchestrator, config: &PipelineConfig, stop: &CancelSignal) {
    AutoHealSupervisor::new(
        orchestrator.clone(),
        config.clone(),
        AutoHealConfig {
            backoff: config.retry.clone(),
            ..AutoHealConfig::default()
        },
    )
    .spawn(stop.clone());
}

// ============================================================================
// Command Implementations
// ============================================================================

#[derive(Debug, Serialize)]
struct RunOutput<'a> {
    status: &'a str,
    summary: &'a RunSummary,
}

async fn run_once_command(mut config: PipelineConfig, args: RunArgs) -> anyhow::Result<()> {
    if !args.sources.is_empty() {
        config.sources = parse_source_args(&args.sources)?;
    }
    start_metrics();

    let orchestrator = PipelineOrchestrator::new(config.clone()).await?;
    let summary = orchestrator.start_run(config).await?;

    if args.json {
        let output = RunOutput {
            status: if summary.state == RunState::Complete {
                "complete"
            } else {
                "failed"
            },
            summary: &summary,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&summary);
    }

    if summary.state == RunState::Failed {
        return Err(anyhow::anyhow!(
            "Run {} failed: {}",
            summary.run_id,
            summary.error.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let c = &summary.counters;
    println!("\n=== Run {} ===", summary.run_id);
    println!("State:        {}", summary.state);
    if let Some(secs) = summary.duration_secs() {
        println!("Duration:     {:.1}s", secs);
    }
    println!("Scraped:      {}", c.scraped);
    println!("Failed tasks: {}", c.failed);
    println!("Validated:    {}", c.validated);
    println!("Rejected:     {}", c.rejected);
    println!("Quarantined:  {}", c.quarantined);
    println!("Analyzed:     {}", c.analyzed);
    println!("Stored:       {}", c.stored);
    println!("Duplicates:   {}", c.duplicates);
    if !summary.warnings.is_empty() {
        println!("Warnings:");
        for warning in &summary.warnings {
            println!("  - {}", warning);
        }
    }
    if let Some(error) = &summary.error {
        println!("Error:        {}", error);
    }
}

async fn run_serve_command(config: PipelineConfig, args: ServeArgs) -> anyhow::Result<()> {
    start_metrics();
    let bind = args.bind.unwrap_or_else(|| config.bind.clone());
    let orchestrator = PipelineOrchestrator::new(config.clone()).await?;
    let stop = stop_on_ctrl_c();

    if args.schedule {
        CronTrigger::new(&config.schedule_cron)?.spawn(
            orchestrator.clone(),
            config.clone(),
            stop.clone(),
        );
    }
    if args.auto_heal {
        spawn_auto_heal(&orchestrator, &config, &stop);
    }

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    serve(listener, orchestrator, stop).await?;
    Ok(())
}

async fn run_schedule_command(config: PipelineConfig, args: ScheduleArgs) -> anyhow::Result<()> {
    start_metrics();
    let cron = args.cron.unwrap_or_else(|| config.schedule_cron.clone());
    let trigger = CronTrigger::new(&cron)?;
    if let Some(next) = trigger.next_after(chrono::Utc::now()) {
        println!("Next scheduled run: {}", next.to_rfc3339());
    }

    let orchestrator = PipelineOrchestrator::new(config.clone()).await?;
    let stop = stop_on_ctrl_c();
    if args.auto_heal {
        spawn_auto_heal(&orchestrator, &config, &stop);
    }

    trigger.spawn(orchestrator, config, stop).await?;
    Ok(())
}

fn run_check_config_command(config: PipelineConfig, args: CheckConfigArgs) -> anyhow::Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("{}", serde_yaml::to_string(&config)?);
        println!("✓ Configuration is valid ({} sources, {} sinks)", config.sources.len(), config.sinks.len());
        for tick in next_scheduled_runs(&config.schedule_cron, 3)? {
            println!("  next scheduled run: {}", tick.to_rfc3339());
        }
    }
    Ok(())
}

fn next_scheduled_runs(expr: &str, count: usize) -> anyhow::Result<Vec<DateTime<Utc>>> {
    let trigger = CronTrigger::new(expr)?;
    Ok(trigger.upcoming(Utc::now(), count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_scheduled_runs() {
        let ticks = next_scheduled_runs("0 0 5 * * *", 3).unwrap();
        assert_eq!(ticks.len(), 3);
        assert!(ticks.windows(2).all(|w| w[1] - w[0] == chrono::Duration::days(1)));
        assert!(next_scheduled_runs("every morning", 3).is_err());
    }

    #[test]
    fn test_parse_source_args() {
        let sources = parse_source_args(&[
            "county=https://records.test/a".to_string(),
            "court=https://court.test/b?x=1".to_string(),
        ])
        .unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].locator, "https://court.test/b?x=1");

        assert!(parse_source_args(&["no-equals".to_string()]).is_err());
        assert!(parse_source_args(&["=locator".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_serve() {
        let cli = Cli::try_parse_from([
            "lead-sniper",
            "--config",
            "pipeline.yaml",
            "serve",
            "--bind",
            "127.0.0.1:9000",
            "--schedule",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("pipeline.yaml"));
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.bind.as_deref(), Some("127.0.0.1:9000"));
                assert!(args.schedule);
                assert!(!args.auto_heal);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_cli_parses_run_with_sources() {
        let cli = Cli::try_parse_from([
            "lead-sniper",
            "run",
            "--json",
            "--source",
            "a=https://a.test",
            "-s",
            "b=https://b.test",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert!(args.json);
                assert_eq!(args.sources.len(), 2);
            }
            _ => panic!("expected run"),
        }
    }
}
