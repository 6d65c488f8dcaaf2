//! eod - container workflow runner
//!
//! Main entry point for the eod CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod runner;

use commands::{config, plan, run, validate};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// eod - run container and remote-job workflows declared in YAML
#[derive(Parser)]
#[command(name = "eod")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config directory (default: platform config dir)
    #[arg(long, global = true, env = "EOD_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Host staging directory (overrides STAGING_DIR and config)
    #[arg(long, global = true)]
    pub host_base: Option<PathBuf>,

    /// Where the host staging directory is visible to eod
    #[arg(long, global = true)]
    pub container_base: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow file without running anything
    Validate(validate::ValidateArgs),

    /// Show tasks, their dependencies and the files they produce
    Plan(plan::PlanArgs),

    /// Run a workflow
    Run(run::RunArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "eod=debug,eod_engine=debug,eod_client=debug,eod_config=debug,info"
    } else {
        "eod=info,eod_engine=info,eod_client=info,eod_config=warn,warn"
    };

    let log_dir = cli
        .config_dir
        .clone()
        .or_else(eod_config::user_config_dir)
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "eod.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "eod=trace,eod_engine=trace,eod_client=trace,eod_config=trace,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        config_dir: cli.config_dir,
        host_base: cli.host_base,
        container_base: cli.container_base,
    };

    match cli.command {
        Commands::Validate(args) => validate::run(args, &ctx).await,
        Commands::Plan(args) => plan::run(args, &ctx).await,
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
