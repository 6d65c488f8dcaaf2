//! Run command - materialize and execute a workflow.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use console::{Style, style};
use eod_client::AgaveClient;
use eod_config::{EodConfig, RemoteConfig};
use eod_engine::{ExecutionContext, PollPolicy, RemoteLayout, Workflow, WorkflowAssembler};
use tracing::info;

use super::Context;
use crate::runner::{self, Outcome, RunReport, TaskGraph};

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Workflow YAML file
    pub file: PathBuf,

    /// Maximum number of tasks to run at once (default: CPU count)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Give up waiting on a remote job after this many seconds
    #[arg(long)]
    pub job_timeout: Option<u64>,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config();
    let config = &loaded.config;
    let workflow = Arc::new(ctx.assemble(config, &args.file)?);
    WorkflowAssembler::materialize(&workflow).context("Failed to prepare staging directory")?;

    let exec = Arc::new(execution_context(config, workflow.clone(), args.job_timeout)?);
    let graph = TaskGraph::new(WorkflowAssembler::descriptors(exec));

    let jobs = args.jobs.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    info!(workflow = %workflow.name, tasks = graph.len(), jobs, "Running workflow");

    let report = runner::run(&graph, jobs).await;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&workflow, &report);
    }

    if !report.is_success() {
        bail!(
            "{} task(s) failed, {} skipped",
            report.failed(),
            report.skipped()
        );
    }
    Ok(())
}

fn execution_context(
    config: &EodConfig,
    workflow: Arc<Workflow>,
    job_timeout: Option<u64>,
) -> Result<ExecutionContext> {
    let docker = config.docker();
    let polling = config.polling();
    let policy = PollPolicy {
        max_retries: polling.max_retries,
        retry_backoff: polling.retry_backoff(),
        poll_interval: polling.poll_interval(),
    };

    let mut exec = ExecutionContext::new(workflow.clone())
        .with_docker_binary(docker.binary)
        .with_docker_env(docker.env)
        .with_poll_policy(policy)
        .with_job_timeout(
            job_timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| polling.job_timeout()),
        )
        .with_transfer_timeout(polling.transfer_timeout());

    if let Some(remote) = &config.remote {
        let client = remote_client(remote, polling.transfer_timeout())?;
        let layout = RemoteLayout::new(client.storage_system(), remote.working_dir(&workflow.name)?);
        exec = exec.with_remote(Arc::new(client), layout);
    }
    Ok(exec)
}

fn remote_client(remote: &RemoteConfig, transfer_timeout: Duration) -> Result<AgaveClient> {
    let builder = AgaveClient::builder()
        .base_url(&remote.api_server)
        .storage_system(&remote.storage_system)
        .verify_tls(remote.verify_tls)
        .transfer_timeout(transfer_timeout);

    let builder = match remote.resolve_access_token() {
        Some(token) => builder.access_token(token),
        None => {
            let api_key = remote
                .api_key
                .clone()
                .context("remote.api_key is required unless EOD_ACCESS_TOKEN is set")?;
            let api_secret = remote
                .resolve_api_secret()
                .context("Set EOD_API_SECRET or remote.api_secret")?;
            let refresh_token = remote
                .resolve_refresh_token()
                .context("Set EOD_REFRESH_TOKEN or remote.refresh_token")?;
            builder.refresh_credentials(api_key, api_secret, refresh_token)
        }
    };
    Ok(builder.build()?)
}

fn print_report(workflow: &Workflow, report: &RunReport) {
    let dim = Style::new().dim();
    println!();
    println!("{}", style(format!("Workflow '{}'", workflow.name)).bold());
    println!("{}", dim.apply_to("─".repeat(60)));

    for task in &report.tasks {
        let took = dim.apply_to(format!("({} ms)", task.elapsed_ms));
        match &task.outcome {
            Outcome::Completed => println!("{} {} {}", style("✓").green(), task.name, took),
            Outcome::Failed { error } => {
                println!("{} {} {}", style("✗").red(), task.name, took);
                println!("    {}", style(error).red());
            }
            Outcome::Skipped { blocked_by } => println!(
                "{} {} {}",
                style("⊘").yellow(),
                task.name,
                dim.apply_to(format!("skipped, blocked by {blocked_by}"))
            ),
        }
    }

    println!();
    println!(
        "{} completed, {} failed, {} skipped",
        style(report.completed()).green(),
        style(report.failed()).red(),
        style(report.skipped()).yellow()
    );
}
