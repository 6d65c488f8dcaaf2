//! Plan command - show what a run would do.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use eod_engine::{ExecutionContext, TaskKind, Workflow, WorkflowAssembler};
use serde::Serialize;

use super::Context;
use crate::runner::TaskGraph;

/// Arguments for the plan command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Workflow YAML file
    pub file: PathBuf,
}

#[derive(Debug, Serialize)]
struct PlannedTask<'a> {
    name: &'a str,
    doc: Option<&'a str>,
    kind: &'static str,
    after: Vec<&'a str>,
    targets: &'a [PathBuf],
    file_dep: &'a [PathBuf],
    volumes: Vec<String>,
}

/// Run the plan command.
pub async fn run(args: PlanArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config();
    let workflow = Arc::new(ctx.assemble(&loaded.config, &args.file)?);
    let exec = Arc::new(ExecutionContext::new(workflow.clone()));
    let graph = TaskGraph::new(WorkflowAssembler::descriptors(exec));

    let planned: Vec<PlannedTask<'_>> = graph
        .descriptors()
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let task = &workflow.tasks[i];
            PlannedTask {
                name: &d.name,
                doc: d.doc.as_deref(),
                kind: kind_label(&task.kind),
                after: graph.upstream_names(i),
                targets: &d.targets,
                file_dep: &d.file_dep,
                volumes: task
                    .output_volumes
                    .iter()
                    .chain(&task.input_volumes)
                    .map(|v| v.to_string())
                    .collect(),
            }
        })
        .collect();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&planned)?);
        return Ok(());
    }

    print_table(&workflow, &planned, ctx.verbose);
    Ok(())
}

fn kind_label(kind: &TaskKind) -> &'static str {
    match kind {
        TaskKind::Container { .. } => "container",
        TaskKind::RemoteApp { .. } => "remote-app",
        TaskKind::RemoteDownload { .. } => "download",
    }
}

fn print_table(workflow: &Workflow, planned: &[PlannedTask<'_>], verbose: bool) {
    let dim = Style::new().dim();
    println!("{}", style(format!("Plan for '{}'", workflow.name)).bold());
    println!("{}", dim.apply_to("─".repeat(60)));

    let width = planned.iter().map(|p| p.name.len()).max().unwrap_or(4).max(4);
    for task in planned {
        let after = if task.after.is_empty() {
            "-".to_string()
        } else {
            task.after.join(", ")
        };
        println!(
            "{:<width$}  {:<10}  after: {}",
            style(task.name).cyan(),
            task.kind,
            after,
            width = width
        );
        if let Some(doc) = task.doc {
            println!("{:<width$}  {}", "", dim.apply_to(doc), width = width);
        }
        if verbose {
            for target in task.targets {
                println!("{:<width$}  → {}", "", target.display(), width = width);
            }
            for volume in &task.volumes {
                println!("{:<width$}  -v {}", "", dim.apply_to(volume), width = width);
            }
        }
    }
}
