//! Validate command - assemble a workflow and report problems.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::style;
use serde_json::json;

use super::Context;

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Workflow YAML file
    pub file: PathBuf,
}

/// Run the validate command.
pub async fn run(args: ValidateArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config();
    let workflow = ctx.assemble(&loaded.config, &args.file)?;

    let downloads = workflow.tasks.iter().filter(|t| t.is_download()).count();
    let declared = workflow.tasks.len() - downloads;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "valid": true,
                "name": workflow.name,
                "tasks": declared,
                "downloads": downloads,
                "global_inputs": workflow.global_inputs.len(),
            }))?
        );
        return Ok(());
    }

    println!(
        "{} Workflow '{}' is valid",
        style("✓").green(),
        style(&workflow.name).bold()
    );
    println!("  Global inputs: {}", style(workflow.global_inputs.len()).cyan());
    println!("  Tasks:         {}", style(declared).cyan());
    if downloads > 0 {
        println!("  Downloads:     {}", style(downloads).cyan());
    }
    if ctx.verbose {
        println!();
        for task in &workflow.tasks {
            println!("  {} ({:?})", task.name, task.execution);
        }
    }
    Ok(())
}
