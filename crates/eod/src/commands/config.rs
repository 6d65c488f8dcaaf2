//! Config command - configuration management.

use anyhow::{Context as _, Result, bail};
use clap::{Args, Subcommand};
use console::{Style, style};
use eod_config::{EodConfig, PROJECT_CONFIG_FILE, PathsConfig, PollingConfig, USER_CONFIG_FILE};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration and where it came from
    Show,

    /// Show the user configuration file path
    Path,

    /// Write a config file with defaults
    Init {
        /// Create project-local config (./eod.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Path => cmd_path(ctx),
        ConfigCommand::Init { local, force } => cmd_init(ctx, local, force),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config();

    if ctx.json_output {
        let sources = loaded.loaded_from();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "sources": sources,
                "config": loaded.config,
                "warnings": loaded.warnings,
            }))?
        );
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}\n", style("# eod configuration").bold());

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("{}\n", dim.apply_to("No config files loaded (using defaults)"));
    } else {
        for path in sources {
            println!("{} {}", dim.apply_to("loaded:"), path.display());
        }
        println!();
    }

    print!("{}", loaded.config.to_toml()?);
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    let path = user_config_path(ctx)?;
    if ctx.json_output {
        println!("{}", serde_json::json!({ "path": path }));
    } else {
        println!("{}", path.display());
    }
    Ok(())
}

fn cmd_init(ctx: &Context, local: bool, force: bool) -> Result<()> {
    let path = if local {
        std::env::current_dir()
            .context("Failed to read current directory")?
            .join(PROJECT_CONFIG_FILE)
    } else {
        user_config_path(ctx)?
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let config = EodConfig {
        paths: Some(PathsConfig::default()),
        polling: Some(PollingConfig::default()),
        ..EodConfig::default()
    };
    eod_config::write_config(&config, &path)?;
    println!("{} Wrote {}", style("✓").green(), path.display());
    Ok(())
}

fn user_config_path(ctx: &Context) -> Result<std::path::PathBuf> {
    ctx.config_dir
        .clone()
        .or_else(eod_config::user_config_dir)
        .map(|d| d.join(USER_CONFIG_FILE))
        .context("Could not determine a config directory; pass --config-dir")
}
