//! CLI command handlers.

pub mod config;
pub mod plan;
pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use eod_config::{EodConfig, LoadedConfig};
use eod_engine::{PathTranslator, Workflow, WorkflowAssembler, WorkflowSource};
use tracing::warn;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Overrides the user config directory.
    pub config_dir: Option<PathBuf>,
    pub host_base: Option<PathBuf>,
    pub container_base: Option<PathBuf>,
}

impl Context {
    /// Discover and merge config layers, logging any warnings.
    pub fn load_config(&self) -> LoadedConfig {
        let loaded = eod_config::discover(self.config_dir.as_deref(), Path::new("."));
        for warning in &loaded.warnings {
            warn!("{warning}");
        }
        loaded
    }

    /// Path layout from config, with command-line overrides applied.
    pub fn translator(&self, config: &EodConfig) -> Result<PathTranslator> {
        let paths = config.paths();
        let host_base = match &self.host_base {
            Some(base) => base.clone(),
            None => paths.resolve_host_base()?,
        };
        let host_base = absolute(&host_base)?;
        let container_base = match &self.container_base {
            Some(base) => absolute(base)?,
            None => paths.container_base.clone(),
        };
        Ok(PathTranslator::new(
            host_base,
            container_base,
            paths.foreign_host_prefix.clone(),
        )?)
    }

    /// Parse and assemble a workflow file.
    pub fn assemble(&self, config: &EodConfig, file: &Path) -> Result<Workflow> {
        let source = WorkflowSource::from_file(file)?;
        let translator = self.translator(config)?;
        let workflow = WorkflowAssembler::new(translator)
            .build(&source)
            .with_context(|| format!("Invalid workflow '{}'", file.display()))?;
        Ok(workflow)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}
