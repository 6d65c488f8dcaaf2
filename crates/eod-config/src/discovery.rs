//! Where config files live and how their layers stack.
//!
//! The user file (`<config dir>/config.toml`) is read first, then
//! `eod.toml` in the project directory. Sections in a later file replace
//! the same sections of an earlier one. Environment variables and command
//! line flags are applied afterwards by the caller.

use std::path::{Path, PathBuf};

use crate::{ConfigError, EodConfig, Result};

pub const PROJECT_CONFIG_FILE: &str = "eod.toml";

pub const USER_CONFIG_FILE: &str = "config.toml";

/// Takes precedence over the platform config directory.
const CONFIG_DIR_ENV: &str = "EOD_CONFIG_DIR";

/// The merged config and what went into it.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: EodConfig,
    /// Files that were merged, lowest precedence first.
    pub loaded: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    pub fn loaded_from(&self) -> &[PathBuf] {
        &self.loaded
    }

    fn layer(&mut self, path: &Path) {
        if !path.is_file() {
            return;
        }
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile {
                path: path.display().to_string(),
                source: e,
            })
            .and_then(|text| EodConfig::from_toml(&text));
        match parsed {
            Ok(layer) => {
                self.config.merge(layer);
                self.loaded.push(path.to_path_buf());
            }
            // A broken layer is skipped so the others still apply.
            Err(e) => self.warnings.push(format!("Skipped {}: {e}", path.display())),
        }
    }
}

/// Merge the user and project layers.
///
/// `config_dir` replaces the user config directory when given.
pub fn discover(config_dir: Option<&Path>, project_dir: &Path) -> LoadedConfig {
    let mut loaded = LoadedConfig::default();

    if let Some(dir) = config_dir.map(Path::to_path_buf).or_else(user_config_dir) {
        loaded.layer(&dir.join(USER_CONFIG_FILE));
    }
    loaded.layer(&project_dir.join(PROJECT_CONFIG_FILE));

    if loaded
        .config
        .remote
        .as_ref()
        .is_some_and(|r| r.has_plaintext_secret())
    {
        loaded.warnings.push(
            "[remote] holds a secret in plain text; prefer EOD_API_SECRET and EOD_REFRESH_TOKEN"
                .to_string(),
        );
    }
    loaded
}

/// `EOD_CONFIG_DIR` if set, else `<platform config dir>/eod`.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join("eod")),
    }
}

/// Serialize `config` to `path`, creating its directory.
pub fn write_config(config: &EodConfig, path: &Path) -> Result<()> {
    let write_err = |p: &Path, e| ConfigError::WriteFile {
        path: p.display().to_string(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
    }
    std::fs::write(path, config.to_toml()?).map_err(|e| write_err(path, e))
}
