//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [paths]
//! host_base = "/home/me/runs"
//! container_base = "/staging"
//! foreign_host_prefix = "/host"
//!
//! [docker]
//! binary = "docker"
//!
//! [remote]
//! api_server = "https://agave.example.org"
//! username = "jdoe"
//! storage_system = "data.iplantcollaborative.org"
//! api_key = "client-key"
//!
//! [polling]
//! max_retries = 10
//! retry_backoff_ms = 1500
//! poll_interval_ms = 1000
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Environment variable holding the host staging directory.
pub const STAGING_DIR_ENV: &str = "STAGING_DIR";
/// Environment variable holding the remote API client secret.
pub const API_SECRET_ENV: &str = "EOD_API_SECRET";
/// Environment variable holding a remote refresh token.
pub const REFRESH_TOKEN_ENV: &str = "EOD_REFRESH_TOKEN";
/// Environment variable holding a pre-issued remote access token.
pub const ACCESS_TOKEN_ENV: &str = "EOD_ACCESS_TOKEN";

/// Default storage system for remote inputs, outputs and archives.
pub const DEFAULT_STORAGE_SYSTEM: &str = "data.iplantcollaborative.org";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EodConfig {
    /// Staging path layout.
    pub paths: Option<PathsConfig>,
    /// Local container runtime.
    pub docker: Option<DockerConfig>,
    /// Remote job platform. Absent means remote tasks cannot run.
    pub remote: Option<RemoteConfig>,
    /// Remote job polling policy.
    pub polling: Option<PollingConfig>,
}

impl EodConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections replace each other wholesale.
    pub fn merge(&mut self, other: EodConfig) {
        if other.paths.is_some() {
            self.paths = other.paths;
        }
        if other.docker.is_some() {
            self.docker = other.docker;
        }
        if other.remote.is_some() {
            self.remote = other.remote;
        }
        if other.polling.is_some() {
            self.polling = other.polling;
        }
    }

    pub fn paths(&self) -> PathsConfig {
        self.paths.clone().unwrap_or_default()
    }

    pub fn docker(&self) -> DockerConfig {
        self.docker.clone().unwrap_or_default()
    }

    pub fn polling(&self) -> PollingConfig {
        self.polling.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Paths
// ─────────────────────────────────────────────────────────────────────────────

/// Where workflow data lives on the host and inside the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Host directory that is mounted into the orchestrator.
    pub host_base: Option<PathBuf>,
    /// Mount point of `host_base` inside the orchestrator.
    pub container_base: PathBuf,
    /// Prefix under which foreign host paths are visible to the orchestrator.
    pub foreign_host_prefix: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            host_base: None,
            container_base: PathBuf::from("/staging"),
            foreign_host_prefix: PathBuf::from("/host"),
        }
    }
}

impl PathsConfig {
    /// Resolve the host base: `STAGING_DIR`, then the config file, then the
    /// current directory.
    pub fn resolve_host_base(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(STAGING_DIR_ENV)
            && !dir.is_empty()
        {
            return Ok(PathBuf::from(dir));
        }
        if let Some(ref base) = self.host_base {
            return Ok(base.clone());
        }
        std::env::current_dir().map_err(|e| ConfigError::ReadFile {
            path: ".".to_string(),
            source: e,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Docker
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Container runtime executable.
    pub binary: String,
    /// Extra `KEY=VALUE` pairs passed to every local container.
    pub env: Vec<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            env: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote platform
// ─────────────────────────────────────────────────────────────────────────────

/// Remote job platform account and storage layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the platform API.
    pub api_server: String,
    pub username: String,
    /// Storage system used for uploads and job archives.
    #[serde(default = "default_storage_system")]
    pub storage_system: String,
    /// Remote home directory. Defaults to the username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<String>,
    /// OAuth client key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// OAuth client secret. Prefer `EOD_API_SECRET`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    /// Refresh token. Prefer `EOD_REFRESH_TOKEN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

fn default_storage_system() -> String {
    DEFAULT_STORAGE_SYSTEM.to_string()
}

fn default_true() -> bool {
    true
}

impl RemoteConfig {
    /// Remote home directory, without surrounding slashes.
    ///
    /// `/` is rejected: workflows would be staged at the storage root.
    pub fn home_dir(&self) -> Result<String> {
        let raw = self.home_dir.as_deref().unwrap_or(&self.username);
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "remote.home_dir".to_string(),
                reason: format!("'{raw}' is not a usable home directory"),
            });
        }
        Ok(trimmed.to_string())
    }

    /// Remote working directory for one workflow: `<home_dir>/<workflow>`.
    pub fn working_dir(&self, workflow: &str) -> Result<String> {
        Ok(format!("{}/{}", self.home_dir()?, workflow))
    }

    /// Client secret from `EOD_API_SECRET`, falling back to the file.
    pub fn resolve_api_secret(&self) -> Option<String> {
        env_or(API_SECRET_ENV, self.api_secret.as_ref())
    }

    /// Refresh token from `EOD_REFRESH_TOKEN`, falling back to the file.
    pub fn resolve_refresh_token(&self) -> Option<String> {
        env_or(REFRESH_TOKEN_ENV, self.refresh_token.as_ref())
    }

    /// Pre-issued access token from `EOD_ACCESS_TOKEN`.
    pub fn resolve_access_token(&self) -> Option<String> {
        env_or(ACCESS_TOKEN_ENV, None)
    }

    pub fn has_plaintext_secret(&self) -> bool {
        self.api_secret.is_some() || self.refresh_token.is_some()
    }
}

fn env_or(var: &str, fallback: Option<&String>) -> Option<String> {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => fallback.cloned(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Polling
// ─────────────────────────────────────────────────────────────────────────────

/// Remote job polling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Retries of a single status query on 403/404.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for a submitted job.
    pub job_timeout_secs: u64,
    /// Upper bound on waiting for an upload to land.
    pub transfer_timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_backoff_ms: 1500,
            poll_interval_ms: 1000,
            job_timeout_secs: 86_400,
            transfer_timeout_secs: 600,
        }
    }
}

impl PollingConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(home: Option<&str>) -> RemoteConfig {
        RemoteConfig {
            api_server: "https://api.example.org".to_string(),
            username: "jstubbs".to_string(),
            storage_system: default_storage_system(),
            home_dir: home.map(str::to_string),
            api_key: None,
            api_secret: None,
            refresh_token: None,
            verify_tls: true,
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EodConfig::from_toml("").unwrap();
        assert!(config.remote.is_none());
        assert_eq!(config.paths().container_base, PathBuf::from("/staging"));
        assert_eq!(config.paths().foreign_host_prefix, PathBuf::from("/host"));
        assert_eq!(config.docker().binary, "docker");
        assert_eq!(config.polling().max_retries, 10);
        assert_eq!(config.polling().retry_backoff(), Duration::from_millis(1500));
        assert_eq!(config.polling().poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_remote_section_defaults() {
        let config = EodConfig::from_toml(
            r#"
[remote]
api_server = "https://api.example.org"
username = "jstubbs"
"#,
        )
        .unwrap();
        let remote = config.remote.unwrap();
        assert_eq!(remote.storage_system, DEFAULT_STORAGE_SYSTEM);
        assert!(remote.verify_tls);
        assert_eq!(remote.home_dir().unwrap(), "jstubbs");
    }

    #[test]
    fn test_working_dir() {
        assert_eq!(
            remote(None).working_dir("test_suite_wf").unwrap(),
            "jstubbs/test_suite_wf"
        );
        assert_eq!(
            remote(Some("/projects/lab/")).working_dir("wf").unwrap(),
            "projects/lab/wf"
        );
    }

    #[test]
    fn test_root_home_dir_rejected() {
        let err = remote(Some("/")).home_dir().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_merge_replaces_sections() {
        let mut base = EodConfig::from_toml(
            r#"
[docker]
binary = "podman"

[polling]
max_retries = 3
"#,
        )
        .unwrap();
        let overlay = EodConfig::from_toml(
            r#"
[polling]
max_retries = 7
"#,
        )
        .unwrap();
        base.merge(overlay);
        assert_eq!(base.docker().binary, "podman");
        assert_eq!(base.polling().max_retries, 7);
        // Unset fields in an overriding section fall back to defaults.
        assert_eq!(base.polling().retry_backoff_ms, 1500);
    }

    #[test]
    fn test_toml_roundtrip_keeps_remote() {
        let config = EodConfig {
            remote: Some(remote(Some("lab"))),
            ..Default::default()
        };
        let text = config.to_toml().unwrap();
        let parsed = EodConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.remote.unwrap().home_dir.as_deref(), Some("lab"));
    }
}
