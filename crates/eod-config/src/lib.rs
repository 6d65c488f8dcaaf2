//! Configuration for the eod workflow engine.
//!
//! Provides TOML-based configuration with:
//! - Staging path layout (`[paths]`)
//! - Container runtime settings (`[docker]`)
//! - Remote platform credentials and storage layout (`[remote]`)
//! - Remote job polling policy (`[polling]`)
//! - Config file layering (user config dir + project-local overrides)
//! - Secret resolution (env var → config file)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, PROJECT_CONFIG_FILE, USER_CONFIG_FILE, discover, user_config_dir, write_config,
};
pub use error::{ConfigError, Result};
pub use types::*;
