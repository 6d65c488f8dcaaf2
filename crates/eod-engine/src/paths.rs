//! Translation between host, orchestrator and container filesystems.
//!
//! The orchestrator runs inside a container of its own. The host staging
//! directory (`host_base`) is mounted at `container_base`, and the rest of the
//! host filesystem is visible under `foreign_prefix`:
//!
//! ```text
//! host                               orchestrator
//! <host_base>/wf/add5/data/out.txt → /staging/wf/add5/data/out.txt
//! /home/me/input.txt               → /host/home/me/input.txt
//! ```
//!
//! Task containers are launched by the host's runtime, so their volumes use
//! host paths while the orchestrator reads and writes the same files through
//! the translated paths.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

pub const DEFAULT_CONTAINER_BASE: &str = "/staging";
pub const DEFAULT_FOREIGN_PREFIX: &str = "/host";

/// Pure, total mapping between host paths and orchestrator paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTranslator {
    host_base: PathBuf,
    container_base: PathBuf,
    foreign_prefix: PathBuf,
}

impl PathTranslator {
    /// Build a translator. All three bases must be absolute, and the two
    /// orchestrator-side prefixes must not nest (otherwise `to_host` would be
    /// ambiguous).
    pub fn new(
        host_base: impl Into<PathBuf>,
        container_base: impl Into<PathBuf>,
        foreign_prefix: impl Into<PathBuf>,
    ) -> Result<Self> {
        let host_base = host_base.into();
        let container_base = container_base.into();
        let foreign_prefix = foreign_prefix.into();

        for (name, path) in [
            ("host base", &host_base),
            ("container base", &container_base),
            ("foreign host prefix", &foreign_prefix),
        ] {
            if !path.is_absolute() {
                return Err(EngineError::Configuration(format!(
                    "{name} '{}' must be absolute",
                    path.display()
                )));
            }
        }
        if container_base == Path::new("/") || foreign_prefix == Path::new("/") {
            return Err(EngineError::Configuration(
                "container base and foreign host prefix cannot be '/'".to_string(),
            ));
        }
        if container_base.starts_with(&foreign_prefix) || foreign_prefix.starts_with(&container_base)
        {
            return Err(EngineError::Configuration(format!(
                "container base '{}' and foreign host prefix '{}' overlap",
                container_base.display(),
                foreign_prefix.display()
            )));
        }

        Ok(Self {
            host_base,
            container_base,
            foreign_prefix,
        })
    }

    /// Translator with the default orchestrator layout.
    pub fn with_host_base(host_base: impl Into<PathBuf>) -> Result<Self> {
        Self::new(host_base, DEFAULT_CONTAINER_BASE, DEFAULT_FOREIGN_PREFIX)
    }

    pub fn host_base(&self) -> &Path {
        &self.host_base
    }

    pub fn container_base(&self) -> &Path {
        &self.container_base
    }

    pub fn foreign_prefix(&self) -> &Path {
        &self.foreign_prefix
    }

    /// Map a host path to where the orchestrator sees it.
    ///
    /// Prefix matching is by path component, so `/data/run2` is not treated
    /// as living under a host base of `/data/run`.
    pub fn to_container(&self, host: &Path) -> PathBuf {
        match host.strip_prefix(&self.host_base) {
            Ok(rest) => join_relative(&self.container_base, rest),
            Err(_) => {
                let rest = host.strip_prefix("/").unwrap_or(host);
                join_relative(&self.foreign_prefix, rest)
            }
        }
    }

    /// Inverse of [`to_container`](Self::to_container). `None` for paths the
    /// orchestrator did not get from this translator.
    pub fn to_host(&self, container: &Path) -> Option<PathBuf> {
        if let Ok(rest) = container.strip_prefix(&self.container_base) {
            return Some(join_relative(&self.host_base, rest));
        }
        if let Ok(rest) = container.strip_prefix(&self.foreign_prefix) {
            return Some(join_relative(Path::new("/"), rest));
        }
        None
    }
}

fn join_relative(base: &Path, rest: &Path) -> PathBuf {
    if rest.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(rest)
    }
}
