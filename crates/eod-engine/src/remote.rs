//! Remote job platform collaborator.
//!
//! The engine talks to the remote platform only through [`RemotePlatform`];
//! the HTTP implementation lives in `eod-client`.

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::RemoteOperationError;

pub type RemoteResult<T> = std::result::Result<T, RemoteOperationError>;

/// URI scheme of files on the remote platform's storage systems.
pub const REMOTE_SCHEME: &str = "agave";

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

/// Job submission document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    pub name: String,
    pub app_id: String,
    pub archive: bool,
    pub archive_system: String,
    pub archive_path: String,
    /// Application input id to URIs, in declaration order.
    pub inputs: IndexMap<String, Vec<String>>,
    pub parameters: IndexMap<String, serde_json::Value>,
}

/// A submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    /// URL of the job's status history.
    pub status_url: String,
}

/// A started upload. Completion is tracked through its status history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHandle {
    pub status_url: String,
}

/// One entry of a job or transfer status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub status: String,
    pub created: DateTime<FixedOffset>,
    #[serde(default)]
    pub description: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Platform trait
// ─────────────────────────────────────────────────────────────────────────────

/// Operations the engine needs from the remote platform.
///
/// Implementations refresh credentials as needed on every call; callers
/// invoke [`current_access_token`](Self::current_access_token) right before
/// an operation so that an expired session fails early and visibly.
#[async_trait]
pub trait RemotePlatform: Send + Sync + Debug {
    /// A valid access token, refreshed if necessary.
    async fn current_access_token(&self) -> RemoteResult<String>;

    async fn submit_job(&self, job: &JobSubmission) -> RemoteResult<JobHandle>;

    /// Start uploading a local file into `remote_dir` on the storage system.
    async fn upload(&self, local: &Path, remote_dir: &str) -> RemoteResult<TransferHandle>;

    /// Fetch a remote URI to a local path.
    async fn download(&self, remote: &str, local: &Path) -> RemoteResult<()>;

    async fn make_dir(&self, path: &str) -> RemoteResult<()>;

    async fn status_history(&self, url: &str) -> RemoteResult<Vec<HistoryEvent>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote layout
// ─────────────────────────────────────────────────────────────────────────────

/// Where a workflow's files live on the remote storage system.
///
/// ```text
/// <working_dir>/<task>/inputs/<input id>/<index>/   uploaded local inputs
/// <working_dir>/<task>/outputs/                      job archive
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    pub storage_system: String,
    /// `<home_dir>/<workflow>`, without a leading `/`.
    pub working_dir: String,
}

impl RemoteLayout {
    pub fn new(storage_system: impl Into<String>, working_dir: impl Into<String>) -> Self {
        Self {
            storage_system: storage_system.into(),
            working_dir: working_dir.into().trim_matches('/').to_string(),
        }
    }

    /// `agave://<system>/<absolute path>`.
    pub fn uri(&self, path: &str) -> String {
        format!(
            "{REMOTE_SCHEME}://{}//{}",
            self.storage_system,
            path.trim_start_matches('/')
        )
    }

    pub fn task_dir(&self, task: &str) -> String {
        format!("/{}/{}", self.working_dir, task)
    }

    pub fn input_dir(&self, task: &str, input_id: &str, index: usize) -> String {
        format!("{}/inputs/{}/{}", self.task_dir(task), input_id, index)
    }

    pub fn archive_path(&self, task: &str) -> String {
        format!("{}/{}/outputs", self.working_dir, task)
    }

    /// URI of a file the job for `task` archived at `remote_path`.
    pub fn output_uri(&self, task: &str, remote_path: &str) -> String {
        self.uri(&format!("{}/{}", self.archive_path(task), remote_path))
    }
}

/// Name under which a task's job is submitted.
pub fn job_name(workflow: &str, task: &str) -> String {
    format!("eod-{workflow}-{task}")
}
