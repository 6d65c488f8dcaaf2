//! Error types for the workflow engine.
//!
//! Assembly-time errors ([`DeclarationError`], [`ReferenceError`],
//! [`MountConflictError`]) abort the whole workflow before anything runs.
//! Execution-time errors are scoped to the task that raised them.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::TaskState;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    MountConflict(#[from] MountConflictError),

    #[error(transparent)]
    LocalExecution(#[from] LocalExecutionError),

    #[error(transparent)]
    Remote(#[from] RemoteOperationError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// Path layout or engine settings that can never work.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Filesystem failure while materializing or preparing a task.
    #[error("I/O error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A task was asked to move backwards or skip a lifecycle stage.
    #[error("Task '{task}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        task: String,
        from: TaskState,
        to: TaskState,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Malformed workflow declaration.
#[derive(Debug, Error)]
pub enum DeclarationError {
    #[error("Failed to parse workflow source: {0}")]
    Parse(String),

    #[error("Failed to read workflow source '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Workflow name is required")]
    MissingName,

    #[error("Invalid workflow name '{0}': must be a single path segment")]
    InvalidName(String),

    #[error("Invalid task name '{0}': must be non-empty, without '.', and not 'inputs'")]
    InvalidTaskName(String),

    #[error("Duplicate task name '{0}'")]
    DuplicateTask(String),

    #[error("Duplicate global input label '{0}'")]
    DuplicateGlobalInput(String),

    #[error("Duplicate output label '{label}' in task '{task}'")]
    DuplicateOutputLabel { task: String, label: String },

    #[error("Malformed {kind} '{text}': expected '{expected}'")]
    Malformed {
        kind: &'static str,
        text: String,
        expected: &'static str,
    },

    #[error("Invalid reference '{0}': expected '<producer>.<label>'")]
    InvalidReference(String),

    #[error("Output '{path}' in task '{task}' must be an absolute path")]
    RelativeOutput { task: String, path: String },

    #[error("Remote output '{path}' in task '{task}' must be a relative path")]
    AbsoluteRemoteOutput { task: String, path: String },

    #[error("Task '{task}' is missing required field '{field}'")]
    MissingField { task: String, field: &'static str },

    #[error("Unknown execution mode '{mode}' for task '{task}'")]
    UnknownExecution { task: String, mode: String },

    #[error("Task '{task}' uses {found} inputs but its execution mode requires {expected}")]
    InputShape {
        task: String,
        found: &'static str,
        expected: &'static str,
    },
}

/// A `<producer>.<label>` reference that names nothing.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("Unknown task '{task}' in reference '{reference}'")]
    UnknownTask { reference: String, task: String },

    #[error(
        "Unknown label in reference '{reference}': '{producer}' provides [{}]",
        .available.join(", ")
    )]
    UnknownLabel {
        reference: String,
        producer: String,
        available: Vec<String>,
    },

    /// Tasks that consume each other's outputs, directly or transitively.
    #[error("Dependency cycle between tasks: {}", .tasks.join(", "))]
    Cycle { tasks: Vec<String> },
}

/// Two inputs of one task claim the same in-container destination.
#[derive(Debug, Error)]
#[error("Task '{task}' mounts two inputs at '{}'", .dest.display())]
pub struct MountConflictError {
    pub task: String,
    pub dest: PathBuf,
}

/// A local container run failed. Never retried.
#[derive(Debug, Error)]
pub enum LocalExecutionError {
    #[error("Task '{task}' exited with code {exit_code}: {stderr}")]
    Exited {
        task: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Task '{task}' could not start its container: {source}")]
    Spawn {
        task: String,
        source: std::io::Error,
    },
}

/// Failure talking to the remote job platform.
#[derive(Debug, Error)]
pub enum RemoteOperationError {
    /// The platform answered with a non-success HTTP status.
    #[error("Remote platform returned {status} for {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },

    #[error("Remote platform unreachable: {0}")]
    Transport(String),

    #[error("Unexpected response from remote platform: {0}")]
    Malformed(String),

    #[error("Remote credentials rejected: {0}")]
    Auth(String),

    #[error("No remote platform configured; task '{0}' needs one")]
    NotConfigured(String),

    #[error("Remote job for task '{task}' failed (history: {status_url})")]
    JobFailed { task: String, status_url: String },

    #[error("Upload of '{}' failed (history: {status_url})", .path.display())]
    TransferFailed { path: PathBuf, status_url: String },

    #[error("Task '{task}' could not fetch {} output(s): {}", .failures.len(), .failures.join("; "))]
    Downloads { task: String, failures: Vec<String> },
}

impl RemoteOperationError {
    /// 403 and 404 on status queries are returned by the platform while a
    /// freshly created job or transfer is still propagating.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteOperationError::Status {
                status: 403 | 404,
                ..
            }
        )
    }
}

/// A remote job or transfer did not reach a terminal state in time.
///
/// The remote side is left running.
#[derive(Debug, Error)]
#[error("Timed out after {timeout:?} waiting for {what}")]
pub struct TimeoutError {
    pub what: String,
    pub timeout: Duration,
}
