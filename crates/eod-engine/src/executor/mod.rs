//! Task execution.
//!
//! Every task runs through the same four stages. What each stage does depends
//! on the task's variant, chosen by [`dispatch`]:
//!
//! | Stage              | Local container     | Remote app             | Remote download |
//! |--------------------|---------------------|------------------------|-----------------|
//! | `prepare`          | create output dirs  | upload local inputs    | create out dir  |
//! | `run`              | spawn `docker run`  | submit job             | fetch the URI   |
//! | `await_completion` | wait for exit       | poll job history       | -               |
//! | `fetch_results`    | -                   | download job outputs   | -               |

mod download;
mod local;
mod remote_app;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::{EngineError, RemoteOperationError, Result};
use crate::job::PollPolicy;
use crate::model::{Producer, Task, TaskKind, TaskState, Workflow};
use crate::remote::{RemoteLayout, RemotePlatform};

pub use download::RemoteDownload;
pub use local::{LocalContainer, docker_command};
pub use remote_app::RemoteApp;

/// One task's execution, stage by stage.
#[async_trait]
pub trait ExecutionStrategy: Send {
    async fn prepare(&mut self) -> Result<()>;

    async fn run(&mut self) -> Result<()>;

    async fn await_completion(&mut self) -> Result<()>;

    async fn fetch_results(&mut self) -> Result<()>;

    /// Whether completion is tracked by polling a remote status.
    fn polls(&self) -> bool {
        false
    }
}

/// Remote platform access shared by all remote tasks of a workflow.
#[derive(Debug, Clone)]
pub struct RemoteContext {
    pub platform: Arc<dyn RemotePlatform>,
    pub layout: RemoteLayout,
}

/// Everything a strategy needs besides its task.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow: Arc<Workflow>,
    pub docker_binary: String,
    /// `KEY=VALUE` pairs passed to every local container.
    pub docker_env: Vec<String>,
    pub poll_policy: PollPolicy,
    pub job_timeout: Duration,
    pub transfer_timeout: Duration,
    pub remote: Option<RemoteContext>,
}

impl ExecutionContext {
    pub fn new(workflow: Arc<Workflow>) -> Self {
        Self {
            workflow,
            docker_binary: "docker".to_string(),
            docker_env: Vec::new(),
            poll_policy: PollPolicy::default(),
            job_timeout: Duration::from_secs(86_400),
            transfer_timeout: Duration::from_secs(600),
            remote: None,
        }
    }

    pub fn with_docker_binary(mut self, binary: impl Into<String>) -> Self {
        self.docker_binary = binary.into();
        self
    }

    pub fn with_docker_env(mut self, env: Vec<String>) -> Self {
        self.docker_env = env;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn with_remote(mut self, platform: Arc<dyn RemotePlatform>, layout: RemoteLayout) -> Self {
        self.remote = Some(RemoteContext { platform, layout });
        self
    }

    pub(crate) fn remote_for(&self, task: &Task) -> Result<&RemoteContext> {
        self.remote
            .as_ref()
            .ok_or_else(|| RemoteOperationError::NotConfigured(task.name.clone()).into())
    }
}

/// Pick the strategy for task `index`.
pub fn dispatch(ctx: &ExecutionContext, index: usize) -> Result<Box<dyn ExecutionStrategy + '_>> {
    let task = ctx.workflow.tasks.get(index).ok_or_else(|| {
        EngineError::Configuration(format!("no task at index {index}"))
    })?;
    let strategy: Box<dyn ExecutionStrategy + '_> = match &task.kind {
        TaskKind::Container { .. } => Box::new(LocalContainer::new(ctx, task)),
        TaskKind::RemoteApp { .. } => Box::new(RemoteApp::new(ctx, task)),
        TaskKind::RemoteDownload { source } => Box::new(RemoteDownload::new(ctx, task, *source)),
    };
    Ok(strategy)
}

/// Run task `index` to a terminal state.
///
/// Starts from the task's assembled state (`MountsPlanned`) and returns the
/// terminal state reached, or the error that failed the task.
pub async fn execute(ctx: &ExecutionContext, index: usize) -> Result<TaskState> {
    let mut strategy = dispatch(ctx, index)?;
    let task = &ctx.workflow.tasks[index];
    let mut state = task.state;
    state.advance(&task.name, TaskState::Dispatched)?;
    info!(task = %task.name, "Dispatched task");

    match drive(strategy.as_mut(), &mut state, &task.name).await {
        Ok(()) => {
            state.advance(&task.name, TaskState::Completed)?;
            info!(task = %task.name, "Task completed");
            Ok(state)
        }
        Err(e) => {
            state.advance(&task.name, TaskState::Failed)?;
            error!(task = %task.name, error = %e, "Task failed");
            Err(e)
        }
    }
}

async fn drive(
    strategy: &mut (dyn ExecutionStrategy + '_),
    state: &mut TaskState,
    task: &str,
) -> Result<()> {
    strategy.prepare().await?;
    strategy.run().await?;
    if strategy.polls() {
        state.advance(task, TaskState::Polling)?;
    }
    strategy.await_completion().await?;
    strategy.fetch_results().await
}

/// The remote URI a producer is reachable at, if it lives remotely.
pub(crate) fn producer_uri(producer: Producer<'_>, layout: &RemoteLayout) -> Option<String> {
    match producer {
        Producer::Global(g) if g.is_uri => Some(g.source.clone()),
        Producer::Output(t, o) if o.is_uri => o
            .remote_path
            .as_deref()
            .map(|path| layout.output_uri(&t.name, path)),
        _ => None,
    }
}

pub(crate) async fn create_dir(path: &std::path::Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| EngineError::io(path, e))
}
