//! Fetching remote producers for local consumers.

use async_trait::async_trait;
use tracing::info;

use super::{ExecutionContext, ExecutionStrategy, create_dir, producer_uri};
use crate::error::{RemoteOperationError, Result};
use crate::model::{ProducerId, Task};

/// Downloads one remote producer to the task's single output.
pub struct RemoteDownload<'a> {
    ctx: &'a ExecutionContext,
    task: &'a Task,
    source: ProducerId,
}

impl<'a> RemoteDownload<'a> {
    pub fn new(ctx: &'a ExecutionContext, task: &'a Task, source: ProducerId) -> Self {
        Self { ctx, task, source }
    }

    fn malformed(&self, what: &str) -> RemoteOperationError {
        RemoteOperationError::Malformed(format!("download task '{}' {what}", self.task.name))
    }
}

#[async_trait]
impl ExecutionStrategy for RemoteDownload<'_> {
    async fn prepare(&mut self) -> Result<()> {
        let remote = self.ctx.remote_for(self.task)?;
        remote.platform.current_access_token().await?;

        let output = self.task.outputs.first().ok_or_else(|| self.malformed("has no output"))?;
        if let Some(parent) = output.container_path.parent() {
            create_dir(parent).await?;
        }
        Ok(())
    }

    async fn run(&mut self) -> Result<()> {
        let remote = self.ctx.remote_for(self.task)?;
        let producer = self
            .ctx
            .workflow
            .producer(self.source)
            .ok_or_else(|| self.malformed("points at a missing producer"))?;
        let uri = producer_uri(producer, &remote.layout)
            .ok_or_else(|| self.malformed("points at a local producer"))?;
        let output = self.task.outputs.first().ok_or_else(|| self.malformed("has no output"))?;

        info!(task = %self.task.name, uri = %uri, dest = %output.container_path.display(), "Downloading");
        remote.platform.download(&uri, &output.container_path).await?;
        Ok(())
    }

    async fn await_completion(&mut self) -> Result<()> {
        Ok(())
    }

    async fn fetch_results(&mut self) -> Result<()> {
        Ok(())
    }
}
