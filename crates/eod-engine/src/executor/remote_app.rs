//! Remote application jobs.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::future::try_join_all;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::{ExecutionContext, ExecutionStrategy, RemoteContext, create_dir, producer_uri};
use crate::error::{EngineError, RemoteOperationError, Result};
use crate::job::{JobStatus, RemoteJobFuture};
use crate::model::{Task, TaskKind};
use crate::remote::{JobSubmission, job_name};

/// A local file that must reach the storage system before submission.
#[derive(Debug, Clone)]
struct Upload {
    local: PathBuf,
    remote_dir: String,
}

/// Submits a task as a job to the remote platform.
pub struct RemoteApp<'a> {
    ctx: &'a ExecutionContext,
    task: &'a Task,
    job: Option<RemoteJobFuture>,
}

impl<'a> RemoteApp<'a> {
    pub fn new(ctx: &'a ExecutionContext, task: &'a Task) -> Self {
        Self {
            ctx,
            task,
            job: None,
        }
    }

    /// Inputs whose producers are local files, with their remote directory.
    fn uploads(&self, remote: &RemoteContext) -> Vec<Upload> {
        self.app_inputs(remote)
            .into_iter()
            .filter_map(|(_, _, source)| match source {
                InputSource::Local { local, remote_dir } => Some(Upload { local, remote_dir }),
                InputSource::Uri(_) => None,
            })
            .collect()
    }

    /// Every application input in declaration order with its index within
    /// its input id.
    fn app_inputs(&self, remote: &RemoteContext) -> Vec<(String, usize, InputSource)> {
        let workflow = &self.ctx.workflow;
        let mut counters: HashMap<&str, usize> = HashMap::new();
        let mut inputs = Vec::new();

        for input in &self.task.inputs {
            let Some(id) = input.app_input_id.as_deref() else {
                continue;
            };
            let index = counters.entry(id).or_insert(0);
            let position = *index;
            *index += 1;

            let Some(producer) = input.real_source.and_then(|p| workflow.producer(p)) else {
                continue;
            };
            let source = match producer_uri(producer, &remote.layout) {
                Some(uri) => InputSource::Uri(uri),
                None => InputSource::Local {
                    local: producer.container_path().to_path_buf(),
                    remote_dir: remote.layout.input_dir(&self.task.name, id, position),
                },
            };
            inputs.push((id.to_string(), position, source));
        }
        inputs
    }

    /// The job document for this task.
    pub fn submission(&self) -> Result<JobSubmission> {
        let remote = self.ctx.remote_for(self.task)?;
        let TaskKind::RemoteApp { app_id, parameters } = &self.task.kind else {
            return Err(RemoteOperationError::Malformed(format!(
                "task '{}' is not a remote application",
                self.task.name
            ))
            .into());
        };

        let mut inputs: IndexMap<String, Vec<String>> = IndexMap::new();
        for (id, _, source) in self.app_inputs(remote) {
            let uri = match source {
                InputSource::Uri(uri) => uri,
                InputSource::Local { local, remote_dir } => {
                    let file = local
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    remote.layout.uri(&format!("{remote_dir}/{file}"))
                }
            };
            inputs.entry(id).or_default().push(uri);
        }

        Ok(JobSubmission {
            name: job_name(&self.ctx.workflow.name, &self.task.name),
            app_id: app_id.clone(),
            archive: true,
            archive_system: remote.layout.storage_system.clone(),
            archive_path: remote.layout.archive_path(&self.task.name),
            inputs,
            parameters: parameters.clone(),
        })
    }
}

#[derive(Debug, Clone)]
enum InputSource {
    Uri(String),
    Local { local: PathBuf, remote_dir: String },
}

#[async_trait]
impl ExecutionStrategy for RemoteApp<'_> {
    async fn prepare(&mut self) -> Result<()> {
        let remote = self.ctx.remote_for(self.task)?;
        remote.platform.current_access_token().await?;

        let uploads = self.uploads(remote);
        if uploads.is_empty() {
            return Ok(());
        }
        info!(task = %self.task.name, count = uploads.len(), "Uploading local inputs");

        for upload in &uploads {
            remote.platform.make_dir(&upload.remote_dir).await?;
        }

        // Start every transfer, then wait for all of them together.
        let handles = try_join_all(
            uploads
                .iter()
                .map(|u| remote.platform.upload(&u.local, &u.remote_dir)),
        )
        .await?;

        let policy = self.ctx.poll_policy;
        let timeout = self.ctx.transfer_timeout;
        try_join_all(uploads.iter().zip(handles).map(|(upload, handle)| {
            let platform = remote.platform.clone();
            async move {
                let mut transfer = RemoteJobFuture::new(platform, handle.status_url, policy);
                match transfer.wait(timeout).await? {
                    JobStatus::Complete => {
                        debug!(path = %upload.local.display(), "Upload complete");
                        Ok(())
                    }
                    _ => Err(EngineError::from(RemoteOperationError::TransferFailed {
                        path: upload.local.clone(),
                        status_url: transfer.url().to_string(),
                    })),
                }
            }
        }))
        .await?;
        Ok(())
    }

    async fn run(&mut self) -> Result<()> {
        let remote = self.ctx.remote_for(self.task)?;
        let submission = self.submission()?;
        remote.platform.current_access_token().await?;

        let handle = remote.platform.submit_job(&submission).await?;
        info!(task = %self.task.name, job_id = %handle.id, app_id = %submission.app_id, "Submitted job");
        self.job = Some(RemoteJobFuture::new(
            remote.platform.clone(),
            handle.status_url,
            self.ctx.poll_policy,
        ));
        Ok(())
    }

    async fn await_completion(&mut self) -> Result<()> {
        let Some(job) = self.job.as_mut() else {
            return Err(RemoteOperationError::Malformed(format!(
                "task '{}' has no submitted job",
                self.task.name
            ))
            .into());
        };
        match job.wait(self.ctx.job_timeout).await? {
            JobStatus::Complete => Ok(()),
            _ => Err(RemoteOperationError::JobFailed {
                task: self.task.name.clone(),
                status_url: job.url().to_string(),
            }
            .into()),
        }
    }

    async fn fetch_results(&mut self) -> Result<()> {
        let remote = self.ctx.remote_for(self.task)?;
        remote.platform.current_access_token().await?;

        let mut failures = Vec::new();
        for output in &self.task.outputs {
            let Some(remote_path) = output.remote_path.as_deref() else {
                continue;
            };
            let uri = remote.layout.output_uri(&self.task.name, remote_path);
            if let Some(parent) = output.container_path.parent()
                && let Err(e) = create_dir(parent).await
            {
                warn!(task = %self.task.name, error = %e, "Cannot create output directory");
                failures.push(format!("{}: {}", output.label, e));
                continue;
            }
            match remote.platform.download(&uri, &output.container_path).await {
                Ok(()) => debug!(task = %self.task.name, uri = %uri, "Fetched output"),
                Err(e) => {
                    warn!(task = %self.task.name, uri = %uri, error = %e, "Failed to fetch output");
                    failures.push(format!("{}: {}", output.label, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RemoteOperationError::Downloads {
                task: self.task.name.clone(),
                failures,
            }
            .into())
        }
    }

    fn polls(&self) -> bool {
        true
    }
}
