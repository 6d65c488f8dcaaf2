//! Local container runs.

use std::borrow::Cow;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::{ExecutionContext, ExecutionStrategy, create_dir};
use crate::error::{LocalExecutionError, Result};
use crate::model::{Task, TaskKind};

/// Render the container runtime invocation for a task.
///
/// Output volumes come first so that input volumes are overlaid on top of
/// them. The task command is appended verbatim and left to the shell.
pub fn docker_command(binary: &str, task: &Task, env: &[String]) -> String {
    let mut parts: Vec<Cow<'_, str>> = vec![binary.into(), "run".into(), "--rm".into()];
    for volume in task.output_volumes.iter().chain(&task.input_volumes) {
        parts.push("-v".into());
        parts.push(shell_quote(&volume.to_string()).into_owned().into());
    }
    for pair in env {
        parts.push("-e".into());
        parts.push(shell_quote(pair));
    }
    if let TaskKind::Container { image, command } = &task.kind {
        parts.push(shell_quote(image));
        if let Some(command) = command.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            parts.push(command.into());
        }
    }
    parts.join(" ")
}

fn shell_quote(s: &str) -> Cow<'_, str> {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if safe {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("'{}'", s.replace('\'', r"'\''")))
    }
}

/// Runs a task's image on the local container runtime.
pub struct LocalContainer<'a> {
    ctx: &'a ExecutionContext,
    task: &'a Task,
    child: Option<Child>,
}

impl<'a> LocalContainer<'a> {
    pub fn new(ctx: &'a ExecutionContext, task: &'a Task) -> Self {
        Self {
            ctx,
            task,
            child: None,
        }
    }
}

#[async_trait]
impl ExecutionStrategy for LocalContainer<'_> {
    async fn prepare(&mut self) -> Result<()> {
        let translator = &self.ctx.workflow.translator;
        for volume in &self.task.output_volumes {
            create_dir(&translator.to_container(&volume.host_path)).await?;
        }
        Ok(())
    }

    async fn run(&mut self) -> Result<()> {
        let command = docker_command(&self.ctx.docker_binary, self.task, &self.ctx.docker_env);
        info!(task = %self.task.name, command = %command, "Starting container");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LocalExecutionError::Spawn {
                task: self.task.name.clone(),
                source: e,
            })?;
        self.child = Some(child);
        Ok(())
    }

    async fn await_completion(&mut self) -> Result<()> {
        let spawn_error = |source| LocalExecutionError::Spawn {
            task: self.task.name.clone(),
            source,
        };
        let child = self
            .child
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("container was never started")))?;
        let output = child.wait_with_output().await.map_err(spawn_error)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(task = %self.task.name, stdout = %stdout.trim_end(), "Container output");

        if !output.status.success() {
            return Err(LocalExecutionError::Exited {
                task: self.task.name.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim_end().to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn fetch_results(&mut self) -> Result<()> {
        // Outputs land on the host through the output volumes.
        Ok(())
    }
}
