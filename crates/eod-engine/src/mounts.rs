//! Mount planning.
//!
//! Output directories are created on the host and bind-mounted so results
//! survive the container. Each output contributes its parent directory (or
//! itself, for directory outputs); a candidate is dropped when it or one of
//! its ancestors is already mounted, which keeps the set minimal and free of
//! nested mounts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{MountConflictError, ReferenceError, Result};
use crate::model::{TaskOutput, Volume, Workflow};

/// Minimal set of output volumes for a task.
///
/// The result is sorted by container path, contains no path that is an
/// ancestor of another, and is the same for the same outputs.
pub fn plan_output_volumes(outputs: &[TaskOutput]) -> Vec<Volume> {
    let mut candidates: Vec<Volume> = outputs.iter().map(output_candidate).collect();
    candidates.sort_by(|a, b| a.container_path.cmp(&b.container_path));

    // Component order puts a path's descendants right after it, so an
    // accepted ancestor can only be the last accepted volume.
    let mut accepted: Vec<Volume> = Vec::new();
    for candidate in candidates {
        let covered = accepted
            .last()
            .is_some_and(|v| candidate.container_path.starts_with(&v.container_path));
        if !covered {
            accepted.push(candidate);
        }
    }
    accepted
}

fn output_candidate(output: &TaskOutput) -> Volume {
    let source = Path::new(&output.source);
    if output.is_directory() {
        return Volume::new(normalize(&output.host_path), normalize(source));
    }
    let container = source.parent().unwrap_or(Path::new("/"));
    let host = output
        .host_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| output.host_path.clone());
    Volume::new(host, container)
}

/// Drop trailing separators so directory outputs compare like other paths.
fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

/// One volume per input of task `task_index`, from the resolved producer's
/// host path to the declared destination.
pub fn plan_input_volumes(workflow: &Workflow, task_index: usize) -> Result<Vec<Volume>> {
    let task = &workflow.tasks[task_index];
    let mut seen: HashSet<&PathBuf> = HashSet::new();
    let mut volumes = Vec::with_capacity(task.inputs.len());

    for input in &task.inputs {
        if !seen.insert(&input.dest) {
            return Err(MountConflictError {
                task: task.name.clone(),
                dest: input.dest.clone(),
            }
            .into());
        }
        let producer = input
            .real_source
            .and_then(|id| workflow.producer(id))
            .ok_or_else(|| ReferenceError::UnknownTask {
                reference: input.reference.to_string(),
                task: input.reference.producer.clone(),
            })?;
        volumes.push(Volume::new(producer.host_path(), &input.dest));
    }
    Ok(volumes)
}
