//! Dependency-ordered execution of task descriptors.
//!
//! A task depends on every other task whose targets include one of its file
//! dependencies. Ready tasks run concurrently, bounded by a semaphore. When a
//! task fails, everything downstream of it is skipped; independent branches
//! keep going.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eod_engine::TaskDescriptor;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Descriptors plus the edges derived from their targets and file deps.
#[derive(Debug)]
pub struct TaskGraph {
    descriptors: Vec<TaskDescriptor>,
    upstream: Vec<Vec<usize>>,
    downstream: Vec<Vec<usize>>,
}

impl TaskGraph {
    pub fn new(descriptors: Vec<TaskDescriptor>) -> Self {
        let producers: HashMap<&Path, usize> = descriptors
            .iter()
            .enumerate()
            .flat_map(|(i, d)| d.targets.iter().map(move |t| (t.as_path(), i)))
            .collect();

        let mut upstream: Vec<Vec<usize>> = Vec::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.iter().enumerate() {
            let mut deps: Vec<usize> = descriptor
                .file_dep
                .iter()
                .filter_map(|dep| producers.get(dep.as_path()).copied())
                .filter(|&p| p != i)
                .collect();
            deps.sort_unstable();
            deps.dedup();
            upstream.push(deps);
        }

        let mut downstream = vec![Vec::new(); descriptors.len()];
        for (i, deps) in upstream.iter().enumerate() {
            for &d in deps {
                downstream[d].push(i);
            }
        }

        Self {
            descriptors,
            upstream,
            downstream,
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn descriptors(&self) -> &[TaskDescriptor] {
        &self.descriptors
    }

    /// Names of the tasks `index` waits for.
    pub fn upstream_names(&self, index: usize) -> Vec<&str> {
        self.upstream[index]
            .iter()
            .map(|&u| self.descriptors[u].name.as_str())
            .collect()
    }
}

/// How one task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed { error: String },
    Skipped { blocked_by: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub name: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Completed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.completed() == self.tasks.len()
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.tasks.iter().filter(|t| pred(&t.outcome)).count()
    }
}

/// Run every task, at most `jobs` at a time.
pub async fn run(graph: &TaskGraph, jobs: usize) -> RunReport {
    let n = graph.len();
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let mut outcomes: Vec<Option<Outcome>> = vec![None; n];
    let mut elapsed = vec![Duration::ZERO; n];
    let mut waiting: Vec<usize> = graph.upstream.iter().map(Vec::len).collect();
    let mut ready: VecDeque<usize> = (0..n).filter(|&i| waiting[i] == 0).collect();
    let mut running: JoinSet<(usize, Result<(), String>, Duration)> = JoinSet::new();

    loop {
        while let Some(index) = ready.pop_front() {
            let descriptor = graph.descriptors[index].clone();
            let semaphore = semaphore.clone();
            running.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return (index, Err(e.to_string()), Duration::ZERO),
                };
                let started = Instant::now();
                let result = descriptor.run().await.map(|_| ()).map_err(|e| e.to_string());
                (index, result, started.elapsed())
            });
        }

        let Some(joined) = running.join_next().await else {
            break;
        };
        let (index, result, took) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "Task runner panicked");
                continue;
            }
        };
        elapsed[index] = took;
        let name = &graph.descriptors[index].name;

        match result {
            Ok(()) => {
                info!(task = %name, elapsed_ms = took.as_millis() as u64, "Task finished");
                outcomes[index] = Some(Outcome::Completed);
                for &next in &graph.downstream[index] {
                    waiting[next] -= 1;
                    if waiting[next] == 0 && outcomes[next].is_none() {
                        ready.push_back(next);
                    }
                }
            }
            Err(error) => {
                outcomes[index] = Some(Outcome::Failed { error });
                skip_downstream(graph, index, &mut outcomes);
            }
        }
    }

    let tasks = graph
        .descriptors
        .iter()
        .zip(outcomes)
        .zip(elapsed)
        .map(|((d, outcome), took)| TaskReport {
            name: d.name.clone(),
            outcome: outcome.unwrap_or_else(|| Outcome::Failed {
                error: "task did not finish".to_string(),
            }),
            elapsed_ms: took.as_millis(),
        })
        .collect();
    RunReport { tasks }
}

fn skip_downstream(graph: &TaskGraph, failed: usize, outcomes: &mut [Option<Outcome>]) {
    let blocked_by = graph.descriptors[failed].name.clone();
    let mut stack = graph.downstream[failed].clone();
    while let Some(next) = stack.pop() {
        if outcomes[next].is_some() {
            continue;
        }
        warn!(task = %graph.descriptors[next].name, blocked_by = %blocked_by, "Skipping task");
        outcomes[next] = Some(Outcome::Skipped {
            blocked_by: blocked_by.clone(),
        });
        stack.extend(graph.downstream[next].iter().copied());
    }
}
