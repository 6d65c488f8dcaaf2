//! Remote job completion tracking.
//!
//! A [`RemoteJobFuture`] polls the status history of a submitted job (or an
//! upload) and collapses the platform's many statuses into four.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::error::{EngineError, RemoteOperationError, Result, TimeoutError};
use crate::remote::{HistoryEvent, RemotePlatform};

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

const COMPLETE_STATUSES: &[&str] = &["COMPLETE", "ARCHIVING_FINISHED", "TRANSFORMING_COMPLETED"];

const FAILED_STATUSES: &[&str] = &[
    "FAILED",
    "KILLED",
    "STOPPED",
    "ARCHIVING_FAILED",
    "STAGING_FAILED",
    "TRANSFORMING_FAILED",
    "IMPORT_FAILED",
];

const PENDING_STATUSES: &[&str] = &[
    "CREATED",
    "PENDING",
    "PROCESSING_INPUTS",
    "STAGING_INPUTS",
    "STAGED",
    "STAGING_JOB",
    "SUBMITTING",
    "QUEUED",
    "STAGING_QUEUED",
    "STAGING",
];

impl JobStatus {
    /// Collapse a platform status. Anything not known to be pending or
    /// terminal counts as running.
    pub fn from_platform(status: &str) -> Self {
        let status = status.trim();
        let is = |table: &[&str]| table.iter().any(|s| s.eq_ignore_ascii_case(status));
        if is(COMPLETE_STATUSES) {
            JobStatus::Complete
        } else if is(FAILED_STATUSES) {
            JobStatus::Failed
        } else if is(PENDING_STATUSES) {
            JobStatus::Pending
        } else {
            JobStatus::Running
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

/// Reduce a status history to one status.
///
/// Any COMPLETE event wins, then any FAILED event, then the most recently
/// created event. An empty history is PENDING.
pub fn collapse_history(events: &[HistoryEvent]) -> JobStatus {
    let statuses: Vec<JobStatus> = events
        .iter()
        .map(|e| JobStatus::from_platform(&e.status))
        .collect();
    if statuses.contains(&JobStatus::Complete) {
        return JobStatus::Complete;
    }
    if statuses.contains(&JobStatus::Failed) {
        return JobStatus::Failed;
    }
    events
        .iter()
        .zip(statuses)
        .max_by_key(|(e, _)| e.created)
        .map(|(_, s)| s)
        .unwrap_or(JobStatus::Pending)
}

// ─────────────────────────────────────────────────────────────────────────────
// Polling
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Retries of one status query on a transient (403/404) answer.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub poll_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_backoff: Duration::from_millis(1500),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Tracks one remote job or transfer until it reaches a terminal status.
#[derive(Debug)]
pub struct RemoteJobFuture {
    platform: Arc<dyn RemotePlatform>,
    url: String,
    status: JobStatus,
    retries: u32,
    policy: PollPolicy,
}

impl RemoteJobFuture {
    pub fn new(platform: Arc<dyn RemotePlatform>, url: impl Into<String>, policy: PollPolicy) -> Self {
        Self {
            platform,
            url: url.into(),
            status: JobStatus::Pending,
            retries: 0,
            policy,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Status as of the last successful poll.
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Query the status history once.
    ///
    /// A freshly submitted job can answer 403/404 for a while; those answers
    /// are retried up to `max_retries` times, `retry_backoff` apart. The
    /// retry budget is per call.
    pub async fn poll(&mut self) -> std::result::Result<JobStatus, RemoteOperationError> {
        Ok(self.poll_until(None).await?.unwrap_or(self.status))
    }

    /// [`poll`](Self::poll), but never retrying past `deadline`. Returns
    /// `None` when the deadline passed before the platform gave an answer.
    async fn poll_until(
        &mut self,
        deadline: Option<Instant>,
    ) -> std::result::Result<Option<JobStatus>, RemoteOperationError> {
        self.retries = 0;
        loop {
            match self.platform.status_history(&self.url).await {
                Ok(events) => {
                    self.status = collapse_history(&events);
                    debug!(url = %self.url, status = ?self.status, events = events.len(), "Polled status");
                    return Ok(Some(self.status));
                }
                Err(e) if e.is_transient() && self.retries < self.policy.max_retries => {
                    let mut backoff = self.policy.retry_backoff;
                    if let Some(deadline) = deadline {
                        let now = Instant::now();
                        if now >= deadline {
                            debug!(url = %self.url, attempt = self.retries, "Deadline reached while retrying");
                            return Ok(None);
                        }
                        backoff = backoff.min(deadline - now);
                    }
                    self.retries += 1;
                    debug!(url = %self.url, attempt = self.retries, error = %e, "Status not available yet, retrying");
                    sleep(backoff).await;
                }
                Err(e) => {
                    warn!(url = %self.url, retries = self.retries, error = %e, "Status query failed");
                    return Err(e);
                }
            }
        }
    }

    /// Poll every `poll_interval` until the status is terminal.
    ///
    /// Transient retries count against `timeout` too. On timeout the remote
    /// job is left running.
    pub async fn wait(&mut self, timeout: Duration) -> Result<JobStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.poll_until(Some(deadline)).await? {
                Some(status) if status.is_terminal() => return Ok(status),
                Some(_) => {}
                None => return Err(self.timed_out(timeout)),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(timeout));
            }
            sleep(self.policy.poll_interval.min(deadline - now)).await;
        }
    }

    fn timed_out(&self, timeout: Duration) -> EngineError {
        TimeoutError {
            what: self.url.clone(),
            timeout,
        }
        .into()
    }
}
