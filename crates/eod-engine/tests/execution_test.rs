//! Integration tests for task execution against a fake container runtime and
//! an in-memory remote platform.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use eod_engine::{
    EngineError, ExecutionContext, HistoryEvent, JobHandle, JobSubmission, LocalExecutionError,
    PathTranslator, PollPolicy, RemoteLayout, RemoteOperationError, RemotePlatform, RemoteResult,
    TaskState, TransferHandle, Workflow, WorkflowAssembler, WorkflowSource, execute,
};
use tempfile::TempDir;

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn assemble(base: &Path, yaml: &str) -> Arc<Workflow> {
    let translator = PathTranslator::new(base, base, "/host").unwrap();
    let source = WorkflowSource::from_yaml(yaml).unwrap();
    let workflow = WorkflowAssembler::new(translator).build(&source).unwrap();
    WorkflowAssembler::materialize(&workflow).unwrap();
    Arc::new(workflow)
}

fn index_of(workflow: &Workflow, name: &str) -> usize {
    workflow.tasks.iter().position(|t| t.name == name).unwrap()
}

fn fast_policy() -> PollPolicy {
    PollPolicy {
        max_retries: 2,
        retry_backoff: Duration::from_millis(10),
        poll_interval: Duration::from_millis(10),
    }
}

/// Which remote operations a [`FakePlatform`] should fail, by file name.
#[derive(Debug, Default)]
struct Failures {
    downloads: Vec<&'static str>,
    /// `upload()` itself errors.
    uploads: Vec<&'static str>,
    /// The transfer starts but its history ends in IMPORT_FAILED.
    transfers: Vec<&'static str>,
}

/// In-memory remote platform. Downloads write the requested URI into the
/// local file so tests can see what was fetched.
#[derive(Debug)]
struct FakePlatform {
    job_status: &'static str,
    failures: Failures,
    log: Mutex<Vec<String>>,
    submitted: Mutex<Vec<JobSubmission>>,
}

impl FakePlatform {
    fn new(job_status: &'static str) -> Arc<Self> {
        Self::with_failures(job_status, Failures::default())
    }

    fn with_failing_downloads(job_status: &'static str, failing: Vec<&'static str>) -> Arc<Self> {
        Self::with_failures(
            job_status,
            Failures {
                downloads: failing,
                ..Failures::default()
            },
        )
    }

    fn with_failures(job_status: &'static str, failures: Failures) -> Arc<Self> {
        Arc::new(Self {
            job_status,
            failures,
            log: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        })
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl RemotePlatform for FakePlatform {
    async fn current_access_token(&self) -> RemoteResult<String> {
        self.record("token".to_string());
        Ok("access".to_string())
    }

    async fn submit_job(&self, job: &JobSubmission) -> RemoteResult<JobHandle> {
        self.record(format!("submit {}", job.app_id));
        self.submitted.lock().unwrap().push(job.clone());
        Ok(JobHandle {
            id: "job-1".to_string(),
            status_url: "jobs/job-1/history".to_string(),
        })
    }

    async fn upload(&self, local: &Path, remote_dir: &str) -> RemoteResult<TransferHandle> {
        self.record(format!("upload {} {remote_dir}", local.display()));
        let file = local
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failures.uploads.contains(&file.as_str()) {
            return Err(RemoteOperationError::Status {
                status: 500,
                url: format!("files/media{remote_dir}"),
                message: "storage system offline".to_string(),
            });
        }
        Ok(TransferHandle {
            status_url: format!("transfers/{file}/history"),
        })
    }

    async fn download(&self, remote: &str, local: &Path) -> RemoteResult<()> {
        self.record(format!("download {remote}"));
        if self.failures.downloads.iter().any(|f| remote.ends_with(f)) {
            return Err(RemoteOperationError::Status {
                status: 500,
                url: remote.to_string(),
                message: "archive unavailable".to_string(),
            });
        }
        std::fs::write(local, remote).map_err(|e| RemoteOperationError::Transport(e.to_string()))
    }

    async fn make_dir(&self, path: &str) -> RemoteResult<()> {
        self.record(format!("mkdir {path}"));
        Ok(())
    }

    async fn status_history(&self, url: &str) -> RemoteResult<Vec<HistoryEvent>> {
        let status = if url.starts_with("jobs/") {
            self.job_status
        } else if self
            .failures
            .transfers
            .iter()
            .any(|f| url == format!("transfers/{f}/history"))
        {
            "IMPORT_FAILED"
        } else {
            "TRANSFORMING_COMPLETED"
        };
        Ok(vec![HistoryEvent {
            status: status.to_string(),
            created: Utc::now().fixed_offset(),
            description: None,
        }])
    }
}

fn remote_ctx(workflow: Arc<Workflow>, platform: Arc<FakePlatform>) -> ExecutionContext {
    ExecutionContext::new(workflow)
        .with_poll_policy(fast_policy())
        .with_remote(platform, RemoteLayout::new("sys", "user/wf"))
}

fn local_workflow(dir: &TempDir) -> Arc<Workflow> {
    assemble(
        dir.path(),
        r#"
name: wf
processes:
  writer:
    image: busybox
    command: sh -c 'echo hi > /out/x.txt'
    outputs:
      - /out/x.txt -> x
"#,
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Local containers
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_local_task_completes() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = local_workflow(&dir);
    let ctx = ExecutionContext::new(workflow).with_docker_binary("true");

    let state = execute(&ctx, 0).await.unwrap();
    assert_eq!(state, TaskState::Completed);
    assert!(dir.path().join("wf/writer/out").is_dir());
}

#[tokio::test]
async fn test_local_task_failure_reports_exit_and_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = local_workflow(&dir);
    let ctx = ExecutionContext::new(workflow).with_docker_binary("echo oops >&2; exit 3;");

    let err = execute(&ctx, 0).await.unwrap_err();
    match err {
        EngineError::LocalExecution(LocalExecutionError::Exited {
            task,
            exit_code,
            stderr,
        }) => {
            assert_eq!(task, "writer");
            assert_eq!(exit_code, 3);
            assert_eq!(stderr, "oops");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_descriptor_runs_task() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = local_workflow(&dir);
    let ctx = Arc::new(ExecutionContext::new(workflow).with_docker_binary("true"));

    let descriptors = WorkflowAssembler::descriptors(ctx);
    assert_eq!(descriptors[0].run().await.unwrap(), TaskState::Completed);
    // Each run starts from the assembled state, so a descriptor can be rerun.
    assert_eq!(descriptors[0].run().await.unwrap(), TaskState::Completed);
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote applications
// ─────────────────────────────────────────────────────────────────────────────

fn app_workflow(dir: &TempDir, outputs: &[&str]) -> Arc<Workflow> {
    let reads = dir.path().join("reads.fq");
    std::fs::write(&reads, "ACGT\n").unwrap();
    let outputs: String = outputs.iter().map(|o| format!("      - {o}\n")).collect();
    assemble(
        dir.path(),
        &format!(
            r#"
name: wf
inputs:
  - reads <- {}
  - ref <- agave://sys//shared/hg19.fa
processes:
  align:
    execution: agave_app
    app_id: bwa-0.7.10
    parameters:
      threads: 4
    inputs:
      query:
        - inputs.reads
      reference:
        - inputs.ref
    outputs:
{outputs}"#,
            reads.display()
        ),
    )
}

#[tokio::test]
async fn test_remote_app_uploads_submits_and_fetches() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = app_workflow(&dir, &["aligned.bam -> bam"]);
    let platform = FakePlatform::new("ARCHIVING_FINISHED");
    let ctx = remote_ctx(workflow, platform.clone());

    let state = execute(&ctx, 0).await.unwrap();
    assert_eq!(state, TaskState::Completed);

    let reads = dir.path().join("reads.fq");
    let log = platform.log();
    assert_eq!(log[0], "token");
    assert_eq!(log[1], "mkdir /user/wf/align/inputs/query/0");
    assert_eq!(
        log[2],
        format!("upload {} /user/wf/align/inputs/query/0", reads.display())
    );
    assert!(log.contains(&"submit bwa-0.7.10".to_string()));
    assert_eq!(
        log.last().unwrap(),
        "download agave://sys//user/wf/align/outputs/aligned.bam"
    );

    let submitted = platform.submitted.lock().unwrap();
    let job = &submitted[0];
    assert_eq!(job.name, "eod-wf-align");
    assert_eq!(job.archive_path, "user/wf/align/outputs");
    assert_eq!(
        job.inputs["query"],
        vec!["agave://sys//user/wf/align/inputs/query/0/reads.fq".to_string()]
    );
    assert_eq!(
        job.inputs["reference"],
        vec!["agave://sys//shared/hg19.fa".to_string()]
    );
    assert_eq!(job.parameters["threads"], serde_json::json!(4));

    let fetched = dir.path().join("wf/align/agave/outputs/aligned.bam");
    assert_eq!(
        std::fs::read_to_string(fetched).unwrap(),
        "agave://sys//user/wf/align/outputs/aligned.bam"
    );
}

#[tokio::test]
async fn test_remote_job_failure() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = app_workflow(&dir, &["aligned.bam -> bam"]);
    let platform = FakePlatform::new("FAILED");
    let ctx = remote_ctx(workflow, platform.clone());

    let err = execute(&ctx, 0).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Remote(RemoteOperationError::JobFailed { .. })
    ));
    assert!(!platform.log().iter().any(|e| e.starts_with("download")));
}

#[tokio::test]
async fn test_failed_transfer_aborts_before_submit() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = app_workflow(&dir, &["aligned.bam -> bam"]);
    let platform = FakePlatform::with_failures(
        "ARCHIVING_FINISHED",
        Failures {
            transfers: vec!["reads.fq"],
            ..Failures::default()
        },
    );
    let ctx = remote_ctx(workflow, platform.clone());

    let err = execute(&ctx, 0).await.unwrap_err();
    match err {
        EngineError::Remote(RemoteOperationError::TransferFailed { path, status_url }) => {
            assert_eq!(path, dir.path().join("reads.fq"));
            assert_eq!(status_url, "transfers/reads.fq/history");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!platform.log().iter().any(|e| e.starts_with("submit")));
    assert!(platform.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_one_failed_upload_of_two_aborts_submit() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("r1.fq"), "ACGT\n").unwrap();
    std::fs::write(dir.path().join("r2.fq"), "TGCA\n").unwrap();
    let workflow = assemble(
        dir.path(),
        &format!(
            r#"
name: wf
inputs:
  - r1 <- {}
  - r2 <- {}
processes:
  align:
    execution: agave_app
    app_id: bwa-0.7.10
    inputs:
      query:
        - inputs.r1
        - inputs.r2
    outputs:
      - aligned.bam -> bam
"#,
            dir.path().join("r1.fq").display(),
            dir.path().join("r2.fq").display()
        ),
    );
    let platform = FakePlatform::with_failures(
        "ARCHIVING_FINISHED",
        Failures {
            uploads: vec!["r2.fq"],
            ..Failures::default()
        },
    );
    let ctx = remote_ctx(workflow, platform.clone());

    let err = execute(&ctx, 0).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Remote(RemoteOperationError::Status { status: 500, .. })
    ));
    let log = platform.log();
    assert!(log.contains(&"mkdir /user/wf/align/inputs/query/0".to_string()));
    assert!(log.contains(&"mkdir /user/wf/align/inputs/query/1".to_string()));
    assert!(!log.iter().any(|e| e.starts_with("submit")));
}

#[tokio::test]
async fn test_fetch_failures_are_aggregated() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = app_workflow(&dir, &["aligned.bam -> bam", "stats.txt -> stats"]);
    let platform = FakePlatform::with_failing_downloads("ARCHIVING_FINISHED", vec!["aligned.bam"]);
    let ctx = remote_ctx(workflow, platform.clone());

    let err = execute(&ctx, 0).await.unwrap_err();
    match err {
        EngineError::Remote(RemoteOperationError::Downloads { task, failures }) => {
            assert_eq!(task, "align");
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("bam: "));
        }
        other => panic!("unexpected {other:?}"),
    }
    // The other output is still fetched.
    assert!(dir.path().join("wf/align/agave/outputs/stats.txt").is_file());
}

#[tokio::test]
async fn test_unwritable_output_dir_does_not_stop_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = app_workflow(&dir, &["results/aligned.bam -> bam", "stats.txt -> stats"]);
    // A file where the `results` directory should go.
    let outputs = dir.path().join("wf/align/agave/outputs");
    std::fs::create_dir_all(&outputs).unwrap();
    std::fs::write(outputs.join("results"), "").unwrap();
    let platform = FakePlatform::new("ARCHIVING_FINISHED");
    let ctx = remote_ctx(workflow, platform.clone());

    let err = execute(&ctx, 0).await.unwrap_err();
    match err {
        EngineError::Remote(RemoteOperationError::Downloads { failures, .. }) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("bam: "));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(outputs.join("stats.txt").is_file());
    assert!(!platform.log().iter().any(|e| e.ends_with("results/aligned.bam")));
}

#[tokio::test]
async fn test_remote_task_without_platform() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = app_workflow(&dir, &["aligned.bam -> bam"]);
    let ctx = ExecutionContext::new(workflow);

    let err = execute(&ctx, 0).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Remote(RemoteOperationError::NotConfigured(_))
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Downloads
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_download_task_fetches_uri_input() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = assemble(
        dir.path(),
        r#"
name: wf
inputs:
  - reads <- https://example.org/reads.fq
processes:
  count:
    image: busybox
    command: wc -l /in/reads.fq
    inputs:
      - inputs.reads -> /in/reads.fq
"#,
    );
    let download = index_of(&workflow, "download_inputs.reads");
    let platform = FakePlatform::new("ARCHIVING_FINISHED");
    let ctx = remote_ctx(workflow.clone(), platform.clone());

    assert_eq!(execute(&ctx, download).await.unwrap(), TaskState::Completed);
    assert_eq!(
        platform.log(),
        vec!["token".to_string(), "download https://example.org/reads.fq".to_string()]
    );

    let local: PathBuf = dir.path().join("wf/download_inputs.reads/agave/outputs/1");
    assert_eq!(
        std::fs::read_to_string(&local).unwrap(),
        "https://example.org/reads.fq"
    );
    let count = workflow.task("count").unwrap();
    assert_eq!(count.input_volumes[0].host_path, local);
}

#[tokio::test]
async fn test_download_of_remote_app_output() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = assemble(
        dir.path(),
        r#"
name: wf
processes:
  align:
    execution: agave_app
    app_id: bwa-0.7.10
    outputs:
      - results/aligned.bam -> bam
  stats:
    image: samtools
    inputs:
      - align.bam -> /in/aligned.bam
"#,
    );
    let download = index_of(&workflow, "download_align.bam");
    let platform = FakePlatform::new("ARCHIVING_FINISHED");
    let ctx = remote_ctx(workflow, platform.clone());

    execute(&ctx, download).await.unwrap();
    assert_eq!(
        platform.log().last().unwrap(),
        "download agave://sys//user/wf/align/outputs/results/aligned.bam"
    );
}
