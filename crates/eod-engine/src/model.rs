//! Workflow data model.
//!
//! A [`Workflow`] owns its global inputs and tasks in two ordered arenas.
//! Task inputs point at their producers through [`ProducerId`] indices into
//! those arenas, so the graph has no back-references and can be shared
//! read-only once assembled.

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{DeclarationError, EngineError, Result};
use crate::paths::PathTranslator;

/// Producer name used by references to global inputs.
pub const GLOBAL_INPUTS: &str = "inputs";

/// Directory (inside the host workflow dir) holding URI placeholders.
pub const GLOBAL_INPUTS_DIR: &str = "global_inputs";

/// In-container directory of remote application inputs.
pub const REMOTE_INPUTS_DIR: &str = "/agave/inputs";

/// In-container directory of remote application outputs.
pub const REMOTE_OUTPUTS_DIR: &str = "/agave/outputs";

// ─────────────────────────────────────────────────────────────────────────────
// References
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to something that produces data: a global input or a task output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerId {
    GlobalInput(usize),
    TaskOutput { task: usize, output: usize },
}

/// A parsed `<producer>.<label>` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub producer: String,
    pub label: String,
}

impl Reference {
    /// Parse a reference. Exactly two non-empty dot-separated parts.
    pub fn parse(text: &str) -> std::result::Result<Self, DeclarationError> {
        let text = text.trim();
        let mut parts = text.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(producer), Some(label), None) if !producer.is_empty() && !label.is_empty() => {
                Ok(Self {
                    producer: producer.to_string(),
                    label: label.to_string(),
                })
            }
            _ => Err(DeclarationError::InvalidReference(text.to_string())),
        }
    }

    pub fn is_global(&self) -> bool {
        self.producer == GLOBAL_INPUTS
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.producer, self.label)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Global inputs
// ─────────────────────────────────────────────────────────────────────────────

/// Workflow-level input, referenced as `inputs.<label>`.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalInput {
    pub label: String,
    /// As declared: a URI, an absolute path or a path relative to the host base.
    pub source: String,
    pub host_path: PathBuf,
    /// Where the orchestrator sees `host_path`.
    pub container_path: PathBuf,
    pub is_uri: bool,
}

impl GlobalInput {
    pub fn new(
        label: impl Into<String>,
        source: impl Into<String>,
        workflow: &str,
        translator: &PathTranslator,
    ) -> Self {
        let label = label.into();
        let source = source.into();
        let is_uri = is_uri(&source);
        let host_path = if is_uri {
            translator
                .host_base()
                .join(workflow)
                .join(GLOBAL_INPUTS_DIR)
                .join(&label)
        } else if Path::new(&source).is_absolute() {
            PathBuf::from(&source)
        } else {
            translator.host_base().join(&source)
        };
        let container_path = translator.to_container(&host_path);
        Self {
            label,
            source,
            host_path,
            container_path,
            is_uri,
        }
    }
}

/// True when `source` is an absolute URI with a scheme.
///
/// Single-letter schemes are rejected so drive-letter paths stay paths.
pub fn is_uri(source: &str) -> bool {
    match url::Url::parse(source) {
        Ok(url) => url.scheme().len() > 1,
        Err(_) => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task inputs and outputs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct TaskInput {
    #[serde(serialize_with = "serialize_display")]
    pub reference: Reference,
    /// Destination inside the task's container.
    pub dest: PathBuf,
    /// Remote application input id, for remote-app tasks only.
    pub app_input_id: Option<String>,
    /// Resolved producer. `None` until resolution.
    pub real_source: Option<ProducerId>,
}

impl TaskInput {
    pub fn new(reference: Reference, dest: impl Into<PathBuf>) -> Self {
        Self {
            reference,
            dest: dest.into(),
            app_input_id: None,
            real_source: None,
        }
    }
}

fn serialize_display<S: serde::Serializer, T: fmt::Display>(
    value: &T,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutput {
    /// Absolute path inside the task container. A trailing `/` marks a
    /// directory output.
    pub source: String,
    pub label: String,
    /// `<host_base>/<workflow>/<task>/<source>`.
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    /// Produced on the remote platform rather than on local disk.
    pub is_uri: bool,
    /// Path relative to the remote job's archive, for remote-app outputs.
    pub remote_path: Option<String>,
}

impl TaskOutput {
    pub fn new(
        workflow: &str,
        task: &str,
        source: impl Into<String>,
        label: impl Into<String>,
        translator: &PathTranslator,
    ) -> std::result::Result<Self, DeclarationError> {
        let source = source.into();
        if !source.starts_with('/') {
            return Err(DeclarationError::RelativeOutput {
                task: task.to_string(),
                path: source,
            });
        }
        let host_path = translator
            .host_base()
            .join(workflow)
            .join(task)
            .join(source.trim_start_matches('/'));
        let container_path = translator.to_container(&host_path);
        Ok(Self {
            source,
            label: label.into(),
            host_path,
            container_path,
            is_uri: false,
            remote_path: None,
        })
    }

    /// Output of a remote application, archived at `remote_path` relative to
    /// the job's archive directory.
    pub fn remote(
        workflow: &str,
        task: &str,
        remote_path: impl Into<String>,
        label: impl Into<String>,
        translator: &PathTranslator,
    ) -> std::result::Result<Self, DeclarationError> {
        let remote_path = remote_path.into();
        if remote_path.starts_with('/') {
            return Err(DeclarationError::AbsoluteRemoteOutput {
                task: task.to_string(),
                path: remote_path,
            });
        }
        let source = format!("{REMOTE_OUTPUTS_DIR}/{remote_path}");
        let mut output = Self::new(workflow, task, source, label, translator)?;
        output.is_uri = true;
        output.remote_path = Some(remote_path);
        Ok(output)
    }

    pub fn is_directory(&self) -> bool {
        self.source.ends_with('/')
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Volumes
// ─────────────────────────────────────────────────────────────────────────────

/// A bind mount for the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Volume {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
}

impl Volume {
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
        }
    }
}

/// Renders as the `-v` argument value, `host:container`.
impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.host_path.display(),
            self.container_path.display()
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────────────────────────────────────

/// How a declared process asked to be run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Docker,
    Agave,
    AgaveApp,
}

impl ExecutionMode {
    pub fn parse(task: &str, mode: Option<&str>) -> std::result::Result<Self, DeclarationError> {
        match mode.map(str::trim) {
            None | Some("docker") => Ok(ExecutionMode::Docker),
            Some("agave") => Ok(ExecutionMode::Agave),
            Some("agave_app") => Ok(ExecutionMode::AgaveApp),
            Some(other) => Err(DeclarationError::UnknownExecution {
                task: task.to_string(),
                mode: other.to_string(),
            }),
        }
    }
}

/// What a task does when dispatched.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Run an image on the local container runtime.
    Container {
        image: String,
        command: Option<String>,
    },
    /// Submit a job to the remote platform.
    RemoteApp {
        app_id: String,
        parameters: IndexMap<String, serde_json::Value>,
    },
    /// Fetch a remote producer to local disk. Inserted by the assembler.
    RemoteDownload { source: ProducerId },
}

/// Per-task lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    InputsResolved,
    MountsPlanned,
    Dispatched,
    Polling,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    pub fn can_advance_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Created, InputsResolved)
            | (InputsResolved, MountsPlanned)
            | (MountsPlanned, Dispatched)
            | (Dispatched, Polling)
            | (Dispatched, Completed)
            | (Polling, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Checked transition.
    pub fn advance(&mut self, task: &str, next: TaskState) -> Result<()> {
        if !self.can_advance_to(next) {
            return Err(EngineError::InvalidTransition {
                task: task.to_string(),
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub name: String,
    pub description: Option<String>,
    pub execution: ExecutionMode,
    #[serde(flatten)]
    pub kind: TaskKind,
    pub inputs: Vec<TaskInput>,
    pub outputs: Vec<TaskOutput>,
    pub output_volumes: Vec<Volume>,
    pub input_volumes: Vec<Volume>,
    pub state: TaskState,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        execution: ExecutionMode,
        kind: TaskKind,
    ) -> Self {
        Self {
            name: name.into(),
            description,
            execution,
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            output_volumes: Vec::new(),
            input_volumes: Vec::new(),
            state: TaskState::Created,
        }
    }

    /// Runs on the local container runtime.
    pub fn is_local(&self) -> bool {
        matches!(self.kind, TaskKind::Container { .. })
    }

    pub fn is_download(&self) -> bool {
        matches!(self.kind, TaskKind::RemoteDownload { .. })
    }

    pub fn output_index(&self, label: &str) -> Option<usize> {
        self.outputs.iter().position(|o| o.label == label)
    }

    pub fn advance(&mut self, next: TaskState) -> Result<()> {
        let name = self.name.clone();
        self.state.advance(&name, next)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workflow
// ─────────────────────────────────────────────────────────────────────────────

/// An assembled workflow. Immutable once the assembler returns it.
#[derive(Debug, Clone, Serialize)]
pub struct Workflow {
    pub name: String,
    pub global_inputs: Vec<GlobalInput>,
    /// Declared tasks in declaration order, then synthetic download tasks.
    pub tasks: Vec<Task>,
    #[serde(skip)]
    pub translator: PathTranslator,
}

impl Workflow {
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Host directory holding everything this workflow writes.
    pub fn host_dir(&self) -> PathBuf {
        self.translator.host_base().join(&self.name)
    }

    pub fn producer(&self, id: ProducerId) -> Option<Producer<'_>> {
        match id {
            ProducerId::GlobalInput(i) => self.global_inputs.get(i).map(Producer::Global),
            ProducerId::TaskOutput { task, output } => {
                let t = self.tasks.get(task)?;
                t.outputs.get(output).map(|o| Producer::Output(t, o))
            }
        }
    }
}

/// Borrowed view of a resolved producer.
#[derive(Debug, Clone, Copy)]
pub enum Producer<'a> {
    Global(&'a GlobalInput),
    Output(&'a Task, &'a TaskOutput),
}

impl<'a> Producer<'a> {
    pub fn label(&self) -> &'a str {
        match self {
            Producer::Global(g) => &g.label,
            Producer::Output(_, o) => &o.label,
        }
    }

    /// Name of the producing side of a reference: `inputs` or the task name.
    pub fn parent(&self) -> &'a str {
        match self {
            Producer::Global(_) => GLOBAL_INPUTS,
            Producer::Output(t, _) => &t.name,
        }
    }

    pub fn host_path(&self) -> &'a Path {
        match self {
            Producer::Global(g) => &g.host_path,
            Producer::Output(_, o) => &o.host_path,
        }
    }

    pub fn container_path(&self) -> &'a Path {
        match self {
            Producer::Global(g) => &g.container_path,
            Producer::Output(_, o) => &o.container_path,
        }
    }

    pub fn is_uri(&self) -> bool {
        match self {
            Producer::Global(g) => g.is_uri,
            Producer::Output(_, o) => o.is_uri,
        }
    }
}
