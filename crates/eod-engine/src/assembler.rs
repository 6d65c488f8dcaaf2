//! Workflow assembly.
//!
//! Turns a parsed [`WorkflowSource`] into an immutable [`Workflow`]:
//!
//! 1. build global inputs and tasks from the declaration
//! 2. resolve every task input (two-phase, see [`crate::resolver`]) and
//!    reject dependency cycles
//! 3. insert a download task for every remote producer consumed locally
//! 4. plan output and input volumes
//!
//! [`WorkflowAssembler::descriptors`] then exposes each task to a scheduler.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::declaration::{InputDeclarations, TaskDeclaration, WorkflowSource, parse_backward, parse_forward};
use crate::error::{DeclarationError, EngineError, Result};
use crate::executor::{ExecutionContext, execute};
use crate::model::{
    ExecutionMode, GLOBAL_INPUTS, GlobalInput, ProducerId, REMOTE_INPUTS_DIR, REMOTE_OUTPUTS_DIR,
    Reference, Task, TaskInput, TaskKind, TaskOutput, TaskState, Workflow,
};
use crate::mounts::{plan_input_volumes, plan_output_volumes};
use crate::paths::PathTranslator;
use crate::resolver::{check_acyclic, resolve_all};

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<TaskState>> + Send>>;

/// Async callable that runs one task to completion.
pub type TaskAction = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// What a scheduler needs to order and run one task.
#[derive(Clone)]
pub struct TaskDescriptor {
    pub name: String,
    pub doc: Option<String>,
    pub action: TaskAction,
    /// Orchestrator paths the task produces.
    pub targets: Vec<PathBuf>,
    /// Orchestrator paths the task consumes.
    pub file_dep: Vec<PathBuf>,
}

impl TaskDescriptor {
    pub async fn run(&self) -> Result<TaskState> {
        (self.action)().await
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("doc", &self.doc)
            .field("targets", &self.targets)
            .field("file_dep", &self.file_dep)
            .finish_non_exhaustive()
    }
}

/// Builds workflows against one path layout.
#[derive(Debug, Clone)]
pub struct WorkflowAssembler {
    translator: PathTranslator,
}

impl WorkflowAssembler {
    pub fn new(translator: PathTranslator) -> Self {
        Self { translator }
    }

    /// Assemble a workflow. Pure: touches no filesystem.
    pub fn build(&self, source: &WorkflowSource) -> Result<Workflow> {
        let name = validate_workflow_name(source.name.as_deref())?;

        let global_inputs = self.build_global_inputs(&name, source)?;
        let mut tasks = self.build_tasks(&name, source)?;
        resolve_all(&global_inputs, &mut tasks)?;
        check_acyclic(&tasks)?;

        let declared = tasks.len();
        self.insert_downloads(&name, &global_inputs, &mut tasks)?;

        let mut workflow = Workflow {
            name,
            global_inputs,
            tasks,
            translator: self.translator.clone(),
        };
        plan_volumes(&mut workflow)?;

        info!(
            workflow = %workflow.name,
            tasks = declared,
            downloads = workflow.tasks.len() - declared,
            global_inputs = workflow.global_inputs.len(),
            "Assembled workflow"
        );
        Ok(workflow)
    }

    // ── Parsing ─────────────────────────────────────────────────────────

    fn build_global_inputs(&self, workflow: &str, source: &WorkflowSource) -> Result<Vec<GlobalInput>> {
        let mut seen = HashSet::new();
        let mut inputs = Vec::new();
        for text in source.global_inputs() {
            let (label, src) = parse_backward(text, "global input")?;
            if !seen.insert(label.clone()) {
                return Err(DeclarationError::DuplicateGlobalInput(label).into());
            }
            inputs.push(GlobalInput::new(label, src, workflow, &self.translator));
        }
        Ok(inputs)
    }

    fn build_tasks(&self, workflow: &str, source: &WorkflowSource) -> Result<Vec<Task>> {
        let mut seen = HashSet::new();
        let mut tasks = Vec::new();
        for (raw_name, decl) in source.processes() {
            let name = raw_name.trim();
            if name.is_empty() || name.contains('.') || name == GLOBAL_INPUTS {
                return Err(DeclarationError::InvalidTaskName(name.to_string()).into());
            }
            if !seen.insert(name) {
                return Err(DeclarationError::DuplicateTask(name.to_string()).into());
            }
            tasks.push(self.build_task(workflow, name, decl)?);
        }
        Ok(tasks)
    }

    fn build_task(&self, workflow: &str, name: &str, decl: &TaskDeclaration) -> Result<Task> {
        let execution = ExecutionMode::parse(name, decl.execution.as_deref())?;
        let description = decl.description.clone();

        let mut task = match execution {
            ExecutionMode::Docker | ExecutionMode::Agave => {
                if execution == ExecutionMode::Agave {
                    warn!(task = %name, "Whole-task remote execution is not handled here; running locally");
                }
                let image = decl
                    .image
                    .as_deref()
                    .map(str::trim)
                    .filter(|i| !i.is_empty())
                    .ok_or_else(|| DeclarationError::MissingField {
                        task: name.to_string(),
                        field: "image",
                    })?;
                let mut task = Task::new(
                    name,
                    description,
                    execution,
                    TaskKind::Container {
                        image: image.to_string(),
                        command: decl.command.as_deref().map(|c| c.trim().to_string()),
                    },
                );
                task.inputs = container_inputs(name, decl.inputs.as_ref())?;
                for text in decl.outputs() {
                    let (src, label) = parse_forward(text, "output")?;
                    task.outputs
                        .push(TaskOutput::new(workflow, name, src, label, &self.translator)?);
                }
                task
            }
            ExecutionMode::AgaveApp => {
                let app_id = decl
                    .app_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| DeclarationError::MissingField {
                        task: name.to_string(),
                        field: "app_id",
                    })?;
                let mut task = Task::new(
                    name,
                    description,
                    execution,
                    TaskKind::RemoteApp {
                        app_id: app_id.to_string(),
                        parameters: decl.parameters.clone().unwrap_or_default(),
                    },
                );
                task.inputs = app_inputs(name, decl.inputs.as_ref())?;
                for text in decl.outputs() {
                    let (src, label) = parse_forward(text, "output")?;
                    task.outputs
                        .push(TaskOutput::remote(workflow, name, src, label, &self.translator)?);
                }
                task
            }
        };

        let mut labels = HashSet::new();
        for output in &task.outputs {
            if !labels.insert(output.label.as_str()) {
                return Err(DeclarationError::DuplicateOutputLabel {
                    task: name.to_string(),
                    label: output.label.clone(),
                }
                .into());
            }
        }
        task.description = task.description.take().map(|d| d.trim().to_string());
        Ok(task)
    }

    // ── Remote materialization ──────────────────────────────────────────

    /// Give every remote producer that a local task consumes exactly one
    /// download task, and point the local consumers at its output.
    fn insert_downloads(
        &self,
        workflow: &str,
        global_inputs: &[GlobalInput],
        tasks: &mut Vec<Task>,
    ) -> Result<()> {
        let mut downloads: HashMap<ProducerId, usize> = HashMap::new();

        loop {
            let mut needed: Vec<ProducerId> = Vec::new();
            for task in tasks.iter().filter(|t| t.is_local()) {
                for input in &task.inputs {
                    let Some(id) = input.real_source else { continue };
                    if downloads.contains_key(&id) || needed.contains(&id) {
                        continue;
                    }
                    if producer_is_uri(global_inputs, tasks.as_slice(), id) {
                        needed.push(id);
                    }
                }
            }
            if needed.is_empty() {
                break;
            }

            for id in needed {
                let download = self.download_task(workflow, global_inputs, tasks.as_slice(), id)?;
                debug!(task = %download.name, "Inserted download task");
                downloads.insert(id, tasks.len());
                tasks.push(download);
            }

            for task in tasks.iter_mut().filter(|t| t.is_local()) {
                for input in &mut task.inputs {
                    if let Some(&dl) = input.real_source.as_ref().and_then(|id| downloads.get(id)) {
                        input.real_source = Some(ProducerId::TaskOutput { task: dl, output: 0 });
                    }
                }
            }
        }
        Ok(())
    }

    fn download_task(
        &self,
        workflow: &str,
        global_inputs: &[GlobalInput],
        tasks: &[Task],
        id: ProducerId,
    ) -> Result<Task> {
        let (parent, label) = match id {
            ProducerId::GlobalInput(i) => (GLOBAL_INPUTS.to_string(), global_inputs[i].label.clone()),
            ProducerId::TaskOutput { task, output } => (
                tasks[task].name.clone(),
                tasks[task].outputs[output].label.clone(),
            ),
        };
        let name = format!("download_{parent}.{label}");

        let mut task = Task::new(
            name.clone(),
            Some(format!("Fetch {parent}.{label} for local use")),
            ExecutionMode::Agave,
            TaskKind::RemoteDownload { source: id },
        );
        task.inputs.push(TaskInput {
            reference: Reference {
                producer: parent,
                label: label.clone(),
            },
            dest: PathBuf::from(format!("{REMOTE_INPUTS_DIR}/1")),
            app_input_id: None,
            real_source: Some(id),
        });
        task.outputs.push(TaskOutput::new(
            workflow,
            &name,
            format!("{REMOTE_OUTPUTS_DIR}/1"),
            label,
            &self.translator,
        )?);
        task.advance(TaskState::InputsResolved)?;
        Ok(task)
    }

    // ── Filesystem and scheduler ────────────────────────────────────────

    /// Write URI placeholders and create per-task base directories.
    pub fn materialize(workflow: &Workflow) -> Result<()> {
        let translator = &workflow.translator;
        for input in workflow.global_inputs.iter().filter(|g| g.is_uri) {
            if let Some(parent) = input.container_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
            }
            std::fs::write(&input.container_path, format!("{}\n", input.source))
                .map_err(|e| EngineError::io(&input.container_path, e))?;
            debug!(label = %input.label, path = %input.container_path.display(), "Wrote URI placeholder");
        }
        for task in &workflow.tasks {
            let dir = translator.to_container(&workflow.host_dir().join(&task.name));
            std::fs::create_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;
        }
        Ok(())
    }

    /// One descriptor per task, in workflow order.
    pub fn descriptors(ctx: Arc<ExecutionContext>) -> Vec<TaskDescriptor> {
        let workflow = ctx.workflow.clone();
        workflow
            .tasks
            .iter()
            .enumerate()
            .map(|(index, task)| {
                let targets = task.outputs.iter().map(|o| o.container_path.clone()).collect();
                let file_dep = task
                    .inputs
                    .iter()
                    .filter_map(|i| i.real_source.and_then(|id| workflow.producer(id)))
                    .map(|p| p.container_path().to_path_buf())
                    .collect();
                let ctx = ctx.clone();
                let action: TaskAction = Arc::new(move || -> TaskFuture {
                    let ctx = ctx.clone();
                    Box::pin(async move { execute(&ctx, index).await })
                });
                TaskDescriptor {
                    name: task.name.clone(),
                    doc: task.description.clone(),
                    action,
                    targets,
                    file_dep,
                }
            })
            .collect()
    }
}

fn validate_workflow_name(name: Option<&str>) -> Result<String> {
    let name = name.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(DeclarationError::MissingName.into());
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(DeclarationError::InvalidName(name.to_string()).into());
    }
    Ok(name.to_string())
}

fn container_inputs(task: &str, decl: Option<&InputDeclarations>) -> Result<Vec<TaskInput>> {
    let list = match decl {
        None => return Ok(Vec::new()),
        Some(InputDeclarations::List(list)) => list,
        Some(other) => {
            return Err(DeclarationError::InputShape {
                task: task.to_string(),
                found: other.kind(),
                expected: "a list",
            }
            .into());
        }
    };
    list.iter()
        .map(|text| -> Result<TaskInput> {
            let (src, dest) = parse_forward(text, "input")?;
            Ok(TaskInput::new(Reference::parse(&src)?, dest))
        })
        .collect()
}

fn app_inputs(task: &str, decl: Option<&InputDeclarations>) -> Result<Vec<TaskInput>> {
    let map = match decl {
        None => return Ok(Vec::new()),
        Some(InputDeclarations::List(list)) if list.is_empty() => return Ok(Vec::new()),
        Some(InputDeclarations::ByAppInput(map)) => map,
        Some(other) => {
            return Err(DeclarationError::InputShape {
                task: task.to_string(),
                found: other.kind(),
                expected: "a mapping",
            }
            .into());
        }
    };
    let mut inputs = Vec::new();
    for (id, sources) in map {
        for (index, src) in sources.iter().enumerate() {
            let mut input = TaskInput::new(
                Reference::parse(src)?,
                format!("{REMOTE_INPUTS_DIR}/{id}/{index}"),
            );
            input.app_input_id = Some(id.clone());
            inputs.push(input);
        }
    }
    Ok(inputs)
}

fn producer_is_uri(global_inputs: &[GlobalInput], tasks: &[Task], id: ProducerId) -> bool {
    match id {
        ProducerId::GlobalInput(i) => global_inputs.get(i).is_some_and(|g| g.is_uri),
        ProducerId::TaskOutput { task, output } => tasks
            .get(task)
            .and_then(|t| t.outputs.get(output))
            .is_some_and(|o| o.is_uri),
    }
}

fn plan_volumes(workflow: &mut Workflow) -> Result<()> {
    let input_volumes = (0..workflow.tasks.len())
        .map(|i| plan_input_volumes(workflow, i))
        .collect::<Result<Vec<_>>>()?;
    for (task, inputs) in workflow.tasks.iter_mut().zip(input_volumes) {
        task.output_volumes = plan_output_volumes(&task.outputs);
        task.input_volumes = inputs;
        task.advance(TaskState::MountsPlanned)?;
    }
    Ok(())
}
