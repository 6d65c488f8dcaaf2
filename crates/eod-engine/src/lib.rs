//! Workflow graph resolution and execution dispatch for container pipelines.
//!
//! A workflow declares global inputs and processes. Each process consumes
//! `<producer>.<label>` references and produces labelled outputs. This crate
//! turns such a declaration into an immutable graph of tasks, works out the
//! bind mounts each task needs, and runs each task on the local container
//! runtime or as a job on a remote platform.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌───────────────────┐   ┌─────────────────────┐
//! │ WorkflowSource   │──▶│ WorkflowAssembler │──▶│ Workflow (Arc)      │
//! │ (YAML)           │   │ resolve + mounts  │   │ tasks, producers    │
//! └──────────────────┘   └───────────────────┘   └──────────┬──────────┘
//!                                                           │ descriptors
//!                                      ┌────────────────────▼──────────┐
//!                                      │ ExecutionStrategy (dispatch)  │
//!                                      │ local │ remote app │ download │
//!                                      └───────────────┬───────────────┘
//!                                                      │
//!                                           RemoteJobFuture / RemotePlatform
//! ```

pub mod assembler;
pub mod declaration;
pub mod error;
pub mod executor;
pub mod job;
pub mod model;
pub mod mounts;
pub mod paths;
pub mod remote;
pub mod resolver;

pub use assembler::{TaskAction, TaskDescriptor, TaskFuture, WorkflowAssembler};
pub use declaration::{InputDeclarations, TaskDeclaration, WorkflowSource};
pub use error::{
    DeclarationError, EngineError, LocalExecutionError, MountConflictError, ReferenceError,
    RemoteOperationError, Result, TimeoutError,
};
pub use executor::{
    ExecutionContext, ExecutionStrategy, RemoteContext, dispatch, docker_command, execute,
};
pub use job::{JobStatus, PollPolicy, RemoteJobFuture, collapse_history};
pub use model::{
    ExecutionMode, GlobalInput, Producer, ProducerId, Reference, Task, TaskInput, TaskKind,
    TaskOutput, TaskState, Volume, Workflow,
};
pub use mounts::{plan_input_volumes, plan_output_volumes};
pub use paths::PathTranslator;
pub use remote::{
    HistoryEvent, JobHandle, JobSubmission, RemoteLayout, RemotePlatform, RemoteResult,
    TransferHandle, job_name,
};
pub use resolver::{Resolver, check_acyclic, resolve, resolve_all};
