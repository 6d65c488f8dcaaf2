//! Reference resolution.
//!
//! Turns each task input's `<producer>.<label>` into a [`ProducerId`].
//! Resolution is two-phase: every task must exist before any input is
//! resolved, because a reference may name a task declared later.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ReferenceError, Result};
use crate::model::{GlobalInput, ProducerId, Reference, Task, TaskState};

/// Lookup over a fixed set of global inputs and tasks.
pub struct Resolver<'a> {
    global_inputs: &'a [GlobalInput],
    tasks: &'a [Task],
    by_name: HashMap<&'a str, usize>,
}

impl<'a> Resolver<'a> {
    pub fn new(global_inputs: &'a [GlobalInput], tasks: &'a [Task]) -> Self {
        let by_name = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();
        Self {
            global_inputs,
            tasks,
            by_name,
        }
    }

    pub fn resolve(&self, reference: &Reference) -> std::result::Result<ProducerId, ReferenceError> {
        if reference.is_global() {
            return self
                .global_inputs
                .iter()
                .position(|g| g.label == reference.label)
                .map(ProducerId::GlobalInput)
                .ok_or_else(|| ReferenceError::UnknownLabel {
                    reference: reference.to_string(),
                    producer: reference.producer.clone(),
                    available: self.global_inputs.iter().map(|g| g.label.clone()).collect(),
                });
        }

        let task = *self.by_name.get(reference.producer.as_str()).ok_or_else(|| {
            ReferenceError::UnknownTask {
                reference: reference.to_string(),
                task: reference.producer.clone(),
            }
        })?;
        let producer = &self.tasks[task];
        producer
            .output_index(&reference.label)
            .map(|output| ProducerId::TaskOutput { task, output })
            .ok_or_else(|| ReferenceError::UnknownLabel {
                reference: reference.to_string(),
                producer: producer.name.clone(),
                available: producer.outputs.iter().map(|o| o.label.clone()).collect(),
            })
    }
}

/// Resolve a single reference against global inputs and tasks.
pub fn resolve(
    reference: &Reference,
    global_inputs: &[GlobalInput],
    tasks: &[Task],
) -> std::result::Result<ProducerId, ReferenceError> {
    Resolver::new(global_inputs, tasks).resolve(reference)
}

/// Resolve every unresolved input of every task, in declaration order.
///
/// Inputs that already carry a `real_source` are left alone, so calling
/// this again is a no-op. Tasks still in `Created` move to
/// `InputsResolved`.
pub fn resolve_all(global_inputs: &[GlobalInput], tasks: &mut [Task]) -> Result<()> {
    let resolved = {
        let resolver = Resolver::new(global_inputs, tasks);
        let mut resolved = Vec::new();
        for (ti, task) in tasks.iter().enumerate() {
            for (ii, input) in task.inputs.iter().enumerate() {
                if input.real_source.is_some() {
                    continue;
                }
                let id = resolver.resolve(&input.reference)?;
                debug!(task = %task.name, reference = %input.reference, producer = ?id, "Resolved input");
                resolved.push((ti, ii, id));
            }
        }
        resolved
    };

    for (ti, ii, id) in resolved {
        tasks[ti].inputs[ii].real_source = Some(id);
    }
    for task in tasks.iter_mut() {
        if task.state == TaskState::Created {
            task.advance(TaskState::InputsResolved)?;
        }
    }
    Ok(())
}

/// Reject resolved tasks whose inputs form a cycle.
///
/// Kahn's algorithm over the consumer edges; whatever cannot be ordered is
/// then trimmed of tasks that only hang off a cycle, so the error names the
/// tasks on it, in declaration order.
pub fn check_acyclic(tasks: &[Task]) -> std::result::Result<(), ReferenceError> {
    let n = tasks.len();
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut upstream: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (consumer, task) in tasks.iter().enumerate() {
        for input in &task.inputs {
            if let Some(ProducerId::TaskOutput { task: producer, .. }) = input.real_source {
                if !downstream[producer].contains(&consumer) {
                    downstream[producer].push(consumer);
                    upstream[consumer].push(producer);
                }
            }
        }
    }

    let mut remaining = vec![true; n];
    let mut in_degree: Vec<usize> = upstream.iter().map(Vec::len).collect();
    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    while let Some(i) = ready.pop() {
        remaining[i] = false;
        for &next in &downstream[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(next);
            }
        }
    }
    if !remaining.iter().any(|&r| r) {
        return Ok(());
    }

    // Drop tasks downstream of a cycle that feed nothing still remaining.
    let mut out_degree: Vec<usize> = (0..n)
        .map(|i| downstream[i].iter().filter(|&&d| remaining[d]).count())
        .collect();
    let mut sinks: Vec<usize> = (0..n).filter(|&i| remaining[i] && out_degree[i] == 0).collect();
    while let Some(i) = sinks.pop() {
        remaining[i] = false;
        for &prev in &upstream[i] {
            if remaining[prev] {
                out_degree[prev] -= 1;
                if out_degree[prev] == 0 {
                    sinks.push(prev);
                }
            }
        }
    }

    Err(ReferenceError::Cycle {
        tasks: tasks
            .iter()
            .zip(remaining)
            .filter(|(_, r)| *r)
            .map(|(t, _)| t.name.clone())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionMode, TaskInput, TaskKind, TaskOutput};
    use crate::paths::PathTranslator;
    use crate::EngineError;

    fn fixture() -> (Vec<GlobalInput>, Vec<Task>) {
        let t = PathTranslator::with_host_base("/h").unwrap();
        let globals = vec![GlobalInput::new("input", "/data/in.txt", "wf", &t)];

        let container = || TaskKind::Container {
            image: "busybox".to_string(),
            command: None,
        };
        // `first` consumes `second`, which is declared after it.
        let mut first = Task::new("first", None, ExecutionMode::Docker, container());
        first.inputs.push(TaskInput::new(
            Reference::parse("second.out").unwrap(),
            "/in/second.txt",
        ));
        first.inputs.push(TaskInput::new(
            Reference::parse("inputs.input").unwrap(),
            "/in/input.txt",
        ));
        let mut second = Task::new("second", None, ExecutionMode::Docker, container());
        second
            .outputs
            .push(TaskOutput::new("wf", "second", "/out/x.txt", "out", &t).unwrap());
        (globals, vec![first, second])
    }

    #[test]
    fn test_forward_reference_resolves() {
        let (globals, mut tasks) = fixture();
        resolve_all(&globals, &mut tasks).unwrap();
        assert_eq!(
            tasks[0].inputs[0].real_source,
            Some(ProducerId::TaskOutput { task: 1, output: 0 })
        );
        assert_eq!(tasks[0].inputs[1].real_source, Some(ProducerId::GlobalInput(0)));
        assert!(tasks.iter().all(|t| t.state == TaskState::InputsResolved));
    }

    #[test]
    fn test_every_input_resolved() {
        let (globals, mut tasks) = fixture();
        resolve_all(&globals, &mut tasks).unwrap();
        assert!(tasks
            .iter()
            .flat_map(|t| &t.inputs)
            .all(|i| i.real_source.is_some()));
    }

    #[test]
    fn test_idempotent() {
        let (globals, mut tasks) = fixture();
        resolve_all(&globals, &mut tasks).unwrap();
        let first: Vec<_> = tasks[0].inputs.iter().map(|i| i.real_source).collect();
        resolve_all(&globals, &mut tasks).unwrap();
        let second: Vec<_> = tasks[0].inputs.iter().map(|i| i.real_source).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_removed_producer_task() {
        let (globals, mut tasks) = fixture();
        tasks.pop();
        let err = resolve_all(&globals, &mut tasks).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Reference(ReferenceError::UnknownTask { ref task, .. }) if task == "second"
        ));
    }

    #[test]
    fn test_removed_global_input() {
        let (_, mut tasks) = fixture();
        tasks[0].inputs.remove(0);
        let err = resolve_all(&[], &mut tasks).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Reference(ReferenceError::UnknownLabel { .. })
        ));
    }

    #[test]
    fn test_acyclic_passes() {
        let (globals, mut tasks) = fixture();
        resolve_all(&globals, &mut tasks).unwrap();
        check_acyclic(&tasks).unwrap();
    }

    #[test]
    fn test_cycle_names_only_its_members() {
        let t = PathTranslator::with_host_base("/h").unwrap();
        let (globals, mut tasks) = fixture();
        tasks[0]
            .outputs
            .push(TaskOutput::new("wf", "first", "/out/y.txt", "out", &t).unwrap());
        tasks[1].inputs.push(TaskInput::new(
            Reference::parse("first.out").unwrap(),
            "/in/first.txt",
        ));
        // Hangs off the cycle without being part of it.
        let mut third = Task::new(
            "third",
            None,
            ExecutionMode::Docker,
            TaskKind::Container {
                image: "busybox".to_string(),
                command: None,
            },
        );
        third.inputs.push(TaskInput::new(
            Reference::parse("second.out").unwrap(),
            "/in/second.txt",
        ));
        tasks.push(third);
        resolve_all(&globals, &mut tasks).unwrap();

        let err = check_acyclic(&tasks).unwrap_err();
        match &err {
            ReferenceError::Cycle { tasks } => assert_eq!(tasks, &["first", "second"]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.to_string(), "Dependency cycle between tasks: first, second");
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let (globals, mut tasks) = fixture();
        tasks[1].inputs.push(TaskInput::new(
            Reference::parse("second.out").unwrap(),
            "/in/own.txt",
        ));
        resolve_all(&globals, &mut tasks).unwrap();
        assert!(matches!(
            check_acyclic(&tasks),
            Err(ReferenceError::Cycle { ref tasks }) if tasks == &["second"]
        ));
    }

    #[test]
    fn test_unknown_output_label() {
        let (globals, tasks) = fixture();
        let err = resolve(&Reference::parse("second.nope").unwrap(), &globals, &tasks).unwrap_err();
        match err {
            ReferenceError::UnknownLabel { available, .. } => assert_eq!(available, ["out"]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
