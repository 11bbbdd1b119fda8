// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Task instances: the unit of scheduling
//!
//! A pipeline of stages expands against a sample batch into a flat set of
//! task instances. Per-sample stages contribute one instance per sample,
//! wired to the same sample's upstream instances; aggregate stages
//! contribute a single instance wired to every upstream instance.

use crate::pipeline::graph::PipelineGraph;
use crate::pipeline::sample::Sample;
use crate::pipeline::stage::Cardinality;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identity of one task instance within a run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub stage: String,
    /// `None` for aggregate instances
    pub sample: Option<String>,
}

impl TaskId {
    pub fn per_sample(stage: impl Into<String>, sample: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            sample: Some(sample.into()),
        }
    }

    pub fn aggregate(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            sample: None,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sample {
            Some(sample) => write!(f, "{}[{}]", self.stage, sample),
            None => write!(f, "{}", self.stage),
        }
    }
}

/// Lifecycle of a task instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on dependencies
    Pending,
    /// All dependencies succeeded; eligible for dispatch
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Will never run because an upstream instance failed or was skipped
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        write!(f, "{label}")
    }
}

/// One schedulable unit: a stage bound to a sample (or to the whole batch)
#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub id: TaskId,
    pub stage_idx: usize,
    pub status: TaskStatus,
    /// Indices of instances this one waits for
    pub deps: Vec<usize>,
    /// Indices of instances waiting for this one
    pub dependents: Vec<usize>,
    /// Rendered failure, for Failed instances
    pub error: Option<String>,
    /// Upstream instance that caused a skip
    pub skip_cause: Option<String>,
    pub duration: Option<Duration>,
}

impl TaskInstance {
    fn new(id: TaskId, stage_idx: usize) -> Self {
        Self {
            id,
            stage_idx,
            status: TaskStatus::Pending,
            deps: Vec::new(),
            dependents: Vec::new(),
            error: None,
            skip_cause: None,
            duration: None,
        }
    }
}

/// The expanded instance set for one run
#[derive(Debug)]
pub struct TaskSet {
    pub tasks: Vec<TaskInstance>,
}

impl TaskSet {
    /// Expand a validated graph against a sample batch
    ///
    /// Instance order is deterministic: stages in declaration order, and
    /// within a per-sample stage, samples in batch order.
    pub fn expand(graph: &PipelineGraph, samples: &[Sample]) -> Self {
        let mut tasks: Vec<TaskInstance> = Vec::new();
        // Per stage, the indices of its instances in `tasks`
        let mut stage_tasks: Vec<Vec<usize>> = Vec::with_capacity(graph.stages().len());

        for (stage_idx, stage) in graph.stages().iter().enumerate() {
            let mut indices = Vec::new();
            match stage.cardinality {
                Cardinality::PerSample => {
                    for (sample_idx, sample) in samples.iter().enumerate() {
                        let id = TaskId::per_sample(&stage.name, &sample.name);
                        let mut task = TaskInstance::new(id, stage_idx);
                        for dep_stage in graph.dependency_indices(stage_idx) {
                            match graph.stages()[dep_stage].cardinality {
                                // Same-sample upstream instance
                                Cardinality::PerSample => {
                                    task.deps.push(stage_tasks[dep_stage][sample_idx]);
                                }
                                // Rejected at graph validation
                                Cardinality::Aggregate => {}
                            }
                        }
                        indices.push(tasks.len());
                        tasks.push(task);
                    }
                }
                Cardinality::Aggregate => {
                    let id = TaskId::aggregate(&stage.name);
                    let mut task = TaskInstance::new(id, stage_idx);
                    for dep_stage in graph.dependency_indices(stage_idx) {
                        // Every instance of the upstream stage
                        task.deps.extend(stage_tasks[dep_stage].iter().copied());
                    }
                    indices.push(tasks.len());
                    tasks.push(task);
                }
            }
            stage_tasks.push(indices);
        }

        // Reverse edges, then mark dependency-free instances Ready
        for task_idx in 0..tasks.len() {
            for dep in tasks[task_idx].deps.clone() {
                tasks[dep].dependents.push(task_idx);
            }
        }
        for task in &mut tasks {
            if task.deps.is_empty() {
                task.status = TaskStatus::Ready;
            }
        }

        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskInstance> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| &t.id == id)
    }
}
