// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Run results: per-terminal-stage artifact outcomes plus provenance
//!
//! The bundle is keyed by the graph's terminal stages, so the same
//! collection code serves every pipeline variant. Consumers match on the
//! stages present instead of assuming a fixed shape.

use crate::pipeline::artifact::{ArtifactRef, ArtifactStore};
use crate::pipeline::graph::PipelineGraph;
use crate::pipeline::instance::{TaskSet, TaskStatus};
use crate::pipeline::sample::Sample;
use crate::pipeline::stage::Cardinality;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What one terminal instance left behind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactOutcome {
    Present { artifacts: Vec<ArtifactRef> },
    Skipped { cause: String },
    Failed { error: String },
}

/// Results of one terminal stage across the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cardinality", rename_all = "snake_case")]
pub enum StageResults {
    PerSample {
        samples: BTreeMap<String, ArtifactOutcome>,
    },
    Aggregate {
        outcome: ArtifactOutcome,
    },
}

/// Provenance row for one task instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub stage: String,
    pub sample: Option<String>,
    pub status: TaskStatus,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub skip_cause: Option<String>,
}

/// Everything a run produced, plus how it got there
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunBundle {
    pub pipeline: String,
    pub samples: Vec<String>,
    /// True only when every instance succeeded
    pub success: bool,
    /// Keyed by terminal stage name
    pub stages: BTreeMap<String, StageResults>,
    /// One row per instance, in expansion order
    pub tasks: Vec<TaskReport>,
}

impl RunBundle {
    pub fn stage(&self, name: &str) -> Option<&StageResults> {
        self.stages.get(name)
    }

    pub fn to_json(&self) -> crate::errors::MagflowResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Collects terminal outputs and provenance once every instance is terminal
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn collect(
        graph: &PipelineGraph,
        samples: &[Sample],
        tasks: &TaskSet,
        store: &ArtifactStore,
    ) -> RunBundle {
        let mut stages = BTreeMap::new();

        for terminal in graph.terminal_stages() {
            let Some(spec) = graph.stage(terminal) else {
                continue;
            };
            let results = match spec.cardinality {
                Cardinality::PerSample => {
                    let mut per_sample = BTreeMap::new();
                    for sample in samples {
                        let outcome = Self::outcome_for(
                            graph,
                            tasks,
                            store,
                            terminal,
                            Some(&sample.name),
                        );
                        per_sample.insert(sample.name.clone(), outcome);
                    }
                    StageResults::PerSample {
                        samples: per_sample,
                    }
                }
                Cardinality::Aggregate => StageResults::Aggregate {
                    outcome: Self::outcome_for(graph, tasks, store, terminal, None),
                },
            };
            stages.insert(terminal.to_string(), results);
        }

        let task_rows: Vec<TaskReport> = tasks
            .tasks
            .iter()
            .map(|task| TaskReport {
                stage: task.id.stage.clone(),
                sample: task.id.sample.clone(),
                status: task.status,
                duration_ms: task.duration.map(|d| d.as_millis() as u64),
                error: task.error.clone(),
                skip_cause: task.skip_cause.clone(),
            })
            .collect();

        let success = tasks
            .tasks
            .iter()
            .all(|task| task.status == TaskStatus::Succeeded);

        RunBundle {
            pipeline: graph.name().to_string(),
            samples: samples.iter().map(|s| s.name.clone()).collect(),
            success,
            stages,
            tasks: task_rows,
        }
    }

    fn outcome_for(
        graph: &PipelineGraph,
        tasks: &TaskSet,
        store: &ArtifactStore,
        stage: &str,
        sample: Option<&str>,
    ) -> ArtifactOutcome {
        let instance = tasks
            .tasks
            .iter()
            .find(|t| t.id.stage == stage && t.id.sample.as_deref() == sample);
        let Some(instance) = instance else {
            return ArtifactOutcome::Skipped {
                cause: "instance never expanded".into(),
            };
        };

        match instance.status {
            TaskStatus::Succeeded => {
                let artifacts: Vec<ArtifactRef> = graph
                    .stage(stage)
                    .map(|spec| {
                        spec.outputs
                            .iter()
                            .filter_map(|slot| store.get(&slot.id, sample))
                            .collect()
                    })
                    .unwrap_or_default();
                ArtifactOutcome::Present { artifacts }
            }
            TaskStatus::Failed => ArtifactOutcome::Failed {
                error: instance.error.clone().unwrap_or_else(|| "failed".into()),
            },
            TaskStatus::Skipped => ArtifactOutcome::Skipped {
                cause: instance
                    .skip_cause
                    .clone()
                    .unwrap_or_else(|| "skipped".into()),
            },
            // The scheduler only collects after every instance is terminal
            TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Running => {
                ArtifactOutcome::Skipped {
                    cause: "never resolved".into(),
                }
            }
        }
    }
}
