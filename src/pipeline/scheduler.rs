// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Concurrent task scheduler
//!
//! Expands a validated graph against a sample batch, then drives the
//! instances through a bounded worker pool. Completion events flow back
//! through a [`tokio::task::JoinSet`]; each one updates the instance table
//! and may make dependents ready or skip them. A failure only poisons its
//! own downstream cone, so one bad sample never stops the batch.

use crate::errors::{MagflowError, MagflowResult};
use crate::pipeline::artifact::{ArtifactRef, ArtifactStore};
use crate::pipeline::bundle::{ResultAggregator, RunBundle};
use crate::pipeline::graph::{InputSource, PipelineGraph, SourceRole};
use crate::pipeline::instance::{TaskInstance, TaskSet, TaskStatus};
use crate::pipeline::sample::{validate_samples, Sample};
use crate::pipeline::stage::{Cardinality, StageContext, StageInputs};
use crate::tools::Toolchain;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Directory name for the single instance of an aggregate stage
const AGGREGATE_DIR: &str = "aggregate";

/// Drives one pipeline run to completion
#[derive(Debug)]
pub struct Scheduler {
    max_parallel: usize,
    toolchain: Arc<Toolchain>,
    preflight: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            max_parallel: num_cpus::get(),
            toolchain: Arc::new(Toolchain::new()),
            preflight: true,
        }
    }

    /// Cap on concurrently running instances (at least 1)
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = Arc::new(toolchain);
        self
    }

    /// Toggle the up-front check that every required tool resolves
    pub fn with_preflight(mut self, preflight: bool) -> Self {
        self.preflight = preflight;
        self
    }

    /// Run a pipeline over a sample batch
    ///
    /// Instance workdirs and `manifest.json` land under `run_root`. The
    /// returned bundle reports every terminal stage outcome; an `Err` means
    /// the run itself could not proceed (bad configuration, missing tools
    /// or reads, deadlock), not that a stage failed.
    pub async fn run(
        &self,
        graph: &PipelineGraph,
        samples: &[Sample],
        run_root: &Path,
    ) -> MagflowResult<RunBundle> {
        validate_samples(samples)?;
        if self.preflight {
            self.check_tools(graph)?;
        }

        tokio::fs::create_dir_all(run_root).await?;
        let store = Arc::new(ArtifactStore::new());
        self.seed_sources(graph, samples, &store).await?;

        let mut tasks = TaskSet::expand(graph, samples);
        info!(
            "starting pipeline '{}': {} sample(s), {} task(s), max_parallel={}",
            graph.name(),
            samples.len(),
            tasks.len(),
            self.max_parallel
        );
        info!("execution plan:\n{}", graph.execution_plan());

        let started = Instant::now();
        self.event_loop(graph, samples, run_root, &store, &mut tasks)
            .await?;

        let bundle = ResultAggregator::collect(graph, samples, &tasks, &store);
        let manifest_path = run_root.join("manifest.json");
        tokio::fs::write(&manifest_path, bundle.to_json()?).await?;

        info!(
            "pipeline '{}' finished in {:.1}s (success: {})",
            graph.name(),
            started.elapsed().as_secs_f64(),
            bundle.success
        );
        Ok(bundle)
    }

    /// Resolve every tool the graph needs before running anything
    fn check_tools(&self, graph: &PipelineGraph) -> MagflowResult<()> {
        for tool in graph.required_tools() {
            let path = self.toolchain.resolve(&tool)?;
            debug!("tool '{}' -> {}", tool, path.display());
        }
        Ok(())
    }

    /// Register the per-sample read artifacts the graph's sources declare
    async fn seed_sources(
        &self,
        graph: &PipelineGraph,
        samples: &[Sample],
        store: &ArtifactStore,
    ) -> MagflowResult<()> {
        for sample in samples {
            for source in graph.sources() {
                let declared = match source.role {
                    SourceRole::Read1 => &sample.read1,
                    SourceRole::Read2 => &sample.read2,
                };
                let path = tokio::fs::canonicalize(declared).await.map_err(|e| {
                    MagflowError::InvalidSample {
                        name: sample.name.clone(),
                        reason: format!("cannot resolve {}: {}", declared.display(), e),
                    }
                })?;
                let artifact =
                    ArtifactRef::new(&source.id, Some(sample.name.clone()), source.kind, path);
                store.insert(artifact).map_err(|rejected| {
                    MagflowError::OutputCollision {
                        id: rejected.id,
                        first: "sources".into(),
                        second: "sources".into(),
                    }
                })?;
            }
        }
        Ok(())
    }

    async fn event_loop(
        &self,
        graph: &PipelineGraph,
        samples: &[Sample],
        run_root: &Path,
        store: &Arc<ArtifactStore>,
        tasks: &mut TaskSet,
    ) -> MagflowResult<()> {
        let mut ready: VecDeque<usize> = tasks
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TaskStatus::Ready)
            .map(|(i, _)| i)
            .collect();
        let mut workers: JoinSet<WorkerReport> = JoinSet::new();

        loop {
            // Fill the worker pool from the ready queue
            while workers.len() < self.max_parallel {
                let Some(idx) = ready.pop_front() else {
                    break;
                };
                self.dispatch(
                    graph, samples, run_root, store, tasks, idx, &mut ready, &mut workers,
                );
            }

            if workers.is_empty() {
                let pending: Vec<String> = tasks
                    .tasks
                    .iter()
                    .filter(|t| !t.status.is_terminal())
                    .map(|t| t.id.to_string())
                    .collect();
                if pending.is_empty() {
                    return Ok(());
                }
                error!("scheduler stalled; pending: {}", pending.join(", "));
                return Err(MagflowError::Deadlock { pending });
            }

            match workers.join_next().await {
                Some(Ok(report)) => {
                    self.apply_report(graph, store, tasks, &mut ready, report);
                }
                Some(Err(join_err)) => {
                    // The worker wrapper itself died; the instance stays
                    // non-terminal and surfaces in the stall report
                    error!("worker task lost: {}", join_err);
                }
                None => {}
            }
        }
    }

    /// Spawn one ready instance onto the worker pool
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        graph: &PipelineGraph,
        samples: &[Sample],
        run_root: &Path,
        store: &Arc<ArtifactStore>,
        tasks: &mut TaskSet,
        idx: usize,
        ready: &mut VecDeque<usize>,
        workers: &mut JoinSet<WorkerReport>,
    ) {
        let task = &tasks.tasks[idx];
        let spec = &graph.stages()[task.stage_idx];

        let inputs = match build_inputs(graph, samples, store, task) {
            Ok(inputs) => inputs,
            Err(e) => {
                let message = render_error(&e);
                warn!("{} failed before dispatch: {}", task.id, message);
                tasks.tasks[idx].status = TaskStatus::Failed;
                tasks.tasks[idx].error = Some(message);
                for dep in tasks.tasks[idx].dependents.clone() {
                    resolve(tasks, dep, ready);
                }
                return;
            }
        };

        let scope_dir = task
            .id
            .sample
            .clone()
            .unwrap_or_else(|| AGGREGATE_DIR.to_string());
        let workdir = run_root.join(&spec.name).join(scope_dir);
        let ctx = StageContext::new(
            spec.name.clone(),
            task.id.sample.clone(),
            workdir,
            Arc::clone(&self.toolchain),
        );
        let runner = spec.runner();

        debug!("dispatching {}", task.id);
        tasks.tasks[idx].status = TaskStatus::Running;

        workers.spawn(async move {
            let started = Instant::now();
            let result = async {
                tokio::fs::create_dir_all(&ctx.workdir).await?;
                let body = runner.run(&ctx, &inputs);
                match AssertUnwindSafe(body).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(MagflowError::StageFailed {
                        stage: ctx.stage.clone(),
                        sample: ctx.sample.clone(),
                        message: "stage runner panicked".into(),
                        help: None,
                    }),
                }
            }
            .await;
            WorkerReport {
                task_idx: idx,
                result,
                duration: started.elapsed(),
            }
        });
    }

    /// Fold one completion event back into the instance table
    fn apply_report(
        &self,
        graph: &PipelineGraph,
        store: &ArtifactStore,
        tasks: &mut TaskSet,
        ready: &mut VecDeque<usize>,
        report: WorkerReport,
    ) {
        let idx = report.task_idx;
        tasks.tasks[idx].duration = Some(report.duration);

        let outcome = report
            .result
            .and_then(|artifacts| verify_and_register(graph, store, &tasks.tasks[idx], artifacts));

        match outcome {
            Ok(()) => {
                tasks.tasks[idx].status = TaskStatus::Succeeded;
                info!(
                    "{} succeeded in {:.1}s",
                    tasks.tasks[idx].id,
                    report.duration.as_secs_f64()
                );
            }
            Err(e) => {
                let message = render_error(&e);
                warn!("{} failed: {}", tasks.tasks[idx].id, e);
                tasks.tasks[idx].status = TaskStatus::Failed;
                tasks.tasks[idx].error = Some(message);
            }
        }

        for dep in tasks.tasks[idx].dependents.clone() {
            resolve(tasks, dep, ready);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// What a worker hands back to the event loop
struct WorkerReport {
    task_idx: usize,
    result: MagflowResult<HashMap<String, ArtifactRef>>,
    duration: Duration,
}

/// Re-examine a pending instance after one of its dependencies turned
/// terminal. All-succeeded makes it ready; any failure or skip among the
/// dependencies skips it, and the skip cascades through its own dependents.
fn resolve(tasks: &mut TaskSet, idx: usize, ready: &mut VecDeque<usize>) {
    if tasks.tasks[idx].status != TaskStatus::Pending {
        return;
    }

    let mut blocker: Option<String> = None;
    for &dep in &tasks.tasks[idx].deps {
        match tasks.tasks[dep].status {
            TaskStatus::Succeeded => {}
            TaskStatus::Failed | TaskStatus::Skipped => {
                if blocker.is_none() {
                    blocker = Some(tasks.tasks[dep].id.to_string());
                }
            }
            // Not everything upstream is settled yet
            TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Running => return,
        }
    }

    match blocker {
        None => {
            tasks.tasks[idx].status = TaskStatus::Ready;
            ready.push_back(idx);
        }
        Some(cause) => {
            info!("skipping {}: {} did not succeed", tasks.tasks[idx].id, cause);
            tasks.tasks[idx].status = TaskStatus::Skipped;
            tasks.tasks[idx].skip_cause = Some(cause);
            for dep in tasks.tasks[idx].dependents.clone() {
                resolve(tasks, dep, ready);
            }
        }
    }
}

/// Assemble the input artifacts for one instance from the store
fn build_inputs(
    graph: &PipelineGraph,
    samples: &[Sample],
    store: &ArtifactStore,
    task: &TaskInstance,
) -> MagflowResult<StageInputs> {
    let spec = &graph.stages()[task.stage_idx];
    let missing = |id: &str| MagflowError::StageContractViolation {
        stage: spec.name.clone(),
        reason: format!("input '{}' missing from the artifact store", id),
    };

    let mut entries = HashMap::new();
    for (slot, source) in spec.inputs.iter().zip(graph.input_sources(task.stage_idx)) {
        let artifacts: Vec<ArtifactRef> = match &task.id.sample {
            // Per-sample instances read their own sample's artifact
            Some(sample) => {
                vec![store
                    .get(&slot.id, Some(sample))
                    .ok_or_else(|| missing(&slot.id))?]
            }
            None => match source {
                InputSource::Stage(i)
                    if graph.stages()[*i].cardinality == Cardinality::Aggregate =>
                {
                    vec![store.get(&slot.id, None).ok_or_else(|| missing(&slot.id))?]
                }
                // Gather across the batch
                _ => {
                    let all = store.all_for_id(&slot.id);
                    if all.len() != samples.len() {
                        return Err(missing(&slot.id));
                    }
                    all
                }
            },
        };
        entries.insert(slot.id.clone(), artifacts);
    }
    Ok(StageInputs::new(&spec.name, entries))
}

/// Check a runner's products against the stage declaration, then register
/// them. Nothing is registered unless everything matches.
fn verify_and_register(
    graph: &PipelineGraph,
    store: &ArtifactStore,
    task: &TaskInstance,
    artifacts: HashMap<String, ArtifactRef>,
) -> MagflowResult<()> {
    let spec = &graph.stages()[task.stage_idx];
    let violation = |reason: String| MagflowError::StageContractViolation {
        stage: spec.name.clone(),
        reason,
    };

    for slot in &spec.outputs {
        let artifact = artifacts
            .get(&slot.id)
            .ok_or_else(|| violation(format!("missing declared output '{}'", slot.id)))?;
        if artifact.kind != slot.kind {
            return Err(violation(format!(
                "output '{}' is a {}, declared {}",
                slot.id, artifact.kind, slot.kind
            )));
        }
        if artifact.sample != task.id.sample {
            return Err(violation(format!(
                "output '{}' carries the wrong sample scope",
                slot.id
            )));
        }
    }
    for id in artifacts.keys() {
        if !spec.outputs.iter().any(|slot| &slot.id == id) {
            return Err(violation(format!("undeclared output '{}'", id)));
        }
    }

    for artifact in artifacts.into_values() {
        store
            .insert(artifact)
            .map_err(|rejected| violation(format!("artifact '{}' already registered", rejected.id)))?;
    }
    Ok(())
}

/// Render an error for the bundle, keeping the stderr tail visible
fn render_error(err: &MagflowError) -> String {
    match err {
        MagflowError::ToolExecutionFailed { stderr_tail, .. } if !stderr_tail.is_empty() => {
            format!("{err}\nstderr tail:\n{stderr_tail}")
        }
        _ => err.to_string(),
    }
}
