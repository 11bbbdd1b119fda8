// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Pipeline model and execution engine
//!
//! This module defines the core data structures for magflow runs: samples,
//! artifacts, stage declarations, the validated stage graph, task
//! instances, the concurrent scheduler, and the result bundle.

mod artifact;
mod bundle;
mod graph;
mod instance;
mod sample;
mod scheduler;
mod stage;

pub use artifact::{ArtifactKey, ArtifactKind, ArtifactRef, ArtifactStore};
pub use bundle::{ArtifactOutcome, ResultAggregator, RunBundle, StageResults, TaskReport};
pub use graph::{InputSource, PipelineGraph, SourceDecl, SourceRole};
pub use instance::{TaskId, TaskInstance, TaskSet, TaskStatus};
pub use sample::{validate_samples, Sample};
pub use scheduler::Scheduler;
pub use stage::{Cardinality, Slot, StageContext, StageInputs, StageRunner, StageSpec};
