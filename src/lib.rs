// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! # magflow - Metagenome Assembly/Annotation Pipeline Engine
//!
//! `magflow` runs multi-stage metagenomics pipelines (MEGAHIT, MetaBAT2,
//! Kaiju, Prodigal, and friends) over batches of paired-read samples.
//!
//! ## Features
//!
//! - **Declarative stage graph** - Stages wire to each other by artifact id;
//!   validation catches cycles, collisions, and type mismatches up front
//! - **Per-sample fan-out** - Map stages expand to one task per sample;
//!   reduce stages gather the whole batch
//! - **Bounded concurrency** - A worker-pool scheduler keeps `max_parallel`
//!   external tools running at once
//! - **Failure isolation** - One failed sample skips only its own
//!   downstream cone; the rest of the batch keeps going
//! - **Provenance** - Every run writes a `manifest.json` bundle with
//!   per-task statuses, durations, and artifact paths
//!
//! ## Quick Start
//!
//! ```no_run
//! use magflow::pipeline::{Sample, Scheduler};
//! use magflow::stages::{build_pipeline, PipelineKind, PipelineParams, TaxonomyParams};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> magflow::MagflowResult<()> {
//!     let params = PipelineParams::default().with_taxonomy(TaxonomyParams::new(
//!         "/refs/kaiju_db_refseq.fmi",
//!         "/refs/nodes.dmp",
//!         "/refs/names.dmp",
//!     ));
//!     let graph = build_pipeline(PipelineKind::Full, &params)?;
//!
//!     let samples = vec![
//!         Sample::new("gut_a", "/reads/gut_a_1.fastq.gz", "/reads/gut_a_2.fastq.gz"),
//!         Sample::new("gut_b", "/reads/gut_b_1.fastq.gz", "/reads/gut_b_2.fastq.gz"),
//!     ];
//!
//!     let bundle = Scheduler::new()
//!         .with_max_parallel(4)
//!         .run(&graph, &samples, Path::new("/runs/batch_001"))
//!         .await?;
//!     println!("run succeeded: {}", bundle.success);
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod pipeline;
pub mod stages;
pub mod tools;

// Re-export commonly used types
pub use errors::{MagflowError, MagflowResult};
pub use pipeline::{PipelineGraph, RunBundle, Sample, Scheduler, StageRunner, StageSpec};
pub use tools::Toolchain;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
