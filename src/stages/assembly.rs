// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Assembly stages: MEGAHIT contig assembly plus MetaQuast evaluation
//!
//! MEGAHIT turns one sample's read pair into contigs; MetaQuast reports
//! assembly quality. Everything downstream of assembly keys off the contigs
//! file the assembler leaves at `MEGAHIT/<sample>.contigs.fa`.

use crate::errors::MagflowResult;
use crate::pipeline::{ArtifactKind, ArtifactRef, StageContext, StageInputs, StageRunner, StageSpec};
use crate::stages::ids;
use crate::stages::params::{AssemblyParams, PipelineParams};
use crate::tools::{Invocation, OutputDecl, ToolCommand};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory MEGAHIT writes, relative to the instance workdir
pub const ASSEMBLY_DIR: &str = "MEGAHIT";
/// Directory MetaQuast writes
pub const EVAL_DIR: &str = "MetaQuast";

/// Contigs FASTA inside an assembly directory
pub fn contigs_path(assembly_dir: &Path, sample: &str) -> PathBuf {
    assembly_dir.join(format!("{sample}.contigs.fa"))
}

pub fn assembly_stage(params: &PipelineParams) -> StageSpec {
    StageSpec::per_sample(
        "assembly",
        Arc::new(AssemblyRunner {
            params: params.assembly.clone(),
        }),
    )
    .input(ids::READ1, ArtifactKind::File)
    .input(ids::READ2, ArtifactKind::File)
    .output(ids::ASSEMBLY, ArtifactKind::Directory)
    .tool("megahit")
}

pub fn assembly_eval_stage() -> StageSpec {
    StageSpec::per_sample("assembly_eval", Arc::new(AssemblyEvalRunner))
        .input(ids::ASSEMBLY, ArtifactKind::Directory)
        .output(ids::ASSEMBLY_EVAL, ArtifactKind::Directory)
        .tool("metaquast.py")
}

struct AssemblyRunner {
    params: AssemblyParams,
}

#[async_trait]
impl StageRunner for AssemblyRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let read1 = inputs.one(ids::READ1)?;
        let read2 = inputs.one(ids::READ2)?;

        let command = megahit_command(&self.params, sample, &read1.path, &read2.path);
        ctx.invoke(
            command,
            &[OutputDecl::directory(ids::ASSEMBLY, ASSEMBLY_DIR)],
        )
        .await
    }
}

struct AssemblyEvalRunner;

#[async_trait]
impl StageRunner for AssemblyEvalRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let assembly = inputs.one(ids::ASSEMBLY)?;
        let contigs = contigs_path(&assembly.path, sample);

        let command = metaquast_command(sample, &contigs);
        ctx.invoke(
            command,
            &[OutputDecl::directory(ids::ASSEMBLY_EVAL, EVAL_DIR)],
        )
        .await
    }
}

fn megahit_command(
    params: &AssemblyParams,
    sample: &str,
    read1: &Path,
    read2: &Path,
) -> ToolCommand {
    ToolCommand::Argv(
        Invocation::new("megahit")
            .arg("--min-count")
            .arg(params.min_count.to_string())
            .arg("--k-min")
            .arg(params.k_min.to_string())
            .arg("--k-max")
            .arg(params.k_max.to_string())
            .arg("--k-step")
            .arg(params.k_step.to_string())
            .arg("--out-dir")
            .arg(ASSEMBLY_DIR)
            .arg("--out-prefix")
            .arg(sample)
            .arg("--min-contig-len")
            .arg(params.min_contig_len.to_string())
            .arg("-1")
            .arg_path(read1)
            .arg("-2")
            .arg_path(read2),
    )
}

fn metaquast_command(sample: &str, contigs: &Path) -> ToolCommand {
    ToolCommand::Argv(
        Invocation::new("metaquast.py")
            .arg("--rna-finding")
            .arg("--no-sv")
            .arg("--max-ref-number")
            .arg("0")
            .arg("-l")
            .arg(sample)
            .arg("-o")
            .arg(EVAL_DIR)
            .arg_path(contigs),
    )
}
