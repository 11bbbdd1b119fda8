// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Functional annotation stages: Prodigal, Macrel, fARGene, GECCO
//!
//! Four independent screens over one sample's contigs: gene calls,
//! antimicrobial peptides, resistance genes, and biosynthetic gene
//! clusters. They share nothing but the contigs file, so the scheduler is
//! free to run them side by side.

use crate::errors::MagflowResult;
use crate::pipeline::{ArtifactKind, ArtifactRef, StageContext, StageInputs, StageRunner, StageSpec};
use crate::stages::assembly::contigs_path;
use crate::stages::ids;
use crate::stages::params::{FargeneModel, PipelineParams, ProdigalFormat};
use crate::tools::{Invocation, OutputDecl, ToolCommand};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const GENES_DIR: &str = "prodigal_results";
pub const AMP_DIR: &str = "macrel_results";
pub const RESISTANCE_DIR: &str = "fargene_results";
pub const BGC_DIR: &str = "gecco_results";

pub fn gene_prediction_stage(params: &PipelineParams) -> StageSpec {
    StageSpec::per_sample(
        "gene_prediction",
        Arc::new(GenePredictionRunner {
            format: params.functional.prodigal_format,
        }),
    )
    .input(ids::ASSEMBLY, ArtifactKind::Directory)
    .input(ids::ASSEMBLY_EVAL, ArtifactKind::Directory)
    .output(ids::GENES, ArtifactKind::Directory)
    .tool("prodigal")
}

pub fn amp_screening_stage(params: &PipelineParams) -> StageSpec {
    StageSpec::per_sample(
        "amp_screening",
        Arc::new(AmpScreeningRunner {
            threads: params.threads,
        }),
    )
    .input(ids::ASSEMBLY, ArtifactKind::Directory)
    .output(ids::AMP_SCREEN, ArtifactKind::Directory)
    .tool("macrel")
}

pub fn resistance_screening_stage(params: &PipelineParams) -> StageSpec {
    StageSpec::per_sample(
        "resistance_screening",
        Arc::new(ResistanceScreeningRunner {
            model: params.functional.fargene_model,
            threads: params.threads,
        }),
    )
    .input(ids::ASSEMBLY, ArtifactKind::Directory)
    .output(ids::RESISTANCE_HITS, ArtifactKind::Directory)
    .tool("fargene")
}

pub fn bgc_detection_stage(params: &PipelineParams) -> StageSpec {
    StageSpec::per_sample(
        "bgc_detection",
        Arc::new(BgcDetectionRunner {
            threads: params.threads,
        }),
    )
    .input(ids::ASSEMBLY, ArtifactKind::Directory)
    .output(ids::BGC_HITS, ArtifactKind::Directory)
    .tool("gecco")
}

/// Prodigal writes four files per sample into one results directory.
/// It does not create the directory itself.
struct GenePredictionRunner {
    format: ProdigalFormat,
}

#[async_trait]
impl StageRunner for GenePredictionRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let assembly = inputs.one(ids::ASSEMBLY)?;
        let contigs = contigs_path(&assembly.path, sample);

        tokio::fs::create_dir_all(ctx.workdir.join(GENES_DIR)).await?;

        let command = prodigal_command(&contigs, self.format, sample);
        ctx.invoke(command, &[OutputDecl::directory(ids::GENES, GENES_DIR)])
            .await
    }
}

struct AmpScreeningRunner {
    threads: usize,
}

#[async_trait]
impl StageRunner for AmpScreeningRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let assembly = inputs.one(ids::ASSEMBLY)?;
        let contigs = contigs_path(&assembly.path, sample);

        let command = macrel_command(&contigs, sample, self.threads);
        ctx.invoke(command, &[OutputDecl::directory(ids::AMP_SCREEN, AMP_DIR)])
            .await
    }
}

struct ResistanceScreeningRunner {
    model: FargeneModel,
    threads: usize,
}

#[async_trait]
impl StageRunner for ResistanceScreeningRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let assembly = inputs.one(ids::ASSEMBLY)?;
        let contigs = contigs_path(&assembly.path, sample);

        let command = fargene_command(&contigs, self.model, self.threads);
        ctx.invoke(
            command,
            &[OutputDecl::directory(ids::RESISTANCE_HITS, RESISTANCE_DIR)],
        )
        .await
    }
}

struct BgcDetectionRunner {
    threads: usize,
}

#[async_trait]
impl StageRunner for BgcDetectionRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let assembly = inputs.one(ids::ASSEMBLY)?;
        let contigs = contigs_path(&assembly.path, sample);

        let command = gecco_command(&contigs, self.threads);
        ctx.invoke(command, &[OutputDecl::directory(ids::BGC_HITS, BGC_DIR)])
            .await
    }
}

fn prodigal_command(contigs: &Path, format: ProdigalFormat, sample: &str) -> ToolCommand {
    let fmt = format.as_str();
    ToolCommand::Argv(
        Invocation::new("prodigal")
            .arg("-i")
            .arg_path(contigs)
            .arg("-f")
            .arg(fmt)
            .arg("-o")
            .arg(format!("{GENES_DIR}/{sample}.{fmt}"))
            .arg("-a")
            .arg(format!("{GENES_DIR}/{sample}.faa"))
            .arg("-d")
            .arg(format!("{GENES_DIR}/{sample}.fna"))
            .arg("-s")
            .arg(format!("{GENES_DIR}/{sample}.cds")),
    )
}

fn macrel_command(contigs: &Path, sample: &str, threads: usize) -> ToolCommand {
    ToolCommand::Argv(
        Invocation::new("macrel")
            .arg("contigs")
            .arg("--fasta")
            .arg_path(contigs)
            .arg("--output")
            .arg(AMP_DIR)
            .arg("--tag")
            .arg(sample)
            .arg("--log-file")
            .arg(format!("{AMP_DIR}/{sample}_log.txt"))
            .arg("--threads")
            .arg(threads.to_string()),
    )
}

fn fargene_command(contigs: &Path, model: FargeneModel, threads: usize) -> ToolCommand {
    ToolCommand::Argv(
        Invocation::new("fargene")
            .arg("-i")
            .arg_path(contigs)
            .arg("--hmm-model")
            .arg(model.as_str())
            .arg("-o")
            .arg(RESISTANCE_DIR)
            .arg("-p")
            .arg(threads.to_string()),
    )
}

fn gecco_command(contigs: &Path, threads: usize) -> ToolCommand {
    ToolCommand::Argv(
        Invocation::new("gecco")
            .arg("run")
            .arg("-g")
            .arg_path(contigs)
            .arg("-o")
            .arg(BGC_DIR)
            .arg("-j")
            .arg(threads.to_string())
            .arg("--force-tsv"),
    )
}
