// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Binning chain: index, align, depth summary, MetaBAT2
//!
//! Reads are mapped back onto the sample's own contigs to get per-contig
//! coverage, which MetaBAT2 uses alongside composition to group contigs
//! into genome bins. The alignment step is a real three-process pipe:
//! `bowtie2 | samtools view | samtools sort`.

use crate::errors::MagflowResult;
use crate::pipeline::{ArtifactKind, ArtifactRef, StageContext, StageInputs, StageRunner, StageSpec};
use crate::stages::assembly::contigs_path;
use crate::stages::ids;
use crate::stages::params::PipelineParams;
use crate::tools::{Invocation, OutputDecl, ToolCommand};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Directory MetaBAT2 bins land in, relative to the instance workdir
pub const BINS_DIR: &str = "METABAT";

fn index_dir_name(sample: &str) -> String {
    format!("{sample}_assembly_idx")
}

fn sorted_bam_name(sample: &str) -> String {
    format!("{sample}_assembly_sorted.bam")
}

fn depths_name(sample: &str) -> String {
    format!("{sample}_depths.txt")
}

pub fn contig_index_stage(params: &PipelineParams) -> StageSpec {
    StageSpec::per_sample(
        "contig_index",
        Arc::new(ContigIndexRunner {
            threads: params.threads,
        }),
    )
    .input(ids::ASSEMBLY, ArtifactKind::Directory)
    .input(ids::ASSEMBLY_EVAL, ArtifactKind::Directory)
    .output(ids::CONTIG_INDEX, ArtifactKind::Directory)
    .tool("bowtie2-build")
}

pub fn read_alignment_stage(params: &PipelineParams) -> StageSpec {
    StageSpec::per_sample(
        "read_alignment",
        Arc::new(ReadAlignmentRunner {
            threads: params.threads,
        }),
    )
    .input(ids::CONTIG_INDEX, ArtifactKind::Directory)
    .input(ids::READ1, ArtifactKind::File)
    .input(ids::READ2, ArtifactKind::File)
    .output(ids::ALIGNMENT, ArtifactKind::File)
    .tool("bowtie2")
    .tool("samtools")
}

pub fn contig_depths_stage() -> StageSpec {
    StageSpec::per_sample("contig_depths", Arc::new(ContigDepthsRunner))
        .input(ids::ALIGNMENT, ArtifactKind::File)
        .output(ids::CONTIG_DEPTHS, ArtifactKind::File)
        .tool("jgi_summarize_bam_contig_depths")
}

pub fn binning_stage() -> StageSpec {
    StageSpec::per_sample("binning", Arc::new(BinningRunner))
        .input(ids::ASSEMBLY, ArtifactKind::Directory)
        .input(ids::CONTIG_DEPTHS, ArtifactKind::File)
        .output(ids::BINS, ArtifactKind::Directory)
        .tool("metabat2")
}

/// Builds the Bowtie2 index for one sample's contigs
///
/// `bowtie2-build` wants its output directory to exist, so the runner
/// creates it before invoking.
struct ContigIndexRunner {
    threads: usize,
}

#[async_trait]
impl StageRunner for ContigIndexRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let assembly = inputs.one(ids::ASSEMBLY)?;
        let contigs = contigs_path(&assembly.path, sample);

        let index_dir = index_dir_name(sample);
        tokio::fs::create_dir_all(ctx.workdir.join(&index_dir)).await?;

        let command = bowtie2_build_command(&contigs, &index_dir, sample, self.threads);
        ctx.invoke(
            command,
            &[OutputDecl::directory(ids::CONTIG_INDEX, index_dir)],
        )
        .await
    }
}

struct ReadAlignmentRunner {
    threads: usize,
}

#[async_trait]
impl StageRunner for ReadAlignmentRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let index = inputs.one(ids::CONTIG_INDEX)?;
        let read1 = inputs.one(ids::READ1)?;
        let read2 = inputs.one(ids::READ2)?;

        let bam = sorted_bam_name(sample);
        let command = alignment_pipe(&index.path, sample, &read1.path, &read2.path, &bam, self.threads);
        ctx.invoke(command, &[OutputDecl::file(ids::ALIGNMENT, bam)])
            .await
    }
}

struct ContigDepthsRunner;

#[async_trait]
impl StageRunner for ContigDepthsRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let bam = inputs.one(ids::ALIGNMENT)?;

        let depths = depths_name(sample);
        let command = jgi_depths_command(&depths, &bam.path);
        ctx.invoke(command, &[OutputDecl::file(ids::CONTIG_DEPTHS, depths)])
            .await
    }
}

struct BinningRunner;

#[async_trait]
impl StageRunner for BinningRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let assembly = inputs.one(ids::ASSEMBLY)?;
        let depths = inputs.one(ids::CONTIG_DEPTHS)?;
        let contigs = contigs_path(&assembly.path, sample);

        let command = metabat2_command(&contigs, &depths.path, sample);
        ctx.invoke(command, &[OutputDecl::directory(ids::BINS, BINS_DIR)])
            .await
    }
}

fn bowtie2_build_command(
    contigs: &Path,
    index_dir: &str,
    sample: &str,
    threads: usize,
) -> ToolCommand {
    ToolCommand::Argv(
        Invocation::new("bowtie2-build")
            .arg_path(contigs)
            .arg(format!("{index_dir}/{sample}"))
            .arg("--threads")
            .arg(threads.to_string()),
    )
}

/// `bowtie2 | samtools view | samtools sort`, strict about every segment
fn alignment_pipe(
    index_dir: &Path,
    sample: &str,
    read1: &Path,
    read2: &Path,
    bam_name: &str,
    threads: usize,
) -> ToolCommand {
    let threads = threads.to_string();
    ToolCommand::Pipeline(vec![
        Invocation::new("bowtie2")
            .arg("-x")
            .arg(format!("{}/{}", index_dir.display(), sample))
            .arg("-1")
            .arg_path(read1)
            .arg("-2")
            .arg_path(read2)
            .arg("--threads")
            .arg(&threads),
        Invocation::new("samtools")
            .arg("view")
            .arg("-@")
            .arg(&threads)
            .arg("-bS"),
        Invocation::new("samtools")
            .arg("sort")
            .arg("-@")
            .arg(&threads)
            .arg("-o")
            .arg(bam_name),
    ])
}

fn jgi_depths_command(depths_name: &str, bam: &Path) -> ToolCommand {
    ToolCommand::Argv(
        Invocation::new("jgi_summarize_bam_contig_depths")
            .arg("--outputDepth")
            .arg(depths_name)
            .arg_path(bam),
    )
}

fn metabat2_command(contigs: &Path, depths: &Path, sample: &str) -> ToolCommand {
    ToolCommand::Argv(
        Invocation::new("metabat2")
            .arg("--saveCls")
            .arg("-i")
            .arg_path(contigs)
            .arg("-a")
            .arg_path(depths)
            .arg("-o")
            .arg(format!("{BINS_DIR}/{sample}")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bowtie2_build_argv_points_at_the_index_basename() {
        let command = bowtie2_build_command(
            Path::new("/run/assembly/gut_a/MEGAHIT/gut_a.contigs.fa"),
            "gut_a_assembly_idx",
            "gut_a",
            16,
        );

        let ToolCommand::Argv(inv) = command else {
            panic!("bowtie2-build is a direct exec");
        };
        assert_eq!(inv.tool, "bowtie2-build");
        assert_eq!(
            inv.args,
            [
                "/run/assembly/gut_a/MEGAHIT/gut_a.contigs.fa",
                "gut_a_assembly_idx/gut_a",
                "--threads",
                "16",
            ]
        );
    }

    #[test]
    fn alignment_is_a_three_segment_pipe() {
        let command = alignment_pipe(
            Path::new("/run/contig_index/gut_a/gut_a_assembly_idx"),
            "gut_a",
            Path::new("/reads/gut_a_1.fastq.gz"),
            Path::new("/reads/gut_a_2.fastq.gz"),
            "gut_a_assembly_sorted.bam",
            16,
        );

        let ToolCommand::Pipeline(segments) = &command else {
            panic!("alignment is a pipe");
        };
        assert_eq!(command.label(), "bowtie2 | samtools | samtools");

        assert_eq!(
            segments[0].args,
            [
                "-x",
                "/run/contig_index/gut_a/gut_a_assembly_idx/gut_a",
                "-1",
                "/reads/gut_a_1.fastq.gz",
                "-2",
                "/reads/gut_a_2.fastq.gz",
                "--threads",
                "16",
            ]
        );
        assert_eq!(segments[1].args, ["view", "-@", "16", "-bS"]);
        assert_eq!(
            segments[2].args,
            ["sort", "-@", "16", "-o", "gut_a_assembly_sorted.bam"]
        );
    }

    #[test]
    fn jgi_argv_names_the_depth_file_before_the_bam() {
        let command = jgi_depths_command(
            "gut_a_depths.txt",
            Path::new("/run/read_alignment/gut_a/gut_a_assembly_sorted.bam"),
        );

        let ToolCommand::Argv(inv) = command else {
            panic!("jgi is a direct exec");
        };
        assert_eq!(
            inv.args,
            [
                "--outputDepth",
                "gut_a_depths.txt",
                "/run/read_alignment/gut_a/gut_a_assembly_sorted.bam",
            ]
        );
    }

    #[test]
    fn metabat2_argv_uses_the_bin_prefix() {
        let command = metabat2_command(
            Path::new("/run/assembly/gut_a/MEGAHIT/gut_a.contigs.fa"),
            Path::new("/run/contig_depths/gut_a/gut_a_depths.txt"),
            "gut_a",
        );

        let ToolCommand::Argv(inv) = command else {
            panic!("metabat2 is a direct exec");
        };
        assert_eq!(
            inv.args,
            [
                "--saveCls",
                "-i",
                "/run/assembly/gut_a/MEGAHIT/gut_a.contigs.fa",
                "-a",
                "/run/contig_depths/gut_a/gut_a_depths.txt",
                "-o",
                "METABAT/gut_a",
            ]
        );
    }

    #[test]
    fn index_stage_gates_on_the_evaluated_assembly() {
        let params = PipelineParams::default();
        let stage = contig_index_stage(&params);
        let input_ids: Vec<&str> = stage.inputs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(input_ids, vec![ids::ASSEMBLY, ids::ASSEMBLY_EVAL]);
    }

    #[test]
    fn alignment_stage_needs_both_reads_and_the_index() {
        let params = PipelineParams::default();
        let stage = read_alignment_stage(&params);
        let input_ids: Vec<&str> = stage.inputs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(input_ids, vec![ids::CONTIG_INDEX, ids::READ1, ids::READ2]);
        assert_eq!(stage.tools, vec!["bowtie2", "samtools"]);
    }
}
