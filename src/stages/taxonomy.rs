// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Taxonomy stages: Kaiju classification and Krona rendering
//!
//! Kaiju classifies raw reads directly, so this chain is independent of
//! assembly and keeps running even when an assembler falls over. The
//! terminal stages are the per-sample rank table, the per-sample Krona
//! chart, and one combined chart across the whole batch.

use crate::errors::MagflowResult;
use crate::pipeline::{ArtifactKind, ArtifactRef, StageContext, StageInputs, StageRunner, StageSpec};
use crate::stages::ids;
use crate::stages::params::{PipelineParams, TaxonomyParams};
use crate::tools::{Invocation, OutputDecl, ToolCommand};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Combined batch-wide Krona chart file name
pub const SUMMARY_CHART: &str = "all_samples_krona.html";

fn hits_name(sample: &str) -> String {
    format!("{sample}_kaiju.out")
}

fn table_name(sample: &str) -> String {
    format!("{sample}_kaiju.tsv")
}

fn krona_text_name(sample: &str) -> String {
    format!("{sample}_kaiju2krona.out")
}

fn krona_chart_name(sample: &str) -> String {
    format!("{sample}_krona.html")
}

pub fn classification_stage(params: &PipelineParams) -> StageSpec {
    StageSpec::per_sample(
        "classification",
        Arc::new(ClassificationRunner {
            taxonomy: params.taxonomy.clone(),
            threads: params.threads,
        }),
    )
    .input(ids::READ1, ArtifactKind::File)
    .input(ids::READ2, ArtifactKind::File)
    .output(ids::KAIJU_HITS, ArtifactKind::File)
    .tool("kaiju")
}

pub fn classification_table_stage(params: &PipelineParams) -> StageSpec {
    StageSpec::per_sample(
        "classification_table",
        Arc::new(ClassificationTableRunner {
            taxonomy: params.taxonomy.clone(),
        }),
    )
    .input(ids::KAIJU_HITS, ArtifactKind::File)
    .output(ids::TAXON_TABLE, ArtifactKind::File)
    .tool("kaiju2table")
}

pub fn krona_text_stage(params: &PipelineParams) -> StageSpec {
    StageSpec::per_sample(
        "krona_text",
        Arc::new(KronaTextRunner {
            taxonomy: params.taxonomy.clone(),
        }),
    )
    .input(ids::KAIJU_HITS, ArtifactKind::File)
    .output(ids::KRONA_TEXT, ArtifactKind::File)
    .tool("kaiju2krona")
}

pub fn krona_plot_stage() -> StageSpec {
    StageSpec::per_sample("krona_plot", Arc::new(KronaPlotRunner))
        .input(ids::KRONA_TEXT, ArtifactKind::File)
        .output(ids::KRONA_PLOT, ArtifactKind::File)
        .tool("ktImportText")
}

/// One chart over every sample; skipped unless the whole batch classified
pub fn krona_summary_stage() -> StageSpec {
    StageSpec::aggregate("krona_summary", Arc::new(KronaSummaryRunner))
        .input(ids::KRONA_TEXT, ArtifactKind::File)
        .output(ids::KRONA_SUMMARY, ArtifactKind::File)
        .tool("ktImportText")
}

struct ClassificationRunner {
    taxonomy: TaxonomyParams,
    threads: usize,
}

#[async_trait]
impl StageRunner for ClassificationRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let read1 = inputs.one(ids::READ1)?;
        let read2 = inputs.one(ids::READ2)?;

        let hits = hits_name(sample);
        let command = kaiju_command(&self.taxonomy, &read1.path, &read2.path, &hits, self.threads);
        ctx.invoke(command, &[OutputDecl::file(ids::KAIJU_HITS, hits)])
            .await
    }
}

struct ClassificationTableRunner {
    taxonomy: TaxonomyParams,
}

#[async_trait]
impl StageRunner for ClassificationTableRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let hits = inputs.one(ids::KAIJU_HITS)?;

        let table = table_name(sample);
        let command = kaiju2table_command(&self.taxonomy, &table, &hits.path);
        ctx.invoke(command, &[OutputDecl::file(ids::TAXON_TABLE, table)])
            .await
    }
}

struct KronaTextRunner {
    taxonomy: TaxonomyParams,
}

#[async_trait]
impl StageRunner for KronaTextRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let hits = inputs.one(ids::KAIJU_HITS)?;

        let text = krona_text_name(sample);
        let command = kaiju2krona_command(&self.taxonomy, &hits.path, &text);
        ctx.invoke(command, &[OutputDecl::file(ids::KRONA_TEXT, text)])
            .await
    }
}

struct KronaPlotRunner;

#[async_trait]
impl StageRunner for KronaPlotRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let sample = ctx.sample()?;
        let text = inputs.one(ids::KRONA_TEXT)?;

        let chart = krona_chart_name(sample);
        let command = ktimporttext_command(&chart, &text.path);
        ctx.invoke(command, &[OutputDecl::file(ids::KRONA_PLOT, chart)])
            .await
    }
}

struct KronaSummaryRunner;

#[async_trait]
impl StageRunner for KronaSummaryRunner {
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        let texts = inputs.all(ids::KRONA_TEXT)?;
        let datasets: Vec<(String, String)> = texts
            .iter()
            .map(|t| {
                (
                    t.path.display().to_string(),
                    t.sample.clone().unwrap_or_default(),
                )
            })
            .collect();

        let command = krona_summary_command(&datasets);
        ctx.invoke(command, &[OutputDecl::file(ids::KRONA_SUMMARY, SUMMARY_CHART)])
            .await
    }
}

fn kaiju_command(
    taxonomy: &TaxonomyParams,
    read1: &Path,
    read2: &Path,
    hits_name: &str,
    threads: usize,
) -> ToolCommand {
    ToolCommand::Argv(
        Invocation::new("kaiju")
            .arg("-t")
            .arg_path(&taxonomy.nodes)
            .arg("-f")
            .arg_path(&taxonomy.database)
            .arg("-i")
            .arg_path(read1)
            .arg("-j")
            .arg_path(read2)
            .arg("-z")
            .arg(threads.to_string())
            .arg("-o")
            .arg(hits_name),
    )
}

fn kaiju2table_command(taxonomy: &TaxonomyParams, table_name: &str, hits: &Path) -> ToolCommand {
    ToolCommand::Argv(
        Invocation::new("kaiju2table")
            .arg("-t")
            .arg_path(&taxonomy.nodes)
            .arg("-n")
            .arg_path(&taxonomy.names)
            .arg("-r")
            .arg(taxonomy.rank.as_str())
            .arg("-p")
            .arg("-e")
            .arg("-o")
            .arg(table_name)
            .arg_path(hits),
    )
}

fn kaiju2krona_command(taxonomy: &TaxonomyParams, hits: &Path, text_name: &str) -> ToolCommand {
    ToolCommand::Argv(
        Invocation::new("kaiju2krona")
            .arg("-t")
            .arg_path(&taxonomy.nodes)
            .arg("-n")
            .arg_path(&taxonomy.names)
            .arg("-i")
            .arg_path(hits)
            .arg("-o")
            .arg(text_name),
    )
}

fn ktimporttext_command(chart_name: &str, text: &Path) -> ToolCommand {
    ToolCommand::Argv(
        Invocation::new("ktImportText")
            .arg("-o")
            .arg(chart_name)
            .arg_path(text),
    )
}

/// Combined chart: each dataset is `<text file>,<sample label>`
fn krona_summary_command(datasets: &[(String, String)]) -> ToolCommand {
    let mut inv = Invocation::new("ktImportText").arg("-o").arg(SUMMARY_CHART);
    for (path, label) in datasets {
        inv = inv.arg(format!("{path},{label}"));
    }
    ToolCommand::Argv(inv)
}
