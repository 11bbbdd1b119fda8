// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Built-in metagenomics stage catalogue
//!
//! Fifteen stages covering assembly, binning, taxonomy, and functional
//! annotation of paired-read samples. [`build_pipeline`] assembles the
//! slice selected by a [`PipelineKind`] into a validated graph; the
//! scheduler neither knows nor cares which variant it is running.

use crate::errors::MagflowResult;
use crate::pipeline::{PipelineGraph, SourceDecl};
use serde::{Deserialize, Serialize};

pub mod assembly;
pub mod binning;
pub mod functional;
pub mod params;
pub mod taxonomy;

pub use params::{
    AssemblyParams, FargeneModel, FunctionalParams, PipelineParams, ProdigalFormat, TaxonRank,
    TaxonomyParams,
};

/// Logical artifact ids the built-in stages exchange
pub mod ids {
    /// Forward read of the pair, seeded per sample before any stage runs
    pub const READ1: &str = "read1";
    /// Reverse read of the pair
    pub const READ2: &str = "read2";
    pub const ASSEMBLY: &str = "assembly";
    pub const ASSEMBLY_EVAL: &str = "assembly_eval";
    pub const CONTIG_INDEX: &str = "contig_index";
    pub const ALIGNMENT: &str = "alignment";
    pub const CONTIG_DEPTHS: &str = "contig_depths";
    pub const BINS: &str = "bins";
    pub const KAIJU_HITS: &str = "kaiju_hits";
    pub const TAXON_TABLE: &str = "taxon_table";
    pub const KRONA_TEXT: &str = "krona_text";
    pub const KRONA_PLOT: &str = "krona_plot";
    pub const GENES: &str = "genes";
    pub const AMP_SCREEN: &str = "amp_screen";
    pub const RESISTANCE_HITS: &str = "resistance_hits";
    pub const BGC_HITS: &str = "bgc_hits";
    pub const KRONA_SUMMARY: &str = "krona_summary";
}

/// Which slice of the catalogue a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// MEGAHIT assembly plus MetaQuast evaluation
    Assembly,
    /// Assembly through MetaBAT2 binning
    AssemblyBinning,
    /// Binning plus the Kaiju/Krona taxonomy chain
    AssemblyBinningTaxonomy,
    /// Everything, including the functional annotation screens
    Full,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Assembly => "assembly",
            PipelineKind::AssemblyBinning => "assembly_binning",
            PipelineKind::AssemblyBinningTaxonomy => "assembly_binning_taxonomy",
            PipelineKind::Full => "full",
        }
    }

    fn includes_binning(&self) -> bool {
        !matches!(self, PipelineKind::Assembly)
    }

    fn includes_taxonomy(&self) -> bool {
        matches!(
            self,
            PipelineKind::AssemblyBinningTaxonomy | PipelineKind::Full
        )
    }

    fn includes_functional(&self) -> bool {
        matches!(self, PipelineKind::Full)
    }
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assemble and validate the stage graph for one pipeline variant
pub fn build_pipeline(kind: PipelineKind, params: &PipelineParams) -> MagflowResult<PipelineGraph> {
    let sources = vec![SourceDecl::read1(ids::READ1), SourceDecl::read2(ids::READ2)];

    let mut stages = vec![
        assembly::assembly_stage(params),
        assembly::assembly_eval_stage(),
    ];

    if kind.includes_binning() {
        stages.push(binning::contig_index_stage(params));
        stages.push(binning::read_alignment_stage(params));
        stages.push(binning::contig_depths_stage());
        stages.push(binning::binning_stage());
    }

    if kind.includes_taxonomy() {
        stages.push(taxonomy::classification_stage(params));
        stages.push(taxonomy::classification_table_stage(params));
        stages.push(taxonomy::krona_text_stage(params));
        stages.push(taxonomy::krona_plot_stage());
        stages.push(taxonomy::krona_summary_stage());
    }

    if kind.includes_functional() {
        stages.push(functional::gene_prediction_stage(params));
        stages.push(functional::amp_screening_stage(params));
        stages.push(functional::resistance_screening_stage(params));
        stages.push(functional::bgc_detection_stage(params));
    }

    PipelineGraph::build(kind.as_str(), sources, stages)
}
