// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Run parameters for the built-in metagenomics stages
//!
//! Every knob a stage forwards to an external tool lives here, so a whole
//! run is reproducible from one serializable value. Enum variants carry the
//! exact strings the tools accept on their command lines.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Taxonomic rank for the kaiju2table summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonRank {
    Superkingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl TaxonRank {
    /// The string `kaiju2table -r` expects
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonRank::Superkingdom => "superkingdom",
            TaxonRank::Phylum => "phylum",
            TaxonRank::Class => "class",
            TaxonRank::Order => "order",
            TaxonRank::Family => "family",
            TaxonRank::Genus => "genus",
            TaxonRank::Species => "species",
        }
    }
}

impl Default for TaxonRank {
    fn default() -> Self {
        TaxonRank::Species
    }
}

/// Prodigal gene-annotation output format (`-f`), which also names the
/// annotation file's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProdigalFormat {
    Gbk,
    Gff,
    Sco,
}

impl ProdigalFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProdigalFormat::Gbk => "gbk",
            ProdigalFormat::Gff => "gff",
            ProdigalFormat::Sco => "sco",
        }
    }
}

impl Default for ProdigalFormat {
    fn default() -> Self {
        ProdigalFormat::Gbk
    }
}

/// fARGene resistance-gene HMM model (`--hmm-model`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FargeneModel {
    ClassA,
    ClassB12,
    ClassB3,
    ClassC,
    ClassD1,
    ClassD2,
    Qnr,
    TetEfflux,
    TetRpg,
    TetEnzyme,
}

impl FargeneModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FargeneModel::ClassA => "class_a",
            FargeneModel::ClassB12 => "class_b_1_2",
            FargeneModel::ClassB3 => "class_b_3",
            FargeneModel::ClassC => "class_c",
            FargeneModel::ClassD1 => "class_d_1",
            FargeneModel::ClassD2 => "class_d_2",
            FargeneModel::Qnr => "qnr",
            FargeneModel::TetEfflux => "tet_efflux",
            FargeneModel::TetRpg => "tet_rpg",
            FargeneModel::TetEnzyme => "tet_enzyme",
        }
    }
}

impl Default for FargeneModel {
    fn default() -> Self {
        FargeneModel::ClassA
    }
}

/// MEGAHIT assembly knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyParams {
    /// Minimum k-mer multiplicity (`--min-count`)
    pub min_count: u32,
    /// Smallest k-mer size (`--k-min`, must be odd)
    pub k_min: u32,
    /// Largest k-mer size (`--k-max`, must be odd)
    pub k_max: u32,
    /// Increment between k-mer sizes (`--k-step`, must be even)
    pub k_step: u32,
    /// Contigs shorter than this are dropped (`--min-contig-len`)
    pub min_contig_len: u32,
}

impl Default for AssemblyParams {
    fn default() -> Self {
        Self {
            min_count: 2,
            k_min: 21,
            k_max: 141,
            k_step: 12,
            min_contig_len: 200,
        }
    }
}

/// Kaiju reference database locations plus the table rank
///
/// The three files ship together in a Kaiju reference bundle; none of them
/// is produced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyParams {
    /// Protein reference index (`kaiju -f`), e.g. `kaiju_db_refseq.fmi`
    pub database: PathBuf,
    /// NCBI taxonomy nodes dump (`-t nodes.dmp`)
    pub nodes: PathBuf,
    /// NCBI taxonomy names dump (`kaiju2table -n names.dmp`)
    pub names: PathBuf,
    pub rank: TaxonRank,
}

impl TaxonomyParams {
    pub fn new(
        database: impl Into<PathBuf>,
        nodes: impl Into<PathBuf>,
        names: impl Into<PathBuf>,
    ) -> Self {
        Self {
            database: database.into(),
            nodes: nodes.into(),
            names: names.into(),
            rank: TaxonRank::default(),
        }
    }

    pub fn with_rank(mut self, rank: TaxonRank) -> Self {
        self.rank = rank;
        self
    }
}

impl Default for TaxonomyParams {
    fn default() -> Self {
        Self {
            database: PathBuf::from("kaiju_db.fmi"),
            nodes: PathBuf::from("nodes.dmp"),
            names: PathBuf::from("names.dmp"),
            rank: TaxonRank::default(),
        }
    }
}

/// Knobs for the gene-level annotation stages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionalParams {
    pub prodigal_format: ProdigalFormat,
    pub fargene_model: FargeneModel,
}

/// Every parameter the built-in stage catalogue reads
///
/// `threads` is the single parallelism knob forwarded to each tool that
/// takes one; it defaults to the machine's logical CPU count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineParams {
    pub threads: usize,
    pub assembly: AssemblyParams,
    pub taxonomy: TaxonomyParams,
    pub functional: FunctionalParams,
}

impl PipelineParams {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_taxonomy(mut self, taxonomy: TaxonomyParams) -> Self {
        self.taxonomy = taxonomy;
        self
    }

    /// Thread count as an argv word
    pub(crate) fn threads_arg(&self) -> String {
        self.threads.to_string()
    }
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            assembly: AssemblyParams::default(),
            taxonomy: TaxonomyParams::default(),
            functional: FunctionalParams::default(),
        }
    }
}
