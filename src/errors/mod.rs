// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Error types for pipeline construction and execution
//!
//! Configuration problems (bad graphs, bad samples) are reported before any
//! task runs. Tool failures carry the exit code and a stderr tail so a run
//! over dozens of samples stays diagnosable from the result bundle alone.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for magflow operations
pub type MagflowResult<T> = Result<T, MagflowError>;

/// Main error type for magflow
#[derive(Error, Debug, Diagnostic)]
pub enum MagflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Tool Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Tool '{tool}' not found")]
    #[diagnostic(
        code(magflow::tool_not_found),
        help("{suggestion}")
    )]
    ToolNotFound {
        tool: String,
        suggestion: String,
    },

    #[error("Tool '{tool}' failed with {}", exit_label(.exit_code))]
    #[diagnostic(code(magflow::tool_execution_failed))]
    ToolExecutionFailed {
        tool: String,
        exit_code: Option<i32>,
        stderr_tail: String,
        #[help]
        help: Option<String>,
    },

    #[error("Tool '{tool}' did not produce declared output '{output}' at {path}")]
    #[diagnostic(
        code(magflow::missing_output),
        help("The command exited successfully but the expected {kind} is absent. \
              Check the stage's output declarations against what the tool actually writes.")
    )]
    MissingDeclaredOutput {
        tool: String,
        output: String,
        path: PathBuf,
        kind: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' is declared more than once")]
    #[diagnostic(code(magflow::duplicate_stage))]
    DuplicateStage { stage: String },

    #[error("Artifact '{id}' is produced by both '{first}' and '{second}'")]
    #[diagnostic(
        code(magflow::output_collision),
        help("Every artifact id must have exactly one producer. Rename one of the outputs.")
    )]
    OutputCollision {
        id: String,
        first: String,
        second: String,
    },

    #[error("Stage '{stage}' consumes '{input}' but nothing produces it")]
    #[diagnostic(
        code(magflow::unsatisfied_input),
        help("Declare a source or an upstream stage that outputs '{input}'")
    )]
    UnsatisfiedInput { stage: String, input: String },

    #[error("Stage '{stage}' expects '{input}' to be a {expected}, but '{producer}' produces a {actual}")]
    #[diagnostic(code(magflow::input_kind_mismatch))]
    InputKindMismatch {
        stage: String,
        input: String,
        producer: String,
        expected: String,
        actual: String,
    },

    #[error("Per-sample stage '{stage}' cannot consume '{input}' from aggregate stage '{producer}'")]
    #[diagnostic(
        code(magflow::cardinality_violation),
        help("Aggregate outputs exist once per run; only aggregate stages may consume them")
    )]
    CardinalityViolation {
        stage: String,
        input: String,
        producer: String,
    },

    #[error("Circular dependency detected")]
    #[diagnostic(
        code(magflow::circular_dependency),
        help("Review the stage wiring to remove the cycle")
    )]
    CircularDependency { stages: Vec<String> },

    #[error("Invalid sample '{name}': {reason}")]
    #[diagnostic(code(magflow::invalid_sample))]
    InvalidSample { name: String, reason: String },

    #[error("No samples provided")]
    #[diagnostic(
        code(magflow::no_samples),
        help("A run needs at least one sample with paired reads")
    )]
    NoSamples,

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' failed{}", scope_label(.sample))]
    #[diagnostic(code(magflow::stage_failed))]
    StageFailed {
        stage: String,
        sample: Option<String>,
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Stage '{stage}' returned outputs that do not match its declaration: {reason}")]
    #[diagnostic(
        code(magflow::stage_contract_violation),
        help("A stage must return exactly the artifact ids it declares, with matching kinds")
    )]
    StageContractViolation { stage: String, reason: String },

    #[error("Pipeline stalled: nothing is running or ready but {} task(s) remain pending", .pending.len())]
    #[diagnostic(
        code(magflow::deadlock),
        help("This indicates dependency wiring that validation did not catch; the pending task ids are listed in the error")
    )]
    Deadlock { pending: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(magflow::io_error))]
    Io { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(magflow::json_error))]
    Json { message: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

fn scope_label(sample: &Option<String>) -> String {
    match sample {
        Some(sample) => format!(" for sample '{}'", sample),
        None => String::new(),
    }
}

impl From<std::io::Error> for MagflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_json::Error> for MagflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl MagflowError {
    /// Create a tool not found error with installation suggestion
    pub fn tool_not_found(tool: &str) -> Self {
        let suggestion = match tool {
            "megahit" => "Install MEGAHIT: https://github.com/voutcn/megahit".to_string(),
            "metaquast.py" => "Install QUAST (provides metaquast.py): https://github.com/ablab/quast".to_string(),
            "bowtie2" | "bowtie2-build" => {
                "Install Bowtie 2: https://bowtie-bio.sourceforge.net/bowtie2/".to_string()
            }
            "samtools" => "Install samtools: https://www.htslib.org/".to_string(),
            "jgi_summarize_bam_contig_depths" | "metabat2" => {
                "Install MetaBAT 2 (ships both binaries): https://bitbucket.org/berkeleylab/metabat".to_string()
            }
            "kaiju" | "kaiju2table" | "kaiju2krona" => {
                "Install Kaiju: https://bioinformatics-centre.github.io/kaiju/".to_string()
            }
            "ktImportText" => "Install KronaTools: https://github.com/marbl/Krona".to_string(),
            "prodigal" => "Install Prodigal: https://github.com/hyattpd/Prodigal".to_string(),
            "macrel" => "Install Macrel: https://github.com/BigDataBiology/macrel".to_string(),
            "fargene" => "Install fARGene: https://github.com/fannyhb/fargene".to_string(),
            "gecco" => "Install GECCO: https://github.com/zellerlab/GECCO".to_string(),
            _ => format!("Install {} and ensure it's in your PATH", tool),
        };

        Self::ToolNotFound {
            tool: tool.to_string(),
            suggestion,
        }
    }

    /// Create a tool execution error with helpful context
    pub fn tool_failed(tool: &str, exit_code: Option<i32>, stderr_tail: String) -> Self {
        let help = Self::generate_help_for_tool_error(tool, &stderr_tail);
        Self::ToolExecutionFailed {
            tool: tool.to_string(),
            exit_code,
            stderr_tail,
            help,
        }
    }

    /// Generate helpful suggestions based on tool output
    fn generate_help_for_tool_error(tool: &str, stderr: &str) -> Option<String> {
        match tool {
            "megahit" => Self::parse_megahit_error(stderr),
            "kaiju" => Self::parse_kaiju_error(stderr),
            "bash" => {
                if stderr.contains("command not found") {
                    Some("A tool in the pipe is missing from PATH inside the shell environment.".into())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn parse_megahit_error(stderr: &str) -> Option<String> {
        // Common MEGAHIT failure patterns
        if stderr.contains("already exists") {
            Some("MEGAHIT refuses to reuse an output directory. Run in a fresh run root.".into())
        } else if stderr.contains("k-max") || stderr.contains("k_max") {
            Some("Check the k-mer settings: k_min <= k_max and k_step must be even.".into())
        } else {
            None
        }
    }

    fn parse_kaiju_error(stderr: &str) -> Option<String> {
        if stderr.contains("nodes.dmp") || stderr.contains("Could not open") {
            Some("Check the taxonomy reference paths (database .fmi, nodes.dmp, names.dmp).".into())
        } else {
            None
        }
    }
}
