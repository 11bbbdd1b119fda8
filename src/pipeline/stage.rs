// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Stage declarations and the runner contract
//!
//! A stage declares what it consumes and produces by logical artifact id;
//! the graph wires ids to producers, and the scheduler hands each instance
//! a [`StageContext`] plus its resolved [`StageInputs`]. The body itself is
//! an implementation of [`StageRunner`].

use crate::errors::{MagflowError, MagflowResult};
use crate::pipeline::{ArtifactKind, ArtifactRef};
use crate::tools::{self, OutputDecl, ToolCommand, Toolchain};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// How a stage fans out over the sample batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// One task instance per sample
    PerSample,
    /// A single instance gathering results across all samples
    Aggregate,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::PerSample => write!(f, "per-sample"),
            Cardinality::Aggregate => write!(f, "aggregate"),
        }
    }
}

/// A declared input or output: logical id plus expected kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub id: String,
    pub kind: ArtifactKind,
}

/// Executable body of a stage
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Run one task instance. Returns the produced artifacts keyed by
    /// logical id; they must match the stage's declared outputs.
    async fn run(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
    ) -> MagflowResult<HashMap<String, ArtifactRef>>;
}

/// Declaration of one pipeline stage
#[derive(Clone)]
pub struct StageSpec {
    pub name: String,
    pub cardinality: Cardinality,
    pub inputs: Vec<Slot>,
    pub outputs: Vec<Slot>,
    /// External binaries the stage needs, for preflight checks
    pub tools: Vec<String>,
    runner: Arc<dyn StageRunner>,
}

impl StageSpec {
    pub fn per_sample(name: impl Into<String>, runner: Arc<dyn StageRunner>) -> Self {
        Self::new(name, Cardinality::PerSample, runner)
    }

    pub fn aggregate(name: impl Into<String>, runner: Arc<dyn StageRunner>) -> Self {
        Self::new(name, Cardinality::Aggregate, runner)
    }

    fn new(name: impl Into<String>, cardinality: Cardinality, runner: Arc<dyn StageRunner>) -> Self {
        Self {
            name: name.into(),
            cardinality,
            inputs: Vec::new(),
            outputs: Vec::new(),
            tools: Vec::new(),
            runner,
        }
    }

    pub fn input(mut self, id: impl Into<String>, kind: ArtifactKind) -> Self {
        self.inputs.push(Slot {
            id: id.into(),
            kind,
        });
        self
    }

    pub fn output(mut self, id: impl Into<String>, kind: ArtifactKind) -> Self {
        self.outputs.push(Slot {
            id: id.into(),
            kind,
        });
        self
    }

    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.tools.push(name.into());
        self
    }

    pub fn runner(&self) -> Arc<dyn StageRunner> {
        Arc::clone(&self.runner)
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("cardinality", &self.cardinality)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("tools", &self.tools)
            .finish()
    }
}

/// Per-instance execution environment handed to a runner
#[derive(Debug, Clone)]
pub struct StageContext {
    pub stage: String,
    /// Sample scope; `None` for aggregate instances
    pub sample: Option<String>,
    /// Private scratch directory; already created, initially empty
    pub workdir: PathBuf,
    toolchain: Arc<Toolchain>,
}

impl StageContext {
    pub fn new(
        stage: impl Into<String>,
        sample: Option<String>,
        workdir: PathBuf,
        toolchain: Arc<Toolchain>,
    ) -> Self {
        Self {
            stage: stage.into(),
            sample,
            workdir,
            toolchain,
        }
    }

    pub fn scope(&self) -> Option<&str> {
        self.sample.as_deref()
    }

    /// Sample name for a per-sample instance
    pub fn sample(&self) -> MagflowResult<&str> {
        self.sample
            .as_deref()
            .ok_or_else(|| MagflowError::StageContractViolation {
                stage: self.stage.clone(),
                reason: "per-sample runner invoked without a sample scope".into(),
            })
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Run one command in the instance workdir and collect its declared
    /// outputs as artifacts scoped to this instance
    pub async fn invoke(
        &self,
        command: ToolCommand,
        outputs: &[OutputDecl],
    ) -> MagflowResult<HashMap<String, ArtifactRef>> {
        tools::run(&self.toolchain, &command, &self.workdir).await?;
        tools::collect_outputs(&command.label(), &self.workdir, outputs, self.scope()).await
    }
}

/// Resolved inputs for one task instance, keyed by logical artifact id
///
/// Per-sample instances see exactly one artifact per id; aggregate
/// instances see every sample's artifact, ordered by sample name.
#[derive(Debug, Clone)]
pub struct StageInputs {
    stage: String,
    entries: HashMap<String, Vec<ArtifactRef>>,
}

impl StageInputs {
    pub fn new(stage: impl Into<String>, entries: HashMap<String, Vec<ArtifactRef>>) -> Self {
        Self {
            stage: stage.into(),
            entries,
        }
    }

    /// The single artifact bound to an id
    pub fn one(&self, id: &str) -> MagflowResult<&ArtifactRef> {
        match self.entries.get(id).map(Vec::as_slice) {
            Some([artifact]) => Ok(artifact),
            Some(many) => Err(MagflowError::StageContractViolation {
                stage: self.stage.clone(),
                reason: format!("input '{}' resolved to {} artifacts, expected one", id, many.len()),
            }),
            None => Err(MagflowError::StageContractViolation {
                stage: self.stage.clone(),
                reason: format!("input '{}' was not provided", id),
            }),
        }
    }

    /// Every artifact bound to an id, ordered by sample name
    pub fn all(&self, id: &str) -> MagflowResult<&[ArtifactRef]> {
        self.entries
            .get(id)
            .map(Vec::as_slice)
            .ok_or_else(|| MagflowError::StageContractViolation {
                stage: self.stage.clone(),
                reason: format!("input '{}' was not provided", id),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRunner;

    #[async_trait]
    impl StageRunner for NullRunner {
        async fn run(
            &self,
            _ctx: &StageContext,
            _inputs: &StageInputs,
        ) -> MagflowResult<HashMap<String, ArtifactRef>> {
            Ok(HashMap::new())
        }
    }

    fn artifact(id: &str, sample: &str) -> ArtifactRef {
        ArtifactRef::new(
            id,
            Some(sample.to_string()),
            ArtifactKind::File,
            PathBuf::from("/tmp/x"),
        )
    }

    #[test]
    fn builder_collects_slots_and_tools() {
        let stage = StageSpec::per_sample("binning", Arc::new(NullRunner))
            .input("assembly", ArtifactKind::Directory)
            .input("contig_depths", ArtifactKind::File)
            .output("bins", ArtifactKind::Directory)
            .tool("metabat2");

        assert_eq!(stage.cardinality, Cardinality::PerSample);
        assert_eq!(stage.inputs.len(), 2);
        assert_eq!(stage.outputs[0].id, "bins");
        assert_eq!(stage.tools, vec!["metabat2"]);
    }

    #[test]
    fn inputs_one_rejects_missing_and_plural() {
        let mut entries = HashMap::new();
        entries.insert(
            "krona_text".to_string(),
            vec![artifact("krona_text", "a"), artifact("krona_text", "b")],
        );
        let inputs = StageInputs::new("krona_summary", entries);

        assert!(inputs.one("krona_text").is_err());
        assert_eq!(inputs.all("krona_text").unwrap().len(), 2);
        assert!(inputs.one("absent").is_err());
        assert!(inputs.all("absent").is_err());
    }

    #[test]
    fn context_sample_requires_scope() {
        let toolchain = Arc::new(Toolchain::new());
        let ctx = StageContext::new("krona_summary", None, PathBuf::from("/tmp"), toolchain);
        assert!(ctx.sample().is_err());

        let toolchain = Arc::new(Toolchain::new());
        let ctx = StageContext::new(
            "assembly",
            Some("gut_a".into()),
            PathBuf::from("/tmp"),
            toolchain,
        );
        assert_eq!(ctx.sample().unwrap(), "gut_a");
    }

    #[tokio::test]
    async fn invoke_runs_and_collects_scoped_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(Toolchain::new());
        let ctx = StageContext::new(
            "assembly",
            Some("gut_a".into()),
            dir.path().to_path_buf(),
            toolchain,
        );

        let command = ToolCommand::Argv(
            crate::tools::Invocation::new("bash")
                .arg("-c")
                .arg("mkdir MEGAHIT && touch MEGAHIT/gut_a.contigs.fa"),
        );
        let artifacts = ctx
            .invoke(command, &[OutputDecl::directory("assembly", "MEGAHIT")])
            .await
            .unwrap();

        let assembly = &artifacts["assembly"];
        assert_eq!(assembly.sample.as_deref(), Some("gut_a"));
        assert_eq!(assembly.kind, ArtifactKind::Directory);
        assert!(assembly.path.ends_with("MEGAHIT"));
    }
}
