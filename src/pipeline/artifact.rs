// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Typed references to files and directories produced by pipeline stages
//!
//! Stages never hand raw paths to each other. Every product is registered as
//! an [`ArtifactRef`] carrying its logical id, sample scope, and kind, and
//! consumers look it up through the run's [`ArtifactStore`].

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Whether an artifact is a single file or a directory tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    File,
    Directory,
}

impl ArtifactKind {
    /// Check a filesystem metadata record against this kind
    pub fn matches(&self, meta: &std::fs::Metadata) -> bool {
        match self {
            ArtifactKind::File => meta.is_file(),
            ArtifactKind::Directory => meta.is_dir(),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::File => write!(f, "file"),
            ArtifactKind::Directory => write!(f, "directory"),
        }
    }
}

/// Identity of an artifact within one run: logical id plus sample scope.
/// Aggregate-scoped artifacts carry `None` for the sample.
pub type ArtifactKey = (String, Option<String>);

/// A reference to one concrete artifact produced during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Logical id, e.g. `assembly` or `krona_text`
    pub id: String,
    /// Sample the artifact belongs to; `None` for aggregate scope
    pub sample: Option<String>,
    pub kind: ArtifactKind,
    /// Absolute location on disk
    pub path: PathBuf,
}

impl ArtifactRef {
    pub fn new(
        id: impl Into<String>,
        sample: Option<String>,
        kind: ArtifactKind,
        path: PathBuf,
    ) -> Self {
        Self {
            id: id.into(),
            sample,
            kind,
            path,
        }
    }

    pub fn key(&self) -> ArtifactKey {
        (self.id.clone(), self.sample.clone())
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sample {
            Some(sample) => write!(f, "{}[{}] ({})", self.id, sample, self.kind),
            None => write!(f, "{} ({})", self.id, self.kind),
        }
    }
}

/// Append-only registry of every artifact produced during a run
///
/// Shared across worker tasks; writes happen as instances complete, reads
/// happen when downstream instances assemble their inputs.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    // Lock-free concurrent map; artifacts are write-once
    entries: DashMap<ArtifactKey, ArtifactRef>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact. Rejects a second registration under the same
    /// key and returns the offending artifact so the caller can report it.
    pub fn insert(&self, artifact: ArtifactRef) -> Result<(), ArtifactRef> {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(artifact.key()) {
            Entry::Occupied(_) => Err(artifact),
            Entry::Vacant(slot) => {
                slot.insert(artifact);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &str, sample: Option<&str>) -> Option<ArtifactRef> {
        let key = (id.to_string(), sample.map(String::from));
        self.entries.get(&key).map(|entry| entry.value().clone())
    }

    /// All artifacts registered under a logical id, across samples,
    /// ordered by sample name
    pub fn all_for_id(&self, id: &str) -> Vec<ArtifactRef> {
        let mut found: Vec<ArtifactRef> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == id)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.sample.cmp(&b.sample));
        found
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
