// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Input samples: paired-end read sets identified by name

use crate::errors::{MagflowError, MagflowResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// One sequenced sample with paired FASTQ reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Unique within a run; becomes a directory component and an output
    /// file prefix, so it must not contain path separators
    pub name: String,
    pub read1: PathBuf,
    pub read2: PathBuf,
}

impl Sample {
    pub fn new(name: impl Into<String>, read1: impl Into<PathBuf>, read2: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            read1: read1.into(),
            read2: read2.into(),
        }
    }
}

/// Validate a batch of samples before a run starts
pub fn validate_samples(samples: &[Sample]) -> MagflowResult<()> {
    if samples.is_empty() {
        return Err(MagflowError::NoSamples);
    }

    let mut seen = HashSet::new();
    for sample in samples {
        if sample.name.is_empty() {
            return Err(MagflowError::InvalidSample {
                name: sample.name.clone(),
                reason: "sample name is empty".into(),
            });
        }
        if sample.name.contains(['/', '\\']) || sample.name.contains(std::path::MAIN_SEPARATOR) {
            return Err(MagflowError::InvalidSample {
                name: sample.name.clone(),
                reason: "sample name contains a path separator".into(),
            });
        }
        if !seen.insert(sample.name.as_str()) {
            return Err(MagflowError::InvalidSample {
                name: sample.name.clone(),
                reason: "duplicate sample name".into(),
            });
        }
    }
    Ok(())
}
