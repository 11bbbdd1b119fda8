// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! External tool invocation
//!
//! Every stage body boils down to running one external command, either a
//! plain argv or a small shell pipe (`bowtie2 | samtools view | samtools
//! sort`). This module resolves binaries, spawns them with
//! [`tokio::process::Command`], captures output, and turns non-zero exits
//! into diagnosable errors carrying the stderr tail.

use crate::errors::{MagflowError, MagflowResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

use crate::pipeline::ArtifactKind;

/// How many trailing stderr lines survive into an execution error
pub const STDERR_TAIL_LINES: usize = 25;

/// Maps tool names to binaries
///
/// Resolution order: explicit override, then `PATH` lookup via [`which`].
/// Overrides are how tests substitute stub executables and how deployments
/// pin exact tool builds.
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    overrides: HashMap<String, PathBuf>,
}

impl Toolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, tool: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(tool.into(), path.into());
        self
    }

    pub fn resolve(&self, tool: &str) -> MagflowResult<PathBuf> {
        if let Some(path) = self.overrides.get(tool) {
            return Ok(path.clone());
        }
        which::which(tool).map_err(|_| MagflowError::tool_not_found(tool))
    }
}

/// One program plus its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub tool: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.display().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// A runnable command: a direct exec or a pipe of several programs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCommand {
    Argv(Invocation),
    Pipeline(Vec<Invocation>),
}

impl ToolCommand {
    /// Tool names involved, in order
    pub fn tools(&self) -> Vec<&str> {
        match self {
            ToolCommand::Argv(inv) => vec![inv.tool.as_str()],
            ToolCommand::Pipeline(invs) => invs.iter().map(|i| i.tool.as_str()).collect(),
        }
    }

    /// Short label for error attribution, e.g. `bowtie2 | samtools | samtools`
    pub fn label(&self) -> String {
        self.tools().join(" | ")
    }

    /// Human-readable rendering of what will run
    pub fn render(&self) -> String {
        match self {
            ToolCommand::Argv(inv) => {
                let mut parts = vec![inv.tool.clone()];
                parts.extend(inv.args.iter().cloned());
                parts.join(" ")
            }
            ToolCommand::Pipeline(invs) => invs
                .iter()
                .map(|inv| {
                    let mut parts = vec![inv.tool.clone()];
                    parts.extend(inv.args.iter().cloned());
                    parts.join(" ")
                })
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

/// Captured result of a successful tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// A file or directory the command is expected to leave in the workdir
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDecl {
    /// Logical artifact id the product registers under
    pub id: String,
    /// Location relative to the instance workdir
    pub rel_path: PathBuf,
    pub kind: ArtifactKind,
}

impl OutputDecl {
    pub fn file(id: impl Into<String>, rel_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            rel_path: rel_path.into(),
            kind: ArtifactKind::File,
        }
    }

    pub fn directory(id: impl Into<String>, rel_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            rel_path: rel_path.into(),
            kind: ArtifactKind::Directory,
        }
    }
}

/// Run a command to completion inside `workdir`
///
/// Success means exit code zero. Anything else becomes
/// [`MagflowError::ToolExecutionFailed`] with the trailing stderr lines.
pub async fn run(
    toolchain: &Toolchain,
    command: &ToolCommand,
    workdir: &Path,
) -> MagflowResult<ToolOutput> {
    let label = command.label();
    let mut cmd = build_command(toolchain, command)?;
    cmd.current_dir(workdir);

    info!("running: {}", command.render());
    let started = Instant::now();

    let output = cmd.output().await.map_err(|e| MagflowError::ToolExecutionFailed {
        tool: label.clone(),
        exit_code: None,
        stderr_tail: format!("failed to spawn: {e}"),
        help: None,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let duration = started.elapsed();

    if output.status.success() {
        debug!("{} finished in {:.1}s", label, duration.as_secs_f64());
        Ok(ToolOutput {
            stdout,
            stderr,
            duration,
        })
    } else {
        Err(MagflowError::tool_failed(
            &label,
            output.status.code(),
            stderr_tail(&stderr),
        ))
    }
}

/// Check each declared output exists with the declared kind and turn it
/// into an absolute-path artifact reference
pub async fn collect_outputs(
    tool_label: &str,
    workdir: &Path,
    declared: &[OutputDecl],
    sample: Option<&str>,
) -> MagflowResult<HashMap<String, crate::pipeline::ArtifactRef>> {
    let mut artifacts = HashMap::new();
    for decl in declared {
        let path = workdir.join(&decl.rel_path);
        let meta = tokio::fs::metadata(&path).await.ok();
        let present = meta.map(|m| decl.kind.matches(&m)).unwrap_or(false);
        if !present {
            return Err(MagflowError::MissingDeclaredOutput {
                tool: tool_label.to_string(),
                output: decl.id.clone(),
                path,
                kind: decl.kind.to_string(),
            });
        }
        artifacts.insert(
            decl.id.clone(),
            crate::pipeline::ArtifactRef::new(
                decl.id.clone(),
                sample.map(String::from),
                decl.kind,
                path,
            ),
        );
    }
    Ok(artifacts)
}

fn build_command(toolchain: &Toolchain, command: &ToolCommand) -> MagflowResult<Command> {
    match command {
        ToolCommand::Argv(inv) => {
            let binary = toolchain.resolve(&inv.tool)?;
            let mut cmd = Command::new(binary);
            cmd.args(&inv.args);
            Ok(cmd)
        }
        ToolCommand::Pipeline(invs) => {
            let script = render_pipeline_script(toolchain, invs)?;
            let bash = toolchain.resolve("bash")?;
            let mut cmd = Command::new(bash);
            cmd.arg("-c").arg(script);
            Ok(cmd)
        }
    }
}

/// Render a pipe as a strict bash script. `pipefail` makes a failure in any
/// segment fail the whole command, matching direct-exec semantics.
fn render_pipeline_script(toolchain: &Toolchain, invs: &[Invocation]) -> MagflowResult<String> {
    let mut segments = Vec::with_capacity(invs.len());
    for inv in invs {
        let binary = toolchain.resolve(&inv.tool)?;
        let mut words = vec![shell_quote(&binary.display().to_string())];
        words.extend(inv.args.iter().map(|a| shell_quote(a)));
        segments.push(words.join(" "));
    }
    Ok(format!("set -euo pipefail; {}", segments.join(" | ")))
}

/// Single-quote a word for bash unless it's already safe
fn shell_quote(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }
    let safe = word
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'/' | b'=' | b':' | b'+' | b',' | b'@' | b'%'));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Keep only the last [`STDERR_TAIL_LINES`] lines of a stderr capture
pub fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    if lines.len() <= STDERR_TAIL_LINES {
        stderr.trim_end().to_string()
    } else {
        lines[lines.len() - STDERR_TAIL_LINES..].join("\n")
    }
}
