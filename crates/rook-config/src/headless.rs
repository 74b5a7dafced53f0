// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Validation failures for a headless run configuration.
///
/// Every variant names the offending field so CI logs point straight at the
/// line to fix.  Validation refuses to start the run; it never degrades to
/// defaults silently.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("task must not be empty")]
    MissingTask,
    #[error("workspace_dir must not be empty")]
    MissingWorkspaceDir,
    #[error("create_pr requires auto_commit to be enabled")]
    PrWithoutAutoCommit,
    #[error("create_pr requires a non-empty branch")]
    PrWithoutBranch,
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("quality gate {name:?} has an empty command")]
    EmptyGateCommand { name: String },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
}

/// Execution mode for a headless run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Block every file-modifying or command-executing tool
    ReadOnly,
    /// Full read/write agent
    #[default]
    Write,
}

/// Stderr verbosity for the headless runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Debug,
}

/// Top-level configuration for one non-interactive agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlessConfig {
    /// The instruction handed to the agent as the first user input
    pub task: String,
    #[serde(default)]
    pub mode: RunMode,
    /// Directory the agent operates in; tools resolve relative paths here
    pub workspace_dir: PathBuf,
    #[serde(default)]
    pub constraints: ConstraintsConfig,
    #[serde(default)]
    pub quality_gates: Vec<QualityGateConfig>,
    /// Fallback retry bound for gates that do not set their own
    #[serde(default = "default_gate_retries")]
    pub quality_gate_max_retries: u32,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Path this configuration was loaded from.  When set, the file is
    /// excluded from auto-commits so the run never commits its own config.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn default_gate_retries() -> u32 {
    2
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            task: String::new(),
            mode: RunMode::default(),
            workspace_dir: PathBuf::new(),
            constraints: ConstraintsConfig::default(),
            quality_gates: Vec::new(),
            quality_gate_max_retries: default_gate_retries(),
            git: GitConfig::default(),
            artifacts: ArtifactsConfig::default(),
            logging: LoggingConfig::default(),
            config_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintsConfig {
    /// Maximum distinct files the agent may modify (0 = unlimited)
    #[serde(default)]
    pub max_files: usize,
    /// Maximum total lines added + removed across all files (0 = unlimited)
    #[serde(default)]
    pub max_lines_changed: usize,
    /// Glob patterns of paths the agent may modify.  Empty = everything
    /// that is not denied.
    #[serde(default)]
    pub allowed_patterns: Vec<String>,
    /// Glob patterns of paths the agent must never modify.  Deny wins.
    #[serde(default)]
    pub denied_patterns: Vec<String>,
    /// Tool names the agent may invoke.  Empty = all registered tools.
    /// Loop-breaking tools are always allowed.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Token budget for the whole run (0 = unlimited)
    #[serde(default)]
    pub max_tokens: usize,
    /// Wall-clock budget for the whole run in seconds (0 = unlimited)
    #[serde(default)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateConfig {
    pub name: String,
    /// Shell command executed in the workspace; zero exit = pass
    pub command: String,
    /// A failing required gate fails the run once retries are exhausted;
    /// optional gates only degrade the status to partial success.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Per-gate retry bound; None inherits quality_gate_max_retries
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default)]
    pub auto_commit: bool,
    #[serde(default)]
    pub auto_push: bool,
    /// Commit partial changes even when a required quality gate failed
    #[serde(default)]
    pub commit_on_quality_fail: bool,
    #[serde(default)]
    pub commit_message: Option<String>,
    /// Branch to switch to (created when missing) before the run commits
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub create_pr: bool,
    #[serde(default)]
    pub pr_title: Option<String>,
    #[serde(default)]
    pub pr_body: Option<String>,
    #[serde(default)]
    pub pr_base: Option<String>,
    #[serde(default)]
    pub pr_draft: bool,
    #[serde(default)]
    pub require_pr: bool,
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from(".rook/artifacts")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_artifacts_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_true")]
    pub json: bool,
    #[serde(default = "default_true")]
    pub markdown: bool,
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: default_artifacts_dir(),
            json: true,
            markdown: true,
            metrics: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub verbosity: Verbosity,
}

impl HeadlessConfig {
    /// Structural validation.  Pattern compilation is checked again by the
    /// constraint manager at construction; this catches the obvious cases
    /// before an agent is ever built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task.trim().is_empty() {
            return Err(ConfigError::MissingTask);
        }
        if self.workspace_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingWorkspaceDir);
        }
        if self.git.create_pr {
            if !self.git.auto_commit {
                return Err(ConfigError::PrWithoutAutoCommit);
            }
            match self.git.branch.as_deref() {
                Some(b) if !b.trim().is_empty() => {}
                _ => return Err(ConfigError::PrWithoutBranch),
            }
        }
        for gate in &self.quality_gates {
            if gate.command.trim().is_empty() {
                return Err(ConfigError::EmptyGateCommand {
                    name: gate.name.clone(),
                });
            }
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
