// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use rook_config::{ConfigError, ConstraintsConfig, RunMode};
use rook_tools::{path_glob_to_regex, ToolArgs};

/// Tools whose execution mutates workspace files.
const FILE_MODIFYING_TOOLS: [&str; 2] = ["write_file", "apply_diff"];

/// Tools that execute arbitrary commands.
const COMMAND_TOOLS: [&str; 1] = ["execute_command"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    FileCount,
    LineCount,
    FilePattern,
    ToolRestriction,
    TokenLimit,
    Timeout,
    ReadOnlyMode,
}

impl ViolationKind {
    /// Timeout, token-limit, and read-only violations fail the whole run;
    /// the rest only reject the offending tool call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ViolationKind::Timeout | ViolationKind::TokenLimit | ViolationKind::ReadOnlyMode
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LineStats {
    pub lines_added: usize,
    pub lines_removed: usize,
}

/// Enforces the headless run's safety envelope: path patterns, file/line
/// caps, tool allow-list, token budget, wall-clock timeout, and read-only
/// mode.  The approval bridge consults it before answering every approval
/// request; the runner feeds it token usage and committed modifications.
pub struct ConstraintManager {
    mode: RunMode,
    cfg: ConstraintsConfig,
    allowed: Vec<Regex>,
    denied: Vec<Regex>,
    files: Mutex<HashMap<String, LineStats>>,
    tokens_used: AtomicUsize,
    started: Instant,
    violations: Mutex<Vec<Violation>>,
}

impl ConstraintManager {
    pub fn new(mode: RunMode, cfg: &ConstraintsConfig) -> Result<Self, ConfigError> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>, ConfigError> {
            patterns
                .iter()
                .map(|p| {
                    path_glob_to_regex(p).ok_or_else(|| ConfigError::InvalidPattern {
                        pattern: p.clone(),
                        reason: "cannot compile glob".into(),
                    })
                })
                .collect()
        };
        Ok(Self {
            mode,
            cfg: cfg.clone(),
            allowed: compile(&cfg.allowed_patterns)?,
            denied: compile(&cfg.denied_patterns)?,
            files: Mutex::new(HashMap::new()),
            tokens_used: AtomicUsize::new(0),
            started: Instant::now(),
            violations: Mutex::new(Vec::new()),
        })
    }

    /// Verdict for one tool call at approval time.  `None` means allowed.
    ///
    /// Loop-breaking tools bypass the allow-list: the agent must always be
    /// able to signal completion or ask a question.
    pub fn check_tool_call(
        &self,
        tool_name: &str,
        is_loop_breaking: bool,
        args: &ToolArgs,
    ) -> Option<Violation> {
        if is_loop_breaking {
            return None;
        }
        let mutating = FILE_MODIFYING_TOOLS.contains(&tool_name);
        let command = COMMAND_TOOLS.contains(&tool_name);

        if self.mode == RunMode::ReadOnly && (mutating || command) {
            return self.record(Violation::new(
                ViolationKind::ReadOnlyMode,
                format!("tool {tool_name} is blocked in read-only mode"),
            ));
        }

        if !self.cfg.allowed_tools.is_empty()
            && !self.cfg.allowed_tools.iter().any(|t| t == tool_name)
        {
            return self.record(Violation::new(
                ViolationKind::ToolRestriction,
                format!("tool {tool_name} is not in the allowed tool list"),
            ));
        }

        if mutating {
            let Some(path) = args.get("path").and_then(Value::as_str) else {
                return None;
            };
            if !self.path_allowed(path) {
                return self.record(Violation::new(
                    ViolationKind::FilePattern,
                    format!("path {path} is excluded by the configured patterns"),
                ));
            }
            let files = self.files.lock().unwrap();
            let is_new = !files.contains_key(path);
            if self.cfg.max_files > 0 && is_new && files.len() >= self.cfg.max_files {
                return self.record(Violation::new(
                    ViolationKind::FileCount,
                    format!(
                        "modifying {path} would exceed the {}-file limit",
                        self.cfg.max_files
                    ),
                ));
            }
            if self.cfg.max_lines_changed > 0 {
                let total: usize = files
                    .values()
                    .map(|s| s.lines_added + s.lines_removed)
                    .sum();
                if total >= self.cfg.max_lines_changed {
                    return self.record(Violation::new(
                        ViolationKind::LineCount,
                        format!(
                            "line-change budget of {} is exhausted",
                            self.cfg.max_lines_changed
                        ),
                    ));
                }
            }
        }
        None
    }

    /// Deny wins; an empty allow-list allows everything not denied.
    pub fn path_allowed(&self, path: &str) -> bool {
        if self.denied.iter().any(|re| re.is_match(path)) {
            return false;
        }
        if self.allowed.is_empty() {
            return true;
        }
        self.allowed.iter().any(|re| re.is_match(path))
    }

    /// Commit a confirmed modification; returns a violation when the line
    /// budget is crossed by it.
    pub fn record_modification(
        &self,
        path: &str,
        lines_added: usize,
        lines_removed: usize,
    ) -> Option<Violation> {
        let mut files = self.files.lock().unwrap();
        let entry = files.entry(path.to_string()).or_default();
        entry.lines_added += lines_added;
        entry.lines_removed += lines_removed;
        if self.cfg.max_lines_changed > 0 {
            let total: usize = files
                .values()
                .map(|s| s.lines_added + s.lines_removed)
                .sum();
            if total > self.cfg.max_lines_changed {
                drop(files);
                return self.record(Violation::new(
                    ViolationKind::LineCount,
                    format!(
                        "total of {total} changed lines exceeds the {} limit",
                        self.cfg.max_lines_changed
                    ),
                ));
            }
        }
        None
    }

    /// Track token spend; returns a fatal violation once the budget is hit.
    pub fn add_tokens(&self, tokens: usize) -> Option<Violation> {
        let total = self.tokens_used.fetch_add(tokens, Ordering::SeqCst) + tokens;
        if self.cfg.max_tokens > 0 && total > self.cfg.max_tokens {
            return self.record(Violation::new(
                ViolationKind::TokenLimit,
                format!("token budget of {} exceeded ({total})", self.cfg.max_tokens),
            ));
        }
        None
    }

    pub fn check_timeout(&self) -> Option<Violation> {
        if self.cfg.timeout_secs > 0
            && self.started.elapsed().as_secs() >= self.cfg.timeout_secs
        {
            return self.record(Violation::new(
                ViolationKind::Timeout,
                format!("run exceeded the {}s timeout", self.cfg.timeout_secs),
            ));
        }
        None
    }

    pub fn timeout_secs(&self) -> u64 {
        self.cfg.timeout_secs
    }

    pub fn tokens_used(&self) -> usize {
        self.tokens_used.load(Ordering::SeqCst)
    }

    pub fn files_modified(&self) -> HashMap<String, LineStats> {
        self.files.lock().unwrap().clone()
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().unwrap().clone()
    }

    fn record(&self, violation: Violation) -> Option<Violation> {
        self.violations.lock().unwrap().push(violation.clone());
        Some(violation)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
