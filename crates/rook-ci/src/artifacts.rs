// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

use rook_config::ArtifactsConfig;

use crate::constraints::Violation;
use crate::git::GitOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::PartialSuccess => "partial-success",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileChange {
    pub path: String,
    pub lines_added: usize,
    pub lines_removed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateRecord {
    pub name: String,
    pub required: bool,
    pub passed: bool,
    pub attempts: u32,
    pub output: String,
}

/// The structured execution record persisted after every run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub task: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Final agent summary (task completion text or last response)
    pub summary: String,
    pub files_modified: Vec<FileChange>,
    pub tokens_used: usize,
    pub tool_calls: usize,
    pub turns: usize,
    pub violations: Vec<Violation>,
    pub gates: Vec<GateRecord>,
    pub git: Option<GitOutcome>,
    /// The run was stopped by an operator interrupt (exit code 130)
    pub interrupted: bool,
}

/// Persist the three run artifacts: the execution record, a human-readable
/// markdown summary, and a metrics record.
///
/// Files are written atomically (temp file + rename); the output directory
/// is created 0755 and the files 0600.  Artifacts are written on failure as
/// much as on success — a failed run without its report is undebuggable.
pub fn write_artifacts(cfg: &ArtifactsConfig, report: &RunReport) -> anyhow::Result<Vec<PathBuf>> {
    if !cfg.enabled {
        return Ok(Vec::new());
    }
    create_output_dir(&cfg.output_dir)?;

    let mut written = Vec::new();
    if cfg.json {
        let path = cfg.output_dir.join("execution.json");
        let body = serde_json::to_string_pretty(report).context("serialising execution record")?;
        write_atomic(&path, &body)?;
        written.push(path);
    }
    if cfg.markdown {
        let path = cfg.output_dir.join("summary.md");
        write_atomic(&path, &render_markdown(report))?;
        written.push(path);
    }
    if cfg.metrics {
        let path = cfg.output_dir.join("metrics.json");
        let metrics = serde_json::json!({
            "status": report.status.as_str(),
            "duration_ms": report.duration_ms,
            "tokens_used": report.tokens_used,
            "tool_calls": report.tool_calls,
            "turns": report.turns,
            "files_modified": report.files_modified.len(),
            "lines_added": report.files_modified.iter().map(|f| f.lines_added).sum::<usize>(),
            "lines_removed": report.files_modified.iter().map(|f| f.lines_removed).sum::<usize>(),
            "violations": report.violations.len(),
            "gates_failed": report.gates.iter().filter(|g| !g.passed).count(),
        });
        write_atomic(&path, &serde_json::to_string_pretty(&metrics)?)?;
        written.push(path);
    }
    Ok(written)
}

fn create_output_dir(dir: &Path) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        if !dir.exists() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(dir)
                .with_context(|| format!("creating artifact dir {}", dir.display()))?;
        }
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating artifact dir {}", dir.display()))?;
    }
    Ok(())
}

fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content).with_context(|| format!("writing {}", tmp.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

fn render_markdown(report: &RunReport) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Run report: {}\n\n", report.status.as_str()));
    md.push_str(&format!("**Task**: {}\n\n", report.task));
    if report.interrupted {
        md.push_str("**Interrupted**: the run was stopped before completion.\n\n");
    }
    md.push_str(&format!(
        "**Duration**: {} ms · **Turns**: {} · **Tool calls**: {} · **Tokens**: {}\n\n",
        report.duration_ms, report.turns, report.tool_calls, report.tokens_used
    ));
    md.push_str("## Summary\n\n");
    md.push_str(&report.summary);
    md.push_str("\n\n");

    if !report.files_modified.is_empty() {
        md.push_str("## Files modified\n\n");
        for f in &report.files_modified {
            md.push_str(&format!(
                "- `{}` (+{} / -{})\n",
                f.path, f.lines_added, f.lines_removed
            ));
        }
        md.push('\n');
    }
    if !report.gates.is_empty() {
        md.push_str("## Quality gates\n\n");
        for g in &report.gates {
            let mark = if g.passed { "passed" } else { "failed" };
            md.push_str(&format!(
                "- {} — {} ({} attempt(s))\n",
                g.name, mark, g.attempts
            ));
        }
        md.push('\n');
    }
    if !report.violations.is_empty() {
        md.push_str("## Constraint violations\n\n");
        for v in &report.violations {
            md.push_str(&format!("- {:?}: {}\n", v.kind, v.message));
        }
        md.push('\n');
    }
    if let Some(git) = &report.git {
        md.push_str("## Version control\n\n");
        md.push_str(&format!(
            "- committed: {} · pushed: {}\n",
            git.committed, git.pushed
        ));
        if let Some(url) = &git.pr_url {
            md.push_str(&format!("- pull request: {url}\n"));
        }
        md.push('\n');
    }
    md
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ViolationKind;

    fn report() -> RunReport {
        let now = Utc::now();
        RunReport {
            task: "fix the tests".into(),
            status: RunStatus::Success,
            started_at: now,
            finished_at: now,
            duration_ms: 1234,
            summary: "All tests fixed.".into(),
            files_modified: vec![FileChange {
                path: "src/lib.rs".into(),
                lines_added: 10,
                lines_removed: 2,
            }],
            tokens_used: 4200,
            tool_calls: 5,
            turns: 1,
            violations: vec![Violation {
                kind: ViolationKind::FilePattern,
                message: "path vendor/x denied".into(),
            }],
            gates: vec![GateRecord {
                name: "tests".into(),
                required: true,
                passed: true,
                attempts: 1,
                output: "ok".into(),
            }],
            git: None,
            interrupted: false,
        }
    }

    fn cfg(dir: &Path) -> ArtifactsConfig {
        ArtifactsConfig {
            enabled: true,
            output_dir: dir.to_path_buf(),
            json: true,
            markdown: true,
            metrics: true,
        }
    }

    #[test]
    fn writes_all_three_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("artifacts");
        let written = write_artifacts(&cfg(&out), &report()).unwrap();
        assert_eq!(written.len(), 3);
        assert!(out.join("execution.json").exists());
        assert!(out.join("summary.md").exists());
        assert!(out.join("metrics.json").exists());
    }

    #[test]
    fn disabled_artifacts_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cfg(dir.path());
        c.enabled = false;
        assert!(write_artifacts(&c, &report()).unwrap().is_empty());
    }

    #[test]
    fn execution_record_round_trips_as_json() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(&cfg(dir.path()), &report()).unwrap();
        let text = std::fs::read_to_string(dir.path().join("execution.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["task"], "fix the tests");
        assert_eq!(value["status"], "success");
        assert_eq!(value["files_modified"][0]["path"], "src/lib.rs");
    }

    #[test]
    fn metrics_record_aggregates_counts() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(&cfg(dir.path()), &report()).unwrap();
        let text = std::fs::read_to_string(dir.path().join("metrics.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["files_modified"], 1);
        assert_eq!(value["lines_added"], 10);
        assert_eq!(value["violations"], 1);
    }

    #[test]
    fn markdown_summary_mentions_task_and_files() {
        let md = render_markdown(&report());
        assert!(md.contains("fix the tests"));
        assert!(md.contains("src/lib.rs"));
        assert!(md.contains("Quality gates"));
    }

    #[cfg(unix)]
    #[test]
    fn artifact_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("artifacts");
        write_artifacts(&cfg(&out), &report()).unwrap();
        let mode = std::fs::metadata(out.join("execution.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn no_leftover_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(&cfg(dir.path()), &report()).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }
}
