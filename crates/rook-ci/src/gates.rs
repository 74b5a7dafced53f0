// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use rook_config::QualityGateConfig;

/// Outcome of one gate attempt.
#[derive(Debug, Clone, Serialize)]
pub struct GateResult {
    pub name: String,
    pub command: String,
    pub required: bool,
    pub passed: bool,
    pub exit_code: i32,
    pub output: String,
    pub duration_ms: u64,
}

/// Run one quality gate in the workspace; zero exit passes.
///
/// Stdout and stderr are captured together so failure feedback handed back
/// to the agent contains the complete tool output.
pub async fn run_gate(workspace: &Path, gate: &QualityGateConfig) -> GateResult {
    let started = Instant::now();
    debug!(gate = %gate.name, command = %gate.command, "running quality gate");
    let result = Command::new("sh")
        .arg("-c")
        .arg(&gate.command)
        .current_dir(workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match result {
        Ok(output) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.is_empty() {
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(&stderr);
            }
            GateResult {
                name: gate.name.clone(),
                command: gate.command.clone(),
                required: gate.required,
                passed: output.status.success(),
                exit_code: output.status.code().unwrap_or(-1),
                output: combined,
                duration_ms: started.elapsed().as_millis() as u64,
            }
        }
        Err(e) => GateResult {
            name: gate.name.clone(),
            command: gate.command.clone(),
            required: gate.required,
            passed: false,
            exit_code: -1,
            output: format!("failed to spawn gate command: {e}"),
            duration_ms: started.elapsed().as_millis() as u64,
        },
    }
}

/// Feedback message injected into the agent when a required gate fails.
pub fn gate_feedback(result: &GateResult) -> String {
    format!(
        "Quality gate `{}` failed (exit code {}). Fix the problems and call \
         task_completion again when done.\nCommand: {}\nOutput:\n{}",
        result.name, result.exit_code, result.command, result.output
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(name: &str, command: &str) -> QualityGateConfig {
        QualityGateConfig {
            name: name.into(),
            command: command.into(),
            required: true,
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn passing_gate_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let r = run_gate(dir.path(), &gate("ok", "true")).await;
        assert!(r.passed);
        assert_eq!(r.exit_code, 0);
    }

    #[tokio::test]
    async fn failing_gate_reports_failure_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let r = run_gate(dir.path(), &gate("bad", "echo broken build; exit 2")).await;
        assert!(!r.passed);
        assert_eq!(r.exit_code, 2);
        assert!(r.output.contains("broken build"));
    }

    #[tokio::test]
    async fn gate_runs_in_workspace_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "present").unwrap();
        let r = run_gate(dir.path(), &gate("probe", "cat marker.txt")).await;
        assert!(r.passed);
        assert!(r.output.contains("present"));
    }

    #[tokio::test]
    async fn gate_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let r = run_gate(dir.path(), &gate("warn", "echo oops >&2; exit 1")).await;
        assert!(r.output.contains("oops"));
    }

    #[test]
    fn feedback_names_gate_and_includes_output() {
        let r = GateResult {
            name: "tests".into(),
            command: "cargo test".into(),
            required: true,
            passed: false,
            exit_code: 101,
            output: "assertion failed: left == right".into(),
            duration_ms: 12,
        };
        let text = gate_feedback(&r);
        assert!(text.contains("`tests`"));
        assert!(text.contains("assertion failed"));
        assert!(text.contains("task_completion"));
    }
}
