// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::warn;

use rook_config::{Config, HeadlessConfig, RunMode, Verbosity};
use rook_core::{
    Agent, AgentChannels, AgentEvent, ApprovalDecision, ApprovalResponse, InputEvent,
};

use crate::artifacts::{write_artifacts, FileChange, GateRecord, RunReport, RunStatus};
use crate::constraints::{ConstraintManager, ViolationKind};
use crate::gates::{gate_feedback, run_gate};
use crate::git::GitBridge;
use crate::output::{write_progress, write_stderr};
use crate::tracker::FileModificationTracker;

// ── Exit codes ────────────────────────────────────────────────────────────────

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_AGENT_ERROR: i32 = 1;
pub const EXIT_VALIDATION_ERROR: i32 = 2;
pub const EXIT_TIMEOUT: i32 = 124;
pub const EXIT_INTERRUPT: i32 = 130;

/// Map a finished report to a process exit code.
pub fn exit_code(report: &RunReport) -> i32 {
    if report.interrupted {
        return EXIT_INTERRUPT;
    }
    if report
        .violations
        .iter()
        .any(|v| v.kind == ViolationKind::Timeout)
    {
        return EXIT_TIMEOUT;
    }
    match report.status {
        RunStatus::Success | RunStatus::PartialSuccess => EXIT_SUCCESS,
        RunStatus::Failed => EXIT_AGENT_ERROR,
    }
}

// ── Run state ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RunState {
    summary: Option<String>,
    last_message: String,
    tool_calls: usize,
    turns: usize,
    completed: bool,
    fatal: bool,
    timed_out: bool,
    interrupted: bool,
}

/// Non-interactive driver: runs one task through the agent under the
/// configured constraint envelope, answers approval requests from the
/// constraint verdict, runs quality gates with bounded retries, persists the
/// run artifacts, and applies the optional version-control side effects.
pub struct HeadlessRunner {
    config: HeadlessConfig,
    interrupt_tx: mpsc::Sender<()>,
    interrupt_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl HeadlessRunner {
    pub fn new(config: HeadlessConfig) -> Self {
        let (interrupt_tx, interrupt_rx) = mpsc::channel(1);
        Self {
            config,
            interrupt_tx,
            interrupt_rx: Mutex::new(Some(interrupt_rx)),
        }
    }

    /// Sender that interrupts the run (exit code 130).  The binary wires
    /// this to Ctrl+C; tests inject directly.
    pub fn interrupt_sender(&self) -> mpsc::Sender<()> {
        self.interrupt_tx.clone()
    }

    /// Build the agent from configuration and run the task.
    pub async fn run(&self, agent_config: Config) -> anyhow::Result<RunReport> {
        self.config.validate()?;
        let provider = rook_model::from_config(&agent_config.model)?;
        let agent = Agent::new(provider, agent_config, &self.config.workspace_dir);
        self.run_with_agent(agent).await
    }

    /// Run the task against a caller-supplied agent (tests inject scripted
    /// providers here).
    pub async fn run_with_agent(&self, agent: Agent) -> anyhow::Result<RunReport> {
        self.config.validate()?;
        let started_at = Utc::now();
        let verbosity = self.config.logging.verbosity;

        // The constraint clock must start no later than the deadline baseline
        // below, or the timeout branch could fire before check_timeout agrees.
        let constraints = ConstraintManager::new(self.config.mode, &self.config.constraints)?;
        let started = Instant::now();
        let tracker = FileModificationTracker::new();
        let mut channels = agent
            .handles()
            .context("agent channel handles already taken")?;
        agent.start()?;

        // Ctrl+C interrupts the run: the turn is cancelled, partial work is
        // kept on disk, and the exit code is 130.
        let mut interrupt_rx = self
            .interrupt_rx
            .lock()
            .unwrap()
            .take()
            .context("runner was already used for a run")?;
        let interrupt_tx = self.interrupt_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = interrupt_tx.send(()).await;
            }
        });

        self.progress(
            verbosity,
            &format!(
                "[rook:run:start] mode={:?} workspace={}",
                self.config.mode,
                self.config.workspace_dir.display()
            ),
        );

        let deadline = if self.config.constraints.timeout_secs > 0 {
            Some(started + Duration::from_secs(self.config.constraints.timeout_secs))
        } else {
            None
        };

        let mut state = RunState::default();

        // ── First turn: the task itself ──────────────────────────────────────
        channels
            .input
            .send(InputEvent::UserInput(self.config.task.clone()))
            .await
            .context("sending task to agent")?;
        state.turns += 1;
        self.consume_turn(
            &agent,
            &mut channels,
            &constraints,
            &tracker,
            &mut state,
            deadline,
            &mut interrupt_rx,
        )
        .await?;

        // ── Quality gates with bounded feedback retries ──────────────────────
        let mut gate_records: Vec<GateRecord> = Vec::new();
        let mut required_gate_failed = false;
        let mut optional_gate_failed = false;

        if state.completed && !state.fatal {
            'gates: for gate in &self.config.quality_gates {
                let max_retries = gate
                    .max_retries
                    .unwrap_or(self.config.quality_gate_max_retries);
                let mut attempts: u32 = 0;
                loop {
                    let result = run_gate(&self.config.workspace_dir, gate).await;
                    attempts += 1;
                    self.progress(
                        verbosity,
                        &format!(
                            "[rook:gate] name={:?} attempt={} passed={}",
                            result.name, attempts, result.passed
                        ),
                    );
                    if result.passed {
                        gate_records.push(record_of(result, attempts));
                        break;
                    }
                    if !gate.required {
                        optional_gate_failed = true;
                        gate_records.push(record_of(result, attempts));
                        break;
                    }
                    if attempts > max_retries {
                        gate_records.push(record_of(result, attempts));
                        required_gate_failed = true;
                        break 'gates;
                    }
                    // Feed the failure back and give the agent another turn.
                    channels
                        .input
                        .send(InputEvent::UserInput(gate_feedback(&result)))
                        .await
                        .context("sending gate feedback to agent")?;
                    state.turns += 1;
                    self.consume_turn(
                        &agent,
                        &mut channels,
                        &constraints,
                        &tracker,
                        &mut state,
                        deadline,
                        &mut interrupt_rx,
                    )
                    .await?;
                    if state.fatal {
                        break 'gates;
                    }
                }
            }
        }

        // ── Status ───────────────────────────────────────────────────────────
        let status = if state.fatal || required_gate_failed {
            RunStatus::Failed
        } else if optional_gate_failed || !state.completed {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Success
        };

        // ── Version control ──────────────────────────────────────────────────
        // An interrupted run neither commits nor reverts: partial changes are
        // left in place for the operator who stopped it.
        let git = if !state.interrupted
            && self.config.mode == RunMode::Write
            && self.config.git.auto_commit
        {
            let bridge = GitBridge::new(
                self.config.workspace_dir.clone(),
                self.config.git.clone(),
                self.config.config_path.clone(),
            );
            if status == RunStatus::Failed && !self.config.git.commit_on_quality_fail {
                // Partial changes are not kept on a failed run.
                if let Err(e) = bridge.revert_tracked_changes().await {
                    write_stderr(&format!("[rook:warn] could not revert changes: {e:#}"));
                }
                None
            } else {
                let message = self
                    .config
                    .git
                    .commit_message
                    .clone()
                    .unwrap_or_else(|| format!("rook: {}", self.config.task));
                Some(bridge.finalize(&message).await)
            }
        } else {
            None
        };

        let mut status = status;
        if self.config.git.require_pr {
            let have_pr = git.as_ref().and_then(|g| g.pr_url.as_ref()).is_some();
            if !have_pr && status == RunStatus::Success {
                write_stderr("[rook:warn] require_pr set but no pull request was created");
                status = RunStatus::PartialSuccess;
            }
        }

        // ── Report & artifacts ───────────────────────────────────────────────
        let files_modified: Vec<FileChange> = constraints
            .files_modified()
            .into_iter()
            .map(|(path, stats)| FileChange {
                path,
                lines_added: stats.lines_added,
                lines_removed: stats.lines_removed,
            })
            .collect();
        let summary = state
            .summary
            .clone()
            .unwrap_or_else(|| state.last_message.clone());
        let report = RunReport {
            task: self.config.task.clone(),
            status,
            started_at,
            finished_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            summary,
            files_modified,
            tokens_used: constraints.tokens_used(),
            tool_calls: state.tool_calls,
            turns: state.turns,
            violations: constraints.violations(),
            gates: gate_records,
            git,
            interrupted: state.interrupted,
        };

        // Artifacts are written on failure too; a run without its report is
        // undebuggable.
        if let Err(e) = write_artifacts(&self.config.artifacts, &report) {
            warn!("failed to write artifacts: {e:#}");
            write_stderr(&format!("[rook:warn] failed to write artifacts: {e:#}"));
        }

        agent.shutdown().await;
        self.progress(
            verbosity,
            &format!(
                "[rook:run:complete] status={} turns={} tool_calls={} duration_ms={}",
                report.status.as_str(),
                report.turns,
                report.tool_calls,
                report.duration_ms
            ),
        );
        Ok(report)
    }

    /// Consume events until `TurnEnd`, bridging approvals to the constraint
    /// verdict and feeding the trackers.
    #[allow(clippy::too_many_arguments)]
    async fn consume_turn(
        &self,
        agent: &Agent,
        channels: &mut AgentChannels,
        constraints: &ConstraintManager,
        tracker: &FileModificationTracker,
        state: &mut RunState,
        deadline: Option<Instant>,
        interrupt_rx: &mut mpsc::Receiver<()>,
    ) -> anyhow::Result<()> {
        let verbosity = self.config.logging.verbosity;
        loop {
            let event = tokio::select! {
                biased;
                _ = async {
                    match deadline {
                        Some(d) => tokio::time::sleep_until(d.into()).await,
                        None => std::future::pending().await,
                    }
                }, if !state.timed_out => {
                    state.timed_out = true;
                    state.fatal = true;
                    if let Some(v) = constraints.check_timeout() {
                        write_stderr(&format!("[rook:violation] {:?}: {}", v.kind, v.message));
                    }
                    let _ = channels.cancel.send(()).await;
                    continue;
                }
                maybe = interrupt_rx.recv(), if !state.interrupted => {
                    if maybe.is_some() {
                        state.interrupted = true;
                        state.fatal = true;
                        write_stderr("[rook:interrupted] interrupt received — cancelling the turn");
                        let _ = channels.cancel.send(()).await;
                    }
                    continue;
                }
                maybe = channels.events.recv() => match maybe {
                    Some(ev) => ev,
                    None => anyhow::bail!("agent event channel closed mid-turn"),
                }
            };

            match event {
                AgentEvent::ApprovalRequest {
                    approval_id,
                    tool_name,
                    input,
                    ..
                } => {
                    let loop_breaking = agent.tool_is_loop_breaking(&tool_name);
                    let verdict = constraints.check_tool_call(&tool_name, loop_breaking, &input);
                    let decision = match &verdict {
                        None => ApprovalDecision::Granted,
                        Some(v) => {
                            write_stderr(&format!(
                                "[rook:violation] {:?}: {}",
                                v.kind, v.message
                            ));
                            if v.kind.is_fatal() {
                                state.fatal = true;
                            }
                            ApprovalDecision::Rejected
                        }
                    };
                    channels
                        .approvals
                        .send(ApprovalResponse {
                            approval_id,
                            decision,
                        })
                        .await
                        .context("answering approval request")?;
                }
                AgentEvent::ToolCall {
                    tool_name, input, ..
                } => {
                    state.tool_calls += 1;
                    tracker.on_tool_call(&tool_name, &input);
                    self.progress(verbosity, &format!("[rook:tool:call] name={tool_name:?}"));
                }
                AgentEvent::ToolResult {
                    tool_name,
                    output,
                    metadata,
                } => {
                    if let Some(pm) = tracker.on_tool_result(&tool_name, &metadata) {
                        if let Some(v) =
                            constraints.record_modification(&pm.path, pm.lines_added, pm.lines_removed)
                        {
                            write_stderr(&format!(
                                "[rook:violation] {:?}: {}",
                                v.kind, v.message
                            ));
                        }
                    }
                    if tool_name == "task_completion" {
                        state.completed = true;
                        state.summary = Some(output.clone());
                    }
                    self.progress(
                        verbosity,
                        &format!(
                            "[rook:tool:result] name={tool_name:?} size={}",
                            output.len()
                        ),
                    );
                }
                AgentEvent::ToolResultError { tool_name, error } => {
                    tracker.on_tool_error(&tool_name);
                    write_stderr(&format!(
                        "[rook:tool:error] name={tool_name:?} error={error:?}"
                    ));
                }
                AgentEvent::TokenUsage(usage) => {
                    if let Some(v) = constraints.add_tokens(usage.total_tokens) {
                        write_stderr(&format!("[rook:violation] {:?}: {}", v.kind, v.message));
                        state.fatal = true;
                        let _ = channels.cancel.send(()).await;
                    }
                }
                AgentEvent::MessageContent(text) => {
                    state.last_message.push_str(&text);
                }
                AgentEvent::CommandExecutionOutput { stream, chunk, .. } => {
                    if verbosity >= Verbosity::Verbose {
                        write_stderr(&format!("[rook:cmd:{stream}] {chunk}"));
                    }
                }
                AgentEvent::SummarizationComplete {
                    strategy,
                    tokens_saved,
                    ..
                } => {
                    self.progress(
                        verbosity,
                        &format!(
                            "[rook:context:summarized] strategy={strategy} tokens_saved={tokens_saved}"
                        ),
                    );
                }
                AgentEvent::Error(e) => {
                    write_stderr(&format!("[rook:agent:error] {e}"));
                }
                AgentEvent::TurnEnd => return Ok(()),
                _ => {}
            }
        }
    }

    fn progress(&self, verbosity: Verbosity, msg: &str) {
        if verbosity != Verbosity::Quiet {
            write_progress(msg);
        }
    }
}

fn record_of(result: crate::gates::GateResult, attempts: u32) -> GateRecord {
    GateRecord {
        name: result.name,
        required: result.required,
        passed: result.passed,
        attempts,
        output: result.output,
    }
}
