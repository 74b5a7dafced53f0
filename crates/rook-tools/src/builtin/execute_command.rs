// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::args::arg_str;
use crate::events::{CommandStream, ToolEvent};
use crate::tool::{ExecutionContext, Tool, ToolArgs, ToolOutput};

/// Built-in tool that runs a shell command in the workspace.
///
/// Streams stdout/stderr line-by-line through the tool event channel so
/// observers see command progress while it runs; the collected output is the
/// tool result.  The child is killed on turn cancellation or timeout.
pub struct ExecuteCommandTool {
    pub timeout_secs: u64,
}

impl Default for ExecuteCommandTool {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr. The 'command' \
         parameter is required and can be any non-interactive shell command. \
         An optional 'working_dir' is resolved against the workspace root."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to the workspace root)"
                }
            },
            "required": ["command"]
        })
    }

    fn approval_message(&self, args: &ToolArgs) -> String {
        match arg_str(args, "command") {
            Some(c) => format!("Run command: {c}"),
            None => "Run command?".into(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, args: &ToolArgs) -> ToolOutput {
        let Some(command) = arg_str(args, "command").filter(|c| !c.trim().is_empty()) else {
            return ToolOutput::err("missing required parameter 'command'");
        };
        let working_dir = match arg_str(args, "working_dir") {
            Some(d) => ctx.resolve(&d),
            None => ctx.workspace_dir.clone(),
        };

        let execution_id = uuid::Uuid::new_v4().to_string();
        debug!(%execution_id, command = %command, "execute_command");
        ctx.emit(ToolEvent::CommandStarted {
            execution_id: execution_id.clone(),
            command: command.clone(),
            working_dir: working_dir.to_string_lossy().into_owned(),
        });

        let start = Instant::now();
        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                ctx.emit(ToolEvent::CommandFailed {
                    execution_id,
                    error: e.to_string(),
                    duration_ms,
                });
                return ToolOutput::err(format!("failed to spawn command: {e}"));
            }
        };

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let out_task = tokio::spawn(read_lines(
            stdout,
            CommandStream::Stdout,
            ctx.clone(),
            execution_id.clone(),
        ));
        let err_task = tokio::spawn(read_lines(
            stderr,
            CommandStream::Stderr,
            ctx.clone(),
            execution_id.clone(),
        ));

        let status = tokio::select! {
            status = child.wait() => status,
            _ = ctx.cancel.cancelled() => {
                let _ = child.kill().await;
                ctx.emit(ToolEvent::CommandCanceled { execution_id });
                out_task.abort();
                err_task.abort();
                return ToolOutput::err(format!("command canceled: {command}"));
            }
            _ = tokio::time::sleep(Duration::from_secs(self.timeout_secs)) => {
                let _ = child.kill().await;
                let duration_ms = start.elapsed().as_millis() as u64;
                ctx.emit(ToolEvent::CommandFailed {
                    execution_id,
                    error: format!("timed out after {}s", self.timeout_secs),
                    duration_ms,
                });
                out_task.abort();
                err_task.abort();
                return ToolOutput::err(format!(
                    "command timed out after {}s: {command}", self.timeout_secs
                ));
            }
        };

        let stdout_text = out_task.await.unwrap_or_default();
        let stderr_text = err_task.await.unwrap_or_default();
        let duration_ms = start.elapsed().as_millis() as u64;

        let status = match status {
            Ok(s) => s,
            Err(e) => {
                ctx.emit(ToolEvent::CommandFailed {
                    execution_id,
                    error: e.to_string(),
                    duration_ms,
                });
                return ToolOutput::err(format!("failed to wait for command: {e}"));
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        ctx.emit(ToolEvent::CommandCompleted {
            execution_id,
            exit_code,
            duration_ms,
        });

        let mut combined = stdout_text;
        if !stderr_text.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr_text);
        }

        if status.success() {
            let content = if combined.is_empty() {
                "(no output)".to_string()
            } else {
                combined
            };
            ToolOutput::ok(content)
                .with_meta("exit_code", exit_code)
                .with_meta("duration_ms", duration_ms)
        } else {
            ToolOutput::err(format!(
                "command exited with code {exit_code}\n{combined}"
            ))
            .with_meta("exit_code", exit_code)
            .with_meta("duration_ms", duration_ms)
        }
    }
}

/// Read a child stream line-by-line, emitting each line as a command-output
/// event and returning the accumulated text.
async fn read_lines<R: tokio::io::AsyncRead + Unpin>(
    stream: R,
    kind: CommandStream,
    ctx: ExecutionContext,
    execution_id: String,
) -> String {
    let mut lines = BufReader::new(stream).lines();
    let mut collected = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        ctx.emit(ToolEvent::CommandOutput {
            execution_id: execution_id.clone(),
            stream: kind,
            chunk: line.clone(),
        });
        if !collected.is_empty() {
            collected.push('\n');
        }
        collected.push_str(&line);
    }
    collected
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::parse_arguments;

    fn ctx_with_events() -> (ExecutionContext, mpsc::Receiver<ToolEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (ExecutionContext::new("/tmp").with_events(tx), rx)
    }

    #[tokio::test]
    async fn echo_returns_stdout() {
        let (ctx, _rx) = ctx_with_events();
        let args = parse_arguments("<command>echo hello</command>").unwrap();
        let out = ExecuteCommandTool::default().execute(&ctx, &args).await;
        assert!(!out.is_error);
        assert_eq!(out.content.trim(), "hello");
        assert_eq!(out.metadata.get("exit_code"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_output() {
        let (ctx, _rx) = ctx_with_events();
        let args = parse_arguments("<command>echo oops; exit 3</command>").unwrap();
        let out = ExecuteCommandTool::default().execute(&ctx, &args).await;
        assert!(out.is_error);
        assert!(out.content.contains("code 3"));
        assert!(out.content.contains("oops"));
    }

    #[tokio::test]
    async fn missing_command_is_error() {
        let (ctx, _rx) = ctx_with_events();
        let out = ExecuteCommandTool::default()
            .execute(&ctx, &ToolArgs::new())
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn emits_started_output_completed_events() {
        let (ctx, mut rx) = ctx_with_events();
        let args = parse_arguments("<command>echo one</command>").unwrap();
        let _ = ExecuteCommandTool::default().execute(&ctx, &args).await;

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(match ev {
                ToolEvent::CommandStarted { .. } => "started",
                ToolEvent::CommandOutput { .. } => "output",
                ToolEvent::CommandCompleted { .. } => "completed",
                ToolEvent::CommandFailed { .. } => "failed",
                ToolEvent::CommandCanceled { .. } => "canceled",
            });
        }
        assert_eq!(kinds.first(), Some(&"started"));
        assert!(kinds.contains(&"output"));
        assert_eq!(kinds.last(), Some(&"completed"));
    }

    #[tokio::test]
    async fn timeout_kills_command() {
        let (ctx, mut rx) = ctx_with_events();
        let args = parse_arguments("<command>sleep 5</command>").unwrap();
        let tool = ExecuteCommandTool { timeout_secs: 1 };
        let out = tool.execute(&ctx, &args).await;
        assert!(out.is_error);
        assert!(out.content.contains("timed out"));
        let mut saw_failed = false;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, ToolEvent::CommandFailed { .. }) {
                saw_failed = true;
            }
        }
        assert!(saw_failed);
    }

    #[tokio::test]
    async fn cancellation_kills_command() {
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let ctx = ExecutionContext::new("/tmp")
            .with_events(tx)
            .with_cancel(cancel.clone());
        let args = parse_arguments("<command>sleep 5</command>").unwrap();

        let tool = ExecuteCommandTool::default();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel2.cancel();
        });
        let out = tool.execute(&ctx, &args).await;
        assert!(out.is_error);
        assert!(out.content.contains("canceled"));
        let mut saw_canceled = false;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, ToolEvent::CommandCanceled { .. }) {
                saw_canceled = true;
            }
        }
        assert!(saw_canceled);
    }
}
