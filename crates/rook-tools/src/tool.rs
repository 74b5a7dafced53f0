// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::ToolEvent;

/// Parsed tool arguments: element name → coerced JSON value.
pub type ToolArgs = serde_json::Map<String, Value>;

/// Per-invocation execution environment handed to every tool.
///
/// The cancellation token is the turn's token; long-running tools must
/// observe it.  The event sender is shared with the agent loop, which drains
/// it between and during tool executions.
#[derive(Clone)]
pub struct ExecutionContext {
    pub workspace_dir: PathBuf,
    pub cancel: CancellationToken,
    events: Option<mpsc::Sender<ToolEvent>>,
}

impl ExecutionContext {
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<ToolEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Resolve a (possibly relative) path against the workspace directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.workspace_dir.join(p)
        }
    }

    /// Emit a tool event; a missing or full channel drops the event rather
    /// than blocking the tool.
    pub fn emit(&self, event: ToolEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Plain-text result appended to memory as the tool message
    pub content: String,
    /// Structured side data (exit codes, line counts) for observers
    pub metadata: HashMap<String, Value>,
    /// If true, the tool execution failed non-fatally (returned error message)
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: HashMap::new(),
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            content: msg.into(),
            metadata: HashMap::new(),
            is_error: true,
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Trait that every built-in and user-defined tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments, shown to the model.
    fn schema(&self) -> Value;

    /// A loop-breaking tool ends the current turn after its result is
    /// appended (task completion, user question, plain conversation).
    fn is_loop_breaking(&self) -> bool {
        false
    }

    /// Whether this invocation needs an approval decision.  Auto-approval
    /// policy may still grant it without a human in the loop.
    fn requires_approval(&self, _args: &ToolArgs) -> bool {
        true
    }

    /// Human-readable preview shown with the approval request.
    fn approval_message(&self, _args: &ToolArgs) -> String {
        format!("Run tool `{}`?", self.name())
    }

    /// Hidden tools are absent from the outbound schema list and from the
    /// agent's tool listing, but still execute when called by name.
    fn should_show(&self) -> bool {
        true
    }

    /// Execute the tool.  Errors are reported via [`ToolOutput::err`].
    async fn execute(&self, ctx: &ExecutionContext, args: &ToolArgs) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _ctx: &ExecutionContext, _args: &ToolArgs) -> ToolOutput {
            ToolOutput::ok("ok")
        }
    }

    #[test]
    fn tool_defaults() {
        let t = MinimalTool;
        assert!(!t.is_loop_breaking());
        assert!(t.requires_approval(&ToolArgs::new()));
        assert!(t.should_show());
        assert!(t.approval_message(&ToolArgs::new()).contains("minimal"));
    }

    #[test]
    fn output_ok_is_not_error() {
        let o = ToolOutput::ok("fine");
        assert!(!o.is_error);
        assert_eq!(o.content, "fine");
    }

    #[test]
    fn output_err_is_error() {
        assert!(ToolOutput::err("boom").is_error);
    }

    #[test]
    fn output_with_meta_attaches_value() {
        let o = ToolOutput::ok("x").with_meta("exit_code", 0);
        assert_eq!(o.metadata.get("exit_code"), Some(&json!(0)));
    }

    #[test]
    fn context_resolves_relative_paths() {
        let ctx = ExecutionContext::new("/work");
        assert_eq!(ctx.resolve("src/lib.rs"), PathBuf::from("/work/src/lib.rs"));
        assert_eq!(ctx.resolve("/abs/p"), PathBuf::from("/abs/p"));
    }

    #[test]
    fn emit_without_channel_is_noop() {
        let ctx = ExecutionContext::new("/work");
        ctx.emit(ToolEvent::CommandCanceled { execution_id: "x".into() });
    }
}
