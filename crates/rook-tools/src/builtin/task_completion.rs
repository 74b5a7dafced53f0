// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::args::arg_str;
use crate::tool::{ExecutionContext, Tool, ToolArgs, ToolOutput};

/// Loop-breaking signal: the model declares the task finished.
pub struct TaskCompletionTool;

#[async_trait]
impl Tool for TaskCompletionTool {
    fn name(&self) -> &str {
        "task_completion"
    }

    fn description(&self) -> &str {
        "Signal that the task is complete. Call this exactly once, when every \
         part of the task has been finished and verified. The summary should \
         state what was done and how it was verified."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "What was accomplished and how it was verified"
                }
            },
            "required": ["summary"]
        })
    }

    fn is_loop_breaking(&self) -> bool {
        true
    }

    fn requires_approval(&self, _args: &ToolArgs) -> bool {
        false
    }

    async fn execute(&self, _ctx: &ExecutionContext, args: &ToolArgs) -> ToolOutput {
        let summary = arg_str(args, "summary").unwrap_or_else(|| "Task completed.".into());
        ToolOutput::ok(summary.clone()).with_meta("summary", summary)
    }
}
