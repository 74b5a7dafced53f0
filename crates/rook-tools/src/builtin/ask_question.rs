// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::args::arg_str;
use crate::tool::{ExecutionContext, Tool, ToolArgs, ToolOutput};

/// Loop-breaking signal: the model needs an answer from the human before it
/// can continue.  The question rides in the tool result; the driver renders
/// it and the answer arrives as the next user input.
pub struct AskQuestionTool;

#[async_trait]
impl Tool for AskQuestionTool {
    fn name(&self) -> &str {
        "ask_question"
    }

    fn description(&self) -> &str {
        "Ask the user a clarifying question and wait for their reply. Use \
         only when the task cannot proceed without the answer."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to put to the user"
                }
            },
            "required": ["question"]
        })
    }

    fn is_loop_breaking(&self) -> bool {
        true
    }

    fn requires_approval(&self, _args: &ToolArgs) -> bool {
        false
    }

    async fn execute(&self, _ctx: &ExecutionContext, args: &ToolArgs) -> ToolOutput {
        match arg_str(args, "question") {
            Some(q) if !q.trim().is_empty() => ToolOutput::ok(q.clone()).with_meta("question", q),
            _ => ToolOutput::err("missing required parameter 'question'"),
        }
    }
}
