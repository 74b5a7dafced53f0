// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::args::arg_str;
use crate::tool::{ExecutionContext, Tool, ToolArgs, ToolOutput};

/// Loop-breaking signal: a plain conversational reply that is not a task
/// completion — greetings, status answers, anything with no follow-up work.
pub struct ConverseTool;

#[async_trait]
impl Tool for ConverseTool {
    fn name(&self) -> &str {
        "converse"
    }

    fn description(&self) -> &str {
        "Reply conversationally when the user's input is not a work request \
         (greetings, questions about previous output, small talk)."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The reply to show the user"
                }
            },
            "required": ["message"]
        })
    }

    fn is_loop_breaking(&self) -> bool {
        true
    }

    fn requires_approval(&self, _args: &ToolArgs) -> bool {
        false
    }

    async fn execute(&self, _ctx: &ExecutionContext, args: &ToolArgs) -> ToolOutput {
        let message = arg_str(args, "message").unwrap_or_default();
        ToolOutput::ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_arguments;

    #[tokio::test]
    async fn returns_message() {
        let args = parse_arguments("<message>Hello!</message>").unwrap();
        let out = ConverseTool
            .execute(&ExecutionContext::new("/tmp"), &args)
            .await;
        assert_eq!(out.content, "Hello!");
        assert!(!out.is_error);
    }

    #[test]
    fn is_loop_breaking_and_auto() {
        assert!(ConverseTool.is_loop_breaking());
        assert!(!ConverseTool.requires_approval(&ToolArgs::new()));
    }
}
