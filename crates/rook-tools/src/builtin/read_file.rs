// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::args::{arg_str, arg_usize};
use crate::tool::{ExecutionContext, Tool, ToolArgs, ToolOutput};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Optional 'offset' (1-based line) and \
         'limit' (line count) read a window of a large file."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or workspace-relative path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line to start reading from (optional)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (optional)"
                }
            },
            "required": ["path"]
        })
    }

    fn requires_approval(&self, _args: &ToolArgs) -> bool {
        false
    }

    async fn execute(&self, ctx: &ExecutionContext, args: &ToolArgs) -> ToolOutput {
        let Some(path) = arg_str(args, "path") else {
            return ToolOutput::err("missing required parameter 'path'");
        };
        let resolved = ctx.resolve(&path);
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(format!("cannot read {path}: {e}")),
        };

        let offset = arg_usize(args, "offset").unwrap_or(1).max(1);
        let limit = arg_usize(args, "limit");
        let content = match limit {
            None if offset == 1 => text,
            _ => {
                let lines: Vec<&str> = text.lines().collect();
                let start = (offset - 1).min(lines.len());
                let end = match limit {
                    Some(l) => (start + l).min(lines.len()),
                    None => lines.len(),
                };
                lines[start..end].join("\n")
            }
        };
        ToolOutput::ok(content).with_meta("path", path)
    }
}
