// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::args::arg_str;
use crate::tool::{ExecutionContext, Tool, ToolArgs, ToolOutput};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file, overwriting any existing content at the path. ALWAYS \
         prefer apply_diff for targeted edits to existing files. Parent \
         directories are created automatically."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or workspace-relative path to the file"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn approval_message(&self, args: &ToolArgs) -> String {
        match arg_str(args, "path") {
            Some(p) => format!("Write file: {p}"),
            None => "Write file?".into(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, args: &ToolArgs) -> ToolOutput {
        let Some(path) = arg_str(args, "path") else {
            return ToolOutput::err("missing required parameter 'path'");
        };
        let Some(content) = arg_str(args, "content") else {
            return ToolOutput::err("missing required parameter 'content'");
        };
        let resolved = ctx.resolve(&path);
        debug!(path = %resolved.display(), bytes = content.len(), "write_file");

        // Lines in the previous content count as removed for the tracker.
        let lines_removed = match tokio::fs::read_to_string(&resolved).await {
            Ok(old) => old.lines().count(),
            Err(_) => 0,
        };

        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }
        match tokio::fs::write(&resolved, &content).await {
            Ok(()) => ToolOutput::ok(format!("wrote {} bytes to {path}", content.len()))
                .with_meta("path", path)
                .with_meta("lines_added", content.lines().count())
                .with_meta("lines_removed", lines_removed),
            Err(e) => ToolOutput::err(format!("write error: {e}")),
        }
    }
}
