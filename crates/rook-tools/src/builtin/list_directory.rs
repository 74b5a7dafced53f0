// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::args::arg_str;
use crate::tool::{ExecutionContext, Tool, ToolArgs, ToolOutput};

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'. \
         Defaults to the workspace root when no path is given."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (optional, defaults to the workspace root)"
                }
            }
        })
    }

    fn requires_approval(&self, _args: &ToolArgs) -> bool {
        false
    }

    async fn execute(&self, ctx: &ExecutionContext, args: &ToolArgs) -> ToolOutput {
        let path = arg_str(args, "path").unwrap_or_else(|| ".".into());
        let resolved = ctx.resolve(&path);
        let mut reader = match tokio::fs::read_dir(&resolved).await {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(format!("cannot list {path}: {e}")),
        };
        let mut entries = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        ToolOutput::ok(entries.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_arguments;

    #[tokio::test]
    async fn lists_sorted_entries_with_dir_suffix() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("b.txt"), "x").await.unwrap();
        tokio::fs::create_dir(dir.path().join("a")).await.unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let out = ListDirectoryTool.execute(&ctx, &ToolArgs::new()).await;
        assert_eq!(out.content, "a/\nb.txt");
    }

    #[tokio::test]
    async fn missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let args = parse_arguments("<path>nope</path>").unwrap();
        assert!(ListDirectoryTool.execute(&ctx, &args).await.is_error);
    }
}
