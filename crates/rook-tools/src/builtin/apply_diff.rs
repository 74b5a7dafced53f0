// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::args::arg_str;
use crate::tool::{ExecutionContext, Tool, ToolArgs, ToolOutput};

const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
const DIVIDER: &str = "=======";
const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

/// Targeted file editing via SEARCH/REPLACE blocks.
///
/// Each block's SEARCH text must match the file exactly once-or-more; the
/// first occurrence is replaced.  A non-matching block fails the whole edit
/// without touching the file.
pub struct ApplyDiffTool;

#[async_trait]
impl Tool for ApplyDiffTool {
    fn name(&self) -> &str {
        "apply_diff"
    }

    fn description(&self) -> &str {
        "Edit a file by applying one or more SEARCH/REPLACE blocks:\n\
         <<<<<<< SEARCH\n(exact existing lines)\n=======\n(replacement lines)\n>>>>>>> REPLACE\n\
         The SEARCH text must match the file content exactly, including whitespace."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or workspace-relative path to the file"
                },
                "diff": {
                    "type": "string",
                    "description": "One or more SEARCH/REPLACE blocks"
                }
            },
            "required": ["path", "diff"]
        })
    }

    fn approval_message(&self, args: &ToolArgs) -> String {
        match arg_str(args, "path") {
            Some(p) => format!("Apply diff to: {p}"),
            None => "Apply diff?".into(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, args: &ToolArgs) -> ToolOutput {
        let Some(path) = arg_str(args, "path") else {
            return ToolOutput::err("missing required parameter 'path'");
        };
        let Some(diff) = arg_str(args, "diff") else {
            return ToolOutput::err("missing required parameter 'diff'");
        };
        let resolved = ctx.resolve(&path);
        let original = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(format!("cannot read {path}: {e}")),
        };

        let blocks = match parse_blocks(&diff) {
            Ok(b) if b.is_empty() => {
                return ToolOutput::err("diff contains no SEARCH/REPLACE blocks")
            }
            Ok(b) => b,
            Err(e) => return ToolOutput::err(e),
        };

        let mut updated = original.clone();
        let mut lines_added = 0usize;
        let mut lines_removed = 0usize;
        for (i, block) in blocks.iter().enumerate() {
            match updated.find(&block.search) {
                Some(pos) => {
                    updated.replace_range(pos..pos + block.search.len(), &block.replace);
                    lines_removed += block.search.lines().count();
                    lines_added += block.replace.lines().count();
                }
                None => {
                    return ToolOutput::err(format!(
                        "SEARCH block {} does not match {path}; file left unchanged",
                        i + 1
                    ))
                }
            }
        }

        match tokio::fs::write(&resolved, &updated).await {
            Ok(()) => ToolOutput::ok(format!(
                "applied {} block(s) to {path}",
                blocks.len()
            ))
            .with_meta("path", path)
            .with_meta("lines_added", lines_added)
            .with_meta("lines_removed", lines_removed),
            Err(e) => ToolOutput::err(format!("write error: {e}")),
        }
    }
}

struct DiffBlock {
    search: String,
    replace: String,
}

fn parse_blocks(diff: &str) -> Result<Vec<DiffBlock>, String> {
    let mut blocks = Vec::new();
    let mut lines = diff.lines().peekable();
    while let Some(line) = lines.next() {
        if line.trim_end() != SEARCH_MARKER {
            continue;
        }
        let mut search = Vec::new();
        let mut replace = Vec::new();
        let mut in_replace = false;
        let mut terminated = false;
        for inner in lines.by_ref() {
            let trimmed = inner.trim_end();
            if trimmed == DIVIDER && !in_replace {
                in_replace = true;
            } else if trimmed == REPLACE_MARKER {
                terminated = true;
                break;
            } else if in_replace {
                replace.push(inner);
            } else {
                search.push(inner);
            }
        }
        if !terminated || !in_replace {
            return Err("unterminated SEARCH/REPLACE block".into());
        }
        if search.is_empty() {
            return Err("SEARCH section must not be empty".into());
        }
        blocks.push(DiffBlock {
            search: search.join("\n"),
            replace: replace.join("\n"),
        });
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolArgs;

    fn diff_args(path: &str, diff: &str) -> ToolArgs {
        let mut args = ToolArgs::new();
        args.insert("path".into(), Value::String(path.into()));
        args.insert("diff".into(), Value::String(diff.into()));
        args
    }

    #[tokio::test]
    async fn single_block_replaces_text() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.rs"), "fn old() {}\nfn keep() {}")
            .await
            .unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let diff = "<<<<<<< SEARCH\nfn old() {}\n=======\nfn new() {}\n>>>>>>> REPLACE";
        let out = ApplyDiffTool.execute(&ctx, &diff_args("a.rs", diff)).await;
        assert!(!out.is_error, "{}", out.content);
        let text = tokio::fs::read_to_string(dir.path().join("a.rs")).await.unwrap();
        assert_eq!(text, "fn new() {}\nfn keep() {}");
    }

    #[tokio::test]
    async fn non_matching_block_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.rs"), "original").await.unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let diff = "<<<<<<< SEARCH\nnot present\n=======\nx\n>>>>>>> REPLACE";
        let out = ApplyDiffTool.execute(&ctx, &diff_args("a.rs", diff)).await;
        assert!(out.is_error);
        let text = tokio::fs::read_to_string(dir.path().join("a.rs")).await.unwrap();
        assert_eq!(text, "original");
    }

    #[tokio::test]
    async fn multiple_blocks_apply_in_order() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree").await.unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let diff = "<<<<<<< SEARCH\none\n=======\n1\n>>>>>>> REPLACE\n\
                    <<<<<<< SEARCH\nthree\n=======\n3\n>>>>>>> REPLACE";
        let out = ApplyDiffTool.execute(&ctx, &diff_args("a.txt", diff)).await;
        assert!(!out.is_error);
        let text = tokio::fs::read_to_string(dir.path().join("a.txt")).await.unwrap();
        assert_eq!(text, "1\ntwo\n3");
    }

    #[test]
    fn unterminated_block_is_rejected() {
        let diff = "<<<<<<< SEARCH\nabc\n=======\nx";
        assert!(parse_blocks(diff).is_err());
    }

    #[test]
    fn empty_search_rejected() {
        let diff = "<<<<<<< SEARCH\n=======\nx\n>>>>>>> REPLACE";
        assert!(parse_blocks(diff).is_err());
    }

    #[test]
    fn counts_lines_added_and_removed() {
        let blocks = parse_blocks(
            "<<<<<<< SEARCH\na\nb\n=======\nc\n>>>>>>> REPLACE",
        )
        .unwrap();
        assert_eq!(blocks[0].search.lines().count(), 2);
        assert_eq!(blocks[0].replace.lines().count(), 1);
    }
}
