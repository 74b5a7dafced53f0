// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use rook_tools::ToolArgs;

/// A file modification announced by a tool call but not yet confirmed by its
/// result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingModification {
    pub call_id: u64,
    pub path: String,
    pub lines_added: usize,
    pub lines_removed: usize,
}

/// Correlates tool-call events with their results so only modifications that
/// actually happened are counted.
///
/// Correlation is FIFO per tool name with a monotonically increasing call
/// id: results arrive in the order calls were dispatched, and an error
/// result cancels its pending modification instead of committing it.
#[derive(Debug, Default)]
pub struct FileModificationTracker {
    pending: Mutex<HashMap<String, VecDeque<PendingModification>>>,
    next_id: AtomicU64,
}

impl FileModificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatched file-modifying call.  Non-modifying tools and
    /// calls without a path return `None`.
    pub fn on_tool_call(&self, tool_name: &str, input: &ToolArgs) -> Option<u64> {
        if !matches!(tool_name, "write_file" | "apply_diff") {
            return None;
        }
        let path = input.get("path").and_then(Value::as_str)?.to_string();
        // Line estimates from the input; the result metadata refines them.
        let (lines_added, lines_removed) = match tool_name {
            "write_file" => (
                input
                    .get("content")
                    .and_then(Value::as_str)
                    .map(|c| c.lines().count())
                    .unwrap_or(0),
                0,
            ),
            _ => (
                input
                    .get("diff")
                    .and_then(Value::as_str)
                    .map(|d| d.lines().count())
                    .unwrap_or(0),
                0,
            ),
        };
        let call_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending
            .lock()
            .unwrap()
            .entry(tool_name.to_string())
            .or_default()
            .push_back(PendingModification {
                call_id,
                path,
                lines_added,
                lines_removed,
            });
        Some(call_id)
    }

    /// A successful result confirms the oldest pending call for that tool.
    /// Result metadata overrides the input-derived line estimates when
    /// present.
    pub fn on_tool_result(
        &self,
        tool_name: &str,
        metadata: &HashMap<String, Value>,
    ) -> Option<PendingModification> {
        let mut modification = self
            .pending
            .lock()
            .unwrap()
            .get_mut(tool_name)?
            .pop_front()?;
        if let Some(added) = metadata.get("lines_added").and_then(Value::as_u64) {
            modification.lines_added = added as usize;
        }
        if let Some(removed) = metadata.get("lines_removed").and_then(Value::as_u64) {
            modification.lines_removed = removed as usize;
        }
        Some(modification)
    }

    /// An error result cancels the oldest pending call for that tool.
    pub fn on_tool_error(&self, tool_name: &str) -> Option<PendingModification> {
        self.pending.lock().unwrap().get_mut(tool_name)?.pop_front()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().values().map(VecDeque::len).sum()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn write_args(path: &str, content: &str) -> ToolArgs {
        let mut args = ToolArgs::new();
        args.insert("path".into(), Value::String(path.into()));
        args.insert("content".into(), Value::String(content.into()));
        args
    }

    #[test]
    fn call_then_result_commits_modification() {
        let t = FileModificationTracker::new();
        t.on_tool_call("write_file", &write_args("a.rs", "1\n2\n3")).unwrap();
        let m = t.on_tool_result("write_file", &HashMap::new()).unwrap();
        assert_eq!(m.path, "a.rs");
        assert_eq!(m.lines_added, 3);
        assert_eq!(t.pending_count(), 0);
    }

    #[test]
    fn error_result_cancels_pending_modification() {
        let t = FileModificationTracker::new();
        t.on_tool_call("write_file", &write_args("a.rs", "x")).unwrap();
        let canceled = t.on_tool_error("write_file").unwrap();
        assert_eq!(canceled.path, "a.rs");
        assert!(t.on_tool_result("write_file", &HashMap::new()).is_none());
    }

    #[test]
    fn fifo_order_per_tool_name() {
        let t = FileModificationTracker::new();
        let id1 = t.on_tool_call("write_file", &write_args("first.rs", "a")).unwrap();
        let id2 = t.on_tool_call("write_file", &write_args("second.rs", "b")).unwrap();
        assert!(id2 > id1, "call ids increase monotonically");
        assert_eq!(
            t.on_tool_result("write_file", &HashMap::new()).unwrap().path,
            "first.rs"
        );
        assert_eq!(
            t.on_tool_result("write_file", &HashMap::new()).unwrap().path,
            "second.rs"
        );
    }

    #[test]
    fn metadata_overrides_line_estimates() {
        let t = FileModificationTracker::new();
        t.on_tool_call("write_file", &write_args("a.rs", "x")).unwrap();
        let mut meta = HashMap::new();
        meta.insert("lines_added".to_string(), Value::from(7));
        meta.insert("lines_removed".to_string(), Value::from(4));
        let m = t.on_tool_result("write_file", &meta).unwrap();
        assert_eq!(m.lines_added, 7);
        assert_eq!(m.lines_removed, 4);
    }

    #[test]
    fn non_modifying_tools_not_tracked() {
        let t = FileModificationTracker::new();
        assert!(t.on_tool_call("read_file", &write_args("a.rs", "x")).is_none());
        assert!(t.on_tool_call("execute_command", &ToolArgs::new()).is_none());
        assert_eq!(t.pending_count(), 0);
    }

    #[test]
    fn result_without_call_is_ignored() {
        let t = FileModificationTracker::new();
        assert!(t.on_tool_result("write_file", &HashMap::new()).is_none());
        assert!(t.on_tool_error("apply_diff").is_none());
    }
}
