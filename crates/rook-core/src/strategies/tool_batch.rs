// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use rook_config::ToolBatchConfig;
use rook_model::{metadata, Message, ModelProvider, Role};

use crate::memory::ConversationMemory;
use crate::strategies::{prompts::CONTENT_SUMMARY_PROMPT, serialize_messages, SummarizationStrategy};

/// First-layer compaction: batches of old tool-call/tool-result pairs are
/// folded into a single first-person summary.
///
/// A pair is an assistant message immediately followed by its tool-role
/// result.  Adjacent pairs form atomic groups; any non-tool message between
/// pairs is a group boundary.  One batched model call summarises every
/// grouped message at once — an N-to-1 reduction in model calls that also
/// lets the summariser reason across the whole sequence.
pub struct ToolBatchStrategy {
    cfg: ToolBatchConfig,
}

impl ToolBatchStrategy {
    pub fn new(cfg: ToolBatchConfig) -> Self {
        Self { cfg }
    }

    /// Eligible (assistant_idx, tool_idx) pairs: both halves must be inside
    /// the "old" window, unsummarised, and adjacent.
    fn eligible_pairs(&self, snapshot: &[Arc<Message>]) -> Vec<(usize, usize)> {
        let len = snapshot.len();
        if len < self.cfg.messages_old_threshold {
            return Vec::new();
        }
        let bound = len - self.cfg.messages_old_threshold;
        let mut pairs = Vec::new();
        let mut i = 0;
        while i + 1 < len {
            let a = &snapshot[i];
            let b = &snapshot[i + 1];
            if a.role == Role::Assistant
                && !a.is_summarized()
                && b.role == Role::Tool
                && !b.is_summarized()
                && i + 1 <= bound
            {
                pairs.push((i, i + 1));
                i += 2;
            } else {
                i += 1;
            }
        }
        pairs
    }
}

#[async_trait]
impl SummarizationStrategy for ToolBatchStrategy {
    fn name(&self) -> &str {
        "tool_call_batch"
    }

    fn should_run(
        &self,
        memory: &ConversationMemory,
        _current_tokens: usize,
        _max_tokens: usize,
    ) -> bool {
        let snapshot = memory.snapshot();
        let pairs = self.eligible_pairs(&snapshot);
        let Some(&(oldest, _)) = pairs.first() else {
            return false;
        };
        if pairs.len() >= self.cfg.min_tool_calls {
            return true;
        }
        // Age trigger: the oldest buffered tool call has drifted far enough
        // from the end of memory.
        snapshot.len() - 1 - oldest >= self.cfg.max_tool_call_distance
    }

    async fn summarize(
        &self,
        memory: &ConversationMemory,
        provider: &dyn ModelProvider,
    ) -> anyhow::Result<usize> {
        let snapshot = memory.snapshot();
        let pairs = self.eligible_pairs(&snapshot);
        if pairs.is_empty() {
            return Ok(0);
        }

        let grouped: BTreeSet<usize> = pairs.iter().flat_map(|&(a, t)| [a, t]).collect();
        let first_grouped = *grouped.iter().next().expect("non-empty");

        // The nearest preceding user message anchors the summary to what the
        // human actually asked for.
        let user_goal = snapshot[..first_grouped]
            .iter()
            .rev()
            .find(|m| m.role == Role::User && !m.is_summarized())
            .map(|m| m.content.clone());

        let grouped_messages: Vec<Arc<Message>> = grouped
            .iter()
            .map(|&i| Arc::clone(&snapshot[i]))
            .collect();
        let mut request_text = String::new();
        if let Some(goal) = &user_goal {
            request_text.push_str(&format!("The user's goal: {goal}\n\n"));
        }
        request_text.push_str("Tool activity to summarise:\n\n");
        request_text.push_str(&serialize_messages(&grouped_messages));

        let reply = provider
            .complete(rook_model::CompletionRequest {
                messages: vec![
                    Message::system(CONTENT_SUMMARY_PROMPT),
                    Message::user(request_text),
                ],
            })
            .await?;
        if reply.content.trim().is_empty() {
            anyhow::bail!("summarization model returned an empty summary");
        }

        let summary = Arc::new(
            Message::assistant(reply.content)
                .with_meta(metadata::SUMMARIZED, true)
                .with_meta(metadata::SUMMARY_COUNT, grouped.len() as i64),
        );

        let mut rebuilt: Vec<Arc<Message>> = Vec::with_capacity(snapshot.len());
        for (i, msg) in snapshot.iter().enumerate() {
            if i == first_grouped {
                rebuilt.push(Arc::clone(&summary));
            }
            if !grouped.contains(&i) {
                rebuilt.push(Arc::clone(msg));
            }
        }
        memory.replace(rebuilt);
        debug!(replaced = grouped.len(), "tool-call batch summarization");
        Ok(grouped.len())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rook_model::ScriptedMockProvider;

    fn strategy(min_calls: usize, max_distance: usize, old_threshold: usize) -> ToolBatchStrategy {
        ToolBatchStrategy::new(ToolBatchConfig {
            min_tool_calls: min_calls,
            max_tool_call_distance: max_distance,
            messages_old_threshold: old_threshold,
        })
    }

    fn pair(n: usize) -> [Message; 2] {
        [
            Message::assistant(format!("<tool><name>read_file</name></tool> call {n}")),
            Message::tool(format!("result {n}")),
        ]
    }

    /// Memory: system, user goal, `pairs` tool pairs, then `tail` plain
    /// assistant messages.
    fn memory_with(pairs: usize, tail: usize) -> ConversationMemory {
        let mem = ConversationMemory::new();
        mem.add(Message::system("sys"));
        mem.add(Message::user("fix the parser"));
        for n in 0..pairs {
            mem.add_many(pair(n));
        }
        for n in 0..tail {
            mem.add(Message::assistant(format!("chatter {n}")));
        }
        mem
    }

    // ── Triggers ──────────────────────────────────────────────────────────────

    #[test]
    fn count_trigger_fires_at_min_tool_calls() {
        // 6 pairs (12 msgs) + 10 tail → len 24, threshold 10 → bound 14;
        // all 6 pairs are old.
        let mem = memory_with(6, 10);
        assert!(strategy(6, 1000, 10).should_run(&mem, 0, 0));
        assert!(!strategy(7, 1000, 10).should_run(&mem, 0, 0));
    }

    #[test]
    fn age_trigger_fires_on_distance() {
        // 1 old pair at index 2-3; len = 2 + 2 + 18 = 22 → distance from
        // oldest (2) to end (21) = 19.
        let mem = memory_with(1, 18);
        assert!(strategy(100, 19, 10).should_run(&mem, 0, 0));
        assert!(!strategy(100, 20, 10).should_run(&mem, 0, 0));
    }

    #[test]
    fn recent_pairs_are_not_eligible() {
        // Pairs land inside the recent window → nothing to do.
        let mem = memory_with(3, 0);
        assert!(!strategy(1, 1000, 20).should_run(&mem, 0, 0));
    }

    // ── Summarization ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn grouped_pairs_replaced_by_single_summary() {
        let mem = memory_with(5, 10);
        let before = mem.len();
        let provider = ScriptedMockProvider::always_text("## Milestones\nI read five files.");
        let changed = strategy(3, 1000, 10)
            .summarize(&mem, &provider)
            .await
            .unwrap();
        assert_eq!(changed, 10, "five pairs = ten messages replaced");
        assert_eq!(mem.len(), before - 10 + 1);

        let snap = mem.snapshot();
        let summaries: Vec<_> = snap.iter().filter(|m| m.is_summarized()).collect();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].content.contains("Milestones"));
        assert_eq!(
            summaries[0]
                .metadata
                .get(metadata::SUMMARY_COUNT)
                .and_then(serde_json::Value::as_i64),
            Some(10)
        );
    }

    #[tokio::test]
    async fn summary_inserted_at_first_grouped_position() {
        let mem = memory_with(5, 10);
        let provider = ScriptedMockProvider::always_text("summary");
        strategy(3, 1000, 10).summarize(&mem, &provider).await.unwrap();
        let snap = mem.snapshot();
        // system, user goal, then the summary where the first pair stood
        assert_eq!(snap[0].role, Role::System);
        assert_eq!(snap[1].role, Role::User);
        assert!(snap[2].is_summarized());
    }

    #[tokio::test]
    async fn user_goal_prepended_to_prompt() {
        let mem = memory_with(5, 10);
        let provider = ScriptedMockProvider::always_text("summary");
        strategy(3, 1000, 10).summarize(&mem, &provider).await.unwrap();
        let req = provider.last_request.lock().unwrap().clone().unwrap();
        let user_msg = &req.messages[1];
        assert!(user_msg.content.contains("fix the parser"));
        assert!(req.messages[0].content.contains("## Milestones"));
    }

    #[tokio::test]
    async fn user_and_system_messages_survive() {
        let mem = memory_with(5, 10);
        let users_before: Vec<String> = mem
            .snapshot()
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .collect();
        let provider = ScriptedMockProvider::always_text("summary");
        strategy(3, 1000, 10).summarize(&mem, &provider).await.unwrap();
        let snap = mem.snapshot();
        let users_after: Vec<String> = snap
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(users_before, users_after);
        assert_eq!(snap[0].role, Role::System);
    }

    #[tokio::test]
    async fn already_summarized_messages_skipped() {
        let mem = ConversationMemory::new();
        mem.add(Message::system("sys"));
        mem.add(
            Message::assistant("old summary").with_meta(metadata::SUMMARIZED, true),
        );
        mem.add(Message::tool("stray result"));
        for n in 0..20 {
            mem.add(Message::assistant(format!("tail {n}")));
        }
        let provider = ScriptedMockProvider::always_text("summary");
        let changed = strategy(1, 1, 5).summarize(&mem, &provider).await.unwrap();
        assert_eq!(changed, 0, "summarized assistant must not pair with a stray result");
    }

    #[tokio::test]
    async fn group_boundary_at_interleaved_message() {
        // pair, plain user message, pair → two groups, both summarised in
        // one call; the interleaved user message survives in place.
        let mem = ConversationMemory::new();
        mem.add(Message::system("sys"));
        mem.add_many(pair(0));
        mem.add(Message::user("interleaved"));
        mem.add_many(pair(1));
        for n in 0..20 {
            mem.add(Message::assistant(format!("tail {n}")));
        }
        let provider = ScriptedMockProvider::always_text("summary");
        let changed = strategy(2, 1000, 10).summarize(&mem, &provider).await.unwrap();
        assert_eq!(changed, 4);
        let snap = mem.snapshot();
        let interleaved_pos = snap.iter().position(|m| m.content == "interleaved");
        assert!(interleaved_pos.is_some(), "interleaved user message preserved");
    }

    #[tokio::test]
    async fn empty_model_reply_is_an_error_and_memory_untouched() {
        let mem = memory_with(5, 10);
        let before = mem.len();
        let provider = ScriptedMockProvider::always_text("");
        let result = strategy(3, 1000, 10).summarize(&mem, &provider).await;
        assert!(result.is_err());
        assert_eq!(mem.len(), before);
    }
}
