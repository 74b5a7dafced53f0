// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use rook_config::GoalBatchConfig;
use rook_model::{metadata, Message, ModelProvider, Role};

use crate::memory::ConversationMemory;
use crate::strategies::{prompts::GOAL_BATCH_PROMPT, serialize_messages, SummarizationStrategy};

/// Second-layer compaction: several complete turns — a user goal followed by
/// its first-layer summary blocks — collapse into one `[GOAL BATCH]` message.
///
/// Goal batches carry `summary_type = "goal_batch"` and are exempt from
/// re-compaction as regular summaries, so the layers never chase each other.
/// In-progress turns, prior goal batches, and everything in the recent
/// window pass through untouched.
pub struct GoalBatchStrategy {
    cfg: GoalBatchConfig,
}

impl GoalBatchStrategy {
    pub fn new(cfg: GoalBatchConfig) -> Self {
        Self { cfg }
    }

    /// Complete turns fully inside the eligible window, as `start..end`
    /// index ranges.  A complete turn is an unsummarised user message
    /// followed by one or more adjacent regular summary blocks, up to the
    /// next user message.
    fn complete_turns(&self, snapshot: &[Arc<Message>]) -> Vec<(usize, usize)> {
        let len = snapshot.len();
        let window = len.saturating_sub(self.cfg.min_messages_old_threshold);
        let mut turns = Vec::new();
        let mut i = 0;
        while i < window {
            let msg = &snapshot[i];
            if msg.role == Role::User && !msg.is_summarized() {
                let mut j = i + 1;
                while j < len && snapshot[j].is_regular_summary() {
                    j += 1;
                }
                if j > i + 1 && j <= window {
                    turns.push((i, j));
                    i = j;
                    continue;
                }
            }
            i += 1;
        }
        turns
    }
}

#[async_trait]
impl SummarizationStrategy for GoalBatchStrategy {
    fn name(&self) -> &str {
        "goal_batch"
    }

    fn should_run(
        &self,
        memory: &ConversationMemory,
        _current_tokens: usize,
        _max_tokens: usize,
    ) -> bool {
        self.complete_turns(&memory.snapshot()).len() >= self.cfg.min_turns_to_compact
    }

    async fn summarize(
        &self,
        memory: &ConversationMemory,
        provider: &dyn ModelProvider,
    ) -> anyhow::Result<usize> {
        let snapshot = memory.snapshot();
        let turns = self.complete_turns(&snapshot);
        if turns.len() < self.cfg.min_turns_to_compact {
            return Ok(0);
        }
        let batch = &turns[..turns.len().min(self.cfg.max_turns_per_batch)];

        let batched: BTreeSet<usize> = batch.iter().flat_map(|&(s, e)| s..e).collect();
        let first_batched = *batched.iter().next().expect("non-empty batch");

        let mut episodes = String::new();
        for (n, &(s, e)) in batch.iter().enumerate() {
            let members: Vec<Arc<Message>> =
                snapshot[s..e].iter().map(Arc::clone).collect();
            episodes.push_str(&format!("### Episode {}\n\n", n + 1));
            episodes.push_str(&serialize_messages(&members));
            episodes.push_str("\n\n");
        }

        let reply = provider
            .complete(rook_model::CompletionRequest {
                messages: vec![
                    Message::system(GOAL_BATCH_PROMPT),
                    Message::user(format!("Episodes to consolidate:\n\n{episodes}")),
                ],
            })
            .await?;
        if reply.content.trim().is_empty() {
            anyhow::bail!("summarization model returned an empty goal batch");
        }

        let block = Arc::new(
            Message::assistant(format!("[GOAL BATCH] {}", reply.content))
                .with_meta(metadata::SUMMARIZED, true)
                .with_meta(metadata::SUMMARY_TYPE, metadata::GOAL_BATCH)
                .with_meta(metadata::SUMMARY_COUNT, batch.len() as i64),
        );

        let mut rebuilt: Vec<Arc<Message>> = Vec::with_capacity(snapshot.len());
        for (i, msg) in snapshot.iter().enumerate() {
            if i == first_batched {
                rebuilt.push(Arc::clone(&block));
            }
            if !batched.contains(&i) {
                rebuilt.push(Arc::clone(msg));
            }
        }
        memory.replace(rebuilt);
        debug!(turns = batch.len(), "goal-batch compaction");
        Ok(batch.len())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rook_model::ScriptedMockProvider;

    fn strategy(min_turns: usize, max_per_batch: usize, old_threshold: usize) -> GoalBatchStrategy {
        GoalBatchStrategy::new(GoalBatchConfig {
            min_turns_to_compact: min_turns,
            max_turns_per_batch: max_per_batch,
            min_messages_old_threshold: old_threshold,
        })
    }

    fn summary(text: &str) -> Message {
        Message::assistant(text).with_meta(metadata::SUMMARIZED, true)
    }

    /// Three complete turns followed by six recent messages.
    fn layered_memory() -> ConversationMemory {
        let mem = ConversationMemory::new();
        mem.add(Message::user("g1"));
        mem.add(summary("s1"));
        mem.add(Message::user("g2"));
        mem.add(summary("s2"));
        mem.add(Message::user("g3"));
        mem.add(summary("s3"));
        for n in 0..6 {
            mem.add(Message::assistant(format!("recent {n}")));
        }
        mem
    }

    // ── Turn detection ────────────────────────────────────────────────────────

    #[test]
    fn detects_three_complete_turns() {
        let mem = layered_memory();
        let s = strategy(3, 6, 5);
        assert_eq!(s.complete_turns(&mem.snapshot()).len(), 3);
        assert!(s.should_run(&mem, 0, 0));
    }

    #[test]
    fn incomplete_turn_not_counted() {
        let mem = ConversationMemory::new();
        mem.add(Message::user("g1"));
        mem.add(summary("s1"));
        mem.add(Message::user("g2"));
        mem.add(Message::assistant("plain reply, not a summary"));
        for n in 0..6 {
            mem.add(Message::assistant(format!("recent {n}")));
        }
        let s = strategy(1, 6, 2);
        assert_eq!(s.complete_turns(&mem.snapshot()).len(), 1);
    }

    #[test]
    fn goal_batch_blocks_do_not_form_turns() {
        let mem = ConversationMemory::new();
        mem.add(Message::user("g1"));
        mem.add(
            Message::assistant("[GOAL BATCH] old arc")
                .with_meta(metadata::SUMMARIZED, true)
                .with_meta(metadata::SUMMARY_TYPE, metadata::GOAL_BATCH),
        );
        for n in 0..6 {
            mem.add(Message::assistant(format!("recent {n}")));
        }
        let s = strategy(1, 6, 2);
        assert!(s.complete_turns(&mem.snapshot()).is_empty());
    }

    #[test]
    fn turns_in_recent_window_not_counted() {
        let mem = ConversationMemory::new();
        mem.add(Message::user("g1"));
        mem.add(summary("s1"));
        // Window excludes everything: threshold larger than memory.
        let s = strategy(1, 6, 10);
        assert!(!s.should_run(&mem, 0, 0));
    }

    #[test]
    fn multi_summary_turn_is_one_turn() {
        let mem = ConversationMemory::new();
        mem.add(Message::user("g1"));
        mem.add(summary("s1a"));
        mem.add(summary("s1b"));
        for n in 0..6 {
            mem.add(Message::assistant(format!("recent {n}")));
        }
        let s = strategy(1, 6, 5);
        let turns = s.complete_turns(&mem.snapshot());
        assert_eq!(turns, vec![(0, 3)]);
    }

    // ── Compaction ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn spec_shape_collapses_to_one_goal_batch() {
        let mem = layered_memory();
        let provider = ScriptedMockProvider::always_text("## Goal Arc\nthree goals");
        let changed = strategy(3, 6, 5).summarize(&mem, &provider).await.unwrap();
        assert_eq!(changed, 3, "three turns batched");

        let snap = mem.snapshot();
        assert_eq!(snap.len(), 7, "one goal batch + six recent");
        assert!(snap[0].content.starts_with("[GOAL BATCH]"));
        assert!(snap[0].is_goal_batch());
        for (i, m) in snap.iter().skip(1).enumerate() {
            assert_eq!(m.content, format!("recent {i}"));
        }
        assert!(
            !snap.iter().any(|m| m.role == Role::User),
            "batched goal messages are consumed"
        );
    }

    #[tokio::test]
    async fn prior_goal_batches_preserved() {
        let mem = ConversationMemory::new();
        mem.add(
            Message::assistant("[GOAL BATCH] earlier arc")
                .with_meta(metadata::SUMMARIZED, true)
                .with_meta(metadata::SUMMARY_TYPE, metadata::GOAL_BATCH),
        );
        mem.add(Message::user("g1"));
        mem.add(summary("s1"));
        mem.add(Message::user("g2"));
        mem.add(summary("s2"));
        mem.add(Message::user("g3"));
        mem.add(summary("s3"));
        for n in 0..6 {
            mem.add(Message::assistant(format!("recent {n}")));
        }
        let provider = ScriptedMockProvider::always_text("arc");
        strategy(3, 6, 5).summarize(&mem, &provider).await.unwrap();
        let snap = mem.snapshot();
        let batches: Vec<_> = snap.iter().filter(|m| m.is_goal_batch()).collect();
        assert_eq!(batches.len(), 2, "old and new goal batches coexist");
        assert!(batches[0].content.contains("earlier arc"));
    }

    #[tokio::test]
    async fn max_turns_per_batch_bounds_the_batch() {
        let mem = ConversationMemory::new();
        for n in 0..5 {
            mem.add(Message::user(format!("g{n}")));
            mem.add(summary(&format!("s{n}")));
        }
        for n in 0..6 {
            mem.add(Message::assistant(format!("recent {n}")));
        }
        let provider = ScriptedMockProvider::always_text("arc");
        let changed = strategy(3, 2, 5).summarize(&mem, &provider).await.unwrap();
        assert_eq!(changed, 2, "batch bounded to two oldest turns");
        let snap = mem.snapshot();
        // The remaining three turns survive untouched.
        let users: Vec<_> = snap.iter().filter(|m| m.role == Role::User).collect();
        assert_eq!(users.len(), 3);
        assert_eq!(users[0].content, "g2");
    }

    #[tokio::test]
    async fn below_min_turns_is_a_noop() {
        let mem = ConversationMemory::new();
        mem.add(Message::user("g1"));
        mem.add(summary("s1"));
        for n in 0..6 {
            mem.add(Message::assistant(format!("recent {n}")));
        }
        let before = mem.len();
        let provider = ScriptedMockProvider::always_text("arc");
        let changed = strategy(3, 6, 5).summarize(&mem, &provider).await.unwrap();
        assert_eq!(changed, 0);
        assert_eq!(mem.len(), before);
    }

    #[tokio::test]
    async fn prompt_contains_all_batched_episodes() {
        let mem = layered_memory();
        let provider = ScriptedMockProvider::always_text("arc");
        strategy(3, 6, 5).summarize(&mem, &provider).await.unwrap();
        let req = provider.last_request.lock().unwrap().clone().unwrap();
        let body = &req.messages[1].content;
        for text in ["g1", "g2", "g3", "s1", "s2", "s3"] {
            assert!(body.contains(text), "episode text {text:?} missing from prompt");
        }
        assert!(req.messages[0].content.contains("## Goal Arc"));
    }
}
