// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use rook_config::HalfCompactionConfig;
use rook_model::{metadata, Message, ModelProvider, Role};

use crate::memory::ConversationMemory;
use crate::strategies::{prompts::CONTENT_SUMMARY_PROMPT, serialize_messages, SummarizationStrategy};

/// Threshold-driven compaction: when context usage crosses the configured
/// percentage, the older half of the non-system history is folded into one
/// summary and the recent half survives verbatim.
///
/// The split floors, so on odd counts the recent half is the larger one.
/// User messages and goal-batch blocks in the older half are carried
/// verbatim (ahead of the summary); everything else in that half is the
/// summarised slice.
pub struct HalfCompactStrategy {
    cfg: HalfCompactionConfig,
}

impl HalfCompactStrategy {
    pub fn new(cfg: HalfCompactionConfig) -> Self {
        Self { cfg }
    }

    fn threshold(&self) -> f64 {
        self.cfg.threshold_percent.clamp(0.0, 100.0)
    }
}

#[async_trait]
impl SummarizationStrategy for HalfCompactStrategy {
    fn name(&self) -> &str {
        "threshold_half_compaction"
    }

    fn should_run(
        &self,
        memory: &ConversationMemory,
        current_tokens: usize,
        max_tokens: usize,
    ) -> bool {
        if max_tokens == 0 {
            return false;
        }
        let usage_percent = current_tokens as f64 * 100.0 / max_tokens as f64;
        if usage_percent < self.threshold() {
            return false;
        }
        let non_system = memory
            .snapshot()
            .iter()
            .filter(|m| m.role != Role::System)
            .count();
        non_system >= self.cfg.min_messages
    }

    async fn summarize(
        &self,
        memory: &ConversationMemory,
        provider: &dyn ModelProvider,
    ) -> anyhow::Result<usize> {
        let snapshot = memory.snapshot();
        let systems: Vec<Arc<Message>> = snapshot
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();
        let non_system: Vec<Arc<Message>> = snapshot
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();

        let split = non_system.len() / 2;
        let older = &non_system[..split];
        let recent = &non_system[split..];

        // User messages and goal-batch blocks survive verbatim; the rest of
        // the older half is the summarised slice.
        let (preserved, to_summarize): (Vec<Arc<Message>>, Vec<Arc<Message>>) = older
            .iter()
            .cloned()
            .partition(|m| m.role == Role::User || m.is_goal_batch());

        // Fewer than two summarisable messages cannot strictly reduce the
        // count; skip the model call entirely.
        if to_summarize.len() < 2 {
            return Ok(0);
        }

        let reply = provider
            .complete(rook_model::CompletionRequest {
                messages: vec![
                    Message::system(CONTENT_SUMMARY_PROMPT),
                    Message::user(format!(
                        "Conversation history to compress:\n\n{}",
                        serialize_messages(older)
                    )),
                ],
            })
            .await?;
        if reply.content.trim().is_empty() {
            anyhow::bail!("summarization model returned an empty summary");
        }

        let summary = Arc::new(
            Message::assistant(reply.content)
                .with_meta(metadata::SUMMARIZED, true)
                .with_meta(metadata::SUMMARY_COUNT, to_summarize.len() as i64),
        );

        let mut rebuilt = systems;
        rebuilt.extend(preserved);
        rebuilt.push(summary);
        rebuilt.extend(recent.iter().cloned());
        memory.replace(rebuilt);
        debug!(replaced = to_summarize.len(), "threshold half-compaction");
        Ok(to_summarize.len())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
