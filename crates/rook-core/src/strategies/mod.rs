// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod goal_batch;
mod half_compact;
pub mod prompts;
mod tool_batch;

pub use goal_batch::GoalBatchStrategy;
pub use half_compact::HalfCompactStrategy;
pub use tool_batch::ToolBatchStrategy;

use std::sync::Arc;

use async_trait::async_trait;

use rook_model::{Message, ModelProvider, Role};

use crate::memory::ConversationMemory;

/// A pluggable memory-compaction policy.
///
/// The context manager chains strategies in registration order; each one
/// decides independently whether it should run and rewrites memory in place
/// via [`ConversationMemory::replace`].  Shared invariants every strategy
/// honours: system messages stay a prefix and are never removed, and summary
/// blocks carry `summarized = true` metadata.
#[async_trait]
pub trait SummarizationStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn should_run(
        &self,
        memory: &ConversationMemory,
        current_tokens: usize,
        max_tokens: usize,
    ) -> bool;

    /// Rewrite memory; returns the number of items it changed (messages
    /// summarised away, or turns batched) so observers can report progress.
    async fn summarize(
        &self,
        memory: &ConversationMemory,
        provider: &dyn ModelProvider,
    ) -> anyhow::Result<usize>;
}

/// Serialise messages into plain text for inclusion in a summary prompt.
pub(crate) fn serialize_messages(messages: &[Arc<Message>]) -> String {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            };
            format!("{role}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
