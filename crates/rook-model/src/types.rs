// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata keys the runtime attaches to messages.
///
/// Summarization reads and writes these; everything else treats metadata as
/// an opaque bag.
pub mod metadata {
    /// `bool` — this message is a compressed summary of dropped messages
    pub const SUMMARIZED: &str = "summarized";
    /// `string` — discriminates summary layers; see [`GOAL_BATCH`]
    pub const SUMMARY_TYPE: &str = "summary_type";
    /// `int` — how many messages this summary replaced
    pub const SUMMARY_COUNT: &str = "summary_count";
    /// The `summary_type` value marking a second-layer goal batch.
    /// Goal batches are exempt from re-compaction as regular summaries.
    pub const GOAL_BATCH: &str = "goal_batch";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in the conversation history.
///
/// Messages are never mutated after they enter memory; summarization builds
/// replacement messages instead.  Memory hands out `Arc<Message>` handles so
/// two messages with equal content remain distinguishable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: text.into(), metadata: HashMap::new() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: text.into(), metadata: HashMap::new() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: text.into(), metadata: HashMap::new() }
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self { role: Role::Tool, content: text.into(), metadata: HashMap::new() }
    }

    /// Builder-style metadata attachment.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True when this message is any kind of summary block.
    pub fn is_summarized(&self) -> bool {
        self.metadata
            .get(metadata::SUMMARIZED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn summary_type(&self) -> Option<&str> {
        self.metadata.get(metadata::SUMMARY_TYPE).and_then(Value::as_str)
    }

    /// True for second-layer goal-batch blocks, which regular summarization
    /// must pass over untouched.
    pub fn is_goal_batch(&self) -> bool {
        self.summary_type() == Some(metadata::GOAL_BATCH)
    }

    /// True for first-layer summaries (eligible for goal batching).
    pub fn is_regular_summary(&self) -> bool {
        self.is_summarized() && !self.is_goal_batch()
    }

    /// Approximate token count used when no tokenizer is available.
    pub fn approx_tokens(&self) -> usize {
        (self.content.len() + self.role.as_str().len() + 12) / 4
    }
}

/// Classification of a streamed chunk's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkKind {
    /// Reasoning content; rendered dimmed, never part of the reply
    Thinking,
    /// Ordinary assistant output (may contain an embedded tool block)
    #[default]
    Message,
}

/// A single streamed event from the model.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub role: Option<Role>,
    pub content: String,
    pub kind: ChunkKind,
    /// Final chunk of the stream
    pub finished: bool,
    /// Recoverable decode/transport error reported mid-stream
    pub error: Option<String>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), ..Default::default() }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self { content: content.into(), kind: ChunkKind::Thinking, ..Default::default() }
    }

    pub fn finished() -> Self {
        Self { finished: true, ..Default::default() }
    }
}

/// Static facts about the provider/model pair behind a [`crate::ModelProvider`].
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    pub supports_streaming: bool,
    pub max_tokens: usize,
    pub metadata: HashMap<String, Value>,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
}

/// Token usage accumulated from one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
