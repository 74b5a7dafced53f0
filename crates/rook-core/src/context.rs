// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use rook_model::{ApproxTokenCounter, ModelProvider, Role, TokenCounter, Usage};

use crate::events::AgentEvent;
use crate::memory::ConversationMemory;
use crate::strategies::SummarizationStrategy;

/// Snapshot of the agent's token accounting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextInfo {
    pub system_prompt_tokens: usize,
    pub custom_instructions: bool,
    pub repository_context_tokens: usize,
    pub tool_count: usize,
    pub tool_tokens: usize,
    pub tool_names: Vec<String>,
    pub message_count: usize,
    pub conversation_turns: usize,
    pub conversation_tokens: usize,
    pub raw_message_count: usize,
    pub raw_message_tokens: usize,
    pub summary_block_count: usize,
    pub summary_block_tokens: usize,
    pub goal_batch_block_count: usize,
    pub goal_batch_block_tokens: usize,
    pub current_context_tokens: usize,
    pub max_context_tokens: usize,
    pub free_tokens: usize,
    pub usage_percent: f64,
    pub total_prompt_tokens: usize,
    pub total_completion_tokens: usize,
    pub total_tokens: usize,
}

/// Chains summarization strategies and owns token accounting.
///
/// Strategies run in registration order; tokens are recounted after each so
/// later strategies see the effect of earlier ones.  Summarization calls may
/// run on a cheaper model via the provider's clone capability.
pub struct ContextManager {
    strategies: Vec<Arc<dyn SummarizationStrategy>>,
    counter: Arc<dyn TokenCounter>,
    max_tokens: usize,
    summarization_model: RwLock<Option<String>>,
}

impl ContextManager {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            strategies: Vec::new(),
            counter: Arc::new(ApproxTokenCounter),
            max_tokens,
            summarization_model: RwLock::new(None),
        }
    }

    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn register(&mut self, strategy: Arc<dyn SummarizationStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Summarization model override; applied when the provider can clone
    /// itself.  `None` clears the override.
    pub fn set_summarization_model(&self, model: Option<String>) {
        *self.summarization_model.write().unwrap() = model;
    }

    pub fn count_tokens(&self, memory: &ConversationMemory) -> usize {
        memory
            .snapshot()
            .iter()
            .map(|m| self.counter.count_message(m))
            .sum()
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Quick gate checked before every model call.
    pub fn should_summarize(&self, memory: &ConversationMemory) -> bool {
        let current = self.count_tokens(memory);
        self.strategies
            .iter()
            .any(|s| s.should_run(memory, current, self.max_tokens))
    }

    /// Run every strategy whose trigger fires, in order, emitting progress
    /// events.  A failing strategy is reported and skipped; the chain
    /// continues so one bad model call cannot wedge context maintenance.
    pub async fn summarize(
        &self,
        memory: &ConversationMemory,
        provider: Arc<dyn ModelProvider>,
        events: &mpsc::Sender<AgentEvent>,
    ) -> usize {
        let provider = self.summarization_provider(provider);
        let mut current = self.count_tokens(memory);
        let mut total_changed = 0;
        let total_strategies = self.strategies.len();

        for (index, strategy) in self.strategies.iter().enumerate() {
            if !strategy.should_run(memory, current, self.max_tokens) {
                continue;
            }
            let _ = events
                .send(AgentEvent::SummarizationStart {
                    strategy: strategy.name().to_string(),
                    current_tokens: current,
                    max_tokens: self.max_tokens,
                })
                .await;
            let _ = events
                .send(AgentEvent::SummarizationProgress {
                    strategy: strategy.name().to_string(),
                    items_processed: index,
                    total_items: total_strategies,
                })
                .await;
            let started = Instant::now();
            match strategy.summarize(memory, provider.as_ref()).await {
                Ok(items) => {
                    let new_count = self.count_tokens(memory);
                    let _ = events
                        .send(AgentEvent::SummarizationComplete {
                            strategy: strategy.name().to_string(),
                            new_token_count: new_count,
                            tokens_saved: current as i64 - new_count as i64,
                            items_processed: items,
                            duration_ms: started.elapsed().as_millis() as u64,
                        })
                        .await;
                    current = new_count;
                    total_changed += items;
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), "summarization failed: {e:#}");
                    let _ = events
                        .send(AgentEvent::SummarizationError {
                            strategy: strategy.name().to_string(),
                            error: format!("{e:#}"),
                        })
                        .await;
                }
            }
        }
        total_changed
    }

    fn summarization_provider(&self, provider: Arc<dyn ModelProvider>) -> Arc<dyn ModelProvider> {
        let model = self.summarization_model.read().unwrap().clone();
        match model {
            Some(name) => provider.clone_with_model(&name).unwrap_or(provider),
            None => provider,
        }
    }

    /// Assemble the full accounting snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn context_info(
        &self,
        memory: &ConversationMemory,
        system_prompt: &str,
        custom_instructions: bool,
        repository_context: Option<&str>,
        tool_names: Vec<String>,
        tool_tokens: usize,
        usage: Usage,
    ) -> ContextInfo {
        let snapshot = memory.snapshot();
        let mut info = ContextInfo {
            system_prompt_tokens: self.counter.count_text(system_prompt),
            custom_instructions,
            repository_context_tokens: repository_context
                .map(|c| self.counter.count_text(c))
                .unwrap_or(0),
            tool_count: tool_names.len(),
            tool_tokens,
            tool_names,
            message_count: snapshot.len(),
            max_context_tokens: self.max_tokens,
            total_prompt_tokens: usage.prompt_tokens,
            total_completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            ..Default::default()
        };

        for msg in &snapshot {
            let tokens = self.counter.count_message(msg);
            if msg.role == Role::User {
                info.conversation_turns += 1;
            }
            if msg.role != Role::System {
                info.conversation_tokens += tokens;
            }
            if msg.is_goal_batch() {
                info.goal_batch_block_count += 1;
                info.goal_batch_block_tokens += tokens;
            } else if msg.is_summarized() {
                info.summary_block_count += 1;
                info.summary_block_tokens += tokens;
            } else {
                info.raw_message_count += 1;
                info.raw_message_tokens += tokens;
            }
            info.current_context_tokens += tokens;
        }
        info.current_context_tokens += info.system_prompt_tokens + info.tool_tokens;
        info.free_tokens = info
            .max_context_tokens
            .saturating_sub(info.current_context_tokens);
        if info.max_context_tokens > 0 {
            info.usage_percent =
                info.current_context_tokens as f64 * 100.0 / info.max_context_tokens as f64;
        }
        info
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
