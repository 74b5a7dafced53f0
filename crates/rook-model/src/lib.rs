// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod mock;
mod openai;
mod provider;
mod tokens;
mod types;

pub use mock::{tool_block, MockProvider, ScriptedMockProvider};
pub use openai::OpenAiProvider;
pub use provider::{ChunkStream, ModelProvider};
pub use tokens::{ApproxTokenCounter, TokenCounter};
pub use types::{
    metadata, ChunkKind, CompletionRequest, Message, ModelInfo, Role, StreamChunk, Usage,
};

use std::sync::Arc;

/// Build a provider from the model section of the configuration.
pub fn from_config(cfg: &rook_config::ModelConfig) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match cfg.provider.as_str() {
        "mock" => Ok(Arc::new(MockProvider)),
        _ => Ok(Arc::new(OpenAiProvider::from_config(cfg)?)),
    }
}
