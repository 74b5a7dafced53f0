// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::{ChunkKind, CompletionRequest, Message, ModelInfo, StreamChunk};

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Static facts about this provider/model pair.
    fn model_info(&self) -> ModelInfo;

    /// Model identifier as sent on the wire.
    fn model(&self) -> &str;

    fn base_url(&self) -> &str;

    fn api_key(&self) -> &str;

    /// Send a completion request and return a stream of classified chunks.
    ///
    /// Cancellation is cooperative: dropping the stream aborts the request.
    async fn stream_completion(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream>;

    /// Convenience wrapper: drain the stream and collect the assistant reply.
    ///
    /// Thinking chunks are discarded; a mid-stream error chunk aborts with
    /// that error so callers never see a silently truncated reply.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<Message> {
        let mut stream = self.stream_completion(req).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(err) = chunk.error {
                anyhow::bail!("model stream error: {err}");
            }
            if chunk.kind == ChunkKind::Message {
                text.push_str(&chunk.content);
            }
            if chunk.finished {
                break;
            }
        }
        Ok(Message::assistant(text))
    }

    /// Lightweight per-call model override sharing transport and credentials.
    ///
    /// Returns `None` when the provider cannot clone itself; callers fall
    /// back to the original provider.
    fn clone_with_model(&self, _name: &str) -> Option<Arc<dyn ModelProvider>> {
        None
    }
}
