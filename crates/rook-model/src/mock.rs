// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{provider::ChunkStream, CompletionRequest, ModelInfo, ModelProvider, Role, StreamChunk};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "mock-model".into(),
            provider: "mock".into(),
            supports_streaming: true,
            max_tokens: 128_000,
            metadata: HashMap::new(),
        }
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn base_url(&self) -> &str {
        ""
    }

    fn api_key(&self) -> &str {
        ""
    }

    async fn stream_completion(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "[no input]".into());

        let chunks: Vec<anyhow::Result<StreamChunk>> = vec![
            Ok(StreamChunk::text(format!("MOCK: {reply}"))),
            Ok(StreamChunk::finished()),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// A pre-scripted mock provider.  Each call to `stream_completion` pops the
/// next chunk script from the front of the queue, so tests can specify exact
/// chunk sequences — including `<thinking>` and `<tool>` markup — without
/// network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<StreamChunk>>>>,
    /// The last `CompletionRequest` seen by this provider.
    /// Written on each call so tests can inspect the outbound window.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
    /// Every request seen, in order.
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedMockProvider {
    /// Build a provider from a list of chunk scripts.  The outer `Vec` is
    /// the ordered list of calls; the inner `Vec` is the chunk sequence
    /// emitted for that call.  A trailing finished chunk is appended when
    /// the script does not end with one.
    pub fn new(scripts: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![StreamChunk::text(reply.into())]])
    }

    /// Convenience: first call emits a tool block, second call plain text.
    ///
    /// The tool block follows the runtime's XML protocol; `args_xml` is the
    /// raw body of the `<arguments>` element.
    pub fn tool_then_text(
        tool_name: impl AsRef<str>,
        args_xml: impl AsRef<str>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![StreamChunk::text(tool_block(tool_name.as_ref(), args_xml.as_ref()))],
            vec![StreamChunk::text(final_text.into())],
        ])
    }
}

/// Render a `<tool>` block in the runtime's wire protocol.
pub fn tool_block(name: &str, args_xml: &str) -> String {
    format!(
        "<tool>\n<server>local</server>\n<name>{name}</name>\n<arguments>{args_xml}</arguments>\n</tool>"
    )
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "scripted-mock-model".into(),
            provider: "mock".into(),
            supports_streaming: true,
            max_tokens: 128_000,
            metadata: HashMap::new(),
        }
    }

    fn model(&self) -> &str {
        "scripted-mock-model"
    }

    fn base_url(&self) -> &str {
        ""
    }

    fn api_key(&self) -> &str {
        ""
    }

    async fn stream_completion(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream> {
        *self.last_request.lock().unwrap() = Some(req.clone());
        self.requests.lock().unwrap().push(req);
        let mut chunks = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                vec![StreamChunk::text("[no more scripts]")]
            } else {
                scripts.remove(0)
            }
        };
        if !chunks.last().map(|c| c.finished).unwrap_or(false) {
            chunks.push(StreamChunk::finished());
        }
        let wrapped: Vec<anyhow::Result<StreamChunk>> = chunks.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
