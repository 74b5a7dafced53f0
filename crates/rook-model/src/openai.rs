// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    provider::ChunkStream, ChunkKind, CompletionRequest, ModelInfo, ModelProvider, Role,
    StreamChunk,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Streaming driver for any OpenAI-compatible chat-completions endpoint
/// (OpenAI, OpenRouter, LiteLLM, llama.cpp server, vLLM).
///
/// Thinking content arrives as `reasoning_content` deltas on servers that
/// separate it; everything else is ordinary message content and goes through
/// the runtime's stream parsers downstream.
pub struct OpenAiProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    temperature: Option<f32>,
    max_context_tokens: usize,
}

impl OpenAiProvider {
    pub fn from_config(cfg: &rook_config::ModelConfig) -> anyhow::Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .or_else(|| {
                cfg.api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
            })
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        Ok(Self {
            client: reqwest::Client::new(),
            model: cfg.name.clone(),
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            temperature: cfg.temperature,
            max_context_tokens: cfg.max_context_tokens.unwrap_or(128_000),
        })
    }

    fn request_body(&self, req: &CompletionRequest) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| {
                json!({
                    // The wire protocol has no distinct tool role in this
                    // driver; the window builder remaps before we get here,
                    // this is the backstop for direct callers.
                    "role": wire_role(m.role),
                    "content": m.content,
                })
            })
            .collect();
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::Tool => "user",
        other => other.as_str(),
    }
}

struct SseState {
    inner: BoxStream<'static, anyhow::Result<Vec<u8>>>,
    buf: String,
    queue: VecDeque<StreamChunk>,
    done: bool,
}

impl SseState {
    /// Split complete SSE lines out of the buffer into queued chunks.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf[..pos].trim_end_matches('\r').to_string();
            self.buf.drain(..=pos);
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload == "[DONE]" {
                self.queue.push_back(StreamChunk::finished());
                self.done = true;
                return;
            }
            match serde_json::from_str::<Value>(payload) {
                Ok(v) => self.queue_delta(&v),
                Err(e) => {
                    warn!("undecodable SSE payload: {e}");
                    self.queue.push_back(StreamChunk {
                        error: Some(format!("undecodable stream payload: {e}")),
                        ..Default::default()
                    });
                }
            }
        }
    }

    fn queue_delta(&mut self, v: &Value) {
        let delta = &v["choices"][0]["delta"];
        if let Some(reasoning) = delta["reasoning_content"].as_str() {
            if !reasoning.is_empty() {
                self.queue.push_back(StreamChunk {
                    role: Some(Role::Assistant),
                    content: reasoning.to_string(),
                    kind: ChunkKind::Thinking,
                    ..Default::default()
                });
            }
        }
        if let Some(content) = delta["content"].as_str() {
            if !content.is_empty() {
                self.queue.push_back(StreamChunk {
                    role: Some(Role::Assistant),
                    content: content.to_string(),
                    ..Default::default()
                });
            }
        }
        if v["choices"][0]["finish_reason"].as_str().is_some() {
            self.queue.push_back(StreamChunk::finished());
            self.done = true;
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.model.clone(),
            provider: "openai".into(),
            supports_streaming: true,
            max_tokens: self.max_context_tokens,
            metadata: HashMap::new(),
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_key(&self) -> &str {
        &self.api_key
    }

    async fn stream_completion(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&req))
            .send()
            .await
            .context("sending completion request")?;

        let resp = match resp.error_for_status() {
            Ok(r) => r,
            Err(e) => anyhow::bail!("completion request failed: {e}"),
        };

        let bytes = resp
            .bytes_stream()
            .map(|r| r.map(|b| b.to_vec()).map_err(anyhow::Error::from))
            .boxed();

        let state = SseState {
            inner: bytes,
            buf: String::new(),
            queue: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(chunk) = st.queue.pop_front() {
                    return Some((Ok(chunk), st));
                }
                if st.done {
                    return None;
                }
                match st.inner.next().await {
                    // Transport ended without [DONE]; close the stream cleanly
                    None => {
                        st.done = true;
                        return Some((Ok(StreamChunk::finished()), st));
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((Err(e.context("reading completion stream")), st));
                    }
                    Some(Ok(bytes)) => {
                        st.buf.push_str(&String::from_utf8_lossy(&bytes));
                        st.drain_lines();
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn clone_with_model(&self, name: &str) -> Option<Arc<dyn ModelProvider>> {
        Some(Arc::new(Self {
            client: self.client.clone(),
            model: name.to_string(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            temperature: self.temperature,
            max_context_tokens: self.max_context_tokens,
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
