// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde_json::Value;

use rook_model::Usage;
use rook_tools::ToolArgs;

/// Events emitted by the agent during a turn.
///
/// Consumers (interactive driver, headless runner) subscribe to these to
/// drive their output.  Within a turn events arrive in causal order;
/// `UpdateBusy(true)` precedes the first iteration event, `UpdateBusy(false)`
/// follows the last, and `TurnEnd` is always the final event of the turn.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    // ── Streamed model output ────────────────────────────────────────────────
    ThinkingStart,
    ThinkingContent(String),
    ThinkingEnd,
    MessageStart,
    MessageContent(String),
    MessageEnd,
    ToolCallStart,
    ToolCallContent(String),
    ToolCallEnd,

    // ── Tool dispatch ────────────────────────────────────────────────────────
    /// Aggregated tool call, emitted after approval and before execution
    ToolCall {
        server_name: String,
        tool_name: String,
        input: ToolArgs,
    },
    ToolResult {
        tool_name: String,
        output: String,
        metadata: HashMap<String, Value>,
    },
    ToolResultError {
        tool_name: String,
        error: String,
    },
    /// The model produced a final message with no tool call; the turn ends
    NoToolCall,

    // ── Model call lifecycle ─────────────────────────────────────────────────
    ApiCallStart,
    ApiCallEnd,
    TokenUsage(Usage),

    // ── Agent lifecycle ──────────────────────────────────────────────────────
    /// The registered tool set changed
    ToolsUpdate { tools: Vec<String> },
    UpdateBusy(bool),
    TurnEnd,
    /// A recoverable error occurred
    Error(String),

    // ── Approval protocol ────────────────────────────────────────────────────
    ApprovalRequest {
        approval_id: String,
        tool_name: String,
        input: ToolArgs,
        preview: String,
    },
    ApprovalTimeout {
        approval_id: String,
        tool_name: String,
    },
    ApprovalGranted {
        tool_name: String,
    },
    ApprovalRejected {
        tool_name: String,
    },

    // ── Command execution streaming ──────────────────────────────────────────
    CommandExecutionStart {
        execution_id: String,
        command: String,
        working_dir: String,
    },
    CommandExecutionOutput {
        execution_id: String,
        stream: String,
        chunk: String,
    },
    CommandExecutionComplete {
        execution_id: String,
        exit_code: i32,
        duration_ms: u64,
    },
    CommandExecutionFailed {
        execution_id: String,
        error: String,
        duration_ms: u64,
    },
    CommandExecutionCanceled {
        execution_id: String,
    },

    // ── Context summarization ────────────────────────────────────────────────
    SummarizationStart {
        strategy: String,
        current_tokens: usize,
        max_tokens: usize,
    },
    SummarizationProgress {
        strategy: String,
        items_processed: usize,
        total_items: usize,
    },
    SummarizationComplete {
        strategy: String,
        new_token_count: usize,
        tokens_saved: i64,
        items_processed: usize,
        duration_ms: u64,
    },
    SummarizationError {
        strategy: String,
        error: String,
    },

    // ── Notes bridge ─────────────────────────────────────────────────────────
    /// Reply to an [`InputEvent::NotesRequest`]
    NotesData(Value),
}

/// Inputs consumed by the agent loop.
#[derive(Debug, Clone)]
pub enum InputEvent {
    /// Interrupt the current turn at the earliest safe point
    Cancel,
    UserInput(String),
    /// Structured form submission; rendered into a user message
    FormInput(HashMap<String, String>),
    /// Request notes from the external notes manager; answered via
    /// [`AgentEvent::NotesData`]
    NotesRequest {
        tag: String,
        include_scratched: bool,
        limit: usize,
    },
}
