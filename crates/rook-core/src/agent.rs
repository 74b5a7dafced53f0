// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rook_config::Config;
use rook_model::{
    ChunkKind, ChunkStream, CompletionRequest, Message, ModelProvider, Role, Usage,
};
use rook_tools::{
    parse_arguments, parse_tool_block, ApplyDiffTool, AskQuestionTool, ConverseTool,
    ExecuteCommandTool, ExecutionContext, ListDirectoryTool, ReadFileTool, RegistryError,
    TaskCompletionTool, Tool, ToolArgs, ToolEvent, ToolOutput, ToolPolicy, ToolRegistry,
    WriteFileTool,
};

use crate::approval::{ApprovalManager, ApprovalResponse};
use crate::context::{ContextInfo, ContextManager};
use crate::events::{AgentEvent, InputEvent};
use crate::memory::ConversationMemory;
use crate::parser::{ClassifiedText, ThinkingParser, ToolBlockEvent, ToolBlockParser};
use crate::prompts::{system_prompt, PromptContext};
use crate::strategies::{GoalBatchStrategy, HalfCompactStrategy, ToolBatchStrategy};

/// Ring capacity for ephemeral iteration errors fed back into the next
/// model call.
const ERROR_RING_CAPACITY: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent is already running")]
    AlreadyRunning,
}

/// External notes store consulted for [`InputEvent::NotesRequest`].
pub trait NotesProvider: Send + Sync {
    fn notes(&self, tag: &str, include_scratched: bool, limit: usize) -> Value;
}

/// The driver's side of the agent's channels.
///
/// There is exactly one event receiver; whoever takes these handles is the
/// observer and must drain events, or the loop backpressures.
pub struct AgentChannels {
    pub events: mpsc::Receiver<AgentEvent>,
    pub input: mpsc::Sender<InputEvent>,
    pub approvals: mpsc::Sender<ApprovalResponse>,
    pub cancel: mpsc::Sender<()>,
}

enum IterationOutcome {
    Continue,
    EndTurn,
}

/// Per-stream bookkeeping for thinking / message / tool-call segment events.
#[derive(Default)]
struct SegmentState {
    thinking_open: bool,
    message_open: bool,
    toolcall_open: bool,
}

struct LoopInputs {
    input_rx: mpsc::Receiver<InputEvent>,
    approval_rx: mpsc::Receiver<ApprovalResponse>,
    cancel_rx: mpsc::Receiver<()>,
}

/// The turn-driven agent.
///
/// A single-writer event loop serialises user input, model streaming, tool
/// execution, approvals, and cancellation.  Construction wires the channels;
/// [`Agent::start`] launches the loop in its own task, and the driver talks
/// to it exclusively through [`AgentChannels`].
pub struct Agent {
    shared: Arc<AgentShared>,
    started: AtomicBool,
    loop_inputs: Mutex<Option<LoopInputs>>,
    handles: Mutex<Option<AgentChannels>>,
    input_tx: mpsc::Sender<InputEvent>,
    approval_tx: mpsc::Sender<ApprovalResponse>,
    cancel_tx: mpsc::Sender<()>,
}

struct AgentShared {
    memory: ConversationMemory,
    registry: RwLock<ToolRegistry>,
    provider: RwLock<Arc<dyn ModelProvider>>,
    context: ContextManager,
    approvals: ApprovalManager,
    config: Config,
    workspace_dir: PathBuf,
    repository_context: RwLock<Option<String>>,
    notes: RwLock<Option<Arc<dyn NotesProvider>>>,
    usage: Mutex<Usage>,
    error_ring: Mutex<VecDeque<String>>,
    turn_cancel: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
    done_flag: AtomicBool,
    done_notify: Notify,
    events: mpsc::Sender<AgentEvent>,
    tool_events_tx: mpsc::Sender<ToolEvent>,
    tool_events_rx: tokio::sync::Mutex<mpsc::Receiver<ToolEvent>>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        config: Config,
        workspace_dir: impl Into<PathBuf>,
    ) -> Self {
        let buffer = config.agent.channel_buffer.max(10);
        let (event_tx, event_rx) = mpsc::channel(buffer);
        let (input_tx, input_rx) = mpsc::channel(buffer);
        let (approval_tx, approval_rx) = mpsc::channel(buffer);
        let (cancel_tx, cancel_rx) = mpsc::channel(buffer);
        let (tool_events_tx, tool_events_rx) = mpsc::channel(256);

        let mut registry = ToolRegistry::new();
        registry.register_builtin(Arc::new(TaskCompletionTool));
        registry.register_builtin(Arc::new(AskQuestionTool));
        registry.register_builtin(Arc::new(ConverseTool));
        registry.register_builtin(Arc::new(ExecuteCommandTool {
            timeout_secs: config.tools.command_timeout_secs,
        }));
        registry.register_builtin(Arc::new(ReadFileTool));
        registry.register_builtin(Arc::new(ListDirectoryTool));
        registry.register_builtin(Arc::new(WriteFileTool));
        registry.register_builtin(Arc::new(ApplyDiffTool));

        let max_tokens = {
            let info = provider.model_info();
            if info.max_tokens > 0 {
                info.max_tokens
            } else {
                config.model.max_context_tokens.unwrap_or(128_000)
            }
        };
        let mut context = ContextManager::new(max_tokens);
        let summarization = &config.agent.summarization;
        context.register(Arc::new(ToolBatchStrategy::new(
            summarization.tool_batch.clone(),
        )));
        context.register(Arc::new(HalfCompactStrategy::new(
            summarization.half_compaction.clone(),
        )));
        context.register(Arc::new(GoalBatchStrategy::new(
            summarization.goal_batch.clone(),
        )));
        context.set_summarization_model(summarization.model.clone());

        let approvals = ApprovalManager::new(
            Arc::new(ToolPolicy::from_config(&config.tools)),
            std::time::Duration::from_secs(config.agent.approval_timeout_secs),
            event_tx.clone(),
        );

        let shared = Arc::new(AgentShared {
            memory: ConversationMemory::new(),
            registry: RwLock::new(registry),
            provider: RwLock::new(provider),
            context,
            approvals,
            config,
            workspace_dir: workspace_dir.into(),
            repository_context: RwLock::new(None),
            notes: RwLock::new(None),
            usage: Mutex::new(Usage::default()),
            error_ring: Mutex::new(VecDeque::new()),
            turn_cancel: Mutex::new(None),
            shutdown: CancellationToken::new(),
            done_flag: AtomicBool::new(false),
            done_notify: Notify::new(),
            events: event_tx,
            tool_events_tx,
            tool_events_rx: tokio::sync::Mutex::new(tool_events_rx),
        });

        Self {
            shared,
            started: AtomicBool::new(false),
            loop_inputs: Mutex::new(Some(LoopInputs {
                input_rx,
                approval_rx,
                cancel_rx,
            })),
            handles: Mutex::new(Some(AgentChannels {
                events: event_rx,
                input: input_tx.clone(),
                approvals: approval_tx.clone(),
                cancel: cancel_tx.clone(),
            })),
            input_tx,
            approval_tx,
            cancel_tx,
        }
    }

    /// Take the driver-side channel handles.  Returns `None` after the
    /// first call — there is exactly one observer.
    pub fn handles(&self) -> Option<AgentChannels> {
        self.handles.lock().unwrap().take()
    }

    pub fn input_sender(&self) -> mpsc::Sender<InputEvent> {
        self.input_tx.clone()
    }

    pub fn approval_sender(&self) -> mpsc::Sender<ApprovalResponse> {
        self.approval_tx.clone()
    }

    pub fn cancel_sender(&self) -> mpsc::Sender<()> {
        self.cancel_tx.clone()
    }

    /// Launch the event loop.  Idempotent: a second call reports
    /// [`AgentError::AlreadyRunning`] and changes nothing.
    pub fn start(&self) -> Result<(), AgentError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AgentError::AlreadyRunning);
        }
        let inputs = self
            .loop_inputs
            .lock()
            .unwrap()
            .take()
            .expect("loop inputs present before first start");
        let LoopInputs {
            input_rx,
            mut approval_rx,
            mut cancel_rx,
        } = inputs;

        // Cancel drainer: honours cancellation even while the main task is
        // blocked inside a model stream or a tool.
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    maybe = cancel_rx.recv() => match maybe {
                        Some(()) => shared.fire_cancel(),
                        None => break,
                    }
                }
            }
        });

        // Approval forwarder: responses reach the manager while the main
        // task blocks inside the approval wait.
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    maybe = approval_rx.recv() => match maybe {
                        Some(resp) => shared.approvals.handle_response(resp),
                        None => break,
                    }
                }
            }
        });

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.run_loop(input_rx).await });
        Ok(())
    }

    /// Signal the loop to stop and wait for it to exit.  Pending approvals
    /// are torn down; queued inputs are dropped.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.approvals.cleanup_all();
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        loop {
            let notified = self.shared.done_notify.notified();
            if self.shared.done_flag.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    /// Register a user tool.  Built-in names cannot be overridden.
    pub fn register_tool(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        self.shared.registry.write().unwrap().register(tool)?;
        let tools = self.shared.registry.read().unwrap().names();
        let _ = self
            .shared
            .events
            .try_send(AgentEvent::ToolsUpdate { tools });
        Ok(())
    }

    /// Visible tool names.
    pub fn tool_names(&self) -> Vec<String> {
        self.shared.registry.read().unwrap().names()
    }

    /// Whether a registered tool is loop-breaking (unknown names are not).
    pub fn tool_is_loop_breaking(&self, name: &str) -> bool {
        self.shared.registry.read().unwrap().is_loop_breaking(name)
    }

    /// Hot-swap the model provider; takes effect on the next iteration.
    pub fn set_provider(&self, provider: Arc<dyn ModelProvider>) {
        *self.shared.provider.write().unwrap() = provider;
    }

    /// Route summarization calls to a different model (provider clone).
    pub fn set_summarization_model(&self, model: impl Into<String>) {
        self.shared
            .context
            .set_summarization_model(Some(model.into()));
    }

    pub fn set_notes_provider(&self, notes: Arc<dyn NotesProvider>) {
        *self.shared.notes.write().unwrap() = Some(notes);
    }

    pub fn set_repository_context(&self, context: impl Into<String>) {
        *self.shared.repository_context.write().unwrap() = Some(context.into());
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.shared.memory
    }

    /// Snapshot of the token accounting.
    pub fn context_info(&self) -> ContextInfo {
        let shared = &self.shared;
        let (names, tool_tokens) = {
            let registry = shared.registry.read().unwrap();
            let schemas = registry.schemas();
            let tokens = schemas
                .iter()
                .map(|s| (s.name.len() + s.description.len() + s.schema.to_string().len()) / 4)
                .sum();
            (registry.names(), tokens)
        };
        let repo = shared.repository_context.read().unwrap().clone();
        let custom = shared.config.agent.custom_instructions.is_some();
        let prompt = shared.build_system_prompt();
        let usage = *shared.usage.lock().unwrap();
        shared.context.context_info(
            &shared.memory,
            &prompt,
            custom,
            repo.as_deref(),
            names,
            tool_tokens,
            usage,
        )
    }
}

impl AgentShared {
    fn fire_cancel(&self) {
        if let Some(token) = self.turn_cancel.lock().unwrap().as_ref() {
            token.cancel();
        }
    }

    async fn run_loop(self: Arc<Self>, mut input_rx: mpsc::Receiver<InputEvent>) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                maybe = input_rx.recv() => match maybe {
                    None => break,
                    Some(InputEvent::Cancel) => self.fire_cancel(),
                    Some(InputEvent::UserInput(text)) => self.run_turn(text).await,
                    Some(InputEvent::FormInput(map)) => {
                        self.run_turn(format_form_input(&map)).await
                    }
                    Some(InputEvent::NotesRequest { tag, include_scratched, limit }) => {
                        let data = {
                            let notes = self.notes.read().unwrap();
                            notes
                                .as_ref()
                                .map(|n| n.notes(&tag, include_scratched, limit))
                                .unwrap_or(Value::Null)
                        };
                        let _ = self.events.send(AgentEvent::NotesData(data)).await;
                    }
                }
            }
        }
        self.done_flag.store(true, Ordering::SeqCst);
        self.done_notify.notify_waiters();
    }

    /// One full turn: from a user input to `TurnEnd`.
    async fn run_turn(&self, text: String) {
        let _ = self.events.send(AgentEvent::UpdateBusy(true)).await;
        let turn = self.shutdown.child_token();
        *self.turn_cancel.lock().unwrap() = Some(turn.clone());
        self.error_ring.lock().unwrap().clear();
        self.memory.add(Message::user(text));

        let mut rounds: u32 = 0;
        loop {
            if turn.is_cancelled() {
                break;
            }
            rounds += 1;
            if rounds > self.config.agent.max_tool_rounds {
                let _ = self
                    .events
                    .send(AgentEvent::Error(format!(
                        "turn exceeded the {}-iteration budget",
                        self.config.agent.max_tool_rounds
                    )))
                    .await;
                break;
            }
            match self.iterate(&turn).await {
                Ok(IterationOutcome::Continue) => {}
                Ok(IterationOutcome::EndTurn) => break,
                Err(e) => {
                    if !turn.is_cancelled() {
                        let _ = self.events.send(AgentEvent::Error(format!("{e:#}"))).await;
                    }
                    break;
                }
            }
        }

        // The model must see the interruption on the next input.
        if turn.is_cancelled() && !self.shutdown.is_cancelled() {
            self.memory.add(Message::user("Operation stopped by user."));
        }
        *self.turn_cancel.lock().unwrap() = None;
        let _ = self.events.send(AgentEvent::UpdateBusy(false)).await;
        let _ = self.events.send(AgentEvent::TurnEnd).await;
    }

    /// One iteration: prepare → stream → record → dispatch.
    async fn iterate(&self, turn: &CancellationToken) -> anyhow::Result<IterationOutcome> {
        // ── Prepare ──────────────────────────────────────────────────────────
        let provider = self.provider.read().unwrap().clone();
        if self.context.should_summarize(&self.memory) {
            // Blocking on purpose: context must shrink before the next call.
            self.context
                .summarize(&self.memory, provider.clone(), &self.events)
                .await;
        }
        let window = self.build_window();

        // ── Stream ───────────────────────────────────────────────────────────
        let _ = self.events.send(AgentEvent::ApiCallStart).await;
        let mut stream = match self.open_stream(provider.as_ref(), &window, turn).await {
            Ok(s) => s,
            Err(e) => {
                let _ = self.events.send(AgentEvent::ApiCallEnd).await;
                return Err(e.context("model stream failed"));
            }
        };

        let mut thinking_parser = ThinkingParser::new();
        let mut block_parser = ToolBlockParser::new();
        let mut segments = SegmentState::default();
        let mut assistant_raw = String::new();
        let mut thinking_chars = 0usize;
        let mut tool_body: Option<String> = None;
        let mut stream_error: Option<String> = None;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = turn.cancelled() => {
                    let _ = self.events.send(AgentEvent::ApiCallEnd).await;
                    anyhow::bail!("turn cancelled")
                }
                next = stream.next() => match next {
                    None => break,
                    Some(Ok(c)) => c,
                    Some(Err(e)) => {
                        stream_error = Some(format!("{e:#}"));
                        break;
                    }
                }
            };
            if let Some(err) = &chunk.error {
                stream_error = Some(err.clone());
                break;
            }
            match chunk.kind {
                ChunkKind::Thinking if !chunk.content.is_empty() => {
                    thinking_chars += chunk.content.len();
                    self.emit_thinking(&mut segments, &chunk.content).await;
                }
                ChunkKind::Message if !chunk.content.is_empty() => {
                    for piece in thinking_parser.feed(&chunk.content) {
                        self.route_piece(
                            &mut segments,
                            &mut block_parser,
                            piece,
                            &mut assistant_raw,
                            &mut thinking_chars,
                            &mut tool_body,
                        )
                        .await;
                    }
                }
                _ => {}
            }
            if chunk.finished {
                break;
            }
        }

        for piece in thinking_parser.flush() {
            self.route_piece(
                &mut segments,
                &mut block_parser,
                piece,
                &mut assistant_raw,
                &mut thinking_chars,
                &mut tool_body,
            )
            .await;
        }
        for ev in block_parser.flush() {
            self.emit_block_event(&mut segments, ev, &mut tool_body).await;
        }
        self.close_segments(&mut segments).await;
        let _ = self.events.send(AgentEvent::ApiCallEnd).await;

        // ── Token accounting ─────────────────────────────────────────────────
        let counter = self.context.counter();
        let prompt_tokens = counter.count_messages(&window);
        let completion_tokens =
            counter.count_text(&assistant_raw) + thinking_chars / 4;
        let usage = Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        };
        self.usage.lock().unwrap().add(usage);
        let _ = self.events.send(AgentEvent::TokenUsage(usage)).await;

        if let Some(err) = stream_error {
            // Transient stream fault: surface it and end the turn cleanly.
            warn!("model stream error: {err}");
            let _ = self.events.send(AgentEvent::Error(err)).await;
            return Ok(IterationOutcome::EndTurn);
        }

        // ── Record ───────────────────────────────────────────────────────────
        if !assistant_raw.trim().is_empty() {
            self.memory.add(Message::assistant(assistant_raw.clone()));
        }

        // ── Dispatch ─────────────────────────────────────────────────────────
        let Some(body) = tool_body else {
            let _ = self.events.send(AgentEvent::NoToolCall).await;
            return Ok(IterationOutcome::EndTurn);
        };
        let call = match parse_tool_block(&body) {
            Ok(c) => c,
            Err(e) => {
                return self
                    .recover_iteration(format!("malformed tool call: {e:#}"))
                    .await;
            }
        };
        let args = match parse_arguments(&call.arguments_xml) {
            Ok(a) => a,
            Err(e) => {
                return self
                    .recover_iteration(format!(
                        "invalid arguments for tool {}: {e:#}",
                        call.tool_name
                    ))
                    .await;
            }
        };
        let tool = self.registry.read().unwrap().get(&call.tool_name);
        let Some(tool) = tool else {
            let error = format!("unknown tool: {}", call.tool_name);
            let _ = self
                .events
                .send(AgentEvent::ToolResultError {
                    tool_name: call.tool_name.clone(),
                    error: error.clone(),
                })
                .await;
            self.record_iteration_error(error);
            return Ok(IterationOutcome::Continue);
        };

        // ── Approval ─────────────────────────────────────────────────────────
        let (approved, timed_out) = if tool.requires_approval(&args) {
            let preview = tool.approval_message(&args);
            self.approvals
                .request_approval(turn, &call.tool_name, &args, preview)
                .await
        } else {
            (true, false)
        };
        if !approved {
            if turn.is_cancelled() {
                return Ok(IterationOutcome::EndTurn);
            }
            if timed_out {
                self.memory.add(Message::user(format!(
                    "Approval for the `{}` call timed out; it was not executed.",
                    call.tool_name
                )));
                return Ok(IterationOutcome::EndTurn);
            }
            self.memory.add(Message::user(format!(
                "The `{}` call was rejected; it was not executed.",
                call.tool_name
            )));
            if tool.is_loop_breaking() {
                return Ok(IterationOutcome::EndTurn);
            }
            return Ok(IterationOutcome::Continue);
        }

        // ── Execute ──────────────────────────────────────────────────────────
        let _ = self
            .events
            .send(AgentEvent::ToolCall {
                server_name: call.server_name.clone(),
                tool_name: call.tool_name.clone(),
                input: args.clone(),
            })
            .await;
        debug!(tool = %call.tool_name, "executing tool");
        let ctx = ExecutionContext::new(self.workspace_dir.clone())
            .with_cancel(turn.clone())
            .with_events(self.tool_events_tx.clone());
        let output = self
            .execute_with_events(Arc::clone(&tool), ctx, args.clone())
            .await;

        if output.is_error {
            let _ = self
                .events
                .send(AgentEvent::ToolResultError {
                    tool_name: call.tool_name.clone(),
                    error: output.content.clone(),
                })
                .await;
            self.record_iteration_error(format!(
                "tool {} failed: {}",
                call.tool_name, output.content
            ));
            if turn.is_cancelled() {
                return Ok(IterationOutcome::EndTurn);
            }
            return Ok(IterationOutcome::Continue);
        }

        self.memory.add(Message::tool(output.content.clone()));
        let _ = self
            .events
            .send(AgentEvent::ToolResult {
                tool_name: call.tool_name.clone(),
                output: output.content,
                metadata: output.metadata,
            })
            .await;

        if tool.is_loop_breaking() {
            return Ok(IterationOutcome::EndTurn);
        }
        Ok(IterationOutcome::Continue)
    }

    /// Record a transient fault and continue: the error rides in the next
    /// window as ephemeral context, never in memory.
    async fn recover_iteration(&self, error: String) -> anyhow::Result<IterationOutcome> {
        let _ = self.events.send(AgentEvent::Error(error.clone())).await;
        self.record_iteration_error(error);
        Ok(IterationOutcome::Continue)
    }

    fn record_iteration_error(&self, error: String) {
        let mut ring = self.error_ring.lock().unwrap();
        ring.push_back(error);
        while ring.len() > ERROR_RING_CAPACITY {
            ring.pop_front();
        }
    }

    async fn open_stream(
        &self,
        provider: &dyn ModelProvider,
        window: &[Message],
        turn: &CancellationToken,
    ) -> anyhow::Result<ChunkStream> {
        let req = CompletionRequest {
            messages: window.to_vec(),
        };
        match provider.stream_completion(req.clone()).await {
            Ok(s) => Ok(s),
            Err(e) if turn.is_cancelled() => Err(e),
            Err(e) => {
                warn!("model stream open failed, retrying once: {e:#}");
                provider.stream_completion(req).await
            }
        }
    }

    /// Build the outbound message window from a single memory snapshot:
    /// fresh system prompt, stored messages with the tool role remapped to
    /// user for the wire, then any ephemeral error context.
    fn build_window(&self) -> Vec<Message> {
        let mut window = vec![Message::system(self.build_system_prompt())];
        for msg in self.memory.snapshot() {
            match msg.role {
                Role::System => continue,
                Role::Tool => window.push(Message {
                    role: Role::User,
                    content: msg.content.clone(),
                    metadata: msg.metadata.clone(),
                }),
                _ => window.push((*msg).clone()),
            }
        }
        let ring = self.error_ring.lock().unwrap();
        if !ring.is_empty() {
            let mut text =
                String::from("Recent errors from your previous attempts (fix and retry):\n");
            for err in ring.iter() {
                text.push_str(&format!("- {err}\n"));
            }
            window.push(Message::user(text));
        }
        window
    }

    fn build_system_prompt(&self) -> String {
        let registry = self.registry.read().unwrap();
        let schemas = registry.schemas();
        let repo = self.repository_context.read().unwrap();
        let workspace = self.workspace_dir.to_string_lossy();
        let ctx = PromptContext {
            workspace_dir: Some(workspace.as_ref()),
            repository_context: repo.as_deref(),
            custom_instructions: self.config.agent.custom_instructions.as_deref(),
        };
        system_prompt(self.config.agent.system_prompt.as_deref(), &ctx, &schemas)
    }

    /// Execute a tool in its own task (panic isolation), forwarding tool
    /// events to observers while it runs.
    async fn execute_with_events(
        &self,
        tool: Arc<dyn Tool>,
        ctx: ExecutionContext,
        args: ToolArgs,
    ) -> ToolOutput {
        let mut rx = self.tool_events_rx.lock().await;
        let handle = tokio::spawn(async move { tool.execute(&ctx, &args).await });
        tokio::pin!(handle);
        let output = loop {
            tokio::select! {
                joined = &mut handle => {
                    break match joined {
                        Ok(o) => o,
                        Err(e) => ToolOutput::err(format!("tool execution panicked: {e}")),
                    };
                }
                Some(te) = rx.recv() => self.forward_tool_event(te).await,
            }
        };
        while let Ok(te) = rx.try_recv() {
            self.forward_tool_event(te).await;
        }
        output
    }

    async fn forward_tool_event(&self, event: ToolEvent) {
        let mapped = match event {
            ToolEvent::CommandStarted {
                execution_id,
                command,
                working_dir,
            } => AgentEvent::CommandExecutionStart {
                execution_id,
                command,
                working_dir,
            },
            ToolEvent::CommandOutput {
                execution_id,
                stream,
                chunk,
            } => AgentEvent::CommandExecutionOutput {
                execution_id,
                stream: stream.as_str().to_string(),
                chunk,
            },
            ToolEvent::CommandCompleted {
                execution_id,
                exit_code,
                duration_ms,
            } => AgentEvent::CommandExecutionComplete {
                execution_id,
                exit_code,
                duration_ms,
            },
            ToolEvent::CommandFailed {
                execution_id,
                error,
                duration_ms,
            } => AgentEvent::CommandExecutionFailed {
                execution_id,
                error,
                duration_ms,
            },
            ToolEvent::CommandCanceled { execution_id } => {
                AgentEvent::CommandExecutionCanceled { execution_id }
            }
        };
        let _ = self.events.send(mapped).await;
    }

    // ── Segment event plumbing ───────────────────────────────────────────────

    async fn route_piece(
        &self,
        segments: &mut SegmentState,
        block_parser: &mut ToolBlockParser,
        piece: ClassifiedText,
        assistant_raw: &mut String,
        thinking_chars: &mut usize,
        tool_body: &mut Option<String>,
    ) {
        match piece.kind {
            ChunkKind::Thinking => {
                *thinking_chars += piece.text.len();
                self.emit_thinking(segments, &piece.text).await;
            }
            ChunkKind::Message => {
                assistant_raw.push_str(&piece.text);
                for ev in block_parser.feed(&piece.text) {
                    self.emit_block_event(segments, ev, tool_body).await;
                }
            }
        }
    }

    async fn emit_thinking(&self, segments: &mut SegmentState, text: &str) {
        if segments.message_open {
            segments.message_open = false;
            let _ = self.events.send(AgentEvent::MessageEnd).await;
        }
        if !segments.thinking_open {
            segments.thinking_open = true;
            let _ = self.events.send(AgentEvent::ThinkingStart).await;
        }
        let _ = self
            .events
            .send(AgentEvent::ThinkingContent(text.to_string()))
            .await;
    }

    async fn emit_block_event(
        &self,
        segments: &mut SegmentState,
        event: ToolBlockEvent,
        tool_body: &mut Option<String>,
    ) {
        match event {
            ToolBlockEvent::Ordinary(text) => {
                if segments.thinking_open {
                    segments.thinking_open = false;
                    let _ = self.events.send(AgentEvent::ThinkingEnd).await;
                }
                if segments.toolcall_open {
                    segments.toolcall_open = false;
                    let _ = self.events.send(AgentEvent::ToolCallEnd).await;
                }
                if !segments.message_open {
                    segments.message_open = true;
                    let _ = self.events.send(AgentEvent::MessageStart).await;
                }
                let _ = self.events.send(AgentEvent::MessageContent(text)).await;
            }
            ToolBlockEvent::Started => {
                if segments.thinking_open {
                    segments.thinking_open = false;
                    let _ = self.events.send(AgentEvent::ThinkingEnd).await;
                }
                if segments.message_open {
                    segments.message_open = false;
                    let _ = self.events.send(AgentEvent::MessageEnd).await;
                }
                segments.toolcall_open = true;
                let _ = self.events.send(AgentEvent::ToolCallStart).await;
            }
            ToolBlockEvent::Body(text) => {
                let _ = self.events.send(AgentEvent::ToolCallContent(text)).await;
            }
            ToolBlockEvent::Completed(body) => {
                segments.toolcall_open = false;
                let _ = self.events.send(AgentEvent::ToolCallEnd).await;
                *tool_body = Some(body);
            }
        }
    }

    async fn close_segments(&self, segments: &mut SegmentState) {
        if segments.thinking_open {
            segments.thinking_open = false;
            let _ = self.events.send(AgentEvent::ThinkingEnd).await;
        }
        if segments.message_open {
            segments.message_open = false;
            let _ = self.events.send(AgentEvent::MessageEnd).await;
        }
        if segments.toolcall_open {
            segments.toolcall_open = false;
            let _ = self.events.send(AgentEvent::ToolCallEnd).await;
        }
    }
}

fn format_form_input(map: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    let mut text = String::from("Form input:\n");
    for key in keys {
        text.push_str(&format!("{key}: {}\n", map[key]));
    }
    text
}

#[cfg(test)]
mod form_tests {
    use super::*;

    #[test]
    fn form_input_rendered_sorted() {
        let mut map = HashMap::new();
        map.insert("b".to_string(), "2".to_string());
        map.insert("a".to_string(), "1".to_string());
        let text = format_form_input(&map);
        assert_eq!(text, "Form input:\na: 1\nb: 2\n");
    }
}
