// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rook_tools::{PolicyDecision, ToolArgs, ToolPolicy};

use crate::events::AgentEvent;

/// Decision delivered on the approval channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Granted,
    Rejected,
}

/// One response correlated to a pending approval by id.
#[derive(Debug, Clone)]
pub struct ApprovalResponse {
    pub approval_id: String,
    pub decision: ApprovalDecision,
}

struct PendingApproval {
    approval_id: String,
    // One-shot latch: taken exactly once, by either the response delivery
    // or cleanup.  Dropping the sender closes the channel.
    response_tx: Option<oneshot::Sender<ApprovalDecision>>,
}

/// Correlates out-of-band approval responses with the single in-flight tool
/// invocation.
///
/// The agent's turn serialises tool execution, so at most one approval is
/// ever pending.  Responses with a mismatching id are silently dropped.
pub struct ApprovalManager {
    pending: Mutex<Option<PendingApproval>>,
    policy: Arc<ToolPolicy>,
    timeout: Duration,
    events: mpsc::Sender<AgentEvent>,
}

impl ApprovalManager {
    pub fn new(
        policy: Arc<ToolPolicy>,
        timeout: Duration,
        events: mpsc::Sender<AgentEvent>,
    ) -> Self {
        Self {
            pending: Mutex::new(None),
            policy,
            timeout,
            events,
        }
    }

    /// Number of pending approvals (0 or 1).
    pub fn pending_count(&self) -> usize {
        usize::from(self.pending.lock().unwrap().is_some())
    }

    /// Obtain permission to execute a tool call.
    ///
    /// Returns `(approved, timed_out)`.  Auto-approval policy is evaluated
    /// first; otherwise an approval request event is emitted and the call
    /// blocks until a response arrives, the timer fires, or the turn is
    /// cancelled.  Cancellation returns `(false, false)` without emitting
    /// any decision event — the turn is being torn down.
    pub async fn request_approval(
        &self,
        cancel: &CancellationToken,
        tool_name: &str,
        args: &ToolArgs,
        preview: String,
    ) -> (bool, bool) {
        // Command whitelist: only an actual string `command` argument is
        // eligible; a missing or non-string value falls through to manual.
        if tool_name == "execute_command" {
            if let Some(command) = args.get("command").and_then(Value::as_str) {
                match self.policy.decide_command(command) {
                    PolicyDecision::Approve => {
                        self.emit(AgentEvent::ApprovalGranted {
                            tool_name: tool_name.to_string(),
                        })
                        .await;
                        return (true, false);
                    }
                    PolicyDecision::Deny => {
                        debug!(tool_name, command, "command denied by policy");
                        return (false, false);
                    }
                    PolicyDecision::Prompt => {}
                }
            }
        }
        if self.policy.tool_auto_approved(tool_name) {
            self.emit(AgentEvent::ApprovalGranted {
                tool_name: tool_name.to_string(),
            })
            .await;
            return (true, false);
        }

        let approval_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap();
            if pending.is_some() {
                // The turn serialises tool execution; a leftover record means
                // a previous wait was torn down without cleanup.
                warn!("replacing stale pending approval");
            }
            *pending = Some(PendingApproval {
                approval_id: approval_id.clone(),
                response_tx: Some(tx),
            });
        }

        self.emit(AgentEvent::ApprovalRequest {
            approval_id: approval_id.clone(),
            tool_name: tool_name.to_string(),
            input: args.clone(),
            preview,
        })
        .await;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.cleanup(&approval_id);
                (false, false)
            }
            response = rx => {
                self.cleanup(&approval_id);
                match response {
                    Ok(ApprovalDecision::Granted) => {
                        self.emit(AgentEvent::ApprovalGranted {
                            tool_name: tool_name.to_string(),
                        })
                        .await;
                        (true, false)
                    }
                    // An explicit rejection, or the channel was closed under
                    // us (agent shutdown tore the record down): both reject.
                    Ok(ApprovalDecision::Rejected) | Err(_) => {
                        self.emit(AgentEvent::ApprovalRejected {
                            tool_name: tool_name.to_string(),
                        })
                        .await;
                        (false, false)
                    }
                }
            }
            _ = tokio::time::sleep(self.timeout) => {
                self.cleanup(&approval_id);
                self.emit(AgentEvent::ApprovalTimeout {
                    approval_id: approval_id.clone(),
                    tool_name: tool_name.to_string(),
                })
                .await;
                (false, true)
            }
        }
    }

    /// Deliver a response.  Non-blocking; a mismatching or absent pending
    /// record drops the response.  Safe against double delivery and races
    /// with cleanup: the sender is taken at most once.
    pub fn handle_response(&self, response: ApprovalResponse) {
        let mut pending = self.pending.lock().unwrap();
        match pending.as_mut() {
            Some(p) if p.approval_id == response.approval_id => {
                if let Some(tx) = p.response_tx.take() {
                    let _ = tx.send(response.decision);
                }
            }
            _ => {
                debug!(
                    approval_id = %response.approval_id,
                    "dropping approval response with no matching pending record"
                );
            }
        }
    }

    /// Deregister the pending record.  Idempotent: repeated calls (or calls
    /// racing a delivered response) find nothing to do, and the response
    /// channel is closed exactly once by dropping its sender.
    pub fn cleanup(&self, approval_id: &str) {
        let mut pending = self.pending.lock().unwrap();
        if pending
            .as_ref()
            .map(|p| p.approval_id == approval_id)
            .unwrap_or(false)
        {
            *pending = None;
        }
    }

    /// Tear down any pending approval (agent shutdown).  The waiting task
    /// observes the channel closure and treats it as a rejection.
    pub fn cleanup_all(&self) {
        *self.pending.lock().unwrap() = None;
    }

    async fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event).await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rook_config::ToolsConfig;

    fn manager(timeout_ms: u64) -> (Arc<ApprovalManager>, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let policy = Arc::new(ToolPolicy::from_config(&ToolsConfig {
            auto_approve_patterns: vec!["echo test".into()],
            deny_patterns: vec!["rm -rf /*".into()],
            ..ToolsConfig::default()
        }));
        (
            Arc::new(ApprovalManager::new(
                policy,
                Duration::from_millis(timeout_ms),
                tx,
            )),
            rx,
        )
    }

    fn command_args(cmd: &str) -> ToolArgs {
        let mut args = ToolArgs::new();
        args.insert("command".into(), Value::String(cmd.into()));
        args
    }

    async fn drain(rx: &mut mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    // ── Auto-approval policy ──────────────────────────────────────────────────

    #[tokio::test]
    async fn whitelisted_command_auto_approved_with_granted_event() {
        let (m, mut rx) = manager(5_000);
        let cancel = CancellationToken::new();
        let (approved, timed_out) = m
            .request_approval(&cancel, "execute_command", &command_args("echo test"), "p".into())
            .await;
        assert!(approved);
        assert!(!timed_out);
        let events = drain(&mut rx).await;
        assert!(matches!(events[0], AgentEvent::ApprovalGranted { .. }));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, AgentEvent::ApprovalRequest { .. })),
            "auto-approval must not emit a request"
        );
    }

    #[tokio::test]
    async fn denied_command_rejected_without_event() {
        let (m, mut rx) = manager(5_000);
        let cancel = CancellationToken::new();
        let (approved, timed_out) = m
            .request_approval(&cancel, "execute_command", &command_args("rm -rf /x"), "p".into())
            .await;
        assert!(!approved);
        assert!(!timed_out);
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn missing_command_argument_falls_through_to_manual() {
        let (m, mut rx) = manager(50);
        let cancel = CancellationToken::new();
        let (approved, timed_out) = m
            .request_approval(&cancel, "execute_command", &ToolArgs::new(), "p".into())
            .await;
        // No response arrives: the manual path times out.
        assert!(!approved);
        assert!(timed_out);
        let events = drain(&mut rx).await;
        assert!(matches!(events[0], AgentEvent::ApprovalRequest { .. }));
    }

    #[tokio::test]
    async fn per_tool_flag_auto_approves() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut cfg = ToolsConfig::default();
        cfg.auto_approve_tools.insert("read_file".into(), true);
        let m = ApprovalManager::new(
            Arc::new(ToolPolicy::from_config(&cfg)),
            Duration::from_secs(5),
            tx,
        );
        let cancel = CancellationToken::new();
        let (approved, _) = m
            .request_approval(&cancel, "read_file", &ToolArgs::new(), "p".into())
            .await;
        assert!(approved);
        let events = drain(&mut rx).await;
        assert!(matches!(events[0], AgentEvent::ApprovalGranted { .. }));
    }

    // ── Manual approval ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn response_grants_pending_approval() {
        let (m, mut rx) = manager(5_000);
        let m2 = Arc::clone(&m);
        let waiter = tokio::spawn(async move {
            m2.request_approval(&CancellationToken::new(), "write_file", &ToolArgs::new(), "p".into())
                .await
        });

        // Wait for the request event to learn the id.
        let approval_id = loop {
            if let Some(AgentEvent::ApprovalRequest { approval_id, .. }) = rx.recv().await {
                break approval_id;
            }
        };
        assert_eq!(m.pending_count(), 1);
        m.handle_response(ApprovalResponse {
            approval_id,
            decision: ApprovalDecision::Granted,
        });
        let (approved, timed_out) = waiter.await.unwrap();
        assert!(approved);
        assert!(!timed_out);
        assert_eq!(m.pending_count(), 0);
    }

    #[tokio::test]
    async fn mismatching_approval_id_is_dropped() {
        let (m, mut rx) = manager(200);
        let m2 = Arc::clone(&m);
        let waiter = tokio::spawn(async move {
            m2.request_approval(&CancellationToken::new(), "write_file", &ToolArgs::new(), "p".into())
                .await
        });
        // Wait until the request is registered.
        loop {
            if let Some(AgentEvent::ApprovalRequest { .. }) = rx.recv().await {
                break;
            }
        }
        m.handle_response(ApprovalResponse {
            approval_id: "wrong-id".into(),
            decision: ApprovalDecision::Granted,
        });
        // The wrong id must not grant; the wait times out instead.
        let (approved, timed_out) = waiter.await.unwrap();
        assert!(!approved);
        assert!(timed_out);
    }

    #[tokio::test]
    async fn timeout_emits_timeout_event() {
        let (m, mut rx) = manager(100);
        let cancel = CancellationToken::new();
        let (approved, timed_out) = m
            .request_approval(&cancel, "write_file", &ToolArgs::new(), "p".into())
            .await;
        assert!(!approved);
        assert!(timed_out);
        let events = drain(&mut rx).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::ApprovalTimeout { .. })));
    }

    #[tokio::test]
    async fn cancellation_is_silent() {
        let (m, mut rx) = manager(5_000);
        let cancel = CancellationToken::new();
        let m2 = Arc::clone(&m);
        let c2 = cancel.clone();
        let waiter = tokio::spawn(async move {
            m2.request_approval(&c2, "write_file", &ToolArgs::new(), "p".into())
                .await
        });
        loop {
            if let Some(AgentEvent::ApprovalRequest { .. }) = rx.recv().await {
                break;
            }
        }
        cancel.cancel();
        let (approved, timed_out) = waiter.await.unwrap();
        assert!(!approved);
        assert!(!timed_out);
        // No granted/rejected/timeout event after the request.
        let events = drain(&mut rx).await;
        assert!(
            !events.iter().any(|e| matches!(
                e,
                AgentEvent::ApprovalGranted { .. }
                    | AgentEvent::ApprovalRejected { .. }
                    | AgentEvent::ApprovalTimeout { .. }
            )),
            "cancelled approval wait must not emit a decision event"
        );
        assert_eq!(m.pending_count(), 0);
    }

    #[tokio::test]
    async fn channel_closure_treated_as_rejection() {
        let (m, mut rx) = manager(5_000);
        let m2 = Arc::clone(&m);
        let waiter = tokio::spawn(async move {
            m2.request_approval(&CancellationToken::new(), "write_file", &ToolArgs::new(), "p".into())
                .await
        });
        loop {
            if let Some(AgentEvent::ApprovalRequest { .. }) = rx.recv().await {
                break;
            }
        }
        m.cleanup_all();
        let (approved, timed_out) = waiter.await.unwrap();
        assert!(!approved);
        assert!(!timed_out);
        let events = drain(&mut rx).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::ApprovalRejected { .. })));
    }

    // ── Cleanup idempotence ───────────────────────────────────────────────────

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let (m, _rx) = manager(5_000);
        for _ in 0..5 {
            m.cleanup("nonexistent");
            m.cleanup_all();
        }
        assert_eq!(m.pending_count(), 0);
    }

    #[tokio::test]
    async fn double_response_delivery_is_safe() {
        let (m, mut rx) = manager(5_000);
        let m2 = Arc::clone(&m);
        let waiter = tokio::spawn(async move {
            m2.request_approval(&CancellationToken::new(), "write_file", &ToolArgs::new(), "p".into())
                .await
        });
        let approval_id = loop {
            if let Some(AgentEvent::ApprovalRequest { approval_id, .. }) = rx.recv().await {
                break approval_id;
            }
        };
        let resp = ApprovalResponse {
            approval_id,
            decision: ApprovalDecision::Granted,
        };
        m.handle_response(resp.clone());
        m.handle_response(resp.clone());
        m.handle_response(resp);
        let (approved, _) = waiter.await.unwrap();
        assert!(approved);
    }
}
