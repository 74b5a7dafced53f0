// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use rook_core::{
    Agent, AgentEvent, ApprovalDecision, ApprovalResponse, InputEvent,
};

const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Interactive terminal driver: renders the event stream, answers approval
/// requests from stdin, and forwards Ctrl-C as a cancel.
pub async fn run_interactive(agent: Arc<Agent>, initial_prompt: Option<String>) -> anyhow::Result<()> {
    let mut channels = agent.handles().context("agent handles already taken")?;
    agent.start()?;

    // Ctrl-C interrupts the current turn rather than killing the process.
    let cancel = channels.cancel.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel.send(()).await;
        }
    });

    if let Some(prompt) = initial_prompt {
        channels
            .input
            .send(InputEvent::UserInput(prompt))
            .await
            .context("sending prompt")?;
        drive_turn(&mut channels.events, &channels.approvals).await?;
        agent.shutdown().await;
        return Ok(());
    }

    eprintln!("rook interactive session — empty line or 'exit' to quit");
    loop {
        let Some(line) = read_line("> ").await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() || line == "exit" || line == "quit" {
            break;
        }
        channels
            .input
            .send(InputEvent::UserInput(line))
            .await
            .context("sending input")?;
        drive_turn(&mut channels.events, &channels.approvals).await?;
    }
    agent.shutdown().await;
    Ok(())
}

/// Render events until the turn ends.
async fn drive_turn(
    events: &mut mpsc::Receiver<AgentEvent>,
    approvals: &mpsc::Sender<ApprovalResponse>,
) -> anyhow::Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::ThinkingStart => print!("{DIM}"),
            AgentEvent::ThinkingContent(text) => {
                print!("{text}");
                flush();
            }
            AgentEvent::ThinkingEnd => {
                println!("{RESET}");
            }
            AgentEvent::MessageContent(text) => {
                print!("{text}");
                flush();
            }
            AgentEvent::MessageEnd => println!(),
            AgentEvent::ToolCall {
                tool_name, input, ..
            } => {
                eprintln!(
                    "{BOLD}[tool]{RESET} {tool_name} {}",
                    serde_json::Value::Object(input)
                );
            }
            AgentEvent::ToolResult { tool_name, output, .. } => {
                let preview: String = output.chars().take(400).collect();
                eprintln!("{DIM}[{tool_name}] {preview}{RESET}");
            }
            AgentEvent::ToolResultError { tool_name, error } => {
                eprintln!("[{tool_name}] error: {error}");
            }
            AgentEvent::ApprovalRequest {
                approval_id,
                preview,
                ..
            } => {
                let decision = ask_approval(&preview).await?;
                approvals
                    .send(ApprovalResponse {
                        approval_id,
                        decision,
                    })
                    .await
                    .context("sending approval response")?;
            }
            AgentEvent::ApprovalTimeout { tool_name, .. } => {
                eprintln!("[approval] timed out waiting for a decision on {tool_name}");
            }
            AgentEvent::CommandExecutionOutput { chunk, .. } => {
                eprintln!("{DIM}  | {chunk}{RESET}");
            }
            AgentEvent::SummarizationComplete {
                strategy,
                tokens_saved,
                ..
            } => {
                eprintln!("{DIM}[context] {strategy} saved {tokens_saved} tokens{RESET}");
            }
            AgentEvent::TokenUsage(usage) => {
                eprintln!(
                    "{DIM}[tokens] prompt={} completion={}{RESET}",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }
            AgentEvent::Error(e) => eprintln!("[error] {e}"),
            AgentEvent::TurnEnd => return Ok(()),
            _ => {}
        }
    }
    Ok(())
}

async fn ask_approval(preview: &str) -> anyhow::Result<ApprovalDecision> {
    eprintln!("{BOLD}[approval]{RESET} {preview}");
    let answer = read_line("approve? [y/N] ").await?.unwrap_or_default();
    Ok(if answer.trim().eq_ignore_ascii_case("y") {
        ApprovalDecision::Granted
    } else {
        ApprovalDecision::Rejected
    })
}

/// Blocking stdin read without stalling the runtime.  `None` on EOF.
async fn read_line(prompt: &str) -> anyhow::Result<Option<String>> {
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || {
        eprint!("{prompt}");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line)),
            Err(e) => Err(anyhow::Error::from(e)),
        }
    })
    .await
    .context("stdin reader task failed")?
}

fn flush() {
    let _ = std::io::stdout().flush();
}
