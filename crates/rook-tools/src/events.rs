// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Which output stream a command chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStream {
    Stdout,
    Stderr,
}

impl CommandStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStream::Stdout => "stdout",
            CommandStream::Stderr => "stderr",
        }
    }
}

/// Events emitted by stateful tools while they run.
///
/// The paired sender lives inside the tools (via `ExecutionContext`); the
/// agent loop drains the receiver and translates these into agent events so
/// observers see command progress in real time.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    CommandStarted {
        execution_id: String,
        command: String,
        working_dir: String,
    },
    CommandOutput {
        execution_id: String,
        stream: CommandStream,
        chunk: String,
    },
    CommandCompleted {
        execution_id: String,
        exit_code: i32,
        duration_ms: u64,
    },
    CommandFailed {
        execution_id: String,
        error: String,
        duration_ms: u64,
    },
    CommandCanceled {
        execution_id: String,
    },
}
