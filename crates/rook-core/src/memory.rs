// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, RwLock};

use rook_model::Message;

/// Thread-safe ordered conversation history.
///
/// Messages are stored behind `Arc` handles: identity is the handle, so two
/// messages with equal content stay distinguishable and summarization can
/// replace exact slices.  A stored message is never mutated; replacement
/// summaries are new messages installed via [`ConversationMemory::replace`].
///
/// Readers snapshot freely; writers are serialised by the agent loop's
/// single-writer discipline, so the lock is only ever contended briefly.
#[derive(Debug, Default)]
pub struct ConversationMemory {
    messages: RwLock<Vec<Arc<Message>>>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message; returns the stored handle.
    pub fn add(&self, msg: Message) -> Arc<Message> {
        let handle = Arc::new(msg);
        self.messages.write().unwrap().push(Arc::clone(&handle));
        handle
    }

    pub fn add_many(&self, msgs: impl IntoIterator<Item = Message>) {
        let mut guard = self.messages.write().unwrap();
        for m in msgs {
            guard.push(Arc::new(m));
        }
    }

    pub fn clear(&self) {
        self.messages.write().unwrap().clear();
    }

    /// Owned ordered snapshot of the current history.
    pub fn snapshot(&self) -> Vec<Arc<Message>> {
        self.messages.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().unwrap().is_empty()
    }

    /// Install a rewritten history (summarization output).
    pub fn replace(&self, messages: Vec<Arc<Message>>) {
        *self.messages.write().unwrap() = messages;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
