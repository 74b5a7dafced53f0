// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use crate::Message;

/// Counts tokens for context-budget accounting.
///
/// A provider-specific tokenizer can be plugged in here; when none is
/// available the [`ApproxTokenCounter`] heuristic keeps the accounting
/// within a few percent for English/code content.
pub trait TokenCounter: Send + Sync {
    fn count_text(&self, text: &str) -> usize;

    fn count_message(&self, msg: &Message) -> usize {
        (self.count_text(&msg.content)) + (msg.role.as_str().len() + 12) / 4
    }

    fn count_messages(&self, msgs: &[Message]) -> usize {
        msgs.iter().map(|m| self.count_message(m)).sum()
    }
}

/// 4-chars-per-token approximation with a fixed per-message overhead.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApproxTokenCounter;

impl TokenCounter for ApproxTokenCounter {
    fn count_text(&self, text: &str) -> usize {
        text.len() / 4
    }

    fn count_message(&self, msg: &Message) -> usize {
        msg.approx_tokens()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_counts_four_chars_per_token() {
        assert_eq!(ApproxTokenCounter.count_text("12345678"), 2);
    }

    #[test]
    fn approx_message_matches_message_helper() {
        let m = Message::user("some text content");
        assert_eq!(ApproxTokenCounter.count_message(&m), m.approx_tokens());
    }

    #[test]
    fn count_messages_sums_all() {
        let msgs = vec![Message::user("aaaa"), Message::assistant("bbbb")];
        let sum: usize = msgs.iter().map(|m| m.approx_tokens()).sum();
        assert_eq!(ApproxTokenCounter.count_messages(&msgs), sum);
    }
}
