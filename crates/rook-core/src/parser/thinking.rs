// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use rook_model::ChunkKind;

const OPEN_TAG: &str = "<thinking>";
const CLOSE_TAG: &str = "</thinking>";

/// A run of classified output text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedText {
    pub kind: ChunkKind,
    pub text: String,
}

impl ClassifiedText {
    fn new(kind: ChunkKind, text: impl Into<String>) -> Self {
        Self { kind, text: text.into() }
    }
}

/// Streaming classifier that splits `<thinking>…</thinking>` regions from
/// ordinary message content.
///
/// The parser is fed arbitrary chunk boundaries and buffers just enough to
/// decide whether a `<`-initiated run is a thinking tag.  Literal `<` and `>`
/// in content (`i<10`, `x>3`) survive intact in whichever mode is active, so
/// code inside a thinking block cannot corrupt later tag detection.
#[derive(Debug, Default)]
pub struct ThinkingParser {
    in_thinking: bool,
    in_tag: bool,
    buf: String,
    tag_buf: String,
}

impl ThinkingParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn mode(&self) -> ChunkKind {
        if self.in_thinking {
            ChunkKind::Thinking
        } else {
            ChunkKind::Message
        }
    }

    fn flush_buf(&mut self, out: &mut Vec<ClassifiedText>) {
        if !self.buf.is_empty() {
            let text = std::mem::take(&mut self.buf);
            out.push(ClassifiedText::new(self.mode(), text));
        }
    }

    fn flush_tag_as_literal(&mut self, out: &mut Vec<ClassifiedText>) {
        if !self.tag_buf.is_empty() {
            let text = std::mem::take(&mut self.tag_buf);
            out.push(ClassifiedText::new(self.mode(), text));
        }
        self.in_tag = false;
    }

    /// Feed one chunk; returns the classified runs it produced.
    pub fn feed(&mut self, chunk: &str) -> Vec<ClassifiedText> {
        let mut out = Vec::new();
        for c in chunk.chars() {
            match c {
                '<' => {
                    // A '<' while already buffering a tag means the previous
                    // '<' run was literal content; emit it and restart.
                    if self.in_tag {
                        self.flush_tag_as_literal(&mut out);
                    } else {
                        self.flush_buf(&mut out);
                    }
                    self.in_tag = true;
                    self.tag_buf.push('<');
                }
                '>' if self.in_tag => {
                    self.tag_buf.push('>');
                    match self.tag_buf.as_str() {
                        OPEN_TAG => self.in_thinking = true,
                        CLOSE_TAG => self.in_thinking = false,
                        // Not a thinking tag: the run is literal content in
                        // the mode that was active when it started.
                        _ => {
                            let text = std::mem::take(&mut self.tag_buf);
                            out.push(ClassifiedText::new(self.mode(), text));
                        }
                    }
                    self.tag_buf.clear();
                    self.in_tag = false;
                }
                c if self.in_tag => {
                    self.tag_buf.push(c);
                    // Once the run is longer than any thinking tag it cannot
                    // match; release it so buffering stays bounded.
                    if self.tag_buf.len() > CLOSE_TAG.len() {
                        self.flush_tag_as_literal(&mut out);
                    }
                }
                c => self.buf.push(c),
            }
        }
        self.flush_buf(&mut out);
        out
    }

    /// Stream end: an unterminated tag is emitted as literal content and the
    /// buffer is emitted in its current mode.
    pub fn flush(&mut self) -> Vec<ClassifiedText> {
        let mut out = Vec::new();
        self.flush_tag_as_literal(&mut out);
        self.flush_buf(&mut out);
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
