// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
const OPEN_MARKER: &str = "<tool>";
const CLOSE_MARKER: &str = "</tool>";

/// Output of the streaming tool-block extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolBlockEvent {
    /// Text outside the tool block
    Ordinary(String),
    /// The opening `<tool>` marker was recognised
    Started,
    /// A piece of the (opaque) block body
    Body(String),
    /// The block closed; carries the complete accumulated body
    Completed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Scanning,
    InBlock,
    Done,
}

/// Streaming extractor for exactly one `<tool>…</tool>` block.
///
/// Content outside the block is ordinary; the body is treated as opaque
/// bytes.  Nested `<tool>` openings inside the body are depth-tracked so a
/// body that quotes the markers does not terminate the block early.  After
/// the first block closes, everything else — including further `<tool>`
/// markers — is ordinary content.
#[derive(Debug)]
pub struct ToolBlockParser {
    state: State,
    carry: String,
    body: String,
    depth: usize,
}

impl Default for ToolBlockParser {
    fn default() -> Self {
        Self {
            state: State::Scanning,
            carry: String::new(),
            body: String::new(),
            depth: 0,
        }
    }
}

impl ToolBlockParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the events it produced.
    pub fn feed(&mut self, chunk: &str) -> Vec<ToolBlockEvent> {
        self.carry.push_str(chunk);
        let mut out = Vec::new();
        loop {
            match self.state {
                State::Scanning => {
                    if let Some(pos) = self.carry.find(OPEN_MARKER) {
                        if pos > 0 {
                            out.push(ToolBlockEvent::Ordinary(
                                self.carry[..pos].to_string(),
                            ));
                        }
                        self.carry.drain(..pos + OPEN_MARKER.len());
                        self.depth = 1;
                        self.state = State::InBlock;
                        out.push(ToolBlockEvent::Started);
                    } else {
                        self.emit_safe_prefix(&mut out, &[OPEN_MARKER], false);
                        break;
                    }
                }
                State::InBlock => {
                    let open = self.carry.find(OPEN_MARKER);
                    let close = self.carry.find(CLOSE_MARKER);
                    match (open, close) {
                        (Some(o), Some(c)) if o < c => self.consume_nested_open(&mut out, o),
                        (Some(o), None) => self.consume_nested_open(&mut out, o),
                        (_, Some(c)) => {
                            self.depth -= 1;
                            if self.depth == 0 {
                                if c > 0 {
                                    let piece = self.carry[..c].to_string();
                                    self.body.push_str(&piece);
                                    out.push(ToolBlockEvent::Body(piece));
                                }
                                self.carry.drain(..c + CLOSE_MARKER.len());
                                self.state = State::Done;
                                out.push(ToolBlockEvent::Completed(self.body.clone()));
                            } else {
                                // A close for a nested open stays in the body.
                                let piece = self.carry[..c + CLOSE_MARKER.len()].to_string();
                                self.body.push_str(&piece);
                                out.push(ToolBlockEvent::Body(piece));
                                self.carry.drain(..c + CLOSE_MARKER.len());
                            }
                        }
                        (None, None) => {
                            self.emit_safe_prefix(&mut out, &[OPEN_MARKER, CLOSE_MARKER], true);
                            break;
                        }
                    }
                }
                State::Done => {
                    if !self.carry.is_empty() {
                        out.push(ToolBlockEvent::Ordinary(std::mem::take(&mut self.carry)));
                    }
                    break;
                }
            }
        }
        out
    }

    /// Stream end.  An unterminated block is malformed: its collected bytes
    /// (opening marker included) are downgraded to ordinary content.
    pub fn flush(&mut self) -> Vec<ToolBlockEvent> {
        let mut out = Vec::new();
        match self.state {
            State::Scanning | State::Done => {
                if !self.carry.is_empty() {
                    out.push(ToolBlockEvent::Ordinary(std::mem::take(&mut self.carry)));
                }
            }
            State::InBlock => {
                let mut text = String::from(OPEN_MARKER);
                text.push_str(&self.body);
                text.push_str(&self.carry);
                self.body.clear();
                self.carry.clear();
                self.state = State::Done;
                out.push(ToolBlockEvent::Ordinary(text));
            }
        }
        out
    }

    /// True once a complete block has been extracted.
    pub fn completed(&self) -> bool {
        self.state == State::Done && !self.body.is_empty()
    }

    fn consume_nested_open(&mut self, out: &mut Vec<ToolBlockEvent>, pos: usize) {
        self.depth += 1;
        let piece = self.carry[..pos + OPEN_MARKER.len()].to_string();
        self.body.push_str(&piece);
        out.push(ToolBlockEvent::Body(piece));
        self.carry.drain(..pos + OPEN_MARKER.len());
    }

    /// Emit everything except a trailing run that could still become one of
    /// `markers` once more input arrives.
    fn emit_safe_prefix(
        &mut self,
        out: &mut Vec<ToolBlockEvent>,
        markers: &[&str],
        in_body: bool,
    ) {
        let hold = holdback_len(&self.carry, markers);
        let emit_len = self.carry.len() - hold;
        if emit_len == 0 {
            return;
        }
        let piece: String = self.carry.drain(..emit_len).collect();
        if in_body {
            self.body.push_str(&piece);
            out.push(ToolBlockEvent::Body(piece));
        } else {
            out.push(ToolBlockEvent::Ordinary(piece));
        }
    }
}

/// Length of the longest suffix of `s` that is a proper prefix of any marker.
fn holdback_len(s: &str, markers: &[&str]) -> usize {
    let max = markers.iter().map(|m| m.len() - 1).max().unwrap_or(0);
    let start = s.len().saturating_sub(max);
    for i in start..s.len() {
        if !s.is_char_boundary(i) {
            continue;
        }
        let suffix = &s[i..];
        if markers.iter().any(|m| m.starts_with(suffix)) {
            return s.len() - i;
        }
    }
    0
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed chunks; return (ordinary_text, completed_body).
    fn run(chunks: &[&str]) -> (String, Option<String>) {
        let mut p = ToolBlockParser::new();
        let mut ordinary = String::new();
        let mut completed = None;
        let mut sink = |evs: Vec<ToolBlockEvent>| {
            for ev in evs {
                match ev {
                    ToolBlockEvent::Ordinary(t) => ordinary.push_str(&t),
                    ToolBlockEvent::Completed(b) => completed = Some(b),
                    _ => {}
                }
            }
        };
        for c in chunks {
            sink(p.feed(c));
        }
        sink(p.flush());
        (ordinary, completed)
    }

    #[test]
    fn plain_text_is_ordinary() {
        let (ord, body) = run(&["no tool call here"]);
        assert_eq!(ord, "no tool call here");
        assert!(body.is_none());
    }

    #[test]
    fn extracts_single_block() {
        let (ord, body) = run(&["before <tool><name>x</name></tool> after"]);
        assert_eq!(ord, "before  after");
        assert_eq!(body.as_deref(), Some("<name>x</name>"));
    }

    #[test]
    fn block_split_across_chunks() {
        let (ord, body) = run(&["pre<to", "ol><name>y</na", "me></to", "ol>post"]);
        assert_eq!(ord, "prepost");
        assert_eq!(body.as_deref(), Some("<name>y</name>"));
    }

    #[test]
    fn body_angle_brackets_do_not_terminate() {
        let (_, body) = run(&["<tool><arguments><diff>a < b > c</diff></arguments></tool>"]);
        assert_eq!(
            body.as_deref(),
            Some("<arguments><diff>a < b > c</diff></arguments>")
        );
    }

    #[test]
    fn nested_tool_markers_tracked_by_depth() {
        let (ord, body) = run(&["<tool>outer<tool>inner</tool>rest</tool>tail"]);
        assert_eq!(body.as_deref(), Some("outer<tool>inner</tool>rest"));
        assert_eq!(ord, "tail");
    }

    #[test]
    fn unterminated_block_downgraded_to_ordinary() {
        let (ord, body) = run(&["say <tool><name>x</name>"]);
        assert!(body.is_none());
        assert_eq!(ord, "say <tool><name>x</name>");
    }

    #[test]
    fn second_block_after_completion_is_ordinary() {
        let (ord, body) = run(&["<tool>one</tool><tool>two</tool>"]);
        assert_eq!(body.as_deref(), Some("one"));
        assert_eq!(ord, "<tool>two</tool>");
    }

    #[test]
    fn partial_marker_at_chunk_boundary_held_back() {
        // "<to" alone must not be emitted as ordinary until disambiguated.
        let mut p = ToolBlockParser::new();
        let evs = p.feed("text <to");
        assert_eq!(evs, vec![ToolBlockEvent::Ordinary("text ".into())]);
        let evs = p.feed("ols are great");
        // "<tools are great" — not a marker, all ordinary
        let joined: String = evs
            .iter()
            .filter_map(|e| match e {
                ToolBlockEvent::Ordinary(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(joined, "<tools are great");
    }

    #[test]
    fn body_streamed_incrementally() {
        let mut p = ToolBlockParser::new();
        let _ = p.feed("<tool>part1 ");
        let evs = p.feed("part2");
        assert!(evs
            .iter()
            .any(|e| matches!(e, ToolBlockEvent::Body(t) if t.contains("part2"))));
    }

    #[test]
    fn started_event_emitted_once() {
        let mut p = ToolBlockParser::new();
        let evs = p.feed("<tool>body</tool>");
        let starts = evs
            .iter()
            .filter(|e| matches!(e, ToolBlockEvent::Started))
            .count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn completed_flag_reflects_state() {
        let mut p = ToolBlockParser::new();
        assert!(!p.completed());
        p.feed("<tool>b</tool>");
        assert!(p.completed());
    }
}
