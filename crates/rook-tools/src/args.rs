// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::{bail, Context};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;

use crate::ToolArgs;

/// A tool invocation extracted from an assistant message's `<tool>` block.
///
/// `arguments_xml` is kept opaque here; [`parse_arguments`] decodes it into
/// a map right before the specific tool executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToolCall {
    /// Origin server; the built-in local server when the block has no
    /// `<server>` element
    pub server_name: String,
    pub tool_name: String,
    /// Raw inner XML of the `<arguments>` element
    pub arguments_xml: String,
}

/// Decode the body of a `<tool>` block (the text between `<tool>` and
/// `</tool>`) into its server name, tool name, and raw argument XML.
pub fn parse_tool_block(body: &str) -> anyhow::Result<ParsedToolCall> {
    let mut reader = Reader::from_str(body);
    let mut server_name = String::from("local");
    let mut tool_name = None;
    let mut arguments_xml = String::new();

    loop {
        match reader.read_event().context("malformed tool block")? {
            Event::Start(e) => match e.name().as_ref() {
                b"server" => {
                    server_name = reader
                        .read_text(e.name())
                        .context("unterminated <server> element")?
                        .trim()
                        .to_string();
                }
                b"name" => {
                    tool_name = Some(
                        reader
                            .read_text(e.name())
                            .context("unterminated <name> element")?
                            .trim()
                            .to_string(),
                    );
                }
                b"arguments" => {
                    arguments_xml = reader
                        .read_text(e.name())
                        .context("unterminated <arguments> element")?
                        .to_string();
                }
                _ => {
                    // Unknown element: skip it and its children
                    reader.read_to_end(e.name()).context("malformed tool block")?;
                }
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let Some(tool_name) = tool_name else {
        bail!("tool block has no <name> element");
    };
    if tool_name.is_empty() {
        bail!("tool block has an empty <name> element");
    }
    Ok(ParsedToolCall {
        server_name,
        tool_name,
        arguments_xml,
    })
}

/// Lazily decode an `<arguments>` body into a map.
///
/// Each top-level child element becomes one entry; scalar-looking text is
/// coerced (`true`/`false`, integers, floats), everything else stays a
/// string.  An empty body yields an empty map.
pub fn parse_arguments(arguments_xml: &str) -> anyhow::Result<ToolArgs> {
    let mut args = ToolArgs::new();
    if arguments_xml.trim().is_empty() {
        return Ok(args);
    }
    let mut reader = Reader::from_str(arguments_xml);
    loop {
        match reader.read_event().context("malformed arguments block")? {
            Event::Start(e) => {
                let key = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let raw = reader
                    .read_text(e.name())
                    .with_context(|| format!("unterminated <{key}> element"))?
                    .to_string();
                let text = quick_xml::escape::unescape(&raw)
                    .map(|c| c.to_string())
                    .unwrap_or(raw);
                args.insert(key, coerce_scalar(&text));
            }
            Event::Empty(e) => {
                let key = String::from_utf8_lossy(e.name().as_ref()).to_string();
                args.insert(key, Value::String(String::new()));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(args)
}

fn coerce_scalar(text: &str) -> Value {
    let trimmed = text.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if trimmed.contains('.') {
        if let Ok(f) = trimmed.parse::<f64>() {
            return Value::from(f);
        }
    }
    Value::String(text.to_string())
}

/// String accessor tolerant of scalar coercion: numbers and bools are
/// rendered back to text, so `<offset>10</offset>` still reads as a string
/// where a tool wants one.
pub fn arg_str(args: &ToolArgs, key: &str) -> Option<String> {
    match args.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn arg_usize(args: &ToolArgs, key: &str) -> Option<usize> {
    match args.get(key)? {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
