// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use regex::Regex;

use rook_config::ToolsConfig;

/// Outcome of evaluating the auto-approval policy for a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Run without asking
    Approve,
    /// Never run; rejected without a human in the loop
    Deny,
    /// Manual approval required
    Prompt,
}

/// Policy engine that maps a tool call to an auto-approval decision.
///
/// Two classes of rules: a command whitelist/denylist applied to the
/// `command` argument of `execute_command`, and per-tool auto-approval
/// flags.  Everything else falls through to [`PolicyDecision::Prompt`].
#[derive(Debug, Default)]
pub struct ToolPolicy {
    auto_patterns: Vec<Regex>,
    deny_patterns: Vec<Regex>,
    auto_tools: HashMap<String, bool>,
}

impl ToolPolicy {
    pub fn from_config(cfg: &ToolsConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> {
            patterns.iter().filter_map(|p| glob_to_regex(p)).collect()
        };
        Self {
            auto_patterns: compile(&cfg.auto_approve_patterns),
            deny_patterns: compile(&cfg.deny_patterns),
            auto_tools: cfg.auto_approve_tools.clone(),
        }
    }

    /// Decide whether a shell command should run automatically, be denied,
    /// or prompt the user.  Deny wins over auto.
    pub fn decide_command(&self, command: &str) -> PolicyDecision {
        for re in &self.deny_patterns {
            if re.is_match(command) {
                return PolicyDecision::Deny;
            }
        }
        for re in &self.auto_patterns {
            if re.is_match(command) {
                return PolicyDecision::Approve;
            }
        }
        PolicyDecision::Prompt
    }

    /// Per-tool auto-approval flag.
    pub fn tool_auto_approved(&self, tool_name: &str) -> bool {
        self.auto_tools.get(tool_name).copied().unwrap_or(false)
    }
}

/// Convert a simple shell glob pattern to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Convert a path glob to a [`Regex`].
///
/// Unlike [`glob_to_regex`], `*` and `?` stop at path separators; `**`
/// crosses them, and a `**/` prefix also matches zero directories.
pub fn path_glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
