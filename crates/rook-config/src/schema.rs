// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "openai" (any OpenAI-compatible endpoint) or "mock".
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies, LiteLLM, or llama.cpp.
    pub base_url: Option<String>,
    /// Context window size in tokens
    pub max_context_tokens: Option<usize>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_context_tokens: Some(128_000),
            temperature: Some(0.2),
        }
    }
}

fn default_max_tool_rounds() -> u32 {
    100
}
fn default_approval_timeout_secs() -> u64 {
    300
}
fn default_channel_buffer() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of autonomous tool-call iterations per turn
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Seconds to wait for a human approval decision before timing out
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    /// Buffer size for the agent's event / input / approval channels
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    /// System prompt override; leave None to use the built-in prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Extra instructions appended to the built-in system prompt
    #[serde(default)]
    pub custom_instructions: Option<String>,
    #[serde(default)]
    pub summarization: SummarizationConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            approval_timeout_secs: default_approval_timeout_secs(),
            channel_buffer: default_channel_buffer(),
            system_prompt: None,
            custom_instructions: None,
            summarization: SummarizationConfig::default(),
        }
    }
}

/// Tuning for the three layered summarization strategies.
///
/// The strategies run in a fixed order (tool-call batches, then threshold
/// half-compaction, then goal batching); each section below configures one
/// of them.  The defaults match long-session behaviour on 128k-token models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizationConfig {
    #[serde(default)]
    pub tool_batch: ToolBatchConfig,
    #[serde(default)]
    pub half_compaction: HalfCompactionConfig,
    #[serde(default)]
    pub goal_batch: GoalBatchConfig,
    /// Model used for summarization calls.  When set and the provider can
    /// clone itself with a different model, summaries run on this (typically
    /// cheaper) model while the main loop keeps the configured one.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_min_tool_calls() -> usize {
    10
}
fn default_max_tool_call_distance() -> usize {
    40
}
fn default_messages_old_threshold() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolBatchConfig {
    /// Buffer count that triggers a batch summarization run
    #[serde(default = "default_min_tool_calls")]
    pub min_tool_calls: usize,
    /// Distance from the oldest buffered tool call to the end of memory that
    /// triggers a run even below the count threshold
    #[serde(default = "default_max_tool_call_distance")]
    pub max_tool_call_distance: usize,
    /// Messages within this distance of the end are "recent" and exempt
    #[serde(default = "default_messages_old_threshold")]
    pub messages_old_threshold: usize,
}

impl Default for ToolBatchConfig {
    fn default() -> Self {
        Self {
            min_tool_calls: default_min_tool_calls(),
            max_tool_call_distance: default_max_tool_call_distance(),
            messages_old_threshold: default_messages_old_threshold(),
        }
    }
}

fn default_threshold_percent() -> f64 {
    80.0
}
fn default_min_messages() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HalfCompactionConfig {
    /// Context usage percentage at which half-compaction triggers.
    /// Values outside [0, 100] are clamped.
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: f64,
    /// Minimum number of non-system messages before compaction is considered
    #[serde(default = "default_min_messages")]
    pub min_messages: usize,
}

impl Default for HalfCompactionConfig {
    fn default() -> Self {
        Self {
            threshold_percent: default_threshold_percent(),
            min_messages: default_min_messages(),
        }
    }
}

fn default_min_turns_to_compact() -> usize {
    3
}
fn default_max_turns_per_batch() -> usize {
    6
}
fn default_goal_batch_old_threshold() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalBatchConfig {
    /// Complete turns required in the eligible window before batching
    #[serde(default = "default_min_turns_to_compact")]
    pub min_turns_to_compact: usize,
    /// Upper bound on turns folded into a single goal batch
    #[serde(default = "default_max_turns_per_batch")]
    pub max_turns_per_batch: usize,
    /// Messages within this distance of the end are exempt from batching
    #[serde(default = "default_goal_batch_old_threshold")]
    pub min_messages_old_threshold: usize,
}

impl Default for GoalBatchConfig {
    fn default() -> Self {
        Self {
            min_turns_to_compact: default_min_turns_to_compact(),
            max_turns_per_batch: default_max_turns_per_batch(),
            min_messages_old_threshold: default_goal_batch_old_threshold(),
        }
    }
}

fn default_command_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Automatically approve shell commands matching these glob patterns
    pub auto_approve_patterns: Vec<String>,
    /// Block shell commands matching these glob patterns
    pub deny_patterns: Vec<String>,
    /// Per-tool auto-approval flags; `true` skips the approval prompt
    #[serde(default)]
    pub auto_approve_tools: HashMap<String, bool>,
    /// Timeout in seconds for a single `execute_command` invocation
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: vec![
                "cat *".into(),
                "ls *".into(),
                "find *".into(),
                "rg *".into(),
                "grep *".into(),
            ],
            deny_patterns: vec!["rm -rf /*".into(), "dd if=*".into()],
            auto_approve_tools: HashMap::new(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_model_provider_is_openai() {
        let c = Config::default();
        assert_eq!(c.model.provider, "openai");
    }

    #[test]
    fn config_default_approval_timeout_is_five_minutes() {
        let c = Config::default();
        assert_eq!(c.agent.approval_timeout_secs, 300);
    }

    #[test]
    fn config_default_summarization_thresholds() {
        let s = SummarizationConfig::default();
        assert_eq!(s.tool_batch.min_tool_calls, 10);
        assert_eq!(s.tool_batch.max_tool_call_distance, 40);
        assert_eq!(s.tool_batch.messages_old_threshold, 20);
        assert_eq!(s.half_compaction.min_messages, 4);
        assert_eq!(s.goal_batch.min_turns_to_compact, 3);
        assert_eq!(s.goal_batch.max_turns_per_batch, 6);
    }

    #[test]
    fn config_default_tools_has_auto_approve_patterns() {
        let c = Config::default();
        assert!(!c.tools.auto_approve_patterns.is_empty());
    }

    #[test]
    fn config_partial_yaml_fills_in_defaults() {
        let yaml_str = "model:\n  name: gpt-4o-mini\n  provider: openai\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(c.model.name, "gpt-4o-mini");
        assert_eq!(c.agent.max_tool_rounds, AgentConfig::default().max_tool_rounds);
    }

    #[test]
    fn summarization_yaml_round_trip() {
        let yaml = "agent:\n  summarization:\n    half_compaction:\n      threshold_percent: 65\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.agent.summarization.half_compaction.threshold_percent, 65.0);
        let back = serde_yaml::to_string(&c).unwrap();
        let c2: Config = serde_yaml::from_str(&back).unwrap();
        assert_eq!(c2.agent.summarization.half_compaction.threshold_percent, 65.0);
    }

    #[test]
    fn summarization_model_defaults_to_none() {
        let c = Config::default();
        assert!(c.agent.summarization.model.is_none());
    }

    #[test]
    fn auto_approve_tools_deserialised_from_yaml() {
        let yaml = "tools:\n  auto_approve_tools:\n    read_file: true\n    write_file: false\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.tools.auto_approve_tools.get("read_file"), Some(&true));
        assert_eq!(c.tools.auto_approve_tools.get("write_file"), Some(&false));
    }
}
