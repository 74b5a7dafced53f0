// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod headless;
mod loader;
mod schema;

pub use headless::{
    ArtifactsConfig, ConfigError, ConstraintsConfig, GitConfig, HeadlessConfig, LoggingConfig,
    QualityGateConfig, RunMode, Verbosity,
};
pub use loader::{load, load_headless};
pub use schema::{
    AgentConfig, Config, GoalBatchConfig, HalfCompactionConfig, ModelConfig, SummarizationConfig,
    ToolBatchConfig, ToolsConfig,
};
