// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::{ExecutionContext, Tool, ToolArgs, ToolOutput};

/// Loop-breaking built-in names that user registrations can never shadow,
/// whether or not the built-in set has been installed yet.
pub const RESERVED_TOOL_NAMES: [&str; 3] = ["task_completion", "ask_question", "converse"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool name must not be empty")]
    EmptyName,
    #[error("tool name {0:?} is reserved for a built-in tool")]
    ReservedName(String),
    #[error("a tool named {0:?} is already registered")]
    Duplicate(String),
}

/// Schema entry handed to the model for one visible tool.
#[derive(Debug, Clone)]
pub struct ToolSchemaEntry {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// Central registry holding all available tools.
///
/// Built-in tools are installed by the agent builder; user tools arrive via
/// `register` and live in a separate map so capability queries can tell the
/// two apart and built-ins can never be replaced.
#[derive(Default)]
pub struct ToolRegistry {
    builtin: HashMap<String, Arc<dyn Tool>>,
    user: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a built-in tool.  Used by the agent builder only; replaces
    /// any same-named built-in.
    pub fn register_builtin(&mut self, tool: Arc<dyn Tool>) {
        self.builtin.insert(tool.name().to_string(), tool);
    }

    /// Register a user-provided tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if RESERVED_TOOL_NAMES.contains(&name.as_str()) || self.builtin.contains_key(&name) {
            return Err(RegistryError::ReservedName(name));
        }
        if self.user.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.user.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.builtin.get(name).or_else(|| self.user.get(name)).cloned()
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin.contains_key(name)
    }

    pub fn is_loop_breaking(&self, name: &str) -> bool {
        self.get(name).map(|t| t.is_loop_breaking()).unwrap_or(false)
    }

    fn visible(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.builtin
            .values()
            .chain(self.user.values())
            .filter(|t| t.should_show())
    }

    /// Names of all visible tools, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.visible().map(|t| t.name().to_string()).collect();
        names.sort();
        names
    }

    /// Schemas for all visible tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchemaEntry> {
        let mut schemas: Vec<ToolSchemaEntry> = self
            .visible()
            .map(|t| ToolSchemaEntry {
                name: t.name().to_string(),
                description: t.description().to_string(),
                schema: t.schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn len(&self) -> usize {
        self.builtin.len() + self.user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builtin.is_empty() && self.user.is_empty()
    }

    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        name: &str,
        args: &ToolArgs,
    ) -> ToolOutput {
        match self.get(name) {
            Some(tool) => tool.execute(ctx, args).await,
            None => ToolOutput::err(format!("unknown tool: {name}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct EchoTool {
        name: &'static str,
        visible: bool,
    }

    impl EchoTool {
        fn named(name: &'static str) -> Self {
            Self { name, visible: true }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn should_show(&self) -> bool {
            self.visible
        }
        async fn execute(&self, _ctx: &ExecutionContext, args: &ToolArgs) -> ToolOutput {
            ToolOutput::ok(format!("echo:{}", Value::Object(args.clone())))
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool::named("echo"))).unwrap();
        assert!(reg.get("echo").is_some());
    }

    #[test]
    fn get_unknown_returns_none() {
        let reg = ToolRegistry::new();
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn empty_name_rejected() {
        let mut reg = ToolRegistry::new();
        let err = reg.register(Arc::new(EchoTool::named(""))).unwrap_err();
        assert_eq!(err, RegistryError::EmptyName);
    }

    #[test]
    fn reserved_names_rejected_even_without_builtins_installed() {
        let mut reg = ToolRegistry::new();
        for name in RESERVED_TOOL_NAMES {
            let tool: Arc<dyn Tool> = Arc::new(EchoTool { name, visible: true });
            assert!(matches!(
                reg.register(tool),
                Err(RegistryError::ReservedName(_))
            ));
        }
    }

    #[test]
    fn builtin_name_collision_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register_builtin(Arc::new(EchoTool::named("read_file")));
        assert!(matches!(
            reg.register(Arc::new(EchoTool::named("read_file"))),
            Err(RegistryError::ReservedName(_))
        ));
    }

    #[test]
    fn duplicate_user_tool_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool::named("t"))).unwrap();
        assert!(matches!(
            reg.register(Arc::new(EchoTool::named("t"))),
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[test]
    fn names_sorted_and_visible_only() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool::named("b"))).unwrap();
        reg.register(Arc::new(EchoTool::named("a"))).unwrap();
        reg.register(Arc::new(EchoTool { name: "hidden", visible: false }))
            .unwrap();
        assert_eq!(reg.names(), vec!["a", "b"]);
    }

    #[test]
    fn hidden_tool_absent_from_schemas_but_executable() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool { name: "hidden", visible: false }))
            .unwrap();
        assert!(reg.schemas().is_empty());
        assert!(reg.get("hidden").is_some());
    }

    #[test]
    fn builtin_and_user_counted_separately() {
        let mut reg = ToolRegistry::new();
        reg.register_builtin(Arc::new(EchoTool::named("core")));
        reg.register(Arc::new(EchoTool::named("extra"))).unwrap();
        assert_eq!(reg.len(), 2);
        assert!(reg.is_builtin("core"));
        assert!(!reg.is_builtin("extra"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_returns_error() {
        let reg = ToolRegistry::new();
        let ctx = ExecutionContext::new("/tmp");
        let out = reg.execute(&ctx, "missing", &ToolArgs::new()).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool::named("echo"))).unwrap();
        let ctx = ExecutionContext::new("/tmp");
        let out = reg.execute(&ctx, "echo", &ToolArgs::new()).await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("echo:"));
    }
}
