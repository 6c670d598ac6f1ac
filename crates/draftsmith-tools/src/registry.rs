use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use draftsmith_core::error::{DraftsmithError, Result};
use draftsmith_core::traits::Tool;
use draftsmith_core::types::{ToolContext, ToolDefinition, ToolResult};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout_override: Option<u64>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout_override: None,
        }
    }

    /// Use `secs` for every tool instead of each tool's own timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_override = Some(secs);
        self
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Tool definitions for the LLM, sorted by name so requests are stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| DraftsmithError::ToolNotFound(name.to_string()))?;

        let timeout_secs = self.timeout_override.unwrap_or_else(|| tool.timeout_secs());
        debug!(tool = name, timeout_secs, "Executing tool");

        match tokio::time::timeout(Duration::from_secs(timeout_secs), tool.execute(input, ctx)).await
        {
            Ok(result) => result,
            Err(_) => Err(DraftsmithError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs,
            }),
        }
    }

    /// Create a registry with one tool per handler.
    pub fn with_handlers() -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::SummaryTool);
        registry.register(crate::builtin::ReplyTool);
        registry.register(crate::builtin::NewTool);
        registry.register(crate::builtin::ReviseTool);
        registry.register(crate::builtin::GeneralTool);
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
