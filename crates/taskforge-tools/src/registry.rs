//! Tool registry and trait definitions.
//!
//! Each tool is a self-contained module implementing the Tool trait.
//! Tools are added/removed by editing the local tool modules and the
//! `create_default_registry()` function in lib.rs.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use taskforge_llm::LlmTool;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub enum ToolResult {
    Text(String),
    Json(Value),
    Error(String),
}

impl ToolResult {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Self::Error(s.into())
    }

    pub fn to_content_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Json(v) => serde_json::to_string_pretty(v).unwrap_or_default(),
            Self::Error(e) => format!("Error: {e}"),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Implement this to add a new local (side-effect-free from the runtime's
/// point of view) capability an agent can call. Process-trigger tool names
/// are handled separately by the process registry, not through this trait.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// System prompt fragment for this tool, folded into the agent's system
    /// prompt alongside its instruction and context documents.
    fn prompt(&self) -> &str {
        ""
    }

    fn input_schema(&self) -> Value;
    fn is_read_only(&self) -> bool {
        false
    }
    fn is_enabled(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> ToolResult;

    async fn execute_cancellable(&self, args: Value, cancel: CancellationToken) -> ToolResult {
        tokio::select! {
            result = self.execute(args) => result,
            _ = cancel.cancelled() => ToolResult::text("[cancelled]"),
        }
    }

    fn to_llm_tool(&self) -> LlmTool {
        LlmTool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub async fn execute(&self, name: &str, args: Value) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) if tool.is_enabled() => tool.execute(args).await,
            Some(_) => ToolResult::Error(format!("Tool '{name}' is disabled")),
            None => ToolResult::Error(format!("Tool not found: {name}")),
        }
    }

    pub async fn execute_cancellable(&self, name: &str, args: Value, cancel: CancellationToken) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) if tool.is_enabled() => tool.execute_cancellable(args, cancel).await,
            Some(_) => ToolResult::Error(format!("Tool '{name}' is disabled")),
            None => ToolResult::Error(format!("Tool not found: {name}")),
        }
    }

    /// LLM tool definitions for every enabled local tool, keyed by name so
    /// callers can merge in process-trigger declarations without duplicates.
    pub fn get_definitions(&self) -> Vec<LlmTool> {
        self.tools.values().filter(|t| t.is_enabled()).map(|t| t.to_llm_tool()).collect()
    }

    /// Returns only the definitions for tools whose name is in `names`,
    /// preserving the effective tool list the agent wrapper computed.
    pub fn get_definitions_for(&self, names: &[String]) -> Vec<LlmTool> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .filter(|t| t.is_enabled())
            .map(|t| t.to_llm_tool())
            .collect()
    }

    pub fn combined_prompts(&self) -> String {
        self.tools
            .values()
            .filter(|t| t.is_enabled())
            .map(|t| t.prompt())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn list_read_only(&self) -> Vec<&str> {
        self.tools.iter().filter(|(_, t)| t.is_read_only()).map(|(k, _)| k.as_str()).collect()
    }
}
