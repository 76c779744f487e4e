//! Tool implementations and declarations an agent can call mid-conversation.
//!
//! Two kinds of tool name reach the model: local tools registered here
//! (side-effect-free from the runtime's perspective, executed in-process)
//! and process-trigger names (handled by the process registry in
//! `taskforge-core`, declared here only for their schema).

pub mod local;
pub mod process_declarations;
pub mod registry;

pub use process_declarations::{process_tool_declarations, PROCESS_TOOL_NAMES};
pub use registry::{Tool, ToolRegistry, ToolResult};

/// Builds the registry of local tools every agent can call.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(local::ThinkTool);
    registry.register(local::CalculatorTool);
    registry
}
