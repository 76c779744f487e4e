//! LLM-facing tool declarations for the six built-in process triggers.
//!
//! This crate never executes these — dispatch belongs to the process
//! registry — but the agent wrapper needs their schemas to advertise them
//! to the model alongside the local tools.

use taskforge_llm::LlmTool;

pub const PROCESS_TOOL_NAMES: &[&str] = &[
    "break_down_task",
    "create_subtask",
    "end_task",
    "need_more_context",
    "need_more_tools",
    "flag_for_review",
];

pub fn process_tool_declarations() -> Vec<LlmTool> {
    vec![
        LlmTool {
            name: "break_down_task".into(),
            description: "Split this task into multiple subtasks executed as a group before you continue.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "approach": { "type": "string", "description": "Free-text plan describing how the task splits." },
                    "subtasks": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Optional explicit list of subtask instructions."
                    }
                },
                "required": ["approach"]
            }),
        },
        LlmTool {
            name: "create_subtask".into(),
            description: "Create a single child task and wait for it to finish before continuing.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "subtask_instruction": { "type": "string" },
                    "process": { "type": "string" },
                    "priority": { "type": "string" },
                    "assigned_agent": { "type": "string" },
                    "additional_context": { "type": "array", "items": { "type": "string" } },
                    "additional_tools": { "type": "array", "items": { "type": "string" } },
                    "metadata": { "type": "object" }
                },
                "required": ["subtask_instruction"]
            }),
        },
        LlmTool {
            name: "end_task".into(),
            description: "Declare this task complete with a final result. The authoritative completion signal.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "result": {} },
                "required": ["result"]
            }),
        },
        LlmTool {
            name: "need_more_context".into(),
            description: "Request additional context documents before you can proceed.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "request": { "type": "string" },
                    "justification": { "type": "string" }
                },
                "required": ["request", "justification"]
            }),
        },
        LlmTool {
            name: "need_more_tools".into(),
            description: "Request a tool that isn't currently available to you. Does not block your own progress.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "tool_request": { "type": "string" },
                    "justification": { "type": "string" }
                },
                "required": ["tool_request"]
            }),
        },
        LlmTool {
            name: "flag_for_review".into(),
            description: "Flag this task for human or senior-agent review without blocking your own progress.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string" },
                    "severity": { "type": "string", "enum": ["info", "warning", "critical"] }
                },
                "required": ["reason"]
            }),
        },
    ]
}
