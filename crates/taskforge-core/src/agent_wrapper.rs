//! Agent invocation wrapper: assembles one model request from a task's
//! configuration and conversation, calls the provider, and parses the turn.

use crate::store::EntityStore;
use crate::task::{ConvMessage, ConvRole, ToolCallRecord};
use std::sync::Arc;
use taskforge_llm::{LlmContent, LlmMessage, LlmProvider, LlmRequest};
use taskforge_tools::{process_tool_declarations, ToolRegistry};
use tokio_util::sync::CancellationToken;

const COMPLETION_PHRASES: &[&str] = &[
    "task is complete",
    "task completed",
    "successfully completed",
    "finished the task",
];

const DEFAULT_INSTRUCTION: &str = "You are a focused task-execution agent. Use the available tools to make progress, and call end_task once the task instruction is fully satisfied.";

#[derive(Debug)]
pub enum AgentInvocationError {
    Timeout,
    Cancelled,
    Other(String),
}

impl std::fmt::Display for AgentInvocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "agent invocation timed out"),
            Self::Cancelled => write!(f, "agent invocation cancelled"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// The parsed result of one model turn, handed to the event handler.
#[derive(Clone, Debug)]
pub struct AgentOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Advisory only — the runtime never completes a task on this alone.
    pub completion_hint: bool,
}

pub async fn invoke_agent(
    task_id: u64,
    store: Arc<dyn EntityStore>,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    cancel: CancellationToken,
) -> Result<AgentOutcome, AgentInvocationError> {
    let task = store.get_task(task_id).await.map_err(|e| AgentInvocationError::Other(e.to_string()))?;

    let (instruction, agent_context_docs, agent_tool_names, model) = match &task.agent {
        Some(name) => match store.get_agent_by_name(name).await {
            Ok(agent) => (agent.instruction, agent.context_documents, agent.tools, agent.model),
            Err(_) => (DEFAULT_INSTRUCTION.to_string(), Vec::new(), Vec::new(), default_model()),
        },
        None => (DEFAULT_INSTRUCTION.to_string(), Vec::new(), Vec::new(), default_model()),
    };

    let mut context_doc_names = agent_context_docs;
    if let Some(extra) = task.metadata.get("additional_context").and_then(|v| v.as_array()) {
        context_doc_names.extend(extra.iter().filter_map(|v| v.as_str()).map(str::to_string));
    }
    context_doc_names.sort();
    context_doc_names.dedup();

    let documents = if context_doc_names.is_empty() {
        Vec::new()
    } else {
        store
            .get_context_documents(&context_doc_names)
            .await
            .map_err(|e| AgentInvocationError::Other(e.to_string()))?
    };

    let mut system = instruction;
    for doc in &documents {
        system.push_str("\n\n---\n");
        system.push_str(&doc.name);
        system.push('\n');
        system.push_str(&doc.content);
    }

    let mut effective_tools = agent_tool_names;
    if let Some(extra) = task.metadata.get("additional_tools").and_then(|v| v.as_array()) {
        effective_tools.extend(extra.iter().filter_map(|v| v.as_str()).map(str::to_string));
    }
    if effective_tools.is_empty() {
        effective_tools = tools.list().into_iter().map(str::to_string).collect();
    }

    let mut tool_decls = tools.get_definitions_for(&effective_tools);
    tool_decls.extend(process_tool_declarations());

    let mut messages: Vec<LlmMessage> = task
        .conversation
        .iter()
        .map(|m| LlmMessage {
            role: role_to_str(m.role).to_string(),
            content: LlmContent::Text(m.content.clone()),
        })
        .collect();
    if messages.is_empty() {
        messages.push(LlmMessage {
            role: "user".to_string(),
            content: LlmContent::Text(task.instruction.clone()),
        });
    }

    let request = LlmRequest {
        model,
        system: Some(system),
        messages,
        tools: Some(tool_decls),
        max_tokens: Some(8192),
        temperature: None,
    };

    let response = provider
        .generate(request, Some(cancel))
        .await
        .map_err(|e| match e {
            taskforge_llm::LlmError::Cancelled => AgentInvocationError::Cancelled,
            other => AgentInvocationError::Other(other.to_string()),
        })?;

    let tool_calls: Vec<ToolCallRecord> = response
        .tool_calls
        .into_iter()
        .map(|c| ToolCallRecord {
            id: c.call_id,
            name: c.name,
            arguments: c.arguments,
        })
        .collect();

    let completion_hint = tool_calls.iter().any(|c| c.name == "end_task")
        || COMPLETION_PHRASES.iter().any(|p| response.content.to_lowercase().contains(p));

    store
        .append_conversation(task_id, ConvMessage::assistant(response.content.clone(), tool_calls.clone()))
        .await
        .map_err(|e| AgentInvocationError::Other(e.to_string()))?;

    Ok(AgentOutcome {
        content: response.content,
        tool_calls,
        completion_hint,
    })
}

fn role_to_str(role: ConvRole) -> &'static str {
    match role {
        ConvRole::System => "system",
        ConvRole::User => "user",
        ConvRole::Assistant => "assistant",
        ConvRole::Tool => "tool",
    }
}

fn default_model() -> String {
    "claude-opus-4-6-20250929".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::memory_store_for_tests;
    use crate::task::Task;
    use taskforge_llm::{FakeProvider, ScriptedTurn};

    #[tokio::test]
    async fn detects_end_task_tool_call_as_completion_hint() {
        let store = memory_store_for_tests();
        let task = Task::new_root(1, "do the thing".into(), "neutral_task".into());
        store.create_task(task).await.unwrap();

        let provider = Arc::new(FakeProvider::new(vec![ScriptedTurn::ToolCall {
            name: "end_task".into(),
            arguments: serde_json::json!({ "result": "ok" }),
        }]));
        let tools = Arc::new(taskforge_tools::create_default_registry());

        let outcome = invoke_agent(1, store, provider, tools, CancellationToken::new()).await.unwrap();
        assert!(outcome.completion_hint);
        assert_eq!(outcome.tool_calls[0].name, "end_task");
    }

    #[tokio::test]
    async fn textual_completion_phrase_sets_hint_without_tool_call() {
        let store = memory_store_for_tests();
        let task = Task::new_root(2, "do the thing".into(), "neutral_task".into());
        store.create_task(task).await.unwrap();

        let provider = Arc::new(FakeProvider::new(vec![ScriptedTurn::Text(
            "I have successfully completed the task.".into(),
        )]));
        let tools = Arc::new(taskforge_tools::create_default_registry());

        let outcome = invoke_agent(2, store, provider, tools, CancellationToken::new()).await.unwrap();
        assert!(outcome.completion_hint);
        assert!(outcome.tool_calls.is_empty());
    }
}
