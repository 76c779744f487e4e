//! Task state machine and the `Task` entity itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a task. See the transition table in `is_valid_transition`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    ProcessAssigned,
    ReadyForAgent,
    WaitingOnDependencies,
    AgentResponding,
    ToolProcessing,
    Completed,
    Failed,
    ManualHold,
}

impl TaskState {
    /// Whether `to` is a legal transition target from `self`.
    pub fn is_valid_transition(self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Created, ProcessAssigned)
                | (Created, Failed)
                | (ProcessAssigned, ReadyForAgent)
                | (ProcessAssigned, Failed)
                | (ReadyForAgent, AgentResponding)
                | (ReadyForAgent, ManualHold)
                | (ReadyForAgent, Failed)
                | (WaitingOnDependencies, ReadyForAgent)
                | (WaitingOnDependencies, Failed)
                | (AgentResponding, ToolProcessing)
                | (AgentResponding, ReadyForAgent)
                | (AgentResponding, Completed)
                | (AgentResponding, Failed)
                | (ToolProcessing, WaitingOnDependencies)
                | (ToolProcessing, ReadyForAgent)
                | (ToolProcessing, Completed)
                | (ToolProcessing, Failed)
                | (ManualHold, ReadyForAgent)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskState::AgentResponding | TaskState::ToolProcessing | TaskState::ProcessAssigned
        )
    }

    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            TaskState::WaitingOnDependencies | TaskState::ManualHold
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::ProcessAssigned => "process_assigned",
            TaskState::ReadyForAgent => "ready_for_agent",
            TaskState::WaitingOnDependencies => "waiting_on_dependencies",
            TaskState::AgentResponding => "agent_responding",
            TaskState::ToolProcessing => "tool_processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::ManualHold => "manual_hold",
        };
        write!(f, "{s}")
    }
}

/// A message in a task's conversation history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConvMessage {
    pub role: ConvRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConvRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ConvMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ConvRole::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRecord>) -> Self {
        Self {
            role: ConvRole::Assistant,
            content: content.into(),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
            at: Utc::now(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ConvRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
            at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A conversation message as its own persisted row (§3, §6: `CreateMessage`
/// / `GetMessagesByTaskId`), distinct from the copy inlined on `Task` for
/// the runtime's own in-flight reads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub task_id: u64,
    pub message: ConvMessage,
}

/// The unit of work scheduled and executed by the runtime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub tree_id: u64,
    pub parent_id: Option<u64>,
    pub instruction: String,
    pub process: String,
    pub agent: Option<String>,
    pub state: TaskState,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub conversation: Vec<ConvMessage>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new_root(id: u64, instruction: String, process: String) -> Self {
        Self {
            id,
            tree_id: id,
            parent_id: None,
            instruction,
            process,
            agent: None,
            state: TaskState::Created,
            result: None,
            error: None,
            metadata: HashMap::new(),
            conversation: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn new_child(
        id: u64,
        tree_id: u64,
        parent_id: u64,
        instruction: String,
        process: String,
    ) -> Self {
        Self {
            id,
            tree_id,
            parent_id: Some(parent_id),
            instruction,
            process,
            agent: None,
            state: TaskState::Created,
            result: None,
            error: None,
            metadata: HashMap::new(),
            conversation: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Attempt to move the task to `new_state`. Returns `false` (and leaves
    /// state unchanged) if the transition isn't legal.
    pub fn try_transition(&mut self, new_state: TaskState) -> bool {
        if !self.state.is_valid_transition(new_state) {
            return false;
        }
        if new_state == TaskState::AgentResponding && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if new_state.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.state = new_state;
        true
    }

    pub fn manual_stepping(&self) -> Option<bool> {
        self.metadata
            .get("manual_stepping")
            .and_then(|v| v.as_bool())
    }

    pub fn max_execution_time(&self) -> Option<u64> {
        self.metadata
            .get("max_execution_time")
            .and_then(|v| v.as_u64())
    }
}

/// Static agent configuration consumed by the agent invocation wrapper.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    /// Assigned by the store on insertion; `0` in hand-authored seed data
    /// means "assign me one".
    #[serde(default)]
    pub id: u64,
    pub name: String,
    pub instruction: String,
    pub context_documents: Vec<String>,
    pub tools: Vec<String>,
    pub model: String,
    pub permissions: Vec<String>,
}

/// A tool's persisted declaration (§3): schema and discriminator, kept
/// separate from the in-process `Tool` trait object that executes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    ProcessTrigger,
    Local,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    pub parameter_schema: serde_json::Value,
    pub category: String,
    pub permissions: Vec<String>,
    pub kind: ToolKind,
}

/// A context document whose contents are folded into an agent's system prompt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextDocument {
    pub name: String,
    pub content: String,
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_closed() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Completed.is_valid_transition(TaskState::ReadyForAgent));
        assert!(!TaskState::Failed.is_valid_transition(TaskState::Completed));
    }

    #[test]
    fn classification_matches_spec() {
        assert!(TaskState::AgentResponding.is_active());
        assert!(TaskState::ToolProcessing.is_active());
        assert!(TaskState::ProcessAssigned.is_active());
        assert!(TaskState::WaitingOnDependencies.is_waiting());
        assert!(TaskState::ManualHold.is_waiting());
    }

    #[test]
    fn invalid_transition_leaves_state_unchanged() {
        let mut t = Task::new_root(1, "do thing".into(), "default".into());
        assert!(!t.try_transition(TaskState::Completed));
        assert_eq!(t.state, TaskState::Created);
    }

    #[test]
    fn happy_path_transition_sequence() {
        let mut t = Task::new_root(1, "do thing".into(), "default".into());
        assert!(t.try_transition(TaskState::ProcessAssigned));
        assert!(t.try_transition(TaskState::ReadyForAgent));
        assert!(t.try_transition(TaskState::AgentResponding));
        assert!(t.started_at.is_some());
        assert!(t.try_transition(TaskState::ToolProcessing));
        assert!(t.try_transition(TaskState::WaitingOnDependencies));
        assert!(t.try_transition(TaskState::ReadyForAgent));
        assert!(t.try_transition(TaskState::AgentResponding));
        assert!(t.try_transition(TaskState::Completed));
        assert!(t.completed_at.is_some());
    }
}
