//! Event ledger: the append-only record of everything that happened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    Agent,
    Tool,
    Process,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
    Error,
    Timeout,
    Cancelled,
    Unset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // Entity lifecycle
    EntityCreated,
    EntityUpdated,
    // Task lifecycle
    TaskCreated,
    TaskStateChanged,
    TaskCompleted,
    TaskFailed,
    // Tool call
    ToolCalled,
    ToolCompleted,
    ToolFailed,
    // Process
    ProcessExecuted,
    ProcessFailed,
    DependencyAdded,
    DependencyResolved,
    DependencyFailed,
    // Agent
    AgentPromptSent,
    AgentResponseReceived,
    // Review
    ReviewTriggered,
    OptimizationOpportunity,
    // System / user
    SystemWarning,
    SystemError,
    RuntimeStarted,
    RuntimeStopped,
    UserStep,
}

impl EventKind {
    /// Always-record kinds bypass the sampling policy (§4.7).
    pub fn always_recorded(self) -> bool {
        matches!(
            self,
            EventKind::EntityCreated
                | EventKind::EntityUpdated
                | EventKind::OptimizationOpportunity
                | EventKind::ReviewTriggered
                | EventKind::SystemError
                | EventKind::SystemWarning
                | EventKind::RuntimeStarted
                | EventKind::RuntimeStopped
        )
    }

    /// Fixed sampling rate in [0.0, 1.0] for kinds not always recorded.
    pub fn sample_rate(self) -> f64 {
        match self {
            EventKind::ToolCalled | EventKind::ToolCompleted | EventKind::ToolFailed => 0.10,
            EventKind::AgentPromptSent | EventKind::AgentResponseReceived => 0.20,
            _ => 0.50,
        }
    }
}

/// Immutable record appended to the ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub kind: EventKind,
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub related: HashMap<String, Vec<u64>>,
    pub outcome: Outcome,
    pub duration_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub parent_event_id: Option<u64>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, entity_type: EntityType, entity_id: u64) -> Self {
        Self {
            id: 0,
            kind,
            entity_type,
            entity_id,
            related: HashMap::new(),
            outcome: Outcome::Unset,
            duration_ms: None,
            timestamp: Utc::now(),
            parent_event_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_related(mut self, role: impl Into<String>, ids: Vec<u64>) -> Self {
        self.related.insert(role.into(), ids);
        self
    }
}

/// Filter for `EntityStore::query_events` (§6). Every field is an `AND`ed
/// constraint; `None` means "don't filter on this".
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<u64>,
    pub kind: Option<EventKind>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        self.entity_type.map_or(true, |t| t == event.entity_type)
            && self.entity_id.map_or(true, |id| id == event.entity_id)
            && self.kind.map_or(true, |k| k == event.kind)
            && self.since.map_or(true, |since| event.timestamp >= since)
    }
}
