//! Concrete `EntityStore`: a `dashmap`-backed, in-process implementation
//! sufficient to run the whole engine and its test suite without an
//! external database (§6, Core→Store).

pub mod error;
pub mod seed;

pub use error::StoreError;
pub use seed::{load_seed, SeedData};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use taskforge_core::error::Result;
use taskforge_core::events::{Event, EventFilter};
use taskforge_core::store::EntityStore;
use taskforge_core::task::{Agent, ContextDocument, ConvMessage, Message, Task, TaskState, ToolDecl, ToolKind};
use tracing::debug;

/// The six process-trigger tool names plus the two local tools, seeded into
/// every fresh store's Tools table (§3's "Tools" logical table).
fn default_tool_declarations() -> Vec<ToolDecl> {
    let process_triggers = [
        ("break_down_task", "Split this task into multiple subtasks executed as a group before continuing."),
        ("create_subtask", "Create a single child task and wait for it to finish before continuing."),
        ("end_task", "Declare this task complete with a final result."),
        ("need_more_context", "Request additional context documents be attached to this task."),
        ("need_more_tools", "Request additional tools be attached to this task."),
        ("flag_for_review", "Flag this task for human review without failing it."),
    ];
    let local_tools = [
        ("think", "Record a reasoning note with no side effects."),
        ("calculator", "Evaluate a simple arithmetic expression."),
    ];

    let mut decls: Vec<ToolDecl> = process_triggers
        .iter()
        .map(|(name, description)| ToolDecl {
            name: (*name).into(),
            description: (*description).into(),
            parameter_schema: serde_json::json!({ "type": "object" }),
            category: "process".into(),
            permissions: vec![],
            kind: ToolKind::ProcessTrigger,
        })
        .collect();
    decls.extend(local_tools.iter().map(|(name, description)| ToolDecl {
        name: (*name).into(),
        description: (*description).into(),
        parameter_schema: serde_json::json!({ "type": "object" }),
        category: "local".into(),
        permissions: vec![],
        kind: ToolKind::Local,
    }));
    decls
}

/// In-memory entity store. Each logical table from the persisted layout
/// (Tasks, Agents, Documents, Tools, Messages, Events) is a keyed `DashMap`;
/// a SQL-backed store would map these 1:1 onto real tables behind the same
/// trait.
pub struct InMemoryStore {
    tasks: DashMap<u64, Task>,
    agents: DashMap<String, Agent>,
    documents: DashMap<String, ContextDocument>,
    tools: DashMap<String, ToolDecl>,
    messages: DashMap<u64, Vec<Message>>,
    events: DashMap<u64, Event>,
    next_tree_id: AtomicU64,
    next_agent_id: AtomicU64,
    next_message_id: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        let tools = DashMap::new();
        for decl in default_tool_declarations() {
            tools.insert(decl.name.clone(), decl);
        }
        Self {
            tasks: DashMap::new(),
            agents: DashMap::new(),
            documents: DashMap::new(),
            tools,
            messages: DashMap::new(),
            events: DashMap::new(),
            next_tree_id: AtomicU64::new(0),
            next_agent_id: AtomicU64::new(0),
            next_message_id: AtomicU64::new(0),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads agents and context documents from a `SeedData` bundle,
    /// overwriting any existing entries with the same name. Agents with
    /// `id == 0` are assigned the next available id.
    pub fn seed(&self, data: SeedData) {
        for mut agent in data.agents {
            if agent.id == 0 {
                agent.id = self.next_agent_id.fetch_add(1, Ordering::SeqCst) + 1;
            }
            debug!(agent = %agent.name, "seeding agent");
            self.agents.insert(agent.name.clone(), agent);
        }
        for doc in data.documents {
            debug!(document = %doc.name, "seeding context document");
            self.documents.insert(doc.name.clone(), doc);
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn get_task(&self, id: u64) -> Result<Task> {
        self.tasks
            .get(&id)
            .map(|t| t.clone())
            .ok_or_else(|| StoreError::NotFound { entity: "task", id: id.to_string() }.into())
    }

    async fn get_tasks_by_tree(&self, tree_id: u64) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| entry.tree_id == tree_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_active_tasks(&self) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| !entry.state.is_terminal())
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_root_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        let mut roots: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| entry.parent_id.is_none())
            .map(|entry| entry.value().clone())
            .collect();
        roots.sort_by_key(|t| t.id);
        roots.truncate(limit);
        Ok(roots)
    }

    async fn create_task(&self, task: Task) -> Result<u64> {
        let id = task.id;
        self.tasks.insert(id, task);
        Ok(id)
    }

    async fn update_task_status(
        &self,
        id: u64,
        state: TaskState,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<()> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound { entity: "task", id: id.to_string() })?;
        entry.state = state;
        if result.is_some() {
            entry.result = result;
        }
        if error.is_some() {
            entry.error = error;
        }
        Ok(())
    }

    async fn append_conversation(&self, id: u64, message: ConvMessage) -> Result<()> {
        {
            let mut entry = self
                .tasks
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound { entity: "task", id: id.to_string() })?;
            entry.conversation.push(message.clone());
        }
        self.create_message(id, message).await?;
        Ok(())
    }

    async fn next_tree_id(&self) -> Result<u64> {
        Ok(self.next_tree_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn get_agent_by_name(&self, name: &str) -> Result<Agent> {
        self.agents
            .get(name)
            .map(|a| a.clone())
            .ok_or_else(|| StoreError::NotFound { entity: "agent", id: name.to_string() }.into())
    }

    async fn get_agent_by_id(&self, id: u64) -> Result<Agent> {
        self.agents
            .iter()
            .find(|entry| entry.value().id == id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound { entity: "agent", id: id.to_string() }.into())
    }

    async fn get_all_active_agents(&self) -> Result<Vec<Agent>> {
        Ok(self.agents.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn get_context_documents(&self, names: &[String]) -> Result<Vec<ContextDocument>> {
        Ok(names.iter().filter_map(|n| self.documents.get(n).map(|d| d.clone())).collect())
    }

    async fn get_tools_by_names(&self, names: &[String]) -> Result<Vec<ToolDecl>> {
        Ok(names.iter().filter_map(|n| self.tools.get(n).map(|t| t.clone())).collect())
    }

    async fn create_message(&self, task_id: u64, message: ConvMessage) -> Result<u64> {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.messages.entry(task_id).or_default().push(Message { id, task_id, message });
        Ok(id)
    }

    async fn get_messages_by_task_id(&self, task_id: u64) -> Result<Vec<Message>> {
        Ok(self.messages.get(&task_id).map(|m| m.clone()).unwrap_or_default())
    }

    async fn append_events(&self, batch: Vec<Event>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let len = batch.len();
        for event in batch {
            self.events.insert(event.id, event);
        }
        debug!(count = len, "persisted event batch");
        Ok(())
    }

    async fn query_events(&self, filter: EventFilter) -> Result<Vec<Event>> {
        let mut matched: Vec<Event> = self
            .events
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|e| filter.matches(e))
            .collect();
        matched.sort_by_key(|e| e.id);
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("tasks", &self.tasks.len())
            .field("agents", &self.agents.len())
            .field("documents", &self.documents.len())
            .field("tools", &self.tools.len())
            .field("messages", &self.messages.len())
            .field("events", &self.events.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_core::events::{EntityType, EventKind};
    use taskforge_core::task::Task;

    #[tokio::test]
    async fn create_and_fetch_round_trips() {
        let store = InMemoryStore::new();
        let task = Task::new_root(1, "do the thing".into(), "neutral_task".into());
        store.create_task(task).await.unwrap();

        let fetched = store.get_task(1).await.unwrap();
        assert_eq!(fetched.instruction, "do the thing");
    }

    #[tokio::test]
    async fn update_task_status_merges_result_and_error() {
        let store = InMemoryStore::new();
        store.create_task(Task::new_root(1, "t".into(), "neutral_task".into())).await.unwrap();

        store
            .update_task_status(1, TaskState::Completed, Some(serde_json::json!({"ok": true})), None)
            .await
            .unwrap();

        let task = store.get_task(1).await.unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.result, Some(serde_json::json!({"ok": true})));
        assert!(task.error.is_none());
    }

    #[tokio::test]
    async fn update_missing_task_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.update_task_status(99, TaskState::Failed, None, None).await.unwrap_err();
        assert!(matches!(err, taskforge_core::Error::Store(_)));
    }

    #[tokio::test]
    async fn get_tasks_by_tree_filters_correctly() {
        let store = InMemoryStore::new();
        store.create_task(Task::new_root(1, "root".into(), "neutral_task".into())).await.unwrap();
        store.create_task(Task::new_child(2, 1, 1, "child".into(), "neutral_task".into())).await.unwrap();
        store.create_task(Task::new_root(3, "other tree".into(), "neutral_task".into())).await.unwrap();

        let tree = store.get_tasks_by_tree(1).await.unwrap();
        assert_eq!(tree.len(), 2);
    }

    #[tokio::test]
    async fn seed_loads_agents_and_documents() {
        let store = InMemoryStore::new();
        store.seed(SeedData {
            agents: vec![Agent {
                id: 0,
                name: "planner".into(),
                instruction: "plan carefully".into(),
                context_documents: vec![],
                tools: vec![],
                model: "claude-opus-4-6-20250929".into(),
                permissions: vec![],
            }],
            documents: vec![ContextDocument {
                name: "style-guide".into(),
                content: "be terse".into(),
                tags: vec!["guide".into()],
            }],
        });

        let agent = store.get_agent_by_name("planner").await.unwrap();
        assert_eq!(agent.instruction, "plan carefully");
        let docs = store.get_context_documents(&["style-guide".to_string()]).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn append_events_is_idempotent_on_empty_batch() {
        let store = InMemoryStore::new();
        store.append_events(Vec::new()).await.unwrap();
        assert_eq!(store.event_count(), 0);
    }

    #[tokio::test]
    async fn seeded_agent_is_reachable_by_id() {
        let store = InMemoryStore::new();
        store.seed(SeedData {
            agents: vec![Agent {
                id: 0,
                name: "planner".into(),
                instruction: "plan carefully".into(),
                context_documents: vec![],
                tools: vec![],
                model: "claude-opus-4-6-20250929".into(),
                permissions: vec![],
            }],
            documents: vec![],
        });

        let by_name = store.get_agent_by_name("planner").await.unwrap();
        assert_ne!(by_name.id, 0);
        let by_id = store.get_agent_by_id(by_name.id).await.unwrap();
        assert_eq!(by_id.name, "planner");
    }

    #[tokio::test]
    async fn default_tools_are_queryable_by_name() {
        let store = InMemoryStore::new();
        let tools = store
            .get_tools_by_names(&["end_task".to_string(), "calculator".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(tools.len(), 2);
    }

    #[tokio::test]
    async fn append_conversation_persists_message_row() {
        let store = InMemoryStore::new();
        store.create_task(Task::new_root(1, "t".into(), "neutral_task".into())).await.unwrap();
        store.append_conversation(1, ConvMessage::user("hello")).await.unwrap();

        let messages = store.get_messages_by_task_id(1).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message.content, "hello");
    }

    #[tokio::test]
    async fn query_events_filters_by_kind_and_limit() {
        let store = InMemoryStore::new();
        store
            .append_events(vec![
                Event::new(EventKind::ToolCalled, EntityType::Task, 1),
                Event::new(EventKind::SystemWarning, EntityType::Task, 1),
                Event::new(EventKind::SystemWarning, EntityType::Task, 2),
            ])
            .await
            .unwrap();

        let warnings = store
            .query_events(EventFilter {
                kind: Some(EventKind::SystemWarning),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(warnings.len(), 2);

        let limited = store
            .query_events(EventFilter { limit: Some(1), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}
