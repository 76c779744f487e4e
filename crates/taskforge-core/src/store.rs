//! `EntityStore`: the persistence contract the runtime requires of its
//! collaborator (§6, Core→Store). The runtime is the single writer for
//! live task-state fields; the store owns durable copies and answers reads.

use crate::events::{Event, EventFilter};
use crate::task::{Agent, ContextDocument, Message, Task, TaskState, ToolDecl};
use async_trait::async_trait;

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_task(&self, id: u64) -> crate::error::Result<Task>;
    async fn get_tasks_by_tree(&self, tree_id: u64) -> crate::error::Result<Vec<Task>>;
    async fn get_active_tasks(&self) -> crate::error::Result<Vec<Task>>;
    async fn get_root_tasks(&self, limit: usize) -> crate::error::Result<Vec<Task>>;
    async fn create_task(&self, task: Task) -> crate::error::Result<u64>;
    async fn update_task_status(
        &self,
        id: u64,
        state: TaskState,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> crate::error::Result<()>;
    async fn append_conversation(&self, id: u64, message: crate::task::ConvMessage) -> crate::error::Result<()>;
    async fn next_tree_id(&self) -> crate::error::Result<u64>;

    async fn get_agent_by_name(&self, name: &str) -> crate::error::Result<Agent>;
    async fn get_agent_by_id(&self, id: u64) -> crate::error::Result<Agent>;
    async fn get_all_active_agents(&self) -> crate::error::Result<Vec<Agent>>;
    async fn get_context_documents(&self, names: &[String]) -> crate::error::Result<Vec<ContextDocument>>;
    async fn get_tools_by_names(&self, names: &[String]) -> crate::error::Result<Vec<ToolDecl>>;

    /// Persists a message as its own row and returns its id, independent of
    /// the copy the runtime keeps inline on `Task::conversation`.
    async fn create_message(&self, task_id: u64, message: crate::task::ConvMessage) -> crate::error::Result<u64>;
    async fn get_messages_by_task_id(&self, task_id: u64) -> crate::error::Result<Vec<Message>>;

    async fn append_events(&self, batch: Vec<Event>) -> crate::error::Result<()>;
    async fn query_events(&self, filter: EventFilter) -> crate::error::Result<Vec<Event>>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryTestStore {
        tasks: Mutex<HashMap<u64, Task>>,
        events: Mutex<Vec<Event>>,
        agents: Mutex<HashMap<String, Agent>>,
        documents: Mutex<HashMap<String, ContextDocument>>,
        tools: Mutex<HashMap<String, ToolDecl>>,
        messages: Mutex<Vec<Message>>,
        next_tree_id: Mutex<u64>,
        next_agent_id: Mutex<u64>,
        next_message_id: Mutex<u64>,
    }

    impl MemoryTestStore {
        pub async fn event_count(&self) -> usize {
            self.events.lock().await.len()
        }

        pub async fn seed_agent(&self, mut agent: Agent) {
            if agent.id == 0 {
                let mut next_id = self.next_agent_id.lock().await;
                *next_id += 1;
                agent.id = *next_id;
            }
            self.agents.lock().await.insert(agent.name.clone(), agent);
        }

        pub async fn seed_document(&self, doc: ContextDocument) {
            self.documents.lock().await.insert(doc.name.clone(), doc);
        }

        pub async fn seed_tool(&self, decl: ToolDecl) {
            self.tools.lock().await.insert(decl.name.clone(), decl);
        }
    }

    #[async_trait]
    impl EntityStore for MemoryTestStore {
        async fn get_task(&self, id: u64) -> crate::error::Result<Task> {
            self.tasks
                .lock()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| crate::error::Error::not_found("task", id.to_string()))
        }

        async fn get_tasks_by_tree(&self, tree_id: u64) -> crate::error::Result<Vec<Task>> {
            Ok(self
                .tasks
                .lock()
                .await
                .values()
                .filter(|t| t.tree_id == tree_id)
                .cloned()
                .collect())
        }

        async fn get_active_tasks(&self) -> crate::error::Result<Vec<Task>> {
            Ok(self
                .tasks
                .lock()
                .await
                .values()
                .filter(|t| !t.state.is_terminal())
                .cloned()
                .collect())
        }

        async fn get_root_tasks(&self, limit: usize) -> crate::error::Result<Vec<Task>> {
            let mut roots: Vec<Task> = self
                .tasks
                .lock()
                .await
                .values()
                .filter(|t| t.parent_id.is_none())
                .cloned()
                .collect();
            roots.sort_by_key(|t| t.id);
            roots.truncate(limit);
            Ok(roots)
        }

        async fn create_task(&self, task: Task) -> crate::error::Result<u64> {
            let id = task.id;
            self.tasks.lock().await.insert(id, task);
            Ok(id)
        }

        async fn update_task_status(
            &self,
            id: u64,
            state: TaskState,
            result: Option<serde_json::Value>,
            error: Option<String>,
        ) -> crate::error::Result<()> {
            let mut tasks = self.tasks.lock().await;
            let task = tasks
                .get_mut(&id)
                .ok_or_else(|| crate::error::Error::not_found("task", id.to_string()))?;
            task.state = state;
            if result.is_some() {
                task.result = result;
            }
            if error.is_some() {
                task.error = error;
            }
            Ok(())
        }

        async fn append_conversation(&self, id: u64, message: crate::task::ConvMessage) -> crate::error::Result<()> {
            {
                let mut tasks = self.tasks.lock().await;
                let task = tasks
                    .get_mut(&id)
                    .ok_or_else(|| crate::error::Error::not_found("task", id.to_string()))?;
                task.conversation.push(message.clone());
            }
            self.create_message(id, message).await?;
            Ok(())
        }

        async fn next_tree_id(&self) -> crate::error::Result<u64> {
            let mut id = self.next_tree_id.lock().await;
            *id += 1;
            Ok(*id)
        }

        async fn get_agent_by_name(&self, name: &str) -> crate::error::Result<Agent> {
            self.agents
                .lock()
                .await
                .get(name)
                .cloned()
                .ok_or_else(|| crate::error::Error::not_found("agent", name))
        }

        async fn get_agent_by_id(&self, id: u64) -> crate::error::Result<Agent> {
            self.agents
                .lock()
                .await
                .values()
                .find(|a| a.id == id)
                .cloned()
                .ok_or_else(|| crate::error::Error::not_found("agent", id.to_string()))
        }

        async fn get_all_active_agents(&self) -> crate::error::Result<Vec<Agent>> {
            Ok(self.agents.lock().await.values().cloned().collect())
        }

        async fn get_context_documents(&self, names: &[String]) -> crate::error::Result<Vec<ContextDocument>> {
            let docs = self.documents.lock().await;
            Ok(names.iter().filter_map(|n| docs.get(n).cloned()).collect())
        }

        async fn get_tools_by_names(&self, names: &[String]) -> crate::error::Result<Vec<ToolDecl>> {
            let tools = self.tools.lock().await;
            Ok(names.iter().filter_map(|n| tools.get(n).cloned()).collect())
        }

        async fn create_message(&self, task_id: u64, message: crate::task::ConvMessage) -> crate::error::Result<u64> {
            let mut next_id = self.next_message_id.lock().await;
            *next_id += 1;
            let id = *next_id;
            self.messages.lock().await.push(Message { id, task_id, message });
            Ok(id)
        }

        async fn get_messages_by_task_id(&self, task_id: u64) -> crate::error::Result<Vec<Message>> {
            Ok(self
                .messages
                .lock()
                .await
                .iter()
                .filter(|m| m.task_id == task_id)
                .cloned()
                .collect())
        }

        async fn append_events(&self, batch: Vec<Event>) -> crate::error::Result<()> {
            self.events.lock().await.extend(batch);
            Ok(())
        }

        async fn query_events(&self, filter: EventFilter) -> crate::error::Result<Vec<Event>> {
            let events = self.events.lock().await;
            let mut matched: Vec<Event> = events.iter().filter(|e| filter.matches(e)).cloned().collect();
            if let Some(limit) = filter.limit {
                matched.truncate(limit);
            }
            Ok(matched)
        }
    }

    pub fn memory_store_for_tests() -> Arc<MemoryTestStore> {
        Arc::new(MemoryTestStore::default())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use test_support::memory_store_for_tests;
