//! Runtime engine: the single-process event-driven scheduler.

use crate::agent_wrapper::{invoke_agent, AgentInvocationError};
use crate::error::{Error, Result};
use crate::events::{EntityType, Event, EventKind, Outcome};
use crate::graph::DependencyGraph;
use crate::handler::{Handler, RuntimeEvent};
use crate::ids::IdGenerator;
use crate::ledger::EventLedger;
use crate::processes::{create_default_registry, ProcessContext, ProcessOutcome, ProcessRegistry};
use crate::store::EntityStore;
use crate::task::{Task, TaskState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use taskforge_llm::LlmProvider;
use taskforge_tools::ToolRegistry;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Global and per-scope knobs the main loop checks before invoking an agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub max_concurrent_agents: usize,
    pub max_consecutive_calls_per_tree: u64,
    pub processing_tick_ms: u64,
    pub manual_stepping_enabled: bool,
    pub auto_trigger: bool,
    pub max_task_depth: u32,
    pub max_subtasks_per_task: usize,
    pub default_task_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 4,
            max_consecutive_calls_per_tree: 50,
            processing_tick_ms: 200,
            manual_stepping_enabled: false,
            auto_trigger: true,
            max_task_depth: 10,
            max_subtasks_per_task: 20,
            default_task_timeout_ms: 120_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Push message kind emitted to the front door for every relevant transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushKind {
    TaskCreated,
    TaskUpdated,
    TaskCompleted,
    TaskSpawned,
    AgentStarted,
    AgentThinking,
    AgentToolCall,
    AgentToolResult,
    AgentCompleted,
    AgentError,
    StepModePause,
    SystemMessage,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushMessage {
    pub kind: PushKind,
    pub task_id: u64,
    pub tree_id: u64,
    pub agent: Option<String>,
    pub content: serde_json::Value,
    pub at: chrono::DateTime<chrono::Utc>,
}

impl PushMessage {
    fn new(kind: PushKind, task_id: u64, tree_id: u64, content: serde_json::Value) -> Self {
        Self {
            kind,
            task_id,
            tree_id,
            agent: None,
            content,
            at: chrono::Utc::now(),
        }
    }
}

struct TreeOverrides {
    manual_stepping: Option<bool>,
    consecutive_calls: u64,
}

/// The runtime's live, in-memory view of tasks. Only the main loop touches
/// this map; background invocations communicate back solely via events.
struct LiveTask {
    state: TaskState,
    depth: u32,
    invocation_active: bool,
}

pub struct RuntimeEngine {
    store: Arc<dyn EntityStore>,
    graph: Arc<DependencyGraph>,
    ids: Arc<IdGenerator>,
    ledger: Arc<EventLedger>,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    processes: Arc<ProcessRegistry>,
    settings: RwLock<RuntimeSettings>,
    live: Mutex<HashMap<u64, LiveTask>>,
    trees: Mutex<HashMap<u64, TreeOverrides>>,
    active_invocations: AtomicUsize,
    events_in: mpsc::Sender<RuntimeEvent>,
    events_out: Mutex<mpsc::Receiver<RuntimeEvent>>,
    push: mpsc::UnboundedSender<PushMessage>,
    shutdown: CancellationToken,
    next_event_id: AtomicU64,
    wake: Notify,
    self_ref: Weak<Self>,
}

const EVENT_QUEUE_CAPACITY: usize = 4096;

impl RuntimeEngine {
    pub fn new(
        store: Arc<dyn EntityStore>,
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        settings: RuntimeSettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PushMessage>) {
        let (events_in, events_out) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (push, push_rx) = mpsc::unbounded_channel();
        let engine = Arc::new_cyclic(|self_ref| Self {
            store: store.clone(),
            graph: Arc::new(DependencyGraph::new()),
            ids: Arc::new(IdGenerator::new()),
            ledger: Arc::new(EventLedger::new(store)),
            provider,
            tools,
            processes: Arc::new(create_default_registry()),
            settings: RwLock::new(settings),
            live: Mutex::new(HashMap::new()),
            trees: Mutex::new(HashMap::new()),
            active_invocations: AtomicUsize::new(0),
            events_in,
            events_out: Mutex::new(events_out),
            push,
            shutdown: CancellationToken::new(),
            next_event_id: AtomicU64::new(1),
            wake: Notify::new(),
            self_ref: self_ref.clone(),
        });
        (engine, push_rx)
    }

    pub async fn settings(&self) -> RuntimeSettings {
        self.settings.read().await.clone()
    }

    pub async fn update_settings(&self, f: impl FnOnce(&mut RuntimeSettings)) {
        let mut settings = self.settings.write().await;
        f(&mut settings);
    }

    pub fn ledger(&self) -> &Arc<EventLedger> {
        &self.ledger
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Submits a new root task, returning its id and tree id.
    pub async fn submit_task(
        &self,
        instruction: String,
        agent: Option<String>,
        process: Option<String>,
    ) -> Result<(u64, u64)> {
        let id = self.ids.next();
        let mut task = Task::new_root(id, instruction, process.unwrap_or_else(|| "neutral_task".into()));
        task.agent = agent;
        let tree_id = task.tree_id;
        self.store.create_task(task).await?;
        self.graph.add_task(id).await;

        self.live.lock().await.insert(
            id,
            LiveTask {
                state: TaskState::Created,
                depth: 0,
                invocation_active: false,
            },
        );
        self.trees.lock().await.entry(tree_id).or_insert_with(|| TreeOverrides {
            manual_stepping: None,
            consecutive_calls: 0,
        });

        self.ledger
            .append(Event::new(EventKind::TaskCreated, EntityType::Task, id).with_outcome(Outcome::Success))
            .await?;
        self.emit_push(PushMessage::new(PushKind::TaskCreated, id, tree_id, serde_json::json!({})));
        self.enqueue(RuntimeEvent::TaskCreated { task_id: id }).await?;
        Ok((id, tree_id))
    }

    async fn enqueue(&self, event: RuntimeEvent) -> Result<()> {
        self.events_in
            .send(event)
            .await
            .map_err(|_| Error::internal("event queue closed"))?;
        self.wake.notify_one();
        Ok(())
    }

    fn emit_push(&self, message: PushMessage) {
        let _ = self.push.send(message);
    }

    pub async fn cancel_tree(&self, tree_id: u64) -> Result<()> {
        let tasks = self.store.get_tasks_by_tree(tree_id).await?;
        for task in tasks {
            if !task.state.is_terminal() {
                self.fail_task(task.id, "Tree cancelled").await?;
            }
        }
        Ok(())
    }

    /// Moves a `MANUAL_HOLD` task back to `READY_FOR_AGENT`, triggering an
    /// agent call immediately if auto-trigger is enabled.
    pub async fn step(&self, task_id: u64, action: StepAction) -> Result<()> {
        match action {
            StepAction::Continue => {
                let mut live = self.live.lock().await;
                if let Some(lt) = live.get_mut(&task_id) {
                    lt.state = TaskState::ReadyForAgent;
                }
                drop(live);
                self.store.update_task_status(task_id, TaskState::ReadyForAgent, None, None).await?;
                self.enqueue(RuntimeEvent::TaskStateChanged {
                    task_id,
                    new_state: TaskState::ReadyForAgent,
                })
                .await?;
            }
            StepAction::Skip => {
                self.complete_task(task_id, serde_json::json!({ "skipped": true })).await?;
            }
            StepAction::Abort => {
                self.fail_task(task_id, "aborted").await?;
            }
        }
        Ok(())
    }

    /// Drives the main loop until `shutdown()` is called. Intended to be
    /// spawned as a background tokio task.
    pub async fn run(self: Arc<Self>) {
        let tick = Duration::from_millis(self.settings().await.processing_tick_ms);
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let event = {
                let mut rx = self.events_out.lock().await;
                tokio::select! {
                    ev = rx.recv() => ev,
                    _ = tokio::time::sleep(tick) => None,
                    _ = self.shutdown.cancelled() => None,
                }
            };

            if self.shutdown.is_cancelled() {
                break;
            }

            match event {
                Some(ev) => {
                    if let Err(e) = self.dispatch(ev).await {
                        error!("event handler error: {e}");
                    }
                }
                None => {
                    if let Err(e) = self.scan_ready_tasks().await {
                        error!("ready-task scan failed: {e}");
                    }
                }
            }
        }
        self.drain_on_shutdown().await;
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn drain_on_shutdown(&self) {
        let grace = Duration::from_millis(self.settings().await.shutdown_grace_ms);
        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.active_invocations.load(Ordering::SeqCst) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let _ = self.ledger.flush().await;
    }

    async fn scan_ready_tasks(&self) -> Result<()> {
        let settings = self.settings().await;
        if !settings.auto_trigger {
            return Ok(());
        }
        let candidates: Vec<u64> = {
            let live = self.live.lock().await;
            live.iter()
                .filter(|(_, lt)| lt.state == TaskState::ReadyForAgent && !lt.invocation_active)
                .map(|(id, _)| *id)
                .collect()
        };
        for task_id in candidates {
            self.trigger_agent(task_id).await?;
        }
        Ok(())
    }

    async fn dispatch(&self, event: RuntimeEvent) -> Result<()> {
        let outcome = Handler::handle(event, self).await?;
        for follow_up in outcome {
            Box::pin(self.enqueue(follow_up)).await?;
        }
        Ok(())
    }

    /// `TriggerAgent` per the gating rules: concurrency cap, manual stepping,
    /// no invocation already active for this task.
    pub async fn trigger_agent(&self, task_id: u64) -> Result<()> {
        let settings = self.settings().await;

        {
            let live = self.live.lock().await;
            let Some(lt) = live.get(&task_id) else { return Ok(()) };
            if lt.state != TaskState::ReadyForAgent || lt.invocation_active {
                return Ok(());
            }
        }

        if self.active_invocations.load(Ordering::SeqCst) >= settings.max_concurrent_agents {
            return Ok(());
        }

        let task = self.store.get_task(task_id).await?;
        if self.manual_stepping_applies(task.tree_id, &task, &settings).await {
            self.store.update_task_status(task_id, TaskState::ManualHold, None, None).await?;
            let mut live = self.live.lock().await;
            if let Some(lt) = live.get_mut(&task_id) {
                lt.state = TaskState::ManualHold;
            }
            drop(live);
            self.emit_push(PushMessage::new(
                PushKind::StepModePause,
                task_id,
                task.tree_id,
                serde_json::json!({}),
            ));
            return Ok(());
        }

        {
            let mut trees = self.trees.lock().await;
            let entry = trees.entry(task.tree_id).or_insert_with(|| TreeOverrides {
                manual_stepping: None,
                consecutive_calls: 0,
            });
            entry.consecutive_calls += 1;
            if entry.consecutive_calls > settings.max_consecutive_calls_per_tree {
                warn!(tree_id = task.tree_id, "tree exceeded max consecutive agent calls");
                drop(trees);
                self.fail_task(task_id, "max_consecutive_calls_per_tree exceeded").await?;
                return Ok(());
            }
        }

        self.store.update_task_status(task_id, TaskState::AgentResponding, None, None).await?;
        {
            let mut live = self.live.lock().await;
            if let Some(lt) = live.get_mut(&task_id) {
                lt.state = TaskState::AgentResponding;
                lt.invocation_active = true;
            }
        }
        self.active_invocations.fetch_add(1, Ordering::SeqCst);
        self.emit_push(PushMessage::new(PushKind::AgentStarted, task_id, task.tree_id, serde_json::json!({})));

        let this = self.arc();
        let timeout_ms = task.max_execution_time().unwrap_or(settings.default_task_timeout_ms);
        tokio::spawn(async move {
            this.run_invocation(task_id, timeout_ms).await;
        });
        Ok(())
    }

    /// Upgrades the engine's self-reference. Only ever `None` if called
    /// after the last external `Arc<RuntimeEngine>` has been dropped, which
    /// cannot happen while `run()` itself is still executing.
    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("RuntimeEngine dropped while still running")
    }

    async fn manual_stepping_applies(&self, tree_id: u64, task: &Task, settings: &RuntimeSettings) -> bool {
        if let Some(task_level) = task.manual_stepping() {
            return task_level;
        }
        let trees = self.trees.lock().await;
        if let Some(tree_level) = trees.get(&tree_id).and_then(|t| t.manual_stepping) {
            return tree_level;
        }
        settings.manual_stepping_enabled
    }

    async fn run_invocation(&self, task_id: u64, timeout_ms: u64) {
        let cancel = CancellationToken::new();
        let result = tokio::select! {
            r = invoke_agent(task_id, self.store.clone(), self.provider.clone(), self.tools.clone(), cancel.clone()) => r,
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                cancel.cancel();
                Err(AgentInvocationError::Timeout)
            }
        };

        self.active_invocations.fetch_sub(1, Ordering::SeqCst);
        {
            let mut live = self.live.lock().await;
            if let Some(lt) = live.get_mut(&task_id) {
                lt.invocation_active = false;
            }
        }

        let enqueue_result = match result {
            Ok(outcome) => self.enqueue(RuntimeEvent::AgentResponseReceived { task_id, outcome }).await,
            Err(AgentInvocationError::Timeout) => self.fail_task(task_id, "timeout").await,
            Err(AgentInvocationError::Cancelled) => self.fail_task(task_id, "cancelled").await,
            Err(AgentInvocationError::Other(msg)) => self.fail_task(task_id, msg).await,
        };
        if let Err(e) = enqueue_result {
            error!("failed to post invocation result for task {task_id}: {e}");
        }
    }

    pub async fn complete_task(&self, task_id: u64, result: serde_json::Value) -> Result<()> {
        let task = self.store.get_task(task_id).await?;
        self.store
            .update_task_status(task_id, TaskState::Completed, Some(result.clone()), None)
            .await?;
        {
            let mut live = self.live.lock().await;
            if let Some(lt) = live.get_mut(&task_id) {
                lt.state = TaskState::Completed;
            }
        }
        self.ledger
            .append(Event::new(EventKind::TaskCompleted, EntityType::Task, task_id).with_outcome(Outcome::Success))
            .await?;
        self.emit_push(PushMessage::new(PushKind::TaskCompleted, task_id, task.tree_id, result));

        let ready = self.graph.mark_completed(task_id).await;
        for dependent in ready {
            self.enqueue(RuntimeEvent::DependencyResolved { task_id: dependent }).await?;
        }
        if let Some(parent_id) = task.parent_id {
            self.enqueue(RuntimeEvent::SubtaskCompleted { parent_id }).await?;
        }
        Ok(())
    }

    pub async fn fail_task(&self, task_id: u64, reason: impl Into<String> + Clone) -> Result<()> {
        let reason_string = reason.clone().into();
        let task = self.store.get_task(task_id).await?;
        if task.state.is_terminal() {
            return Ok(());
        }
        self.store
            .update_task_status(task_id, TaskState::Failed, None, Some(reason_string.clone()))
            .await?;
        {
            let mut live = self.live.lock().await;
            if let Some(lt) = live.get_mut(&task_id) {
                lt.state = TaskState::Failed;
            }
        }
        self.ledger
            .append(
                Event::new(EventKind::TaskFailed, EntityType::Task, task_id)
                    .with_outcome(Outcome::Failure)
                    .with_data(serde_json::json!({ "reason": reason_string })),
            )
            .await?;
        self.emit_push(PushMessage::new(
            PushKind::AgentError,
            task_id,
            task.tree_id,
            serde_json::json!({ "reason": reason_string }),
        ));

        let blocked = self.graph.mark_failed(task_id, reason_string.clone()).await;
        for dependent in blocked {
            self.enqueue(RuntimeEvent::DependencyFailed {
                task_id: dependent,
                failed_dependency: task_id,
                reason: reason_string.clone(),
            })
            .await?;
        }
        Ok(())
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn process_context(&self) -> ProcessContext {
        ProcessContext {
            store: self.store.clone(),
            graph: self.graph.clone(),
            ids: self.ids.clone(),
        }
    }

    pub fn processes(&self) -> &Arc<ProcessRegistry> {
        &self.processes
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub async fn mark_live(&self, task_id: u64, state: TaskState, depth: u32) {
        let mut live = self.live.lock().await;
        live.entry(task_id)
            .and_modify(|lt| lt.state = state)
            .or_insert(LiveTask { state, depth, invocation_active: false });
    }

    pub fn emit(&self, message: PushMessage) {
        self.emit_push(message);
    }

    pub fn new_push(&self, kind: PushKind, task_id: u64, tree_id: u64, content: serde_json::Value) -> PushMessage {
        PushMessage::new(kind, task_id, tree_id, content)
    }

    pub fn next_event_id(&self) -> u64 {
        self.next_event_id.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn apply_process_result_outcome(&self, outcome: ProcessOutcome) -> bool {
        matches!(outcome, ProcessOutcome::Success)
    }

    pub async fn list_active(&self) -> Result<Vec<Task>> {
        self.store.get_active_tasks().await
    }

    pub async fn task_tree(&self, tree_id: u64) -> Result<Vec<Task>> {
        self.store.get_tasks_by_tree(tree_id).await
    }

    pub async fn task_status(&self, task_id: u64) -> Result<Task> {
        self.store.get_task(task_id).await
    }
}

#[derive(Clone, Copy, Debug)]
pub enum StepAction {
    Continue,
    Skip,
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::memory_store_for_tests;
    use taskforge_llm::{FakeProvider, ScriptedTurn};

    fn make_engine() -> (Arc<RuntimeEngine>, mpsc::UnboundedReceiver<PushMessage>) {
        let store = memory_store_for_tests();
        let provider = Arc::new(FakeProvider::new(vec![ScriptedTurn::ToolCall {
            name: "end_task".into(),
            arguments: serde_json::json!({ "result": "done" }),
        }]));
        let tools = Arc::new(taskforge_tools::create_default_registry());
        RuntimeEngine::new(store, provider, tools, RuntimeSettings::default())
    }

    #[tokio::test]
    async fn submit_task_registers_graph_node_and_live_entry() {
        let (engine, _push) = make_engine();
        let (id, tree_id) = engine.submit_task("do the thing".into(), None, None).await.unwrap();
        assert_eq!(id, tree_id);
        assert!(engine.graph.node(id).await.is_some());
    }

    #[tokio::test]
    async fn happy_path_completes_via_end_task() {
        let (engine, mut push) = make_engine();
        let (id, _tree_id) = engine.submit_task("finish quickly".into(), None, None).await.unwrap();

        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        let mut completed = false;
        for _ in 0..50 {
            if let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(200), push.recv()).await {
                if matches!(msg.kind, PushKind::TaskCompleted) && msg.task_id == id {
                    completed = true;
                    break;
                }
            } else {
                break;
            }
        }
        engine.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(completed, "expected task {id} to complete via end_task");
    }
}
