//! Event handler dispatch: one stateless router from event kind to the
//! runtime-mutating logic. Handlers never block the main loop directly —
//! anything that may suspend beyond a lock runs inside the invocation
//! spawned by `RuntimeEngine::trigger_agent`.

use crate::agent_wrapper::AgentOutcome;
use crate::engine::{PushKind, RuntimeEngine};
use crate::error::Result;
use crate::events::{EntityType, Event, EventKind, Outcome};
use crate::processes::ProcessOutcome;
use crate::task::{ConvMessage, TaskState, ToolCallRecord};
use taskforge_tools::PROCESS_TOOL_NAMES;

#[derive(Clone, Debug)]
pub enum RuntimeEvent {
    TaskCreated { task_id: u64 },
    ExecuteProcess { task_id: u64 },
    TaskStateChanged { task_id: u64, new_state: TaskState },
    AgentResponseReceived { task_id: u64, outcome: AgentOutcome },
    ToolCallMade { task_id: u64, call: ToolCallRecord },
    SubtaskCompleted { parent_id: u64 },
    DependencyResolved { task_id: u64 },
    DependencyFailed { task_id: u64, failed_dependency: u64, reason: String },
    EndTaskRequested { task_id: u64, result: serde_json::Value },
}

pub struct Handler;

impl Handler {
    pub async fn handle(event: RuntimeEvent, engine: &RuntimeEngine) -> Result<Vec<RuntimeEvent>> {
        match event {
            RuntimeEvent::TaskCreated { task_id } => Self::on_task_created(task_id, engine).await,
            RuntimeEvent::ExecuteProcess { task_id } => Self::on_execute_process(task_id, engine).await,
            RuntimeEvent::TaskStateChanged { task_id, new_state } => {
                Self::on_task_state_changed(task_id, new_state, engine).await
            }
            RuntimeEvent::AgentResponseReceived { task_id, outcome } => {
                Self::on_agent_response_received(task_id, outcome, engine).await
            }
            RuntimeEvent::ToolCallMade { task_id, call } => Self::on_tool_call_made(task_id, call, engine).await,
            RuntimeEvent::SubtaskCompleted { parent_id } => Self::on_dependency_side_effect(parent_id, engine).await,
            RuntimeEvent::DependencyResolved { task_id } => Self::on_dependency_side_effect(task_id, engine).await,
            RuntimeEvent::DependencyFailed { task_id, failed_dependency, reason } => {
                Self::on_dependency_failed(task_id, failed_dependency, reason, engine).await
            }
            RuntimeEvent::EndTaskRequested { task_id, result } => {
                engine.complete_task(task_id, result).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn on_task_created(task_id: u64, engine: &RuntimeEngine) -> Result<Vec<RuntimeEvent>> {
        engine.store().update_task_status(task_id, TaskState::ProcessAssigned, None, None).await?;
        engine.mark_live(task_id, TaskState::ProcessAssigned, 0).await;
        engine
            .ledger()
            .append(Event::new(EventKind::TaskStateChanged, EntityType::Task, task_id).with_outcome(Outcome::Success))
            .await?;
        Ok(vec![RuntimeEvent::ExecuteProcess { task_id }])
    }

    async fn on_execute_process(task_id: u64, engine: &RuntimeEngine) -> Result<Vec<RuntimeEvent>> {
        engine.store().update_task_status(task_id, TaskState::ReadyForAgent, None, None).await?;
        engine.mark_live(task_id, TaskState::ReadyForAgent, 0).await;
        Ok(vec![RuntimeEvent::TaskStateChanged { task_id, new_state: TaskState::ReadyForAgent }])
    }

    async fn on_task_state_changed(
        task_id: u64,
        new_state: TaskState,
        engine: &RuntimeEngine,
    ) -> Result<Vec<RuntimeEvent>> {
        let mut follow_ups = Vec::new();
        if new_state == TaskState::ReadyForAgent && engine.settings().await.auto_trigger {
            engine.trigger_agent(task_id).await?;
        }
        if new_state == TaskState::Completed {
            let task = engine.store().get_task(task_id).await?;
            if let Some(parent_id) = task.parent_id {
                follow_ups.push(RuntimeEvent::SubtaskCompleted { parent_id });
            }
        }
        Ok(follow_ups)
    }

    async fn on_agent_response_received(
        task_id: u64,
        outcome: AgentOutcome,
        engine: &RuntimeEngine,
    ) -> Result<Vec<RuntimeEvent>> {
        if outcome.tool_calls.is_empty() {
            engine.store().update_task_status(task_id, TaskState::ReadyForAgent, None, None).await?;
            engine.mark_live(task_id, TaskState::ReadyForAgent, 0).await;
            let task = engine.store().get_task(task_id).await?;
            engine.emit(engine.new_push(
                PushKind::AgentThinking,
                task_id,
                task.tree_id,
                serde_json::json!({ "content": outcome.content }),
            ));
            return Ok(vec![RuntimeEvent::TaskStateChanged { task_id, new_state: TaskState::ReadyForAgent }]);
        }

        engine.store().update_task_status(task_id, TaskState::ToolProcessing, None, None).await?;
        engine.mark_live(task_id, TaskState::ToolProcessing, 0).await;

        let calls = outcome.tool_calls.clone();
        Ok(calls.into_iter().map(|call| RuntimeEvent::ToolCallMade { task_id, call }).collect())
    }

    async fn on_tool_call_made(task_id: u64, call: ToolCallRecord, engine: &RuntimeEngine) -> Result<Vec<RuntimeEvent>> {
        let task = engine.store().get_task(task_id).await?;
        let tree_id = task.tree_id;
        engine.emit(engine.new_push(
            PushKind::AgentToolCall,
            task_id,
            tree_id,
            serde_json::json!({ "name": call.name, "arguments": call.arguments }),
        ));

        if PROCESS_TOOL_NAMES.contains(&call.name.as_str()) {
            return Self::dispatch_process(task_id, task, call, engine).await;
        }

        if engine.tools().contains(&call.name) {
            let result = engine.tools().execute(&call.name, call.arguments.clone()).await;
            let is_error = result.is_error();
            engine
                .store()
                .append_conversation(task_id, ConvMessage::tool_result(call.id.clone(), result.to_content_string()))
                .await?;
            engine
                .ledger()
                .append(
                    Event::new(EventKind::ToolCompleted, EntityType::Tool, task_id)
                        .with_outcome(if is_error { Outcome::Failure } else { Outcome::Success }),
                )
                .await?;
            engine.emit(engine.new_push(
                PushKind::AgentToolResult,
                task_id,
                tree_id,
                serde_json::json!({ "name": call.name, "error": is_error }),
            ));
            engine.store().update_task_status(task_id, TaskState::ReadyForAgent, None, None).await?;
            engine.mark_live(task_id, TaskState::ReadyForAgent, 0).await;
            return Ok(vec![RuntimeEvent::TaskStateChanged { task_id, new_state: TaskState::ReadyForAgent }]);
        }

        engine
            .store()
            .append_conversation(
                task_id,
                ConvMessage::tool_result(call.id.clone(), format!("Error: unknown tool '{}'", call.name)),
            )
            .await?;
        engine.store().update_task_status(task_id, TaskState::ReadyForAgent, None, None).await?;
        engine.mark_live(task_id, TaskState::ReadyForAgent, 0).await;
        Ok(vec![RuntimeEvent::TaskStateChanged { task_id, new_state: TaskState::ReadyForAgent }])
    }

    async fn dispatch_process(
        task_id: u64,
        task: crate::task::Task,
        call: ToolCallRecord,
        engine: &RuntimeEngine,
    ) -> Result<Vec<RuntimeEvent>> {
        let Some(process) = engine.processes().get(&call.name) else {
            return Err(crate::error::Error::internal(format!("declared process '{}' is not registered", call.name)));
        };

        let ctx = engine.process_context();
        let result = process.execute(call.arguments.clone(), &ctx, &task).await;

        engine
            .ledger()
            .append(
                Event::new(EventKind::ProcessExecuted, EntityType::Process, task_id).with_outcome(match result.outcome {
                    ProcessOutcome::Success => Outcome::Success,
                    ProcessOutcome::Failure => Outcome::Failure,
                }),
            )
            .await?;

        if result.outcome == ProcessOutcome::Failure {
            let message = result.message.unwrap_or_else(|| "process failed".to_string());
            engine
                .store()
                .append_conversation(task_id, ConvMessage::tool_result(call.id.clone(), format!("Error: {message}")))
                .await?;
            engine.store().update_task_status(task_id, TaskState::ReadyForAgent, None, None).await?;
            engine.mark_live(task_id, TaskState::ReadyForAgent, 0).await;
            return Ok(vec![RuntimeEvent::TaskStateChanged { task_id, new_state: TaskState::ReadyForAgent }]);
        }

        if call.name == "end_task" {
            let result_value = call.arguments.get("result").cloned().unwrap_or(serde_json::Value::Null);
            return Ok(vec![RuntimeEvent::EndTaskRequested { task_id, result: result_value }]);
        }

        let ack = result.message.clone().unwrap_or_else(|| "ok".to_string());
        engine.store().append_conversation(task_id, ConvMessage::tool_result(call.id.clone(), ack)).await?;

        let mut follow_ups = Vec::new();
        for &child_id in &result.new_subtasks {
            engine.mark_live(child_id, TaskState::Created, 0).await;
            follow_ups.push(RuntimeEvent::TaskCreated { task_id: child_id });
        }

        let next_state = if result.blocks_parent {
            TaskState::WaitingOnDependencies
        } else {
            TaskState::ReadyForAgent
        };
        engine.store().update_task_status(task_id, next_state, None, None).await?;
        engine.mark_live(task_id, next_state, 0).await;
        if next_state == TaskState::ReadyForAgent {
            follow_ups.push(RuntimeEvent::TaskStateChanged { task_id, new_state: next_state });
        }
        Ok(follow_ups)
    }

    async fn on_dependency_side_effect(task_id: u64, engine: &RuntimeEngine) -> Result<Vec<RuntimeEvent>> {
        if engine.graph().all_dependencies_resolved(task_id).await {
            let task = engine.store().get_task(task_id).await?;
            if task.state == TaskState::WaitingOnDependencies {
                engine.store().update_task_status(task_id, TaskState::ReadyForAgent, None, None).await?;
                engine.mark_live(task_id, TaskState::ReadyForAgent, 0).await;
                return Ok(vec![RuntimeEvent::TaskStateChanged { task_id, new_state: TaskState::ReadyForAgent }]);
            }
        }
        Ok(Vec::new())
    }

    async fn on_dependency_failed(
        task_id: u64,
        failed_dependency: u64,
        reason: String,
        engine: &RuntimeEngine,
    ) -> Result<Vec<RuntimeEvent>> {
        engine
            .ledger()
            .append(
                Event::new(EventKind::DependencyFailed, EntityType::Task, task_id)
                    .with_outcome(Outcome::Failure)
                    .with_related("dependency", vec![failed_dependency]),
            )
            .await?;
        engine.fail_task(task_id, format!("Dependency {failed_dependency} failed: {reason}")).await?;
        Ok(Vec::new())
    }
}
