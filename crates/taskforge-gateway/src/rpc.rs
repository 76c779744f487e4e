//! Front-door operations (§6): typed request/response shapes bridging the
//! HTTP transport in `server.rs` to the `RuntimeEngine`'s public API.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taskforge_core::engine::{RuntimeEngine, RuntimeSettings, StepAction};
use taskforge_core::task::Task;

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub instruction: String,
    pub agent_type: Option<String>,
    pub process: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: u64,
    pub tree_id: u64,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn submit_task(engine: &RuntimeEngine, req: SubmitTaskRequest) -> Result<SubmitTaskResponse, GatewayError> {
    if req.instruction.trim().is_empty() {
        return Err(taskforge_core::Error::validation("instruction must not be empty").into());
    }
    let (task_id, tree_id) = engine.submit_task(req.instruction, req.agent_type, req.process).await?;
    let task = engine.task_status(task_id).await?;
    Ok(SubmitTaskResponse {
        task_id,
        tree_id,
        status: task.state.to_string(),
        created_at: task.created_at,
    })
}

#[derive(Debug, Deserialize)]
pub struct StepRequest {
    pub action: StepActionDto,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepActionDto {
    Continue,
    Skip,
    Abort,
}

impl From<StepActionDto> for StepAction {
    fn from(dto: StepActionDto) -> Self {
        match dto {
            StepActionDto::Continue => StepAction::Continue,
            StepActionDto::Skip => StepAction::Skip,
            StepActionDto::Abort => StepAction::Abort,
        }
    }
}

pub async fn step(engine: &RuntimeEngine, task_id: u64, req: StepRequest) -> Result<Task, GatewayError> {
    engine.step(task_id, req.action.into()).await?;
    Ok(engine.task_status(task_id).await?)
}

pub async fn cancel_tree(engine: &RuntimeEngine, tree_id: u64) -> Result<(), GatewayError> {
    engine.cancel_tree(tree_id).await?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRuntimeSettingsRequest {
    pub max_concurrent_agents: Option<usize>,
    pub manual_stepping_enabled: Option<bool>,
    pub auto_trigger: Option<bool>,
    pub max_consecutive_calls_per_tree: Option<u64>,
}

pub async fn update_runtime_settings(
    engine: &Arc<RuntimeEngine>,
    req: UpdateRuntimeSettingsRequest,
) -> Result<RuntimeSettings, GatewayError> {
    engine
        .update_settings(|settings| {
            if let Some(v) = req.max_concurrent_agents {
                settings.max_concurrent_agents = v;
            }
            if let Some(v) = req.manual_stepping_enabled {
                settings.manual_stepping_enabled = v;
            }
            if let Some(v) = req.auto_trigger {
                settings.auto_trigger = v;
            }
            if let Some(v) = req.max_consecutive_calls_per_tree {
                settings.max_consecutive_calls_per_tree = v;
            }
        })
        .await;
    Ok(engine.settings().await)
}

pub async fn list_active(engine: &RuntimeEngine) -> Result<Vec<Task>, GatewayError> {
    Ok(engine.list_active().await?)
}

pub async fn get_task_tree(engine: &RuntimeEngine, tree_id: u64) -> Result<Vec<Task>, GatewayError> {
    Ok(engine.task_tree(tree_id).await?)
}

pub async fn get_task_status(engine: &RuntimeEngine, task_id: u64) -> Result<Task, GatewayError> {
    Ok(engine.task_status(task_id).await?)
}
