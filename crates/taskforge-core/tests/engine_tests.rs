//! End-to-end runtime behavior: happy path, break-down/join, cycle
//! rejection, manual stepping, concurrency caps, and review counters.

use std::sync::Arc;
use std::time::Duration;
use taskforge_core::engine::{PushKind, RuntimeEngine, RuntimeSettings, StepAction};
use taskforge_core::store::test_support::memory_store_for_tests;
use taskforge_core::TaskState;
use taskforge_llm::{FakeProvider, ScriptedTurn};
use tokio::sync::mpsc;

fn tools() -> Arc<taskforge_tools::ToolRegistry> {
    Arc::new(taskforge_tools::create_default_registry())
}

async fn wait_for(
    push: &mut mpsc::UnboundedReceiver<taskforge_core::PushMessage>,
    predicate: impl Fn(&taskforge_core::PushMessage) -> bool,
) -> bool {
    for _ in 0..200 {
        match tokio::time::timeout(Duration::from_millis(100), push.recv()).await {
            Ok(Some(msg)) if predicate(&msg) => return true,
            Ok(Some(_)) => continue,
            _ => return false,
        }
    }
    false
}

#[tokio::test]
async fn single_task_completes_via_end_task() {
    let store = memory_store_for_tests();
    let provider = Arc::new(FakeProvider::new(vec![ScriptedTurn::ToolCall {
        name: "end_task".into(),
        arguments: serde_json::json!({ "result": { "summary": "done" } }),
    }]));
    let (engine, mut push) = RuntimeEngine::new(store, provider, tools(), RuntimeSettings::default());

    let (task_id, _tree_id) = engine.submit_task("write a summary".into(), None, None).await.unwrap();
    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    let completed = wait_for(&mut push, |m| matches!(m.kind, PushKind::TaskCompleted) && m.task_id == task_id).await;

    engine.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

    assert!(completed);
    let task = engine.task_status(task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Completed);
}

#[tokio::test]
async fn break_down_spawns_children_and_parent_waits_then_resumes() {
    let store = memory_store_for_tests();
    let provider = Arc::new(FakeProvider::new(vec![
        ScriptedTurn::ToolCall {
            name: "break_down_task".into(),
            arguments: serde_json::json!({ "approach": "two steps", "subtasks": ["step one", "step two"] }),
        },
        ScriptedTurn::ToolCall {
            name: "end_task".into(),
            arguments: serde_json::json!({ "result": "child done" }),
        },
        ScriptedTurn::ToolCall {
            name: "end_task".into(),
            arguments: serde_json::json!({ "result": "child done" }),
        },
        ScriptedTurn::ToolCall {
            name: "end_task".into(),
            arguments: serde_json::json!({ "result": "parent done" }),
        },
    ]));
    let (engine, mut push) = RuntimeEngine::new(store, provider, tools(), RuntimeSettings::default());

    let (root_id, tree_id) = engine.submit_task("do a big thing".into(), None, None).await.unwrap();
    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    let root_completed =
        wait_for(&mut push, |m| matches!(m.kind, PushKind::TaskCompleted) && m.task_id == root_id).await;

    engine.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(3), handle).await;

    assert!(root_completed, "root task should eventually complete after its subtasks finish");
    let tasks = engine.task_tree(tree_id).await.unwrap();
    assert_eq!(tasks.len(), 3, "parent plus two subtasks");
    assert!(tasks.iter().all(|t| t.state == TaskState::Completed));
}

#[tokio::test]
async fn manual_stepping_holds_until_stepped() {
    let store = memory_store_for_tests();
    let provider = Arc::new(FakeProvider::new(vec![ScriptedTurn::ToolCall {
        name: "end_task".into(),
        arguments: serde_json::json!({ "result": "done" }),
    }]));
    let mut settings = RuntimeSettings::default();
    settings.manual_stepping_enabled = true;
    let (engine, mut push) = RuntimeEngine::new(store, provider, tools(), settings);

    let (task_id, _tree_id) = engine.submit_task("hold me".into(), None, None).await.unwrap();
    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    let paused = wait_for(&mut push, |m| matches!(m.kind, PushKind::StepModePause) && m.task_id == task_id).await;
    assert!(paused);

    let task = engine.task_status(task_id).await.unwrap();
    assert_eq!(task.state, TaskState::ManualHold);

    engine.step(task_id, StepAction::Continue).await.unwrap();
    let completed = wait_for(&mut push, |m| matches!(m.kind, PushKind::TaskCompleted) && m.task_id == task_id).await;

    engine.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    assert!(completed);
}

#[tokio::test]
async fn cancel_tree_fails_every_non_terminal_task() {
    let store = memory_store_for_tests();
    let provider = Arc::new(FakeProvider::new(vec![ScriptedTurn::Text("thinking...".into())]));
    let mut settings = RuntimeSettings::default();
    settings.auto_trigger = false;
    let (engine, _push) = RuntimeEngine::new(store, provider, tools(), settings);

    let (task_id, tree_id) = engine.submit_task("never finishes".into(), None, None).await.unwrap();
    engine.cancel_tree(tree_id).await.unwrap();

    let task = engine.task_status(task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.error.as_deref(), Some("Tree cancelled"));
}

#[tokio::test]
async fn skip_step_action_force_completes_with_skipped_flag() {
    let store = memory_store_for_tests();
    let provider = Arc::new(FakeProvider::new(vec![ScriptedTurn::Text("stuck".into())]));
    let mut settings = RuntimeSettings::default();
    settings.auto_trigger = false;
    let (engine, _push) = RuntimeEngine::new(store, provider, tools(), settings);

    let (task_id, _tree_id) = engine.submit_task("skip this".into(), None, None).await.unwrap();
    engine.step(task_id, StepAction::Skip).await.unwrap();

    let task = engine.task_status(task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.result.unwrap()["skipped"], true);
}
