//! Exercises `InMemoryStore` behind the `EntityStore` trait object, the way
//! the runtime engine and gateway actually consume it.

use std::sync::Arc;
use taskforge_core::store::EntityStore;
use taskforge_core::task::{ConvMessage, Task, TaskState};
use taskforge_store::InMemoryStore;

fn store() -> Arc<dyn EntityStore> {
    Arc::new(InMemoryStore::new())
}

#[tokio::test]
async fn full_lifecycle_through_trait_object() {
    let store = store();
    let tree_id = store.next_tree_id().await.unwrap();
    let mut task = Task::new_root(1, "ship the feature".into(), "neutral_task".into());
    task.tree_id = tree_id;
    store.create_task(task).await.unwrap();

    store
        .append_conversation(1, ConvMessage::user("ship the feature"))
        .await
        .unwrap();
    store
        .update_task_status(1, TaskState::Completed, Some(serde_json::json!({"done": true})), None)
        .await
        .unwrap();

    let task = store.get_task(1).await.unwrap();
    assert_eq!(task.conversation.len(), 1);
    assert_eq!(task.state, TaskState::Completed);

    let active = store.get_active_tasks().await.unwrap();
    assert!(active.is_empty());
}

#[tokio::test]
async fn root_tasks_respects_limit_and_ordering() {
    let store = store();
    for id in 1..=5u64 {
        store.create_task(Task::new_root(id, format!("task {id}"), "neutral_task".into())).await.unwrap();
    }
    let roots = store.get_root_tasks(3).await.unwrap();
    assert_eq!(roots.len(), 3);
    assert_eq!(roots[0].id, 1);
    assert_eq!(roots[2].id, 3);
}

#[tokio::test]
async fn get_task_on_unknown_id_is_not_found() {
    let store = store();
    let err = store.get_task(404).await.unwrap_err();
    assert!(matches!(err, taskforge_core::Error::Store(_)));
}
