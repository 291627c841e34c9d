use std::sync::Arc;

use conclave::conclave::checkpoint_controller::PauseController;
use conclave::conclave::context_bus::ContextBus;
use conclave::conclave::conversation::ConversationHistory;
use conclave::conclave::data::Role;
use conclave_memory::checkpoint::CheckpointJournal;
use tempfile::tempdir;
use tokio::sync::Mutex;

#[tokio::test]
async fn pause_then_resume_clears_the_flag() {
    let controller = PauseController::new();
    let session = uuid::Uuid::new_v4();

    assert!(!controller.is_paused(session).await);
    controller.pause(session).await;
    assert!(controller.is_paused(session).await);
    controller.resume(session).await;
    assert!(!controller.is_paused(session).await);
}

#[tokio::test]
async fn stop_and_rollback_restores_context_and_truncates_history() {
    let dir = tempdir().unwrap();
    let session = uuid::Uuid::new_v4();
    let context = Arc::new(ContextBus::new());
    let history = Arc::new(Mutex::new(ConversationHistory::new()));
    history.lock().await.add_message(session, Role::User, "before checkpoint");

    {
        let mut journal = CheckpointJournal::open(dir.path(), session.to_string()).unwrap();
        let mut snapshot = std::collections::BTreeMap::new();
        snapshot.insert("k".to_string(), serde_json::json!("checkpoint value"));
        journal.append(snapshot, 1).unwrap();
    }

    context.update("k", serde_json::json!("mutated after checkpoint"), None).await.unwrap();
    history.lock().await.add_message(session, Role::Assistant, "after checkpoint");
    assert_eq!(history.lock().await.get_current_messages(session).len(), 2);

    let controller = PauseController::new();
    controller.stop_and_rollback(session, 2, dir.path(), &context, &history).await.unwrap();

    assert_eq!(context.get("k").await, Some(serde_json::json!("checkpoint value")));
    assert_eq!(history.lock().await.get_current_messages(session).len(), 1);
}
