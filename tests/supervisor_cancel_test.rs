use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use conclave::conclave::checkpoint_controller::PauseController;
use conclave::conclave::context_bus::ContextBus;
use conclave::conclave::conversation::ConversationHistory;
use conclave::conclave::data::{AgentDescriptor, RestartPolicy};
use conclave::conclave::event::ServerEvent;
use conclave::conclave::registry::AgentRegistry;
use conclave::conclave::supervisor::Supervisor;
use tempfile::tempdir;

/// Never answers `run`, so the step stays in flight until cancelled.
fn silent_agent(name: &str) -> AgentDescriptor {
    AgentDescriptor {
        name: name.into(),
        command: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            r#"read line; printf '{"jsonrpc":"2.0","id":0,"result":{}}\n'; sleep 10"#.to_string(),
        ],
        allowed_tools: vec!["run".to_string()],
        max_restarts: 1,
        restart_window: Duration::from_secs(60),
        default_model: "test-model".to_string(),
        max_concurrency: 1,
        environment: Vec::new(),
        restart_policy: RestartPolicy::Never,
    }
}

#[tokio::test]
async fn cancel_running_step_surfaces_a_cancelled_error_for_the_in_flight_call() {
    let dir = tempdir().unwrap();
    let registry = Arc::new(AgentRegistry::new(vec![silent_agent("architect")]));
    registry.start(&"architect".into()).await.unwrap();

    let supervisor = Arc::new(Supervisor {
        registry: registry.clone(),
        context: Arc::new(ContextBus::new()),
        history: Arc::new(tokio::sync::Mutex::new(ConversationHistory::new())),
        memory: Arc::new(conclave_memory::store::VectorMemoryStore::new(100)),
        checkpoint_dir: dir.path().to_path_buf(),
        fallback_agents: BTreeMap::new(),
        classifier_agent: None,
        pause_controller: Arc::new(PauseController::new()),
        active_calls: std::sync::Mutex::new(std::collections::HashMap::new()),
        preferred_agent: tokio::sync::Mutex::new(std::collections::HashMap::new()),
    });

    let session_id = uuid::Uuid::new_v4();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ServerEvent>();

    let handle = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.handle(session_id, "system prompt", "design an event bus", tx).await }
    });

    // Give the step time to dispatch and register itself in active_calls.
    tokio::time::sleep(Duration::from_millis(100)).await;
    supervisor.cancel_running_step(session_id).await;

    let mut saw_cancelled_error = false;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
        if let ServerEvent::Error { report, .. } = event {
            if report.code == "cancelled" {
                saw_cancelled_error = true;
                break;
            }
        }
    }
    assert!(saw_cancelled_error, "expected a cancelled error event after cancel_running_step");

    handle.abort();
}
