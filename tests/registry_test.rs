use std::time::Duration;

use conclave::conclave::data::{AgentDescriptor, RestartPolicy};
use conclave::conclave::permission::PermissionRegistry;
use conclave::conclave::registry::{AgentRegistry, ProcessState};
use conclave::ConclaveError;

const STOP_GRACE: Duration = Duration::from_millis(50);

/// Answers `initialize` (id 0) with an empty result, then `run` (id 1) with a fixed
/// payload, before sleeping to keep the process alive for the rest of the test.
fn echo_agent(name: &str) -> AgentDescriptor {
    AgentDescriptor {
        name: name.into(),
        command: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            concat!(
                r#"read line; printf '{"jsonrpc":"2.0","id":0,"result":{}}\n'; "#,
                r#"read line; printf '{"jsonrpc":"2.0","id":1,"result":{"content":"done"}}\n'; "#,
                r#"read line; printf '{"jsonrpc":"2.0","id":2,"result":{"content":"done"}}\n'; "#,
                "sleep 5",
            )
            .to_string(),
        ],
        allowed_tools: Vec::new(),
        max_restarts: 3,
        restart_window: Duration::from_secs(60),
        default_model: "test-model".to_string(),
        max_concurrency: 2,
        environment: Vec::new(),
        restart_policy: RestartPolicy::OnCrash,
    }
}

#[tokio::test]
async fn starting_an_agent_performs_the_handshake_then_moves_it_to_ready() {
    let registry = AgentRegistry::new(vec![echo_agent("architect")]);
    let name = "architect".into();
    registry.start(&name).await.unwrap();
    assert_eq!(registry.state_of(&name).await, Some(ProcessState::Ready));
}

#[tokio::test]
async fn calling_an_unstarted_agent_is_unavailable() {
    let registry = AgentRegistry::new(vec![echo_agent("architect")]);
    let name = "architect".into();
    let result = registry.call(&name, "run", serde_json::json!({}), Duration::from_secs(1)).await;
    assert!(matches!(result, Err(ConclaveError::AgentUnavailable { .. })));
}

#[tokio::test]
async fn calling_an_unknown_agent_is_unavailable() {
    let registry = AgentRegistry::new(vec![echo_agent("architect")]);
    let name = "ghost".into();
    let result = registry.call(&name, "run", serde_json::json!({}), Duration::from_secs(1)).await;
    assert!(matches!(result, Err(ConclaveError::AgentUnavailable { .. })));
}

#[tokio::test]
async fn a_ready_agent_answers_run_calls() {
    let registry = AgentRegistry::new(vec![echo_agent("architect")]);
    let name = "architect".into();
    registry.start(&name).await.unwrap();

    let result = registry.call(&name, "run", serde_json::json!({"task": "plan"}), Duration::from_secs(2)).await.unwrap();
    assert_eq!(result, serde_json::json!({"content": "done"}));
    assert_eq!(registry.state_of(&name).await, Some(ProcessState::Ready));
}

#[tokio::test]
async fn stopping_an_agent_marks_it_dead() {
    let registry = AgentRegistry::new(vec![echo_agent("architect")]);
    let name = "architect".into();
    registry.start(&name).await.unwrap();
    registry.stop(&name, STOP_GRACE).await.unwrap();
    assert_eq!(registry.state_of(&name).await, Some(ProcessState::Dead));
}

#[tokio::test]
async fn round_robin_pick_skips_agents_that_are_not_ready() {
    let registry = AgentRegistry::new(vec![echo_agent("architect"), echo_agent("codesmith")]);
    let architect = "architect".into();
    registry.start(&architect).await.unwrap();

    let candidates = vec!["architect".into(), "codesmith".into()];
    let picked = registry.pick_ready(&candidates).await;
    assert_eq!(picked, Some(architect));
}

#[tokio::test]
async fn two_concurrent_calls_within_max_concurrency_both_succeed() {
    let registry = std::sync::Arc::new(AgentRegistry::new(vec![echo_agent("architect")]));
    let name: conclave::conclave::data::AgentName = "architect".into();
    registry.start(&name).await.unwrap();

    let (a, b) = tokio::join!(
        registry.call(&name, "run", serde_json::json!({"task": "one"}), Duration::from_secs(2)),
        registry.call(&name, "run", serde_json::json!({"task": "two"}), Duration::from_secs(2)),
    );
    assert!(a.is_ok(), "{a:?}");
    assert!(b.is_ok(), "{b:?}");
}

#[tokio::test]
async fn a_method_not_in_the_agents_allowed_tools_is_permission_denied() {
    let registry = AgentRegistry::new(vec![echo_agent("architect")]);
    let name: conclave::conclave::data::AgentName = "architect".into();
    registry.start(&name).await.unwrap();

    let mut allowed = std::collections::HashMap::new();
    allowed.insert(name.clone(), vec!["ping".to_string()]);
    registry.set_permissions(std::sync::Arc::new(PermissionRegistry::new(allowed))).await;

    let result = registry.call(&name, "run", serde_json::json!({}), Duration::from_secs(1)).await;
    assert!(matches!(result, Err(ConclaveError::PermissionDenied { .. })));
}
