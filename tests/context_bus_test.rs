use std::collections::BTreeMap;
use std::time::Duration;

use conclave::conclave::context_bus::{ContextBus, MergeResolver};
use conclave::conclave::error::ConclaveError;

#[tokio::test]
async fn versions_increase_strictly_with_every_update() {
    let bus = ContextBus::new();
    let v1 = bus.update("k", serde_json::json!(1), None).await.unwrap();
    let v2 = bus.update("k", serde_json::json!(2), None).await.unwrap();
    assert!(v2 > v1);
}

#[tokio::test]
async fn a_subscriber_never_observes_its_own_write() {
    let bus = ContextBus::new();
    let (id, mut rx) = bus.subscribe().await;

    bus.update("k", serde_json::json!("from self"), Some(id)).await.unwrap();
    bus.update("k", serde_json::json!("from other"), None).await.unwrap();

    let event = rx.recv().await.expect("should see the other writer's update");
    assert_eq!(event.value, serde_json::json!("from other"));
    assert!(rx.try_recv().is_err(), "no second event should have arrived");
}

#[tokio::test]
async fn lock_release_is_idempotent() {
    let bus = ContextBus::new();
    let holder = uuid::Uuid::new_v4();
    bus.release_lock("k", holder).await;
    bus.release_lock("k", holder).await;

    assert!(bus.acquire_lock("k", holder, Duration::from_millis(50)).await.is_ok());
}

#[tokio::test]
async fn lock_blocks_a_different_holder_and_then_times_out() {
    let bus = ContextBus::new();
    let a = uuid::Uuid::new_v4();
    let b = uuid::Uuid::new_v4();

    assert!(bus.acquire_lock("k", a, Duration::from_millis(50)).await.is_ok());
    let result = bus.acquire_lock("k", b, Duration::from_millis(50)).await;
    assert!(matches!(result, Err(ConclaveError::Locked { .. })));

    bus.release_lock("k", a).await;
    assert!(bus.acquire_lock("k", b, Duration::from_millis(50)).await.is_ok());
}

#[tokio::test]
async fn update_blocks_on_a_key_locked_by_another_agent_then_times_out() {
    let bus = ContextBus::new();
    let holder = uuid::Uuid::new_v4();
    let other = uuid::Uuid::new_v4();

    bus.acquire_lock("k", holder, Duration::from_millis(50)).await.unwrap();

    let result = bus.update("k", serde_json::json!("from other"), Some(other)).await;
    assert!(matches!(result, Err(ConclaveError::Locked { .. })));

    // The lock holder itself can still write through its own lock.
    let result = bus.update("k", serde_json::json!("from holder"), Some(holder)).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn restore_resets_version_and_replaces_the_map() {
    let bus = ContextBus::new();
    bus.update("stale", serde_json::json!("old"), None).await.unwrap();

    let mut snapshot = std::collections::BTreeMap::new();
    snapshot.insert("fresh".to_string(), serde_json::json!("new"));
    bus.restore(snapshot, 100).await;

    assert_eq!(bus.get("stale").await, None);
    assert_eq!(bus.get("fresh").await, Some(serde_json::json!("new")));
    let next_version = bus.update("fresh", serde_json::json!("newer"), None).await.unwrap();
    assert!(next_version > 100);
}

#[tokio::test]
async fn merge_applies_single_writer_keys_directly() {
    let bus = ContextBus::new();
    let mut batch = BTreeMap::new();
    batch.insert("a".to_string(), serde_json::json!(1));
    bus.merge(vec![(None, batch)], None).await.unwrap();
    assert_eq!(bus.get("a").await, Some(serde_json::json!(1)));
}

#[tokio::test]
async fn merge_without_a_resolver_is_last_writer_wins() {
    let bus = ContextBus::new();
    let mut first = BTreeMap::new();
    first.insert("a".to_string(), serde_json::json!("first"));
    let mut second = BTreeMap::new();
    second.insert("a".to_string(), serde_json::json!("second"));

    bus.merge(vec![(None, first), (None, second)], None).await.unwrap();
    assert_eq!(bus.get("a").await, Some(serde_json::json!("second")));
}

struct ConcatResolver;
impl MergeResolver for ConcatResolver {
    fn resolve(&self, _key: &str, candidates: &[serde_json::Value]) -> serde_json::Value {
        let joined: Vec<String> = candidates.iter().map(|v| v.as_str().unwrap_or_default().to_string()).collect();
        serde_json::json!(joined.join("+"))
    }
}

#[tokio::test]
async fn merge_with_a_resolver_delegates_conflicting_keys() {
    let bus = ContextBus::new();
    let mut first = BTreeMap::new();
    first.insert("a".to_string(), serde_json::json!("x"));
    let mut second = BTreeMap::new();
    second.insert("a".to_string(), serde_json::json!("y"));

    bus.merge(vec![(None, first), (None, second)], Some(&ConcatResolver)).await.unwrap();
    assert_eq!(bus.get("a").await, Some(serde_json::json!("x+y")));
}
