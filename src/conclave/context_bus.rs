//! Shared Context Bus: a versioned, subscribable key-value store all agents and the
//! supervisor read and write through.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::conclave::error::ConclaveError;

/// How long `update` waits for a key held by another agent's lock before giving up.
const LOCK_WAIT_BOUND: Duration = Duration::from_secs(2);
const LOCK_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Resolves a conflicting key during [`ContextBus::merge`]: given the key and the
/// candidate values from every writer that touched it this round, returns the value
/// to apply. Default behavior without one is last-writer-wins.
pub trait MergeResolver: Send + Sync {
    fn resolve(&self, key: &str, candidates: &[Value]) -> Value;
}

#[derive(Debug, Clone)]
pub struct ContextUpdateEvent {
    pub key: String,
    pub value: Value,
    pub version: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    version: u64,
    history: Vec<(u64, Value)>,
}

pub struct ContextBus {
    entries: RwLock<BTreeMap<String, Entry>>,
    global_version: AtomicU64,
    subscribers: RwLock<HashMap<Uuid, mpsc::UnboundedSender<ContextUpdateEvent>>>,
    locks: RwLock<HashMap<String, Uuid>>,
}

impl Default for ContextBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBus {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            global_version: AtomicU64::new(0),
            subscribers: RwLock::new(HashMap::new()),
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().await.get(key).map(|e| e.value.clone())
    }

    pub async fn history(&self, key: &str) -> Vec<(u64, Value)> {
        self.entries.read().await.get(key).map(|e| e.history.clone()).unwrap_or_default()
    }

    /// Writes `key`, bumping the strictly-increasing global version, and notifies
    /// every subscriber except `writer_id` (a subscriber never observes its own write).
    /// Blocks (bounded by [`LOCK_WAIT_BOUND`]) if `key` is locked by a different holder
    /// than `writer_id`, raising [`ConclaveError::Locked`] if the bound elapses first.
    pub async fn update(&self, key: &str, value: Value, writer_id: Option<Uuid>) -> Result<u64, ConclaveError> {
        self.wait_until_unlocked_by_others(key, writer_id, LOCK_WAIT_BOUND).await?;

        let version = self.global_version.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut entries = self.entries.write().await;
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Null,
                version: 0,
                history: Vec::new(),
            });
            entry.history.push((version, value.clone()));
            entry.value = value.clone();
            entry.version = version;
        }
        self.notify(key, value, version, writer_id).await;
        Ok(version)
    }

    async fn wait_until_unlocked_by_others(&self, key: &str, holder: Option<Uuid>, bound: Duration) -> Result<(), ConclaveError> {
        let deadline = Instant::now() + bound;
        loop {
            {
                let locks = self.locks.read().await;
                match locks.get(key) {
                    Some(existing) if Some(*existing) != holder => {}
                    _ => return Ok(()),
                }
            }
            if Instant::now() >= deadline {
                return Err(ConclaveError::Locked { key: key.to_string() });
            }
            tokio::time::sleep(LOCK_WAIT_POLL_INTERVAL).await;
        }
    }

    async fn notify(&self, key: &str, value: Value, version: u64, writer_id: Option<Uuid>) {
        let subscribers = self.subscribers.read().await;
        for (id, sender) in subscribers.iter() {
            if Some(*id) == writer_id {
                continue;
            }
            let _ = sender.send(ContextUpdateEvent { key: key.to_string(), value: value.clone(), version });
        }
    }

    pub async fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<ContextUpdateEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        self.subscribers.write().await.remove(&id);
    }

    /// Advisory lock: blocks until `holder` can take (or already holds) the lock on
    /// `key`, up to `timeout`; raises [`ConclaveError::Locked`] if it elapses first.
    pub async fn acquire_lock(&self, key: &str, holder: Uuid, timeout: Duration) -> Result<(), ConclaveError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut locks = self.locks.write().await;
                match locks.get(key) {
                    Some(existing) if *existing != holder => {}
                    _ => {
                        locks.insert(key.to_string(), holder);
                        return Ok(());
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(ConclaveError::Locked { key: key.to_string() });
            }
            tokio::time::sleep(LOCK_WAIT_POLL_INTERVAL).await;
        }
    }

    /// Idempotent: releasing a lock you don't hold (or that doesn't exist) is a no-op.
    pub async fn release_lock(&self, key: &str, holder: Uuid) {
        let mut locks = self.locks.write().await;
        if locks.get(key) == Some(&holder) {
            locks.remove(key);
        }
    }

    /// Groups `updates` (one batch per writer) by key. Keys touched by exactly one
    /// writer apply directly; keys touched by more than one go through `resolver` if
    /// given, else fall back to last-writer-wins (batch order in `updates`).
    pub async fn merge(
        &self,
        updates: Vec<(Option<Uuid>, BTreeMap<String, Value>)>,
        resolver: Option<&dyn MergeResolver>,
    ) -> Result<(), ConclaveError> {
        let mut by_key: BTreeMap<String, Vec<(Option<Uuid>, Value)>> = BTreeMap::new();
        for (writer, batch) in updates {
            for (key, value) in batch {
                by_key.entry(key).or_default().push((writer, value));
            }
        }

        for (key, mut candidates) in by_key {
            if candidates.len() == 1 {
                let (writer, value) = candidates.remove(0);
                self.update(&key, value, writer).await?;
                continue;
            }
            let value = match resolver {
                Some(resolver) => {
                    let values: Vec<Value> = candidates.iter().map(|(_, v)| v.clone()).collect();
                    resolver.resolve(&key, &values)
                }
                None => candidates.last().map(|(_, v)| v.clone()).unwrap_or(Value::Null),
            };
            self.update(&key, value, None).await?;
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.read().await.iter().map(|(k, e)| (k.clone(), e.value.clone())).collect()
    }

    /// Replaces the map wholesale, resets the global version counter to `version`,
    /// and emits a `context-restored` notification to every subscriber.
    pub async fn restore(&self, snapshot: BTreeMap<String, Value>, version: u64) {
        {
            let mut entries = self.entries.write().await;
            entries.clear();
            for (key, value) in &snapshot {
                entries.insert(
                    key.clone(),
                    Entry { value: value.clone(), version, history: vec![(version, value.clone())] },
                );
            }
        }
        self.global_version.store(version, Ordering::SeqCst);

        let subscribers = self.subscribers.read().await;
        for sender in subscribers.values() {
            let _ = sender.send(ContextUpdateEvent {
                key: "context-restored".to_string(),
                value: Value::Null,
                version,
            });
        }
    }
}
