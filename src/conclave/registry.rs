//! Agent Process Registry: owns the subprocess lifecycle for every configured agent —
//! spawn, health-check, restart-on-crash with a rate limit, and graceful draining.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conclave_rpc::protocol::RequestId;
use conclave_rpc::transport::Transport;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::{RwLock, Semaphore};

use crate::conclave::data::{AgentDescriptor, AgentName, RestartPolicy};
use crate::conclave::error::ConclaveError;
use crate::conclave::permission::PermissionRegistry;

const HEALTH_PING_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PINGS: u32 = 3;
const SHUTDOWN_DEFAULT_GRACE: Duration = Duration::from_secs(5);
const CANCEL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Ready,
    Draining,
    Dead,
}

struct ManagedProcess {
    descriptor: AgentDescriptor,
    transport: RwLock<Option<Arc<Transport>>>,
    state: RwLock<ProcessState>,
    /// Bounds concurrent in-flight `call`s to `descriptor.max_concurrency`.
    capacity: Arc<Semaphore>,
    missed_pings: AtomicU32,
    restart_count: AtomicU32,
    restart_window_start: RwLock<Instant>,
}

pub struct AgentRegistry {
    processes: RwLock<HashMap<AgentName, Arc<ManagedProcess>>>,
    order: Vec<AgentName>,
    rr_cursor: AtomicUsize,
    permissions: RwLock<Option<Arc<PermissionRegistry>>>,
}

impl AgentRegistry {
    pub fn new(descriptors: Vec<AgentDescriptor>) -> Self {
        let order: Vec<AgentName> = descriptors.iter().map(|d| d.name.clone()).collect();
        let processes = descriptors
            .into_iter()
            .map(|d| {
                let name = d.name.clone();
                let capacity = Arc::new(Semaphore::new(d.max_concurrency.max(1)));
                (
                    name,
                    Arc::new(ManagedProcess {
                        descriptor: d,
                        transport: RwLock::new(None),
                        state: RwLock::new(ProcessState::Dead),
                        capacity,
                        missed_pings: AtomicU32::new(0),
                        restart_count: AtomicU32::new(0),
                        restart_window_start: RwLock::new(Instant::now()),
                    }),
                )
            })
            .collect();
        Self { processes: RwLock::new(processes), order, rr_cursor: AtomicUsize::new(0), permissions: RwLock::new(None) }
    }

    /// Every subsequent `call`/`call_tracked` passes its `(agent, method)` pair through
    /// `registry`'s `enforce` before reaching the subprocess.
    pub async fn set_permissions(&self, registry: Arc<PermissionRegistry>) {
        *self.permissions.write().await = Some(registry);
    }

    async fn managed(&self, name: &AgentName) -> Result<Arc<ManagedProcess>, ConclaveError> {
        self.processes
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ConclaveError::AgentUnavailable { agent: name.clone() })
    }

    /// Spawns the subprocess, then performs the `initialize` handshake before moving
    /// the agent to `ready`. A process never becomes `ready` without a successful
    /// handshake — any failure leaves it `dead`.
    pub async fn start(&self, name: &AgentName) -> Result<(), ConclaveError> {
        let managed = self.managed(name).await?;
        *managed.state.write().await = ProcessState::Starting;

        let mut command = Command::new(&managed.descriptor.command);
        command.args(&managed.descriptor.args);
        for (key, value) in &managed.descriptor.environment {
            command.env(key, value);
        }
        let transport = Arc::new(Transport::spawn(command).map_err(ConclaveError::from)?);

        if let Err(err) = transport.initialize(HEALTH_PING_INTERVAL).await {
            *managed.state.write().await = ProcessState::Dead;
            let _ = transport.kill().await;
            return Err(ConclaveError::from(err));
        }

        *managed.transport.write().await = Some(transport);
        *managed.state.write().await = ProcessState::Ready;
        log::info!("agent {name} started");
        Ok(())
    }

    /// Sends `shutdown`, waits `grace` for the subprocess to exit on its own, then
    /// kills it unconditionally and reaps the transport.
    pub async fn stop(&self, name: &AgentName, grace: Duration) -> Result<(), ConclaveError> {
        let managed = self.managed(name).await?;
        *managed.state.write().await = ProcessState::Draining;
        if let Some(transport) = managed.transport.write().await.take() {
            let _ = transport.shutdown().await;
            tokio::time::sleep(grace).await;
            let _ = transport.kill().await;
        }
        *managed.state.write().await = ProcessState::Dead;
        Ok(())
    }

    pub async fn state_of(&self, name: &AgentName) -> Option<ProcessState> {
        let processes = self.processes.read().await;
        let managed = processes.get(name)?;
        Some(*managed.state.read().await)
    }

    /// Acquires a capacity permit (bounded by `max_concurrency`), then dispatches
    /// `method`. Waiting for a permit counts against `deadline`.
    pub async fn call(&self, name: &AgentName, method: &str, params: Value, deadline: Duration) -> Result<Value, ConclaveError> {
        self.call_tracked(name, method, params, deadline, |_| {}).await
    }

    /// Like [`Self::call`], but `on_dispatch` fires with the request's [`RequestId`]
    /// as soon as it's assigned, letting a caller record it for later [`Self::cancel`].
    pub async fn call_tracked(
        &self,
        name: &AgentName,
        method: &str,
        params: Value,
        deadline: Duration,
        on_dispatch: impl FnOnce(RequestId),
    ) -> Result<Value, ConclaveError> {
        if let Some(permissions) = self.permissions.read().await.clone() {
            permissions.enforce(name, method)?;
        }

        let managed = self.managed(name).await?;
        if *managed.state.read().await != ProcessState::Ready {
            return Err(ConclaveError::AgentUnavailable { agent: name.clone() });
        }

        let permit = tokio::time::timeout(deadline, managed.capacity.clone().acquire_owned())
            .await
            .map_err(|_| ConclaveError::AgentTimeout { agent: name.clone() })?
            .map_err(|_| ConclaveError::AgentUnavailable { agent: name.clone() })?;

        let transport = managed.transport.read().await.clone().ok_or_else(|| ConclaveError::AgentUnavailable { agent: name.clone() })?;
        let result = transport.call_with(method, Some(params), deadline, on_dispatch).await;
        drop(permit);

        result.map_err(|err| match err {
            conclave_rpc::TransportError::Timeout { .. } => ConclaveError::AgentTimeout { agent: name.clone() },
            conclave_rpc::TransportError::AgentCrashed { .. } => ConclaveError::AgentCrashed { agent: name.clone() },
            conclave_rpc::TransportError::Cancelled { .. } => ConclaveError::Cancelled,
            conclave_rpc::TransportError::AgentError { message, .. } => {
                ConclaveError::AgentError { agent: name.clone(), message }
            }
            other => ConclaveError::Transport(other),
        })
    }

    /// Sends a `cancel` notification for `request` to `name`'s transport, resolving
    /// the matching in-flight `call` locally once `CANCEL_GRACE` elapses unanswered.
    pub async fn cancel(&self, name: &AgentName, request: RequestId) -> Result<(), ConclaveError> {
        let managed = self.managed(name).await?;
        let transport = managed.transport.read().await.clone().ok_or_else(|| ConclaveError::AgentUnavailable { agent: name.clone() })?;
        transport.cancel(request, CANCEL_GRACE).await;
        Ok(())
    }

    /// Round-robins over ready agents, never starving the newest: the cursor advances
    /// on every pick regardless of whether that candidate was eligible.
    pub async fn pick_ready(&self, candidates: &[AgentName]) -> Option<AgentName> {
        if candidates.is_empty() {
            return None;
        }
        let start = self.rr_cursor.fetch_add(1, Ordering::SeqCst) % candidates.len();
        for offset in 0..candidates.len() {
            let idx = (start + offset) % candidates.len();
            let name = &candidates[idx];
            if self.state_of(name).await == Some(ProcessState::Ready) {
                return Some(name.clone());
            }
        }
        None
    }

    /// One iteration of the health loop: pings every `Ready` agent, counts misses, and
    /// restarts any agent over `MAX_MISSED_PINGS` misses if its restart policy allows.
    pub async fn health_tick(&self) {
        let names: Vec<AgentName> = self.order.clone();
        for name in names {
            self.health_check_one(&name).await;
        }
    }

    async fn health_check_one(&self, name: &AgentName) {
        let processes = self.processes.read().await;
        let Some(managed) = processes.get(name) else { return };
        if *managed.state.read().await != ProcessState::Ready {
            return;
        }
        let Some(transport) = managed.transport.read().await.clone() else { return };

        match transport.ping(HEALTH_PING_INTERVAL).await {
            Ok(_) => managed.missed_pings.store(0, Ordering::SeqCst),
            Err(_) => {
                let misses = managed.missed_pings.fetch_add(1, Ordering::SeqCst) + 1;
                if misses >= MAX_MISSED_PINGS {
                    drop(processes);
                    self.restart_if_allowed(name).await;
                }
            }
        }
    }

    async fn restart_if_allowed(&self, name: &AgentName) {
        let processes = self.processes.read().await;
        let Some(managed) = processes.get(name) else { return };

        if managed.descriptor.restart_policy == RestartPolicy::Never {
            log::warn!("agent {name} missed too many health pings but its restart policy is never, leaving it dead");
            drop(processes);
            let _ = self.stop(name, SHUTDOWN_DEFAULT_GRACE).await;
            return;
        }

        let mut window_start = managed.restart_window_start.write().await;
        if window_start.elapsed() > managed.descriptor.restart_window {
            *window_start = Instant::now();
            managed.restart_count.store(0, Ordering::SeqCst);
        }
        let restarts = managed.restart_count.fetch_add(1, Ordering::SeqCst) + 1;
        drop(window_start);

        if restarts > managed.descriptor.max_restarts {
            log::error!("agent {name} exceeded its restart budget, leaving it dead");
            *managed.state.write().await = ProcessState::Dead;
            return;
        }

        log::warn!("agent {name} missed too many health pings, restarting");
        drop(processes);
        let _ = self.stop(name, SHUTDOWN_DEFAULT_GRACE).await;
        let _ = self.start(name).await;
    }
}
