//! Permission Registry: a static map from agent to the tool names it may invoke, plus
//! a bounded audit trail of every decision made.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use crate::conclave::data::{AgentName, AuditEntry};
use crate::conclave::error::ConclaveError;

const AUDIT_CAPACITY: usize = 10_000;

pub struct PermissionRegistry {
    allowed: HashMap<AgentName, Vec<String>>,
    audit: RwLock<VecDeque<AuditEntry>>,
}

impl PermissionRegistry {
    pub fn new(allowed: HashMap<AgentName, Vec<String>>) -> Self {
        Self { allowed, audit: RwLock::new(VecDeque::with_capacity(AUDIT_CAPACITY)) }
    }

    /// Pure check, no audit side effect — used for UI/introspection paths that should
    /// not pollute the audit trail with speculative lookups.
    pub fn check(&self, agent: &AgentName, tool: &str) -> bool {
        self.allowed.get(agent).map(|tools| tools.iter().any(|t| t == tool)).unwrap_or(false)
    }

    /// The gate every tool invocation must pass through. Records the decision in the
    /// audit ring buffer regardless of outcome, dropping the oldest entry past capacity.
    pub fn enforce(&self, agent: &AgentName, tool: &str) -> Result<(), ConclaveError> {
        let allowed = self.check(agent, tool);
        self.record(agent, tool, allowed);
        if allowed {
            Ok(())
        } else {
            Err(ConclaveError::PermissionDenied { agent: agent.clone(), tool: tool.to_string() })
        }
    }

    fn record(&self, agent: &AgentName, tool: &str, allowed: bool) {
        let mut audit = self.audit.write().expect("audit lock poisoned");
        if audit.len() >= AUDIT_CAPACITY {
            audit.pop_front();
        }
        audit.push_back(AuditEntry {
            ts: chrono::Utc::now(),
            agent: agent.clone(),
            tool: tool.to_string(),
            allowed,
        });
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.read().expect("audit lock poisoned").iter().cloned().collect()
    }
}
