//! Shared data model: the types referenced by more than one component.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable key for an agent, used everywhere a raw `String` would otherwise be handed
/// around as an implicit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentName(pub String);

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentName {
    fn from(value: &str) -> Self {
        AgentName(value.to_string())
    }
}

impl From<String> for AgentName {
    fn from(value: String) -> Self {
        AgentName(value)
    }
}

/// How the registry reacts to a managed process dying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Never,
    OnCrash,
    Always,
}

/// Static description of how to launch and restart one agent's subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: AgentName,
    pub command: String,
    pub args: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub max_restarts: u32,
    pub restart_window: std::time::Duration,
    pub default_model: String,
    /// Upper bound on concurrent in-flight `call`s the registry admits for this agent.
    pub max_concurrency: usize,
    pub environment: Vec<(String, String)>,
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One tool-permission audit record, kept in the Permission Registry's bounded ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub agent: AgentName,
    pub tool: String,
    pub allowed: bool,
}
