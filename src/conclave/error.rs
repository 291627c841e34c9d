use std::fmt;

use conclave_memory::StoreError;
use conclave_rpc::TransportError;

use crate::conclave::data::AgentName;

/// The crate-wide error taxonomy. Every fallible public entry point returns a
/// `Result<_, ConclaveError>`; variants carry enough context to build the
/// short-code/message/remediation shape the client transport expects.
#[derive(Debug)]
pub enum ConclaveError {
    Config(String),
    Credential { name: String, reason: String, remediation: Vec<String> },
    PermissionDenied { agent: AgentName, tool: String },
    AgentUnavailable { agent: AgentName },
    AgentTimeout { agent: AgentName },
    AgentError { agent: AgentName, message: String },
    AgentCrashed { agent: AgentName },
    Cancelled,
    Locked { key: String },
    Transport(TransportError),
    Store(StoreError),
}

impl fmt::Display for ConclaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConclaveError::Config(msg) => write!(f, "configuration error: {msg}"),
            ConclaveError::Credential { name, reason, .. } => {
                write!(f, "credential {name} invalid: {reason}")
            }
            ConclaveError::PermissionDenied { agent, tool } => {
                write!(f, "agent {agent} is not permitted to use tool {tool}")
            }
            ConclaveError::AgentUnavailable { agent } => write!(f, "agent {agent} is unavailable"),
            ConclaveError::AgentTimeout { agent } => write!(f, "agent {agent} timed out"),
            ConclaveError::AgentError { agent, message } => write!(f, "agent {agent} failed: {message}"),
            ConclaveError::AgentCrashed { agent } => write!(f, "agent {agent} crashed"),
            ConclaveError::Cancelled => write!(f, "operation cancelled"),
            ConclaveError::Locked { key } => write!(f, "key {key} is locked by another holder"),
            ConclaveError::Transport(err) => write!(f, "{err}"),
            ConclaveError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ConclaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConclaveError::Transport(err) => Some(err),
            ConclaveError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for ConclaveError {
    fn from(err: TransportError) -> Self {
        ConclaveError::Transport(err)
    }
}

impl From<StoreError> for ConclaveError {
    fn from(err: StoreError) -> Self {
        ConclaveError::Store(err)
    }
}

/// User-visible failure shape: short code, human message, optional remediation hint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FailureReport {
    pub code: &'static str,
    pub message: String,
    pub remediation: Option<String>,
}

impl From<&ConclaveError> for FailureReport {
    fn from(err: &ConclaveError) -> Self {
        let code = match err {
            ConclaveError::Config(_) => "config_error",
            ConclaveError::Credential { .. } => "credential_error",
            ConclaveError::PermissionDenied { .. } => "permission_denied",
            ConclaveError::AgentUnavailable { .. } => "agent_unavailable",
            ConclaveError::AgentTimeout { .. } => "agent_timeout",
            ConclaveError::AgentError { .. } => "agent_error",
            ConclaveError::AgentCrashed { .. } => "agent_crashed",
            ConclaveError::Cancelled => "cancelled",
            ConclaveError::Locked { .. } => "locked",
            ConclaveError::Transport(_) => "transport_error",
            ConclaveError::Store(_) => "store_error",
        };
        let remediation = match err {
            ConclaveError::Credential { remediation, .. } if !remediation.is_empty() => {
                Some(remediation.join("\n"))
            }
            _ => None,
        };
        FailureReport { code, message: err.to_string(), remediation }
    }
}
