//! Outbound event kinds streamed to a connected client, and the inbound message kinds
//! a client may send — the wire vocabulary of the Client Stream Gateway (C9).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conclave::data::ConversationMessage;
use crate::conclave::error::FailureReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Chat {
        session_id: Uuid,
        prompt: String,
        agent: Option<String>,
        #[serde(default)]
        mode: Option<String>,
        thinking_mode: Option<String>,
    },
    Command {
        session_id: Uuid,
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Pause {
        session_id: Uuid,
    },
    Resume {
        session_id: Uuid,
        inject: Option<String>,
    },
    StopAndRollback {
        session_id: Uuid,
    },
    SelectAgent {
        session_id: Uuid,
        agent: String,
    },
    ToggleThinking {
        session_id: Uuid,
        enabled: bool,
    },
    LoadHistory {
        session_id: Uuid,
        limit: Option<usize>,
        project_path: Option<String>,
    },
    NewSession,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    UserMessage { session_id: Uuid, content: String },
    AgentThinking { session_id: Uuid, agent: String },
    Progress { session_id: Uuid, step: String, detail: String },
    AgentResponse { session_id: Uuid, agent: String, content: String },
    Complete { session_id: Uuid },
    SessionCleared { session_id: Uuid },
    Paused { session_id: Uuid },
    Resumed { session_id: Uuid },
    StoppedAndRolledBack { session_id: Uuid },
    Busy { session_id: Uuid },
    History { session_id: Uuid, messages: Vec<ConversationMessage> },
    CommandResult { session_id: Uuid, command: String, output: String },
    Error { session_id: Uuid, report: FailureReport },
}
