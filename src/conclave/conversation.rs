//! Conversation History: per-session message log, bounded both per-session (oldest
//! message dropped) and across sessions (least-recently-modified session evicted).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conclave::data::{ConversationMessage, Role};

const MAX_MESSAGES_PER_SESSION: usize = 500;
const MAX_SESSIONS: usize = 1_000;
const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: Uuid,
    pub title: Option<String>,
    pub messages: Vec<ConversationMessage>,
    pub last_modified_at: DateTime<Utc>,
}

pub struct ConversationHistory {
    sessions: HashMap<Uuid, ConversationSession>,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self { sessions: HashMap::new() }
    }

    pub fn create_session(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(
            id,
            ConversationSession { id, title: None, messages: Vec::new(), last_modified_at: Utc::now() },
        );
        self.evict_lru_if_needed();
        id
    }

    pub fn add_message(&mut self, session_id: Uuid, role: Role, content: impl Into<String>) {
        let content = content.into();
        let Some(session) = self.sessions.get_mut(&session_id) else { return };

        if session.title.is_none() && role == Role::User {
            session.title = Some(truncate_title(&content));
        }

        session.messages.push(ConversationMessage { role, content, created_at: Utc::now() });
        if session.messages.len() > MAX_MESSAGES_PER_SESSION {
            session.messages.remove(0);
        }
        session.last_modified_at = Utc::now();
    }

    pub fn get_current_messages(&self, session_id: Uuid) -> Vec<ConversationMessage> {
        self.sessions.get(&session_id).map(|s| s.messages.clone()).unwrap_or_default()
    }

    pub fn list_sessions(&self) -> Vec<(Uuid, Option<String>)> {
        self.sessions.values().map(|s| (s.id, s.title.clone())).collect()
    }

    /// Truncates a session's message log back to `marker` messages, for rollback.
    pub fn truncate(&mut self, session_id: Uuid, marker: usize) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.messages.truncate(marker);
            session.last_modified_at = Utc::now();
        }
    }

    pub fn clear(&mut self, session_id: Uuid) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.messages.clear();
            session.title = None;
            session.last_modified_at = Utc::now();
        }
    }

    pub fn export(&self, session_id: Uuid) -> Option<String> {
        self.sessions.get(&session_id).and_then(|s| serde_json::to_string(s).ok())
    }

    pub fn import(&mut self, json: &str) -> Result<Uuid, serde_json::Error> {
        let session: ConversationSession = serde_json::from_str(json)?;
        let id = session.id;
        self.sessions.insert(id, session);
        self.evict_lru_if_needed();
        Ok(id)
    }

    fn evict_lru_if_needed(&mut self) {
        while self.sessions.len() > MAX_SESSIONS {
            if let Some(oldest) = self
                .sessions
                .values()
                .min_by_key(|s| s.last_modified_at)
                .map(|s| s.id)
            {
                self.sessions.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

fn truncate_title(content: &str) -> String {
    if content.chars().count() <= TITLE_MAX_CHARS {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(TITLE_MAX_CHARS).collect();
        format!("{truncated}…")
    }
}
