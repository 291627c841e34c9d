//! Client Stream Gateway: a WebSocket endpoint speaking one JSON object per frame,
//! fanning client `chat`/`pause`/`resume`/... messages into the Supervisor and
//! streaming its events back. Gated behind the `server` feature, the same way this
//! codebase gates its axum-based HTTP surface.
#![cfg(feature = "server")]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::conclave::checkpoint_controller::PauseController;
use crate::conclave::context_bus::ContextBus;
use crate::conclave::conversation::ConversationHistory;
use crate::conclave::event::{ClientMessage, ServerEvent};
use crate::conclave::supervisor::Supervisor;

pub struct GatewayState {
    pub supervisor: Arc<Supervisor>,
    pub pause_controller: Arc<PauseController>,
    pub context: Arc<ContextBus>,
    pub history: Arc<Mutex<ConversationHistory>>,
    pub system_prompt: String,
    pub active_sessions: Mutex<HashSet<Uuid>>,
    /// Per-session `thinking` event toggle, set by `toggle_thinking`; defaults to on.
    pub thinking_enabled: Mutex<HashMap<Uuid, bool>>,
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ServerEvent>();

    let forward_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if let Ok(text) = serde_json::to_string(&event) {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(text) = message else { continue };
        let Ok(client_message) = serde_json::from_str::<ClientMessage>(&text) else {
            log::warn!("dropping malformed client frame");
            continue;
        };
        dispatch(client_message, &state, &events_tx).await;
    }

    forward_task.abort();
}

/// Wraps `events` so `agent_thinking` frames are dropped for any session that has
/// disabled them via `toggle_thinking`; every other event passes through untouched.
fn thinking_filtered_sender(
    state: Arc<GatewayState>,
    events: mpsc::UnboundedSender<ServerEvent>,
) -> mpsc::UnboundedSender<ServerEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let ServerEvent::AgentThinking { session_id, .. } = &event {
                let enabled = *state.thinking_enabled.lock().await.get(session_id).unwrap_or(&true);
                if !enabled {
                    continue;
                }
            }
            let _ = events.send(event);
        }
    });
    tx
}

async fn dispatch(message: ClientMessage, state: &Arc<GatewayState>, events: &mpsc::UnboundedSender<ServerEvent>) {
    match message {
        ClientMessage::Chat { session_id, prompt, agent, mode: _, thinking_mode } => {
            let mut active = state.active_sessions.lock().await;
            if active.contains(&session_id) {
                let _ = events.send(ServerEvent::Busy { session_id });
                return;
            }
            active.insert(session_id);
            drop(active);

            if let Some(agent) = agent {
                state.supervisor.set_preferred_agent(session_id, agent.into()).await;
            }
            if let Some(thinking_mode) = thinking_mode {
                state.thinking_enabled.lock().await.insert(session_id, thinking_mode != "off");
            }

            let supervisor = state.supervisor.clone();
            let system_prompt = state.system_prompt.clone();
            let filtered_events = thinking_filtered_sender(state.clone(), events.clone());
            let state = state.clone();
            tokio::spawn(async move {
                let _ = supervisor.handle(session_id, &system_prompt, &prompt, filtered_events).await;
                state.active_sessions.lock().await.remove(&session_id);
            });
        }
        ClientMessage::Pause { session_id } => {
            state.pause_controller.pause(session_id).await;
            let _ = events.send(ServerEvent::Paused { session_id });
        }
        ClientMessage::Resume { session_id, .. } => {
            state.pause_controller.resume(session_id).await;
            let _ = events.send(ServerEvent::Resumed { session_id });
        }
        ClientMessage::StopAndRollback { session_id } => {
            state.supervisor.cancel_running_step(session_id).await;
            let checkpoint_dir = state.supervisor.checkpoint_dir.clone();
            let _ = state
                .pause_controller
                .stop_and_rollback(session_id, u64::MAX, &checkpoint_dir, &state.context, &state.history)
                .await;
            let _ = events.send(ServerEvent::StoppedAndRolledBack { session_id });
        }
        ClientMessage::NewSession => {
            let id = state.history.lock().await.create_session();
            let _ = events.send(ServerEvent::UserMessage { session_id: id, content: String::new() });
        }
        ClientMessage::LoadHistory { session_id, limit, project_path: _ } => {
            let mut messages = state.history.lock().await.get_current_messages(session_id);
            if let Some(limit) = limit {
                if messages.len() > limit {
                    messages = messages.split_off(messages.len() - limit);
                }
            }
            let _ = events.send(ServerEvent::History { session_id, messages });
        }
        ClientMessage::SelectAgent { session_id, agent } => {
            state.supervisor.set_preferred_agent(session_id, agent.into()).await;
        }
        ClientMessage::ToggleThinking { session_id, enabled } => {
            state.thinking_enabled.lock().await.insert(session_id, enabled);
        }
        ClientMessage::Command { session_id, command, args } => {
            let output = match command.as_str() {
                "clear" => {
                    state.history.lock().await.clear(session_id);
                    state.thinking_enabled.lock().await.remove(&session_id);
                    state.supervisor.clear_preferred_agent(session_id).await;
                    let _ = events.send(ServerEvent::SessionCleared { session_id });
                    "session cleared".to_string()
                }
                other => format!("unknown command: {other} {}", args.join(" ")),
            };
            let _ = events.send(ServerEvent::CommandResult { session_id, command, output });
        }
    }
}
