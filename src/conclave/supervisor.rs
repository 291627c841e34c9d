//! Supervisor / Router: classifies a prompt's intent, builds a workflow from a
//! template, hydrates and runs each step against the Agent Process Registry, and
//! streams progress back to the client while checkpointing after every step.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use conclave_rpc::protocol::RequestId;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::conclave::context_bus::ContextBus;
use crate::conclave::conversation::ConversationHistory;
use crate::conclave::data::{AgentName, Role};
use crate::conclave::error::{ConclaveError, FailureReport};
use crate::conclave::event::ServerEvent;
use crate::conclave::registry::AgentRegistry;
use conclave_memory::store::{SearchFilter, VectorMemoryStore, MemoryType};
use conclave_memory::checkpoint::CheckpointJournal;

const DEFAULT_STEP_DEADLINE: Duration = Duration::from_secs(120);
const CLASSIFIER_CONFIDENCE_THRESHOLD: f32 = 0.6;
const HYDRATION_MESSAGE_WINDOW: usize = 5;
const MEMORY_SEARCH_K: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Query,
    Architecture,
    Implementation,
    Review,
    Debug,
    Documentation,
    Research,
    Trading,
}

/// First-match-in-declaration-order keyword classification. `Query` is the fallback
/// with no entry of its own — it is what you get when nothing above it matches.
const KEYWORD_TABLE: &[(Intent, &[&str])] = &[
    (Intent::Debug, &["bug", "error", "crash", "fix", "broken", "fails"]),
    (Intent::Review, &["review", "audit", "critique"]),
    (Intent::Architecture, &["architect", "design", "structure"]),
    (Intent::Documentation, &["document", "docs", "readme", "explain"]),
    (Intent::Research, &["research", "investigate", "find out", "look up"]),
    (Intent::Trading, &["trade", "position", "portfolio", "market"]),
    (Intent::Implementation, &["implement", "build", "write", "create", "add"]),
];

pub fn classify_by_keyword(prompt: &str) -> (Intent, f32) {
    let lower = prompt.to_lowercase();
    for (intent, keywords) in KEYWORD_TABLE {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return (*intent, 1.0);
        }
    }
    (Intent::Query, 0.5)
}

#[derive(Debug, Clone)]
pub struct WorkflowStep {
    pub id: &'static str,
    pub agent: AgentName,
    pub depends_on: &'static [&'static str],
}

pub fn workflow_for(intent: Intent) -> Vec<WorkflowStep> {
    match intent {
        Intent::Query => vec![step("respond", "responder", &[])],
        Intent::Architecture => vec![step("plan", "architect", &[])],
        Intent::Implementation => vec![
            step("plan", "architect", &[]),
            step("implement", "codesmith", &["plan"]),
            step("test", "codesmith", &["implement"]),
            step("review", "codesmith", &["test"]),
        ],
        Intent::Review => vec![step("review", "reviewer", &[])],
        Intent::Debug => vec![
            step("investigate", "researcher", &[]),
            step("fix", "codesmith", &["investigate"]),
            step("verify", "codesmith", &["fix"]),
        ],
        Intent::Documentation => vec![step("write", "responder", &[])],
        Intent::Research => vec![step("research", "researcher", &[])],
        Intent::Trading => vec![step("analyze", "researcher", &[]), step("respond", "responder", &["analyze"])],
    }
}

fn step(id: &'static str, agent: &str, depends_on: &'static [&'static str]) -> WorkflowStep {
    WorkflowStep { id, agent: AgentName(agent.to_string()), depends_on }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StepOutcome {
    Success(String),
    PartialSuccess(String),
    Skipped,
}

pub struct Supervisor {
    pub registry: Arc<AgentRegistry>,
    pub context: Arc<ContextBus>,
    pub history: Arc<Mutex<ConversationHistory>>,
    pub memory: Arc<VectorMemoryStore>,
    pub checkpoint_dir: std::path::PathBuf,
    pub fallback_agents: BTreeMap<AgentName, AgentName>,
    pub classifier_agent: Option<AgentName>,
    pub pause_controller: Arc<crate::conclave::checkpoint_controller::PauseController>,
    /// The agent currently in flight for a session, if any — recorded at dispatch time
    /// so [`Self::cancel_running_step`] can cancel it on the transport.
    pub active_calls: std::sync::Mutex<HashMap<Uuid, (AgentName, RequestId)>>,
    /// A per-session hint set by a `select_agent` client message, consulted by
    /// [`Self::handle`] to override the first runnable workflow step's agent.
    pub preferred_agent: Mutex<HashMap<Uuid, AgentName>>,
}

impl Supervisor {
    pub async fn set_preferred_agent(&self, session_id: Uuid, agent: AgentName) {
        self.preferred_agent.lock().await.insert(session_id, agent);
    }

    /// Drops a session's preferred-agent hint, so a cleared session starts fresh.
    pub async fn clear_preferred_agent(&self, session_id: Uuid) {
        self.preferred_agent.lock().await.remove(&session_id);
    }

    /// Cancels the step currently in flight for `session_id`, if any, via the
    /// registry's transport-level `cancel`. A no-op if nothing is running.
    pub async fn cancel_running_step(&self, session_id: Uuid) {
        let recorded = self.active_calls.lock().expect("active_calls lock poisoned").remove(&session_id);
        if let Some((agent, request_id)) = recorded {
            let _ = self.registry.cancel(&agent, request_id).await;
        }
    }

    pub async fn handle(
        &self,
        session_id: Uuid,
        system_prompt: &str,
        user_prompt: &str,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<(), ConclaveError> {
        self.history.lock().await.add_message(session_id, Role::User, user_prompt);
        let _ = events.send(ServerEvent::UserMessage { session_id, content: user_prompt.to_string() });

        let intent = self.classify(user_prompt).await;
        let mut workflow = workflow_for(intent);
        if let Some(preferred) = self.preferred_agent.lock().await.get(&session_id).cloned() {
            if let Some(first) = workflow.first_mut() {
                first.agent = preferred;
            }
        }
        let mut journal = CheckpointJournal::open(&self.checkpoint_dir, session_id.to_string())?;

        let mut results: BTreeMap<&'static str, StepOutcome> = BTreeMap::new();
        let mut remaining: Vec<&WorkflowStep> = workflow.iter().collect();

        while !remaining.is_empty() {
            if self.pause_controller.is_paused(session_id).await {
                let _ = events.send(ServerEvent::Paused { session_id });
                return Ok(());
            }

            let ready_idx = remaining.iter().position(|s| {
                s.depends_on.iter().all(|dep| results.contains_key(dep))
            });
            let Some(idx) = ready_idx else { break };
            let current = remaining.remove(idx);

            if current.depends_on.iter().any(|dep| matches!(results.get(dep), Some(StepOutcome::Skipped))) {
                results.insert(current.id, StepOutcome::Skipped);
                continue;
            }

            let _ = events.send(ServerEvent::AgentThinking { session_id, agent: current.agent.0.clone() });
            let outcome = self.run_step(session_id, system_prompt, user_prompt, current, &results, &events).await;
            results.insert(current.id, outcome);

            let snapshot = self.context.snapshot().await;
            let history_marker = self.history.lock().await.get_current_messages(session_id).len();
            journal.append(snapshot, history_marker)?;
        }

        let final_text = aggregate(&workflow, &results);
        self.history.lock().await.add_message(session_id, Role::Assistant, &final_text);
        let _ = events.send(ServerEvent::AgentResponse { session_id, agent: "supervisor".to_string(), content: final_text });
        let _ = events.send(ServerEvent::Complete { session_id });
        Ok(())
    }

    async fn classify(&self, prompt: &str) -> Intent {
        let (intent, confidence) = classify_by_keyword(prompt);
        if confidence >= CLASSIFIER_CONFIDENCE_THRESHOLD {
            return intent;
        }
        let Some(classifier) = &self.classifier_agent else { return Intent::Query };

        let params = serde_json::json!({ "prompt": prompt });
        match self.registry.call(classifier, "run", params, Duration::from_secs(10)).await {
            Ok(value) => parse_classifier_result(&value).unwrap_or(Intent::Query),
            Err(_) => Intent::Query,
        }
    }

    async fn run_step(
        &self,
        session_id: Uuid,
        system_prompt: &str,
        user_prompt: &str,
        step: &WorkflowStep,
        prior: &BTreeMap<&'static str, StepOutcome>,
        events: &mpsc::UnboundedSender<ServerEvent>,
    ) -> StepOutcome {
        let input = self.hydrate(session_id, system_prompt, user_prompt, step, prior).await;
        let mut agent = step.agent.clone();

        let result = self.call_and_track(session_id, &agent, input.clone()).await;
        let result = match result {
            Err(ConclaveError::AgentUnavailable { .. }) => {
                if let Some(fallback) = self.fallback_agents.get(&agent).cloned() {
                    let _ = events.send(ServerEvent::Progress {
                        session_id,
                        step: step.id.to_string(),
                        detail: format!("fallback: {agent} unavailable, using {fallback}"),
                    });
                    agent = fallback;
                    self.call_and_track(session_id, &agent, input).await
                } else {
                    Err(ConclaveError::AgentUnavailable { agent })
                }
            }
            other => other,
        };
        self.active_calls.lock().expect("active_calls lock poisoned").remove(&session_id);

        match result {
            Ok(value) => {
                let text = value.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string();
                self.history.lock().await.add_message(session_id, Role::Assistant, &text);
                let _ = self.memory.store(text.clone(), MemoryType::Episodic, Some(agent.0.clone()), None);
                let _ = events.send(ServerEvent::AgentResponse { session_id, agent: agent.0.clone(), content: text.clone() });
                StepOutcome::Success(text)
            }
            Err(ConclaveError::AgentTimeout { .. }) => {
                let _ = events.send(ServerEvent::Error {
                    session_id,
                    report: FailureReport::from(&ConclaveError::AgentTimeout { agent: agent.clone() }),
                });
                StepOutcome::PartialSuccess(String::new())
            }
            Err(err) => {
                let _ = events.send(ServerEvent::Error { session_id, report: FailureReport::from(&err) });
                StepOutcome::PartialSuccess(String::new())
            }
        }
    }

    async fn hydrate(
        &self,
        session_id: Uuid,
        system_prompt: &str,
        user_prompt: &str,
        step: &WorkflowStep,
        prior: &BTreeMap<&'static str, StepOutcome>,
    ) -> serde_json::Value {
        let messages = self.history.lock().await.get_current_messages(session_id);
        let recent: Vec<_> = messages.iter().rev().take(HYDRATION_MESSAGE_WINDOW).rev().collect();
        let recalled = self.memory.search(user_prompt, MEMORY_SEARCH_K, SearchFilter::default());

        let prior_results: Vec<String> = step
            .depends_on
            .iter()
            .filter_map(|dep| match prior.get(dep) {
                Some(StepOutcome::Success(text)) | Some(StepOutcome::PartialSuccess(text)) => Some(text.clone()),
                _ => None,
            })
            .collect();

        serde_json::json!({
            "system_prompt": system_prompt,
            "recent_messages": recent.iter().map(|m| serde_json::json!({"role": format!("{:?}", m.role), "content": m.content})).collect::<Vec<_>>(),
            "recalled_memories": recalled.iter().map(|(entry, _similarity, relevance)| serde_json::json!({"content": entry.content, "relevance": relevance})).collect::<Vec<_>>(),
            "prior_results": prior_results,
            "step": step.id,
        })
    }

    /// Dispatches `input` to `agent`'s `run` method, recording the in-flight request
    /// id for this session so [`Self::cancel_running_step`] can cancel it.
    async fn call_and_track(&self, session_id: Uuid, agent: &AgentName, input: serde_json::Value) -> Result<serde_json::Value, ConclaveError> {
        let agent_for_tracking = agent.clone();
        let active_calls = &self.active_calls;
        self.registry
            .call_tracked(agent, "run", input, DEFAULT_STEP_DEADLINE, move |id| {
                active_calls.lock().expect("active_calls lock poisoned").insert(session_id, (agent_for_tracking, id));
            })
            .await
    }
}

fn parse_classifier_result(value: &serde_json::Value) -> Option<Intent> {
    let kind = value.get("kind")?.as_str()?;
    match kind {
        "architecture" => Some(Intent::Architecture),
        "implementation" => Some(Intent::Implementation),
        "review" => Some(Intent::Review),
        "debug" => Some(Intent::Debug),
        "documentation" => Some(Intent::Documentation),
        "research" => Some(Intent::Research),
        "trading" => Some(Intent::Trading),
        "query" => Some(Intent::Query),
        _ => None,
    }
}

fn aggregate(workflow: &[WorkflowStep], results: &BTreeMap<&'static str, StepOutcome>) -> String {
    if workflow.len() == 1 {
        return match results.get(workflow[0].id) {
            Some(StepOutcome::Success(text)) | Some(StepOutcome::PartialSuccess(text)) => text.clone(),
            _ => String::new(),
        };
    }
    workflow
        .iter()
        .map(|step| {
            let body = match results.get(step.id) {
                Some(StepOutcome::Success(text)) => text.clone(),
                Some(StepOutcome::PartialSuccess(text)) if !text.is_empty() => format!("{text} (partial)"),
                Some(StepOutcome::PartialSuccess(_)) => "(failed)".to_string(),
                Some(StepOutcome::Skipped) | None => "(skipped)".to_string(),
            };
            format!("## {}\n{}", step.id, body)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
