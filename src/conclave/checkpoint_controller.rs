//! Checkpoint & Pause Controller: per-session pause flags and rollback-to-checkpoint,
//! sitting on top of the hash-chained journal in `conclave-memory`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::conclave::context_bus::ContextBus;
use crate::conclave::conversation::ConversationHistory;
use crate::conclave::error::ConclaveError;
use conclave_memory::checkpoint::CheckpointJournal;

pub struct PauseController {
    paused: Mutex<HashMap<Uuid, bool>>,
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseController {
    pub fn new() -> Self {
        Self { paused: Mutex::new(HashMap::new()) }
    }

    /// Honored at the next inter-step boundary, not mid-step.
    pub async fn pause(&self, session_id: Uuid) {
        self.paused.lock().await.insert(session_id, true);
    }

    pub async fn resume(&self, session_id: Uuid) {
        self.paused.lock().await.insert(session_id, false);
    }

    pub async fn is_paused(&self, session_id: Uuid) -> bool {
        self.paused.lock().await.get(&session_id).copied().unwrap_or(false)
    }

    /// Cancels the in-flight step (by virtue of the caller checking `is_paused`/a
    /// cancellation token before continuing), restores shared context to the most
    /// recent checkpoint strictly before `cancelled_seq`, and truncates history to
    /// that checkpoint's marker.
    pub async fn stop_and_rollback(
        &self,
        session_id: Uuid,
        cancelled_seq: u64,
        checkpoint_dir: &std::path::Path,
        context: &Arc<ContextBus>,
        history: &Arc<Mutex<ConversationHistory>>,
    ) -> Result<(), ConclaveError> {
        let journal = CheckpointJournal::open(checkpoint_dir, session_id.to_string())?;
        let target = journal
            .before(cancelled_seq)
            .cloned()
            .or_else(|| journal.checkpoints().first().cloned());

        if let Some(checkpoint) = target {
            context.restore(checkpoint.context_snapshot.clone(), checkpoint.seq).await;
            history.lock().await.truncate(session_id, checkpoint.history_marker);
        }
        self.paused.lock().await.remove(&session_id);
        Ok(())
    }
}
