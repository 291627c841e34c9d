//! Append-only, SHA-256 hash-chained checkpoint journal, one file per workflow.
//!
//! Mirrors the hash-chaining idiom used elsewhere in this codebase for tamper-evident
//! append-only logs: each record's hash folds in the previous record's hash, so
//! `verify_integrity` can detect truncation or out-of-band edits.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub workflow_id: String,
    pub seq: u64,
    /// The full shared-context map at the moment this checkpoint was taken.
    pub context_snapshot: BTreeMap<String, serde_json::Value>,
    /// Conversation history length at checkpoint time, for rollback truncation.
    pub history_marker: usize,
    pub created_at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

fn compute_hash(
    workflow_id: &str,
    seq: u64,
    context_snapshot: &BTreeMap<String, serde_json::Value>,
    history_marker: usize,
    created_at: DateTime<Utc>,
    prev_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workflow_id.as_bytes());
    hasher.update(seq.to_le_bytes());
    hasher.update(serde_json::to_vec(context_snapshot).unwrap_or_default());
    hasher.update(history_marker.to_le_bytes());
    hasher.update(created_at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn journal_filename(workflow_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workflow_id.as_bytes());
    let digest = hasher.finalize();
    format!("{:x}.jsonl", digest)
}

pub struct CheckpointJournal {
    path: PathBuf,
    workflow_id: String,
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointJournal {
    /// Opens (creating if absent) the journal for `workflow_id` under `dir`, replaying
    /// any existing records into memory.
    pub fn open(dir: &Path, workflow_id: impl Into<String>) -> Result<Self, StoreError> {
        let workflow_id = workflow_id.into();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(journal_filename(&workflow_id));
        let checkpoints = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let mut loaded = Vec::new();
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let checkpoint: Checkpoint =
                    serde_json::from_str(&line).map_err(|e| StoreError::Serialization(e.to_string()))?;
                loaded.push(checkpoint);
            }
            loaded
        } else {
            Vec::new()
        };
        Ok(Self { path, workflow_id, checkpoints })
    }

    pub fn append(
        &mut self,
        context_snapshot: BTreeMap<String, serde_json::Value>,
        history_marker: usize,
    ) -> Result<Checkpoint, StoreError> {
        let seq = self.checkpoints.last().map(|c| c.seq + 1).unwrap_or(0);
        let prev_hash = self.checkpoints.last().map(|c| c.hash.clone()).unwrap_or_default();
        let created_at = Utc::now();
        let hash = compute_hash(&self.workflow_id, seq, &context_snapshot, history_marker, created_at, &prev_hash);
        let checkpoint = Checkpoint {
            id: Uuid::new_v4(),
            workflow_id: self.workflow_id.clone(),
            seq,
            context_snapshot,
            history_marker,
            created_at,
            prev_hash,
            hash,
        };

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let line = serde_json::to_string(&checkpoint).map_err(|e| StoreError::Serialization(e.to_string()))?;
        writeln!(file, "{line}")?;

        self.checkpoints.push(checkpoint.clone());
        Ok(checkpoint)
    }

    pub fn latest(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    /// The most recent checkpoint strictly before `seq`, for rollback semantics that
    /// must land earlier than the step being cancelled.
    pub fn before(&self, seq: u64) -> Option<&Checkpoint> {
        self.checkpoints.iter().rev().find(|c| c.seq < seq)
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn verify_integrity(&self) -> bool {
        let mut prev_hash = String::new();
        for checkpoint in &self.checkpoints {
            if checkpoint.prev_hash != prev_hash {
                return false;
            }
            let expected = compute_hash(
                &checkpoint.workflow_id,
                checkpoint.seq,
                &checkpoint.context_snapshot,
                checkpoint.history_marker,
                checkpoint.created_at,
                &checkpoint.prev_hash,
            );
            if expected != checkpoint.hash {
                return false;
            }
            prev_hash = checkpoint.hash.clone();
        }
        true
    }
}
