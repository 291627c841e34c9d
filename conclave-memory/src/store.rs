//! Semantic vector memory: store, similarity search, clustering, pattern extraction,
//! and capacity-driven forgetting.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::{cosine_similarity, Embedder, HashEmbedder};
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryType {
    Episodic,
    Semantic,
    Procedural,
    CodePattern,
    ArchitecturePattern,
    Learning,
}

impl MemoryType {
    /// Importance assigned at store time when the caller does not override it.
    pub fn default_importance(self) -> f32 {
        match self {
            MemoryType::Procedural => 0.8,
            MemoryType::Semantic => 0.7,
            MemoryType::Episodic => 0.5,
            MemoryType::CodePattern | MemoryType::ArchitecturePattern | MemoryType::Learning => 0.3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Procedural => "procedural",
            MemoryType::CodePattern => "code-pattern",
            MemoryType::ArchitecturePattern => "architecture-pattern",
            MemoryType::Learning => "learning",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub content: String,
    pub embedding: Vec<f32>,
    pub memory_type: MemoryType,
    pub agent: Option<String>,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: usize,
    pub by_type: Vec<(String, usize)>,
    pub by_agent: Vec<(String, usize)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportEnvelope {
    version: u32,
    entries: Vec<MemoryEntry>,
}

const EXPORT_VERSION: u32 = 1;
const PATTERN_SIMILARITY_THRESHOLD: f32 = 0.8;
const PATTERN_MIN_GROUP_SIZE: usize = 3;

/// Optional filters for [`VectorMemoryStore::search`]. `min_similarity` is applied to
/// the raw cosine similarity, not the blended relevance score, per the boundary
/// property that `min_similarity = 1.0` returns only exact matches.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub memory_type: Option<MemoryType>,
    pub agent: Option<String>,
    pub min_similarity: Option<f32>,
}

pub struct VectorMemoryStore {
    entries: DashMap<Uuid, MemoryEntry>,
    embedder: Arc<dyn Embedder>,
    max_memories: usize,
}

impl VectorMemoryStore {
    pub fn new(max_memories: usize) -> Self {
        Self::with_embedder(max_memories, Arc::new(HashEmbedder))
    }

    pub fn with_embedder(max_memories: usize, embedder: Arc<dyn Embedder>) -> Self {
        Self { entries: DashMap::new(), embedder, max_memories }
    }

    pub fn store(
        &self,
        content: impl Into<String>,
        memory_type: MemoryType,
        agent: Option<String>,
        importance: Option<f32>,
    ) -> Result<Uuid, StoreError> {
        let content = content.into();
        let embedding = self.embedder.embed(&content)?;
        let now = Utc::now();
        let entry = MemoryEntry {
            id: Uuid::new_v4(),
            content,
            embedding,
            memory_type,
            agent,
            importance: importance.unwrap_or_else(|| memory_type.default_importance()),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        };
        let id = entry.id;
        self.entries.insert(id, entry);
        self.maybe_forget();
        Ok(id)
    }

    /// Never fails: an embedding failure on the query yields an empty result set
    /// rather than propagating an error to the caller. Returns `(entry, similarity,
    /// relevance)` triples ordered by descending relevance.
    pub fn search(&self, query: &str, k: usize, filter: SearchFilter) -> Vec<(MemoryEntry, f32, f32)> {
        let query_embedding = match self.embedder.embed(query) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        let min_similarity = filter.min_similarity.unwrap_or(0.0);
        let mut scored: Vec<(MemoryEntry, f32, f32)> = self
            .entries
            .iter()
            .filter(|e| filter.agent.as_deref().map(|a| e.agent.as_deref() == Some(a)).unwrap_or(true))
            .filter(|e| filter.memory_type.map(|t| e.memory_type == t).unwrap_or(true))
            .filter_map(|e| {
                let entry = e.value().clone();
                let similarity = cosine_similarity(&entry.embedding, &query_embedding);
                if similarity < min_similarity {
                    return None;
                }
                let relevance = relevance(&entry, similarity);
                Some((entry, similarity, relevance))
            })
            .collect();
        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        for (entry, _, _) in &scored {
            if let Some(mut stored) = self.entries.get_mut(&entry.id) {
                stored.access_count += 1;
                stored.last_accessed_at = Utc::now();
            }
        }
        scored
    }

    pub fn get(&self, id: Uuid) -> Option<MemoryEntry> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    pub fn update(&self, id: Uuid, content: Option<String>, importance: Option<f32>) -> Result<(), StoreError> {
        let mut entry = self.entries.get_mut(&id).ok_or_else(|| StoreError::InvalidImport(format!("no entry {id}")))?;
        if let Some(content) = content {
            entry.embedding = self.embedder.embed(&content)?;
            entry.content = content;
        }
        if let Some(importance) = importance {
            entry.importance = importance;
        }
        Ok(())
    }

    pub fn delete(&self, id: Uuid) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn stats(&self) -> StoreStats {
        let mut by_type: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut by_agent: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for entry in self.entries.iter() {
            *by_type.entry(entry.memory_type.as_str().to_string()).or_default() += 1;
            if let Some(agent) = &entry.agent {
                *by_agent.entry(agent.clone()).or_default() += 1;
            }
        }
        StoreStats {
            total: self.entries.len(),
            by_type: by_type.into_iter().collect(),
            by_agent: by_agent.into_iter().collect(),
        }
    }

    pub fn export(&self) -> Result<Vec<u8>, StoreError> {
        let entries: Vec<MemoryEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        let envelope = ExportEnvelope { version: EXPORT_VERSION, entries };
        bincode::serde::encode_to_vec(&envelope, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Rebuilds the store from `bytes`. Rejects (leaving the store untouched) if the
    /// payload doesn't decode or carries an unknown envelope version.
    pub fn import(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let (envelope, _): (ExportEnvelope, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| StoreError::InvalidImport(e.to_string()))?;
        if envelope.version != EXPORT_VERSION {
            return Err(StoreError::InvalidImport(format!("unsupported version {}", envelope.version)));
        }
        self.entries.clear();
        for entry in envelope.entries {
            self.entries.insert(entry.id, entry);
        }
        Ok(())
    }

    /// Groups of >= [`PATTERN_MIN_GROUP_SIZE`] entries whose pairwise similarity is
    /// all >= [`PATTERN_SIMILARITY_THRESHOLD`] are materialized as one new `Pattern`
    /// entry summarizing the group; the source entries are left in place.
    pub fn extract_patterns(&self) -> Vec<Uuid> {
        let entries: Vec<MemoryEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        let mut visited = vec![false; entries.len()];
        let mut created = Vec::new();

        for i in 0..entries.len() {
            if visited[i] {
                continue;
            }
            let mut group = vec![i];
            for j in (i + 1)..entries.len() {
                if visited[j] {
                    continue;
                }
                let sim = cosine_similarity(&entries[i].embedding, &entries[j].embedding);
                if sim >= PATTERN_SIMILARITY_THRESHOLD {
                    group.push(j);
                }
            }
            if group.len() >= PATTERN_MIN_GROUP_SIZE {
                for &idx in &group {
                    visited[idx] = true;
                }
                let summary = format!(
                    "pattern across {} memories, e.g. \"{}\"",
                    group.len(),
                    entries[group[0]].content
                );
                if let Ok(id) = self.store(summary, MemoryType::CodePattern, None, None) {
                    created.push(id);
                }
            }
        }
        created
    }

    /// k = min(10, floor(N / 50)) clusters via Lloyd's algorithm, capped at 50 iterations.
    pub fn cluster(&self) -> Vec<Vec<Uuid>> {
        let entries: Vec<MemoryEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        let n = entries.len();
        let k = (n / 50).min(10);
        if k == 0 {
            return Vec::new();
        }
        let mut centroids: Vec<Vec<f32>> = entries.iter().step_by((n / k).max(1)).take(k).map(|e| e.embedding.clone()).collect();
        let mut assignment = vec![0usize; n];

        for _ in 0..50 {
            let mut changed = false;
            for (i, entry) in entries.iter().enumerate() {
                let mut best = 0usize;
                let mut best_sim = f32::MIN;
                for (c, centroid) in centroids.iter().enumerate() {
                    let sim = cosine_similarity(&entry.embedding, centroid);
                    if sim > best_sim {
                        best_sim = sim;
                        best = c;
                    }
                }
                if assignment[i] != best {
                    changed = true;
                    assignment[i] = best;
                }
            }
            if !changed {
                break;
            }
            for c in 0..k {
                let members: Vec<&Vec<f32>> = entries
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| assignment[*i] == c)
                    .map(|(_, e)| &e.embedding)
                    .collect();
                if members.is_empty() {
                    continue;
                }
                let dim = members[0].len();
                let mut mean = vec![0f32; dim];
                for m in &members {
                    for (d, v) in m.iter().enumerate() {
                        mean[d] += v;
                    }
                }
                for v in mean.iter_mut() {
                    *v /= members.len() as f32;
                }
                crate::embedding::normalize(&mut mean);
                centroids[c] = mean;
            }
        }

        let mut clusters = vec![Vec::new(); k];
        for (i, entry) in entries.iter().enumerate() {
            clusters[assignment[i]].push(entry.id);
        }
        clusters
    }

    /// If over capacity, deletes the lowest-retention-score entries one at a time
    /// until at or under 50% capacity, per the pinned forgetting floor.
    fn maybe_forget(&self) {
        if self.entries.len() <= self.max_memories {
            return;
        }
        let floor = self.max_memories / 2;
        loop {
            if self.entries.len() <= floor {
                break;
            }
            let weakest = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), retention_score(e.value())))
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            match weakest {
                Some((id, _)) => {
                    self.entries.remove(&id);
                }
                None => break,
            }
        }
    }
}

/// Relevance = 0.4*similarity + 0.2*recency + 0.3*importance + 0.1*min(1, access/100),
/// where recency uses age in days, not weeks (that unit is reserved for the forgetting
/// policy's retention score below).
fn relevance(entry: &MemoryEntry, similarity: f32) -> f32 {
    let age_days = age_days(entry.created_at).max(1.0 / 24.0);
    let recency = (1.0 / (1.0 + age_days)).clamp(0.0, 1.0);
    let access_term = (entry.access_count as f32 / 100.0).min(1.0);
    0.4 * similarity + 0.2 * recency + 0.3 * entry.importance + 0.1 * access_term
}

fn retention_score(entry: &MemoryEntry) -> f32 {
    let age_weeks = age_weeks(entry.created_at).max(1.0 / 7.0);
    0.4 * (entry.access_count as f32 / age_weeks) + 0.6 * entry.importance
}

fn age_days(created_at: DateTime<Utc>) -> f32 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f32();
    let created = created_at.timestamp() as f32;
    ((now - created) / (60.0 * 60.0 * 24.0)).max(0.0)
}

fn age_weeks(created_at: DateTime<Utc>) -> f32 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f32();
    let created = created_at.timestamp() as f32;
    ((now - created) / (60.0 * 60.0 * 24.0 * 7.0)).max(0.0)
}
