//! Pluggable embedding. Callers with a real model supply an [`Embedder`] impl; the
//! deterministic fallback below lets the store run (and its tests pass) with no model
//! wired up, at the cost of no real semantic similarity.

use sha2::{Digest, Sha256};

use crate::error::StoreError;

pub const EMBEDDING_DIM: usize = 32;

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError>;
}

/// Hashes `text` into a fixed-size, L2-normalized vector. Stable across runs and
/// processes since it depends only on the bytes of `text`, never on RNG state.
pub struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let mut vector = vec![0f32; EMBEDDING_DIM];
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let mut digest = hasher.finalize_reset().to_vec();
        while digest.len() < EMBEDDING_DIM * 4 {
            hasher.update(&digest);
            digest.extend(hasher.finalize_reset());
        }
        for (i, slot) in vector.iter_mut().enumerate() {
            let offset = i * 4;
            let bytes = [digest[offset], digest[offset + 1], digest[offset + 2], digest[offset + 3]];
            let as_i32 = i32::from_le_bytes(bytes);
            *slot = (as_i32 as f64 / i32::MAX as f64) as f32;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot.clamp(-1.0, 1.0)
}
