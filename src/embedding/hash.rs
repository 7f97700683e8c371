//! Deterministic feature-hashing embedder.
//!
//! Tokenizes on non-alphanumeric boundaries, hashes each token (and each
//! adjacent bigram) into a fixed number of buckets, and L2-normalizes the
//! result. No model files, no network, stable across runs — the bundled
//! provider for offline deployments and tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use crate::error::{EngramError, Result};

pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        if tokens.is_empty() {
            return Err(EngramError::Embedding("empty text".into()));
        }

        let mut v = vec![0.0f32; self.dimensions];
        for token in &tokens {
            bump(&mut v, token);
        }
        for pair in tokens.windows(2) {
            bump(&mut v, &format!("{} {}", pair[0], pair[1]));
        }

        // L2 normalize
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Hash a feature into a bucket, with the hash's top bit choosing the sign.
fn bump(v: &mut [f32], feature: &str) {
    let mut hasher = DefaultHasher::new();
    feature.hash(&mut hasher);
    let h = hasher.finish();
    let bucket = (h % v.len() as u64) as usize;
    let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
    v[bucket] += sign;
}
