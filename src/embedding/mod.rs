//! Text-to-vector embedding seam.
//!
//! Provides the [`EmbeddingProvider`] trait and a deterministic
//! feature-hashing implementation. A real model-backed service lives outside
//! this core and plugs in through the same trait; an embedding failure on the
//! write path degrades the context to `embedding_status = "failed"` unless
//! strict mode is enabled.

pub mod hash;

use crate::error::Result;

/// Default number of dimensions in the embedding vectors.
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly
/// [`dimensions`](Self::dimensions) entries. All methods are synchronous —
/// callers in async contexts should use `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}
