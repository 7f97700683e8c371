//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use engram::backends::sqlite::{SqliteGraphStore, SqliteKvStore, SqliteVectorStore};
use engram::backends::{VectorHit, VectorPayload, VectorStore};
use engram::config::EngramConfig;
use engram::embedding::hash::HashEmbedder;
use engram::embedding::EmbeddingProvider;
use engram::engine::{MemoryEngine, RetrieveRequest, StoreContextRequest};
use engram::error::{EngramError, Result};
use engram::model::AuthorType;

pub fn engine() -> MemoryEngine {
    engine_with_config(EngramConfig::default())
}

pub fn engine_with_config(config: EngramConfig) -> MemoryEngine {
    let dims = config.embedding.dimensions;
    MemoryEngine::new(
        Arc::new(SqliteVectorStore::open_in_memory(dims).unwrap()),
        Arc::new(SqliteGraphStore::open_in_memory().unwrap()),
        Arc::new(SqliteKvStore::open_in_memory().unwrap()),
        Arc::new(HashEmbedder::new(dims)),
        config,
    )
}

pub fn store_request(content: &str, metadata: serde_json::Value) -> StoreContextRequest {
    StoreContextRequest {
        content: serde_json::json!(content),
        context_type: "note".into(),
        author: "tester".into(),
        author_type: AuthorType::Human,
        metadata,
        namespace: None,
    }
}

pub fn typed_request(
    content: &str,
    context_type: &str,
    metadata: serde_json::Value,
) -> StoreContextRequest {
    StoreContextRequest {
        content: serde_json::json!(content),
        context_type: context_type.into(),
        author: "tester".into(),
        author_type: AuthorType::Agent,
        metadata,
        namespace: None,
    }
}

pub fn retrieve_request(query: &str) -> RetrieveRequest {
    RetrieveRequest::new(query)
}

/// Vector store whose searches always fail. Writes succeed so fixtures can
/// be seeded normally.
pub struct BrokenSearchVectorStore {
    inner: SqliteVectorStore,
}

impl BrokenSearchVectorStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            inner: SqliteVectorStore::open_in_memory(dimensions).unwrap(),
        }
    }
}

impl VectorStore for BrokenSearchVectorStore {
    fn upsert(&self, id: &str, vector: &[f32], payload: &VectorPayload) -> Result<()> {
        self.inner.upsert(id, vector, payload)
    }

    fn search(&self, _: &[f32], _: usize, _: f64) -> Result<Vec<VectorHit>> {
        Err(EngramError::BackendUnavailable {
            backend: "vector".into(),
            reason: "connection refused".into(),
        })
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.inner.delete(id)
    }

    fn health_check(&self) -> Result<()> {
        Err(EngramError::BackendUnavailable {
            backend: "vector".into(),
            reason: "connection refused".into(),
        })
    }
}

/// Embedder that always fails, for exercising degraded writes.
pub struct BrokenEmbedder {
    dimensions: usize,
}

impl BrokenEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl EmbeddingProvider for BrokenEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(EngramError::Embedding("model not loaded".into()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
