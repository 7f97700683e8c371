//! Store contracts consumed by the core.
//!
//! The three underlying stores (vector index, graph database, key-value
//! cache) are external collaborators. The core talks to them only through
//! the narrow traits in this module; the bundled SQLite implementations in
//! [`sqlite`] are reference backends for local deployments and tests. Every
//! trait method is synchronous — the dispatcher wraps calls in
//! `tokio::task::spawn_blocking` with timeouts.

pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::model::{Context, Relationship};

/// Payload stored alongside each vector. This is the only shape the vector
/// backend persists; the vector adapter maps it into `MemoryResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub text: String,
    pub context_type: String,
    pub namespace: String,
    pub timestamp: String,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

/// A similarity-search hit in the vector backend's native shape.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    /// Cosine similarity in `[0.0, 1.0]`.
    pub score: f64,
    pub payload: VectorPayload,
}

/// Vector index contract: upsert and k-nearest-neighbor search.
pub trait VectorStore: Send + Sync {
    fn upsert(&self, id: &str, vector: &[f32], payload: &VectorPayload) -> Result<()>;

    fn search(&self, vector: &[f32], limit: usize, score_threshold: f64)
        -> Result<Vec<VectorHit>>;

    fn delete(&self, id: &str) -> Result<()>;

    fn health_check(&self) -> Result<()>;
}

/// One row returned by the graph backend, keyed by column name. A
/// backend-native shape: only the graph adapter and the read-only
/// passthrough may see it.
#[derive(Debug, Clone, Serialize)]
pub struct GraphRow(pub serde_json::Map<String, serde_json::Value>);

impl GraphRow {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }
}

/// Graph database contract: context nodes, directed edges, keyword search,
/// and a parameterized read-only query passthrough.
pub trait GraphStore: Send + Sync {
    fn upsert_context(&self, context: &Context) -> Result<()>;

    fn get_context(&self, id: &str) -> Result<Option<Context>>;

    /// True if the context exists and is not archived.
    fn context_exists(&self, id: &str) -> Result<bool>;

    /// Archive (soft-delete) a context. Returns false if it does not exist.
    fn archive_context(&self, id: &str) -> Result<bool>;

    fn create_edge(&self, edge: &Relationship) -> Result<()>;

    fn edges_from(&self, id: &str) -> Result<Vec<Relationship>>;

    /// Keyword search over live context nodes, best match first.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<GraphRow>>;

    /// Most recently created live context of the given type, excluding one id.
    fn most_recent_of_type(&self, context_type: &str, exclude_id: &str)
        -> Result<Option<Context>>;

    fn list_by_namespace(&self, namespace: &str) -> Result<Vec<Context>>;

    /// Execute a caller-supplied read query with named parameters. Malformed
    /// queries are validation errors, not backend-unavailable errors.
    /// Mutation denylisting happens above this call.
    fn execute_read(
        &self,
        query: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<GraphRow>>;

    fn health_check(&self) -> Result<()>;
}

/// Key-value store contract with TTL support. `set_if_absent` is the single
/// atomic primitive the advisory namespace lock is built on.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Atomic "set if no live value exists, with expiry". Returns true if
    /// this call installed the value. An expired entry counts as absent.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Returns true if a key was removed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// All live (non-expired) entries whose key starts with `prefix`,
    /// ordered by key.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    fn health_check(&self) -> Result<()>;
}
