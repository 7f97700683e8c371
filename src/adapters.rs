//! Backend adapters — the normalization boundary.
//!
//! Each adapter owns all knowledge of one backend's query and response
//! shapes and is the only code permitted to see them. Everything it hands
//! upward is a [`MemoryResult`]. Adapter failures are caught at the
//! dispatcher boundary and become per-backend status entries.

use std::sync::Arc;

use crate::backends::{GraphRow, GraphStore, VectorStore};
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::facts::FactStore;
use crate::model::{MemoryResult, ResultSource};

/// Key of the fact the read router resolved from the query, when it did.
#[derive(Debug, Clone)]
pub struct FactRef {
    pub namespace: String,
    pub user_id: String,
    pub attribute: String,
}

/// Options threaded through every adapter search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Vector hits below this cosine similarity are dropped.
    pub score_threshold: f64,
    /// Set only when intent classification resolved a fact key.
    pub fact_ref: Option<FactRef>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            score_threshold: 0.3,
            fact_ref: None,
        }
    }
}

/// The contract every backend adapter satisfies.
pub trait SearchAdapter: Send + Sync {
    /// Stable name used as the key in backend status maps.
    fn name(&self) -> &'static str;

    fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<MemoryResult>>;

    fn health_check(&self) -> Result<()>;
}

// ── Vector adapter ────────────────────────────────────────────────────────────

/// Similarity search: embeds the query, searches the vector index, and maps
/// payloads into normalized results.
pub struct VectorAdapter {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl VectorAdapter {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }
}

impl SearchAdapter for VectorAdapter {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<MemoryResult>> {
        // Embedding failure propagates; the dispatcher records the backend
        // as degraded rather than aborting the request.
        let vector = self.embedder.embed(query)?;
        let hits = self
            .store
            .search(&vector, options.limit, options.score_threshold)?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                MemoryResult {
                    id: hit.id,
                    text: hit.payload.text,
                    result_type: hit.payload.context_type,
                    score: hit.score,
                    timestamp: hit.payload.timestamp,
                    source: ResultSource::Vector,
                    tags: hit.payload.tags,
                    metadata: hit.payload.metadata,
                }
                .normalized()
            })
            .collect())
    }

    fn health_check(&self) -> Result<()> {
        self.store.health_check()
    }
}

// ── Graph adapter ─────────────────────────────────────────────────────────────

/// Keyword search over graph context nodes. Unwraps the backend's native
/// row shape here and nowhere else.
pub struct GraphAdapter {
    store: Arc<dyn GraphStore>,
}

impl GraphAdapter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

/// Map an FTS5-style rank (negative, more negative = better) into `(0, 1)`.
fn rank_to_score(rank: f64) -> f64 {
    let quality = (-rank).max(0.0);
    quality / (1.0 + quality)
}

fn row_to_result(row: GraphRow) -> MemoryResult {
    let metadata = match row.get("metadata") {
        // The backend stores metadata as a JSON string column; decode it
        // here so callers never see the raw form.
        Some(serde_json::Value::String(s)) => {
            serde_json::from_str(s).unwrap_or(serde_json::Value::Null)
        }
        Some(other) => other.clone(),
        None => serde_json::Value::Null,
    };
    let tags = metadata
        .get("tags")
        .and_then(|t| t.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let score = row
        .get("rank")
        .and_then(|r| r.as_f64())
        .map(rank_to_score)
        .unwrap_or(0.0);

    MemoryResult {
        id: row.get_str("id").unwrap_or_default().to_string(),
        text: row.get_str("text").unwrap_or_default().to_string(),
        result_type: row.get_str("type").unwrap_or_default().to_string(),
        score,
        timestamp: row.get_str("created_at").unwrap_or_default().to_string(),
        source: ResultSource::Graph,
        tags,
        metadata,
    }
    .normalized()
}

impl SearchAdapter for GraphAdapter {
    fn name(&self) -> &'static str {
        "graph"
    }

    fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<MemoryResult>> {
        let rows = self.store.search(query, options.limit)?;
        Ok(rows.into_iter().map(row_to_result).collect())
    }

    fn health_check(&self) -> Result<()> {
        self.store.health_check()
    }
}

// ── Fact adapter ──────────────────────────────────────────────────────────────

/// Direct key lookup. O(1), no ranking involved; a hit is always score 1.0.
pub struct FactAdapter {
    facts: Arc<FactStore>,
}

impl FactAdapter {
    pub fn new(facts: Arc<FactStore>) -> Self {
        Self { facts }
    }
}

impl SearchAdapter for FactAdapter {
    fn name(&self) -> &'static str {
        "fact"
    }

    fn search(&self, _query: &str, options: &SearchOptions) -> Result<Vec<MemoryResult>> {
        let Some(fact_ref) = &options.fact_ref else {
            return Ok(Vec::new());
        };
        let Some(fact) =
            self.facts
                .get(&fact_ref.namespace, &fact_ref.user_id, &fact_ref.attribute)?
        else {
            return Ok(Vec::new());
        };
        Ok(vec![MemoryResult {
            id: fact.entry_id.clone(),
            text: fact.value.clone(),
            result_type: "fact".into(),
            score: 1.0,
            timestamp: fact.created_at.clone(),
            source: ResultSource::Fact,
            tags: Vec::new(),
            metadata: serde_json::json!({
                "attribute": fact.attribute,
                "confidence": fact.confidence,
                "source": fact.source,
            }),
        }
        .normalized()])
    }

    fn health_check(&self) -> Result<()> {
        self.facts.health_check()
    }
}
