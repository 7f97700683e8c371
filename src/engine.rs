//! The orchestration façade.
//!
//! [`MemoryEngine`] wires the stores, embedder, dispatcher, fact store,
//! namespace manager, relationship detector, and cache together, and owns
//! the write and read paths end to end. Construction is explicit: callers
//! hand in the three store implementations and an embedding provider, so
//! tests swap in in-memory backends without touching globals.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapters::{FactAdapter, FactRef, GraphAdapter, SearchAdapter, SearchOptions, VectorAdapter};
use crate::backends::{GraphRow, GraphStore, KvStore, VectorPayload, VectorStore};
use crate::cache::{CacheKey, CachedResponse, QueryCache};
use crate::config::EngramConfig;
use crate::dispatch::{BackendStatus, Dispatcher, SearchMode};
use crate::embedding::EmbeddingProvider;
use crate::error::{EngramError, Result};
use crate::facts::intent::{self, Intent};
use crate::facts::{extract, FactStore};
use crate::model::{
    now_rfc3339, AuthorType, Context, EmbeddingStatus, MemoryResult, Relationship, ResultSource,
};
use crate::namespace::{self, NamespaceManager};
use crate::ranking::{self, PolicyRegistry};
use crate::relationships::RelationshipDetector;

/// A context write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreContextRequest {
    /// Plain string or structured JSON object.
    pub content: serde_json::Value,
    #[serde(rename = "type")]
    pub context_type: String,
    pub author: String,
    pub author_type: AuthorType,
    /// Tags, project_id, user_id, sprint, ...
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Explicit namespace; auto-assigned from metadata when absent.
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreContextResponse {
    pub id: String,
    pub namespace: String,
    pub embedding_status: EmbeddingStatus,
    pub relationships_created: usize,
    pub facts_extracted: usize,
}

/// A retrieval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    #[serde(default = "default_mode")]
    pub mode: SearchMode,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Ranking policy name; config default when absent.
    #[serde(default)]
    pub policy: Option<String>,
    /// Keep only results sharing at least one of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// RFC 3339 cutoff; results older than this are dropped.
    #[serde(default)]
    pub since: Option<String>,
    /// Enables the fact fast path for personal queries.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

fn default_mode() -> SearchMode {
    SearchMode::Hybrid
}

impl RetrieveRequest {
    /// Hybrid search with default limit and policy, no filters.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: SearchMode::Hybrid,
            limit: None,
            policy: None,
            tags: Vec::new(),
            since: None,
            user_id: None,
            namespace: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub results: Vec<MemoryResult>,
    /// Count after filtering, before the limit was applied.
    pub total_count: usize,
    pub backend_status: BTreeMap<String, BackendStatus>,
    pub cached: bool,
}

static MUTATION_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(CREATE|MERGE|DELETE|DETACH|SET|REMOVE|DROP|INSERT|UPDATE|REPLACE|ALTER)\b")
        .expect("pattern")
});

/// The hybrid memory engine.
pub struct MemoryEngine {
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    facts: Arc<FactStore>,
    dispatcher: Dispatcher,
    namespaces: NamespaceManager,
    cache: QueryCache,
    policies: PolicyRegistry,
    config: EngramConfig,
}

impl MemoryEngine {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        kv: Arc<dyn KvStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: EngramConfig,
    ) -> Self {
        let facts = Arc::new(FactStore::new(Arc::clone(&kv)));
        let adapters: Vec<Arc<dyn SearchAdapter>> = vec![
            Arc::new(VectorAdapter::new(Arc::clone(&vector), Arc::clone(&embedder))),
            Arc::new(GraphAdapter::new(Arc::clone(&graph))),
            Arc::new(FactAdapter::new(Arc::clone(&facts))),
        ];
        let dispatcher = Dispatcher::new(
            adapters,
            config.backend_timeout(),
            config.overall_timeout(),
        );
        let namespaces =
            NamespaceManager::new(Arc::clone(&kv), Arc::clone(&graph), config.lock_ttl());
        let cache = QueryCache::new(Arc::clone(&kv), config.cache_ttl(), config.cache.enabled);

        Self {
            vector,
            graph,
            embedder,
            facts,
            dispatcher,
            namespaces,
            cache,
            policies: PolicyRegistry::new(),
            config,
        }
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    pub fn namespaces(&self) -> &NamespaceManager {
        &self.namespaces
    }

    // ── write path ────────────────────────────────────────────────────────────

    /// Store a context: namespace assignment, fact extraction, embedding,
    /// parallel vector/graph writes, then relationship detection.
    pub async fn store_context(&self, request: StoreContextRequest) -> Result<StoreContextResponse> {
        if request.context_type.trim().is_empty() {
            return Err(EngramError::Validation("context type is empty".into()));
        }
        let namespace = match &request.namespace {
            Some(path) => {
                namespace::Namespace::parse(path)?;
                path.clone()
            }
            None => namespace::auto_assign(&request.metadata),
        };

        let context = Context {
            id: uuid::Uuid::now_v7().to_string(),
            context_type: request.context_type.clone(),
            content: request.content.clone(),
            metadata: request.metadata.clone(),
            author: request.author.clone(),
            author_type: request.author_type,
            namespace: namespace.clone(),
            embedding_status: EmbeddingStatus::Completed,
            created_at: now_rfc3339(),
        };
        let text = context.text();
        if text.trim().is_empty() {
            return Err(EngramError::Validation("context content is empty".into()));
        }

        let facts_extracted = self.extract_facts(&namespace, &request.metadata, &text)?;

        // Embedding runs on the blocking pool; the provider contract is sync.
        let embedder = Arc::clone(&self.embedder);
        let embed_text = text.clone();
        let embedding = tokio::task::spawn_blocking(move || embedder.embed(&embed_text))
            .await
            .map_err(|e| EngramError::Embedding(e.to_string()))?;

        let (vector, embedding_status) = match embedding {
            Ok(v) => (Some(v), EmbeddingStatus::Completed),
            Err(err) if self.config.embedding.strict => return Err(err),
            Err(err) => {
                warn!(error = %err, "embedding failed; storing without vector");
                (None, EmbeddingStatus::Failed)
            }
        };
        let mut context = context;
        context.embedding_status = embedding_status;

        // Vector and graph writes are independent; run them concurrently.
        let graph_write = {
            let graph = Arc::clone(&self.graph);
            let context = context.clone();
            tokio::task::spawn_blocking(move || graph.upsert_context(&context))
        };
        let vector_write = vector.map(|v| {
            let store = Arc::clone(&self.vector);
            let payload = VectorPayload {
                text: text.clone(),
                context_type: context.context_type.clone(),
                namespace: namespace.clone(),
                timestamp: context.created_at.clone(),
                tags: metadata_tags(&context.metadata),
                metadata: context.metadata.clone(),
            };
            let id = context.id.clone();
            tokio::task::spawn_blocking(move || store.upsert(&id, &v, &payload))
        });

        graph_write
            .await
            .map_err(|e| EngramError::Storage(e.to_string()))??;
        if let Some(handle) = vector_write {
            handle
                .await
                .map_err(|e| EngramError::Storage(e.to_string()))??;
        }

        let relationships_created = {
            let detector_ctx = context.clone();
            // Detection reads the graph; also off the async thread.
            let graph = Arc::clone(&self.graph);
            tokio::task::spawn_blocking(move || {
                RelationshipDetector::new(graph).detect_and_create(&detector_ctx)
            })
            .await
            .map_err(|e| EngramError::Storage(e.to_string()))??
        };

        info!(
            id = %context.id,
            namespace = %namespace,
            embedding_status = embedding_status.as_str(),
            relationships_created,
            facts_extracted,
            "context stored"
        );
        Ok(StoreContextResponse {
            id: context.id,
            namespace,
            embedding_status,
            relationships_created,
            facts_extracted,
        })
    }

    /// Write facts found in the content when the write names a user.
    fn extract_facts(
        &self,
        namespace: &str,
        metadata: &serde_json::Value,
        text: &str,
    ) -> Result<usize> {
        let Some(user_id) = metadata.get("user_id").and_then(|v| v.as_str()) else {
            return Ok(0);
        };
        let mut written: Vec<String> = Vec::new();
        let classification = intent::classify(text);
        // Whole-text update commands first; their values run to end of line,
        // which is only safe for single-phrase inputs like "set my X to Y".
        if classification.intent == Intent::UpdateFact {
            if let (Some(attribute), Some(value)) =
                (&classification.attribute, &classification.value)
            {
                self.facts.store(
                    namespace,
                    user_id,
                    attribute,
                    value,
                    "extraction",
                    classification.confidence,
                )?;
                written.push(attribute.clone());
            }
        }
        // Declarations anywhere in the text, values bounded at punctuation.
        for fact in extract::extract(text) {
            if written.contains(&fact.attribute) {
                continue;
            }
            self.facts.store(
                namespace,
                user_id,
                &fact.attribute,
                &fact.value,
                "extraction",
                fact.confidence,
            )?;
            written.push(fact.attribute);
        }
        // Store templates the extractors do not cover (e.g. "my name's X").
        if written.is_empty() && classification.intent == Intent::StoreFact {
            if let (Some(attribute), Some(value)) =
                (&classification.attribute, &classification.value)
            {
                self.facts.store(
                    namespace,
                    user_id,
                    attribute,
                    value,
                    "extraction",
                    classification.confidence,
                )?;
                written.push(attribute.clone());
            }
        }
        Ok(written.len())
    }

    // ── read path ─────────────────────────────────────────────────────────────

    /// Retrieve memory for a query: fact fast path, then cached or live
    /// hybrid search with filtering and ranking.
    pub async fn retrieve_context(&self, request: RetrieveRequest) -> Result<RetrieveResponse> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(EngramError::Validation("query is empty".into()));
        }
        let limit = request.limit.unwrap_or(self.config.retrieval.default_limit);
        let policy_name = request
            .policy
            .as_deref()
            .unwrap_or(&self.config.retrieval.default_policy);
        let policy = self.policies.get(policy_name)?;

        let fact_ref = self.resolve_fact_ref(query, &request);

        // Fact fast path: an exact hit answers alone, no dispatch, no cache.
        if let Some(fact_ref) = &fact_ref {
            if let Some(fact) =
                self.facts
                    .get(&fact_ref.namespace, &fact_ref.user_id, &fact_ref.attribute)?
            {
                debug!(attribute = %fact_ref.attribute, "fact fast path hit");
                return Ok(RetrieveResponse {
                    results: vec![MemoryResult {
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
                        }),
                    }],
                    total_count: 1,
                    backend_status: BTreeMap::from([(
                        "fact".to_string(),
                        BackendStatus::Healthy,
                    )]),
                    cached: false,
                });
            }
            // Known-personal question with no stored answer falls through
            // to hybrid search.
        }

        let cache_key = CacheKey {
            query,
            mode: request.mode,
            policy: policy_name,
            tags: &request.tags,
            limit,
        };
        if request.since.is_none() {
            if let Some(hit) = self.cache.get(&cache_key)? {
                return Ok(RetrieveResponse {
                    results: hit.results,
                    total_count: hit.total_count,
                    backend_status: hit.backend_status,
                    cached: true,
                });
            }
        }

        let options = SearchOptions {
            limit,
            score_threshold: self.config.retrieval.score_threshold,
            fact_ref,
        };
        let outcome = self.dispatcher.dispatch(query, request.mode, &options).await;

        let fused = ranking::fuse_by_id(outcome.results);
        let mut results = ranking::filter_by_tags(fused, &request.tags);
        if let Some(since) = &request.since {
            results = ranking::filter_by_time_window(results, since);
        }
        let mut results = policy.rank(results);
        let total_count = results.len();
        results.truncate(limit);

        if request.since.is_none() {
            self.cache.put(
                &cache_key,
                &CachedResponse {
                    results: results.clone(),
                    total_count,
                    backend_status: outcome.backend_status.clone(),
                },
            )?;
        }

        Ok(RetrieveResponse {
            results,
            total_count,
            backend_status: outcome.backend_status,
            cached: false,
        })
    }

    fn resolve_fact_ref(&self, query: &str, request: &RetrieveRequest) -> Option<FactRef> {
        let user_id = request.user_id.as_deref()?;
        let classification = intent::classify(query);
        if classification.intent != Intent::FactLookup {
            return None;
        }
        let attribute = classification.attribute?;
        let namespace = request
            .namespace
            .clone()
            .unwrap_or_else(|| format!("/user/{user_id}/context"));
        Some(FactRef {
            namespace,
            user_id: user_id.to_string(),
            attribute,
        })
    }

    // ── graph passthrough ─────────────────────────────────────────────────────

    /// Run a caller-supplied read-only graph query. Anything containing a
    /// mutation keyword is rejected before it reaches the backend.
    pub async fn query_graph(
        &self,
        query: &str,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<GraphRow>> {
        if let Some(m) = MUTATION_KEYWORDS.find(query) {
            return Err(EngramError::Validation(format!(
                "read-only query contains mutation keyword '{}'",
                m.as_str()
            )));
        }
        let graph = Arc::clone(&self.graph);
        let query = query.to_string();
        tokio::task::spawn_blocking(move || graph.execute_read(&query, &params))
            .await
            .map_err(|e| EngramError::Storage(e.to_string()))?
    }

    /// Outgoing edges of a context.
    pub fn relationships_of(&self, id: &str) -> Result<Vec<Relationship>> {
        self.graph.edges_from(id)
    }

    // ── deletion ──────────────────────────────────────────────────────────────

    /// Archive a context and drop its vector. The graph node survives
    /// archived so existing edges stay resolvable.
    pub async fn forget_context(&self, id: &str) -> Result<()> {
        let graph = Arc::clone(&self.graph);
        let gid = id.to_string();
        let archived = tokio::task::spawn_blocking(move || graph.archive_context(&gid))
            .await
            .map_err(|e| EngramError::Storage(e.to_string()))??;
        if !archived {
            return Err(EngramError::NotFound(format!("context '{id}'")));
        }
        self.vector.delete(id)?;
        info!(id, "context archived");
        Ok(())
    }

    /// Forget-me: hard-delete all facts for a user in a namespace. Returns
    /// the number of current facts removed.
    pub fn forget_user(&self, namespace: &str, user_id: &str) -> Result<usize> {
        let removed = self.facts.delete_all(namespace, user_id)?;
        info!(namespace, user_id, removed, "user facts deleted");
        Ok(removed)
    }

    // ── health ────────────────────────────────────────────────────────────────

    /// Live status of every backend.
    pub fn health(&self) -> BTreeMap<String, BackendStatus> {
        self.dispatcher.health()
    }
}

/// Tags live under `metadata.tags` as an array of strings.
fn metadata_tags(metadata: &serde_json::Value) -> Vec<String> {
    metadata
        .get("tags")
        .and_then(|t| t.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sqlite::{SqliteGraphStore, SqliteKvStore, SqliteVectorStore};
    use crate::embedding::hash::HashEmbedder;

    fn engine() -> MemoryEngine {
        let config = EngramConfig::default();
        MemoryEngine::new(
            Arc::new(SqliteVectorStore::open_in_memory(config.embedding.dimensions).unwrap()),
            Arc::new(SqliteGraphStore::open_in_memory().unwrap()),
            Arc::new(SqliteKvStore::open_in_memory().unwrap()),
            Arc::new(HashEmbedder::new(config.embedding.dimensions)),
            config,
        )
    }

    fn store_request(content: &str, metadata: serde_json::Value) -> StoreContextRequest {
        StoreContextRequest {
            content: serde_json::json!(content),
            context_type: "note".into(),
            author: "tester".into(),
            author_type: AuthorType::Human,
            metadata,
            namespace: None,
        }
    }

    fn retrieve_request(query: &str) -> RetrieveRequest {
        RetrieveRequest::new(query)
    }

    #[tokio::test]
    async fn declaration_then_lookup_hits_fact_first() {
        let engine = engine();
        let stored = engine
            .store_context(store_request(
                "My name is Matt",
                serde_json::json!({"user_id": "u1"}),
            ))
            .await
            .unwrap();
        assert_eq!(stored.namespace, "/user/u1/context");
        assert!(stored.facts_extracted >= 1);

        let mut request = retrieve_request("What's my name?");
        request.user_id = Some("u1".into());
        let response = engine.retrieve_context(request).await.unwrap();
        assert_eq!(response.results[0].text, "Matt");
        assert_eq!(response.results[0].score, 1.0);
        assert_eq!(response.results[0].source, ResultSource::Fact);
    }

    #[tokio::test]
    async fn general_query_searches_hybrid() {
        let engine = engine();
        engine
            .store_context(store_request(
                "decided to use write-ahead logging for the storage layer",
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        let response = engine
            .retrieve_context(retrieve_request(
                "write-ahead logging for the storage layer",
            ))
            .await
            .unwrap();
        assert!(!response.results.is_empty());
        assert_eq!(
            response.backend_status.get("vector"),
            Some(&BackendStatus::Healthy)
        );
        assert_eq!(
            response.backend_status.get("graph"),
            Some(&BackendStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn repeated_query_is_served_from_cache() {
        let engine = engine();
        engine
            .store_context(store_request("tag filters shipped", serde_json::json!({})))
            .await
            .unwrap();

        let first = engine
            .retrieve_context(retrieve_request("tag filters"))
            .await
            .unwrap();
        assert!(!first.cached);
        let second = engine
            .retrieve_context(retrieve_request("tag filters"))
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(first.results.len(), second.results.len());
    }

    #[tokio::test]
    async fn explicit_namespace_wins_over_auto_assignment() {
        let engine = engine();
        let mut request = store_request("note", serde_json::json!({"user_id": "u1"}));
        request.namespace = Some("/team/platform/context".into());
        let stored = engine.store_context(request).await.unwrap();
        assert_eq!(stored.namespace, "/team/platform/context");

        let mut request = store_request("note", serde_json::json!({}));
        request.namespace = Some("not-a-path".into());
        assert!(engine.store_context(request).await.is_err());
    }

    #[tokio::test]
    async fn graph_passthrough_rejects_mutations() {
        let engine = engine();
        for bad in [
            "DELETE FROM contexts",
            "select 1; drop table contexts",
            "CREATE (n)",
            "MATCH (n) SET n.x = 1",
        ] {
            let err = engine
                .query_graph(bad, serde_json::Map::new())
                .await
                .unwrap_err();
            assert_eq!(err.code(), "VALIDATION", "accepted {bad:?}");
        }

        let rows = engine
            .query_graph(
                "SELECT COUNT(*) AS n FROM contexts WHERE archived = 0",
                serde_json::Map::new(),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn forget_context_archives_and_removes_vector() {
        let engine = engine();
        let stored = engine
            .store_context(store_request("temporary scratch note", serde_json::json!({})))
            .await
            .unwrap();

        engine.forget_context(&stored.id).await.unwrap();
        // Archived contexts disappear from search.
        let response = engine
            .retrieve_context(retrieve_request("temporary scratch note"))
            .await
            .unwrap();
        assert!(response.results.iter().all(|r| r.id != stored.id));

        let err = engine.forget_context("no-such-id").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn forget_user_removes_all_facts() {
        let engine = engine();
        engine
            .store_context(store_request(
                "My name is Matt. I work at Initech.",
                serde_json::json!({"user_id": "u1"}),
            ))
            .await
            .unwrap();

        let removed = engine.forget_user("/user/u1/context", "u1").unwrap();
        assert!(removed >= 2);

        let mut request = retrieve_request("What's my name?");
        request.user_id = Some("u1".into());
        let response = engine.retrieve_context(request).await.unwrap();
        assert!(response
            .results
            .iter()
            .all(|r| r.source != ResultSource::Fact));
    }

    #[tokio::test]
    async fn unknown_policy_is_rejected() {
        let engine = engine();
        let mut request = retrieve_request("anything");
        request.policy = Some("nope".into());
        let err = engine.retrieve_context(request).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[tokio::test]
    async fn health_reports_all_backends() {
        let engine = engine();
        let health = engine.health();
        assert_eq!(health.get("vector"), Some(&BackendStatus::Healthy));
        assert_eq!(health.get("graph"), Some(&BackendStatus::Healthy));
        assert_eq!(health.get("fact"), Some(&BackendStatus::Healthy));
    }
}
