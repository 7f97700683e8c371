//! Data written through file-backed stores survives reopening.

mod helpers;

use std::sync::Arc;

use engram::backends::sqlite::{SqliteGraphStore, SqliteKvStore, SqliteVectorStore};
use engram::config::EngramConfig;
use engram::embedding::hash::HashEmbedder;
use engram::engine::MemoryEngine;

fn file_engine(dir: &std::path::Path) -> MemoryEngine {
    let config = EngramConfig::default();
    let dims = config.embedding.dimensions;
    MemoryEngine::new(
        Arc::new(SqliteVectorStore::open(dir.join("vectors.db"), dims).unwrap()),
        Arc::new(SqliteGraphStore::open(dir.join("graph.db")).unwrap()),
        Arc::new(SqliteKvStore::open(dir.join("kv.db")).unwrap()),
        Arc::new(HashEmbedder::new(dims)),
        config,
    )
}

#[tokio::test]
async fn contexts_and_facts_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let stored_id = {
        let engine = file_engine(dir.path());
        let stored = engine
            .store_context(helpers::store_request(
                "My name is Matt. Also we archived the legacy importer.",
                serde_json::json!({"user_id": "u1"}),
            ))
            .await
            .unwrap();
        stored.id
    };

    // Fresh handles over the same files.
    let engine = file_engine(dir.path());

    let mut request = helpers::retrieve_request("What's my name?");
    request.user_id = Some("u1".into());
    let response = engine.retrieve_context(request).await.unwrap();
    assert_eq!(response.results[0].text, "Matt");

    let response = engine
        .retrieve_context(helpers::retrieve_request("archived the legacy importer"))
        .await
        .unwrap();
    assert!(response.results.iter().any(|r| r.id == stored_id));
}

#[tokio::test]
async fn locks_persist_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let engine = file_engine(dir.path());
    engine
        .namespaces()
        .acquire_lock("/user/u1/context", "writer-a")
        .unwrap();

    let other = file_engine(dir.path());
    let err = other
        .namespaces()
        .acquire_lock("/user/u1/context", "writer-b")
        .unwrap_err();
    assert_eq!(err.code(), "LOCK_CONFLICT");
}
