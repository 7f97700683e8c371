//! Read-through query cache on the KV store.
//!
//! Keyed by a fingerprint of everything that affects the response: query
//! text, search mode, policy name, tag filter, and limit. Entries expire by
//! TTL only; writes do not invalidate, so a cached response can be stale by
//! at most the TTL. Fact lookups never pass through here.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backends::KvStore;
use crate::dispatch::{BackendStatus, SearchMode};
use crate::error::Result;
use crate::model::MemoryResult;

/// The cached portion of a retrieval response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub results: Vec<MemoryResult>,
    /// Count after filtering, before the limit was applied. Kept alongside
    /// the truncated results so a cache hit reports the same count as the
    /// live response it was stored from.
    pub total_count: usize,
    pub backend_status: std::collections::BTreeMap<String, BackendStatus>,
}

/// Identity of one retrieval request for caching purposes.
#[derive(Debug)]
pub struct CacheKey<'a> {
    pub query: &'a str,
    pub mode: SearchMode,
    pub policy: &'a str,
    pub tags: &'a [String],
    pub limit: usize,
}

impl CacheKey<'_> {
    fn fingerprint(&self) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.query.hash(&mut hasher);
        self.mode.as_str().hash(&mut hasher);
        self.policy.hash(&mut hasher);
        self.tags.hash(&mut hasher);
        self.limit.hash(&mut hasher);
        format!("cache:{:x}", hasher.finish())
    }
}

/// TTL cache over retrieval responses.
pub struct QueryCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
    enabled: bool,
}

impl QueryCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration, enabled: bool) -> Self {
        Self { kv, ttl, enabled }
    }

    pub fn get(&self, key: &CacheKey<'_>) -> Result<Option<CachedResponse>> {
        if !self.enabled {
            return Ok(None);
        }
        let fingerprint = key.fingerprint();
        match self.kv.get(&fingerprint)? {
            Some(json) => match serde_json::from_str(&json) {
                Ok(response) => {
                    debug!(key = %fingerprint, "cache hit");
                    Ok(Some(response))
                }
                // A shape change across versions invalidates silently.
                Err(_) => Ok(None),
            },
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &CacheKey<'_>, response: &CachedResponse) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let fingerprint = key.fingerprint();
        self.kv
            .set(&fingerprint, &serde_json::to_string(response)?, Some(self.ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sqlite::SqliteKvStore;
    use crate::model::ResultSource;

    fn cache(ttl: Duration, enabled: bool) -> QueryCache {
        QueryCache::new(Arc::new(SqliteKvStore::open_in_memory().unwrap()), ttl, enabled)
    }

    fn response(id: &str) -> CachedResponse {
        CachedResponse {
            results: vec![MemoryResult {
                id: id.into(),
                text: "cached".into(),
                result_type: "note".into(),
                score: 0.5,
                timestamp: "2026-01-01T00:00:00.000000Z".into(),
                source: ResultSource::Vector,
                tags: Vec::new(),
                metadata: serde_json::Value::Null,
            }],
            total_count: 3,
            backend_status: std::collections::BTreeMap::new(),
        }
    }

    fn key<'a>(query: &'a str, tags: &'a [String]) -> CacheKey<'a> {
        CacheKey {
            query,
            mode: SearchMode::Hybrid,
            policy: "default",
            tags,
            limit: 10,
        }
    }

    #[test]
    fn round_trip() {
        let cache = cache(Duration::from_secs(60), true);
        let k = key("what changed", &[]);
        assert!(cache.get(&k).unwrap().is_none());

        cache.put(&k, &response("r1")).unwrap();
        let hit = cache.get(&k).unwrap().unwrap();
        assert_eq!(hit.results[0].id, "r1");
        assert_eq!(hit.total_count, 3);
    }

    #[test]
    fn distinct_requests_do_not_collide() {
        let cache = cache(Duration::from_secs(60), true);
        cache.put(&key("query a", &[]), &response("a")).unwrap();

        assert!(cache.get(&key("query b", &[])).unwrap().is_none());

        let tags = vec!["auth".to_string()];
        assert!(cache.get(&key("query a", &tags)).unwrap().is_none());

        let mut k = key("query a", &[]);
        k.mode = SearchMode::Vector;
        assert!(cache.get(&k).unwrap().is_none());

        let mut k = key("query a", &[]);
        k.policy = "decisions_first";
        assert!(cache.get(&k).unwrap().is_none());
    }

    #[test]
    fn entries_expire() {
        let cache = cache(Duration::from_millis(20), true);
        let k = key("q", &[]);
        cache.put(&k, &response("r1")).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&k).unwrap().is_none());
    }

    #[test]
    fn disabled_cache_is_inert() {
        let cache = cache(Duration::from_secs(60), false);
        let k = key("q", &[]);
        cache.put(&k, &response("r1")).unwrap();
        assert!(cache.get(&k).unwrap().is_none());
    }
}
