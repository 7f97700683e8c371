//! Hierarchical namespaces and advisory locks.
//!
//! Namespace paths look like `/project/phoenix/context`: a type segment,
//! an optional scope, and a name. Locks are advisory TTL leases in the KV
//! store under `lock:{path}` — they coordinate cooperating writers and
//! expire on their own, so a crashed holder never wedges a namespace.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backends::{GraphStore, KvStore};
use crate::error::{EngramError, Result};
use crate::model::{now_rfc3339, Context};

const NAMESPACE_TYPES: [&str; 4] = ["global", "team", "user", "project"];

/// A parsed namespace path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// One of `global`, `team`, `user`, `project`.
    pub namespace_type: String,
    /// Middle segment, absent for two-segment paths like `/global/default`.
    pub scope: Option<String>,
    pub name: String,
}

impl Namespace {
    /// Parse a path of the form `/{type}/{name}` or `/{type}/{scope}/{name}`.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |why: &str| {
            EngramError::Validation(format!("invalid namespace '{path}': {why}"))
        };
        let Some(rest) = path.strip_prefix('/') else {
            return Err(invalid("must start with '/'"));
        };
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("empty segment"));
        }
        let (namespace_type, scope, name) = match segments.as_slice() {
            [t, n] => (*t, None, *n),
            [t, s, n] => (*t, Some(s.to_string()), *n),
            _ => return Err(invalid("expected 2 or 3 segments")),
        };
        if !NAMESPACE_TYPES.contains(&namespace_type) {
            return Err(invalid("unknown namespace type"));
        }
        // Only the global namespace is flat; the rest carry a scope segment.
        if scope.is_none() && namespace_type != "global" {
            return Err(invalid("missing scope segment"));
        }
        Ok(Self {
            namespace_type: namespace_type.to_string(),
            scope,
            name: name.to_string(),
        })
    }

    pub fn path(&self) -> String {
        match &self.scope {
            Some(scope) => format!("/{}/{}/{}", self.namespace_type, scope, self.name),
            None => format!("/{}/{}", self.namespace_type, self.name),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// Pick a namespace from context metadata. Priority: project, then team,
/// then user, falling back to the shared global namespace.
pub fn auto_assign(metadata: &serde_json::Value) -> String {
    let field = |key: &str| {
        metadata
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty() && !s.contains('/'))
    };
    if let Some(project) = field("project_id") {
        return format!("/project/{project}/context");
    }
    if let Some(team) = field("team_id") {
        return format!("/team/{team}/context");
    }
    if let Some(user) = field("user_id") {
        return format!("/user/{user}/context");
    }
    "/global/default".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    holder: String,
    acquired_at: String,
}

fn lock_key(path: &str) -> String {
    format!("lock:{path}")
}

/// Namespace operations over the graph and KV backends.
pub struct NamespaceManager {
    kv: Arc<dyn KvStore>,
    graph: Arc<dyn GraphStore>,
    lock_ttl: Duration,
}

impl NamespaceManager {
    pub fn new(kv: Arc<dyn KvStore>, graph: Arc<dyn GraphStore>, lock_ttl: Duration) -> Self {
        Self { kv, graph, lock_ttl }
    }

    /// Try to take the advisory lock on a namespace with the configured TTL.
    /// Errors with `LOCK_CONFLICT` if another holder has a live lease.
    /// Re-acquiring a lock you already hold conflicts too; release first.
    pub fn acquire_lock(&self, path: &str, holder: &str) -> Result<()> {
        self.acquire_lock_with_ttl(path, holder, self.lock_ttl)
    }

    /// As [`acquire_lock`](Self::acquire_lock), with an explicit lease.
    pub fn acquire_lock_with_ttl(&self, path: &str, holder: &str, ttl: Duration) -> Result<()> {
        Namespace::parse(path)?;
        let record = LockRecord {
            holder: holder.to_string(),
            acquired_at: now_rfc3339(),
        };
        let value = serde_json::to_string(&record)?;
        if self.kv.set_if_absent(&lock_key(path), &value, ttl)?
        {
            debug!(namespace = path, holder, "lock acquired");
            Ok(())
        } else {
            Err(EngramError::LockConflict {
                path: path.to_string(),
            })
        }
    }

    /// Release a held lock. Only the holder may release; releasing an
    /// expired or absent lock is a no-op.
    pub fn release_lock(&self, path: &str, holder: &str) -> Result<()> {
        let key = lock_key(path);
        let Some(json) = self.kv.get(&key)? else {
            return Ok(());
        };
        let record: LockRecord = serde_json::from_str(&json)?;
        if record.holder != holder {
            return Err(EngramError::LockConflict {
                path: path.to_string(),
            });
        }
        self.kv.delete(&key)?;
        debug!(namespace = path, holder, "lock released");
        Ok(())
    }

    /// Whether a live lock exists on the namespace.
    pub fn is_locked(&self, path: &str) -> Result<bool> {
        Ok(self.kv.get(&lock_key(path))?.is_some())
    }

    /// Live contexts stored under a namespace, newest first.
    pub fn list_contexts(&self, path: &str, limit: usize) -> Result<Vec<Context>> {
        Namespace::parse(path)?;
        let mut contexts = self.graph.list_by_namespace(path)?;
        contexts.truncate(limit);
        Ok(contexts)
    }
}
