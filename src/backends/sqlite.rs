//! Bundled SQLite reference backends.
//!
//! Implements the three store contracts on local SQLite files:
//! [`SqliteVectorStore`] (sqlite-vec KNN), [`SqliteGraphStore`] (context
//! nodes + edges with an FTS5 keyword index), and [`SqliteKvStore`] (plain
//! table with TTL columns). Each store owns its own connection; a deployment
//! pointing at remote services replaces these wholesale via the traits.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::time::Duration;

use crate::backends::{GraphRow, GraphStore, KvStore, VectorHit, VectorPayload, VectorStore};
use crate::error::{EngramError, Result};
use crate::model::{now_rfc3339, Context, Relationship};

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| EngramError::Storage(format!("create {}: {e}", parent.display())))?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_millis(5_000))?;
    Ok(conn)
}

fn lock_conn(conn: &Arc<Mutex<Connection>>) -> MutexGuard<'_, Connection> {
    // A poisoned mutex means a panic mid-statement; continuing is safe for
    // SQLite since statements are atomic.
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Vector store ──────────────────────────────────────────────────────────────

pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVectorStore {
    pub fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self> {
        load_sqlite_vec();
        let conn = open_connection(path.as_ref())?;
        Self::init_schema(&conn, dimensions)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory(dimensions: usize) -> Result<Self> {
        load_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn, dimensions)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection, dimensions: usize) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS contexts_vec USING vec0(
                id TEXT PRIMARY KEY,
                embedding FLOAT[{dimensions}]
            );
            CREATE TABLE IF NOT EXISTS vec_payloads (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            );"
        ))?;
        Ok(())
    }
}

impl VectorStore for SqliteVectorStore {
    fn upsert(&self, id: &str, vector: &[f32], payload: &VectorPayload) -> Result<()> {
        let payload_json = serde_json::to_string(payload)?;
        let conn = lock_conn(&self.conn);
        // vec0 has no ON CONFLICT support; delete-then-insert is the upsert.
        conn.execute("DELETE FROM contexts_vec WHERE id = ?1", params![id])?;
        conn.execute(
            "INSERT INTO contexts_vec (id, embedding) VALUES (?1, ?2)",
            params![id, embedding_to_bytes(vector)],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO vec_payloads (id, payload) VALUES (?1, ?2)",
            params![id, payload_json],
        )?;
        Ok(())
    }

    fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<VectorHit>> {
        let conn = lock_conn(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT v.id, v.distance, p.payload
             FROM contexts_vec v JOIN vec_payloads p ON p.id = v.id
             WHERE v.embedding MATCH ?1 AND v.k = ?2 ORDER BY v.distance",
        )?;
        let rows = stmt
            .query_map(params![embedding_to_bytes(vector), limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut hits = Vec::new();
        for (id, distance, payload_json) in rows {
            // Both sides are L2-normalized, so cos = 1 - d²/2.
            let score = (1.0 - distance * distance / 2.0).clamp(0.0, 1.0);
            if score < score_threshold {
                continue;
            }
            let payload: VectorPayload = serde_json::from_str(&payload_json)?;
            hits.push(VectorHit { id, score, payload });
        }
        Ok(hits)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let conn = lock_conn(&self.conn);
        conn.execute("DELETE FROM contexts_vec WHERE id = ?1", params![id])?;
        conn.execute("DELETE FROM vec_payloads WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn health_check(&self) -> Result<()> {
        let conn = lock_conn(&self.conn);
        conn.query_row("SELECT vec_version()", [], |_| Ok(()))?;
        Ok(())
    }
}

// ── Graph store ───────────────────────────────────────────────────────────────

const GRAPH_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS contexts (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT,
    author TEXT NOT NULL,
    author_type TEXT NOT NULL CHECK(author_type IN ('human','agent')),
    namespace TEXT NOT NULL,
    embedding_status TEXT NOT NULL
        CHECK(embedding_status IN ('completed','failed','unavailable')),
    archived INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contexts_type ON contexts(type);
CREATE INDEX IF NOT EXISTS idx_contexts_namespace ON contexts(namespace);
CREATE INDEX IF NOT EXISTS idx_contexts_created ON contexts(created_at);

CREATE VIRTUAL TABLE IF NOT EXISTS contexts_fts USING fts5(
    text,
    id UNINDEXED,
    type UNINDEXED
);

CREATE TABLE IF NOT EXISTS edges (
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    relation TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    auto_detected INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    PRIMARY KEY (from_id, to_id, relation)
);

CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);
"#;

pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGraphStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = open_connection(path.as_ref())?;
        conn.execute_batch(GRAPH_SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(GRAPH_SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn row_to_context(row: &rusqlite::Row<'_>) -> rusqlite::Result<Context> {
    let content_json: String = row.get(2)?;
    let metadata_json: Option<String> = row.get(3)?;
    let author_type: String = row.get(5)?;
    let embedding_status: String = row.get(7)?;
    Ok(Context {
        id: row.get(0)?,
        context_type: row.get(1)?,
        content: serde_json::from_str(&content_json)
            .unwrap_or(serde_json::Value::String(content_json)),
        metadata: metadata_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Null),
        author: row.get(4)?,
        author_type: author_type.parse().unwrap_or(crate::model::AuthorType::Agent),
        namespace: row.get(6)?,
        embedding_status: embedding_status
            .parse()
            .unwrap_or(crate::model::EmbeddingStatus::Unavailable),
        created_at: row.get(8)?,
    })
}

const CONTEXT_COLUMNS: &str =
    "id, type, content, metadata, author, author_type, namespace, embedding_status, created_at";

/// Escape a user query for FTS5 MATCH syntax: each word quoted, implicit AND.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            let clean = word.replace('"', "");
            format!("\"{clean}\"")
        })
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" ")
}

fn json_to_sql(value: &serde_json::Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        serde_json::Value::Null => Sql::Null,
        serde_json::Value::Bool(b) => Sql::Integer(*b as i64),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn sql_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => serde_json::Value::Null,
    }
}

impl GraphStore for SqliteGraphStore {
    fn upsert_context(&self, context: &Context) -> Result<()> {
        let content_json = serde_json::to_string(&context.content)?;
        let metadata_json = serde_json::to_string(&context.metadata)?;
        let text = context.text();
        let conn = lock_conn(&self.conn);
        conn.execute(
            "INSERT OR REPLACE INTO contexts
             (id, type, content, metadata, author, author_type, namespace, embedding_status, archived, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
            params![
                context.id,
                context.context_type,
                content_json,
                metadata_json,
                context.author,
                context.author_type.as_str(),
                context.namespace,
                context.embedding_status.as_str(),
                context.created_at,
            ],
        )?;
        conn.execute("DELETE FROM contexts_fts WHERE id = ?1", params![context.id])?;
        conn.execute(
            "INSERT INTO contexts_fts (text, id, type) VALUES (?1, ?2, ?3)",
            params![text, context.id, context.context_type],
        )?;
        Ok(())
    }

    fn get_context(&self, id: &str) -> Result<Option<Context>> {
        let conn = lock_conn(&self.conn);
        let context = conn
            .query_row(
                &format!("SELECT {CONTEXT_COLUMNS} FROM contexts WHERE id = ?1"),
                params![id],
                row_to_context,
            )
            .optional()?;
        Ok(context)
    }

    fn context_exists(&self, id: &str) -> Result<bool> {
        let conn = lock_conn(&self.conn);
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM contexts WHERE id = ?1 AND archived = 0",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn archive_context(&self, id: &str) -> Result<bool> {
        let conn = lock_conn(&self.conn);
        let rows = conn.execute(
            "UPDATE contexts SET archived = 1 WHERE id = ?1",
            params![id],
        )?;
        if rows > 0 {
            conn.execute("DELETE FROM contexts_fts WHERE id = ?1", params![id])?;
        }
        Ok(rows > 0)
    }

    fn create_edge(&self, edge: &Relationship) -> Result<()> {
        let conn = lock_conn(&self.conn);
        // Idempotent on (from, to, relation).
        conn.execute(
            "INSERT OR IGNORE INTO edges (from_id, to_id, relation, reason, auto_detected, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                edge.from_id,
                edge.to_id,
                edge.relation_type.as_str(),
                edge.reason,
                edge.auto_detected as i64,
                edge.created_at,
            ],
        )?;
        Ok(())
    }

    fn edges_from(&self, id: &str) -> Result<Vec<Relationship>> {
        let conn = lock_conn(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT from_id, to_id, relation, reason, auto_detected, created_at
             FROM edges WHERE from_id = ?1 ORDER BY created_at",
        )?;
        let edges = stmt
            .query_map(params![id], |row| {
                let relation: String = row.get(2)?;
                let auto: i64 = row.get(4)?;
                Ok(Relationship {
                    from_id: row.get(0)?,
                    to_id: row.get(1)?,
                    relation_type: relation
                        .parse()
                        .unwrap_or(crate::model::RelationType::RelatesTo),
                    reason: row.get(3)?,
                    auto_detected: auto != 0,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<GraphRow>> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() {
            return Ok(Vec::new());
        }
        let conn = lock_conn(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT c.id, c.type, f.text, c.namespace, c.metadata, c.created_at, f.rank
             FROM contexts_fts f JOIN contexts c ON c.id = f.id
             WHERE contexts_fts MATCH ?1 AND c.archived = 0
             ORDER BY f.rank LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![escaped, limit as i64], |row| {
                let mut map = serde_json::Map::new();
                map.insert("id".into(), sql_to_json(row.get_ref(0)?));
                map.insert("type".into(), sql_to_json(row.get_ref(1)?));
                map.insert("text".into(), sql_to_json(row.get_ref(2)?));
                map.insert("namespace".into(), sql_to_json(row.get_ref(3)?));
                map.insert("metadata".into(), sql_to_json(row.get_ref(4)?));
                map.insert("created_at".into(), sql_to_json(row.get_ref(5)?));
                map.insert("rank".into(), sql_to_json(row.get_ref(6)?));
                Ok(GraphRow(map))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn most_recent_of_type(
        &self,
        context_type: &str,
        exclude_id: &str,
    ) -> Result<Option<Context>> {
        let conn = lock_conn(&self.conn);
        let context = conn
            .query_row(
                &format!(
                    "SELECT {CONTEXT_COLUMNS} FROM contexts
                     WHERE type = ?1 AND id != ?2 AND archived = 0
                     ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                params![context_type, exclude_id],
                row_to_context,
            )
            .optional()?;
        Ok(context)
    }

    fn list_by_namespace(&self, namespace: &str) -> Result<Vec<Context>> {
        let conn = lock_conn(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONTEXT_COLUMNS} FROM contexts
             WHERE namespace = ?1 AND archived = 0 ORDER BY created_at DESC"
        ))?;
        let contexts = stmt
            .query_map(params![namespace], row_to_context)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(contexts)
    }

    fn execute_read(
        &self,
        query: &str,
        params_map: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<GraphRow>> {
        let conn = lock_conn(&self.conn);
        let mut stmt = conn
            .prepare(query)
            .map_err(|e| EngramError::Validation(format!("malformed query: {e}")))?;

        for (name, value) in params_map {
            let placeholder = format!(":{name}");
            let Some(idx) = stmt.parameter_index(&placeholder)? else {
                return Err(EngramError::Validation(format!(
                    "query has no parameter {placeholder}"
                )));
            };
            stmt.raw_bind_parameter(idx, json_to_sql(value))?;
        }

        let column_names: Vec<String> =
            stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut raw = stmt.raw_query();
        let mut rows = Vec::new();
        while let Some(row) = raw.next()? {
            let mut map = serde_json::Map::new();
            for (i, name) in column_names.iter().enumerate() {
                map.insert(name.clone(), sql_to_json(row.get_ref(i)?));
            }
            rows.push(GraphRow(map));
        }
        Ok(rows)
    }

    fn health_check(&self) -> Result<()> {
        let conn = lock_conn(&self.conn);
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

// ── KV store ──────────────────────────────────────────────────────────────────

const KV_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at TEXT
);
"#;

pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = open_connection(path.as_ref())?;
        conn.execute_batch(KV_SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(KV_SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn expiry(ttl: Duration) -> String {
    let deadline = chrono::Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
    deadline.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Escape LIKE wildcards so a literal prefix matches literally.
fn escape_like(prefix: &str) -> String {
    prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = now_rfc3339();
        let conn = lock_conn(&self.conn);
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT value, expires_at FROM kv WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((_, Some(expires))) if expires <= now => {
                // Lazy expiry: drop the stale row on first access.
                conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires = ttl.map(expiry);
        let conn = lock_conn(&self.conn);
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, expires],
        )?;
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = now_rfc3339();
        let expires = expiry(ttl);
        let conn = lock_conn(&self.conn);
        // One atomic statement: insert, or steal the slot only if the
        // existing entry has expired.
        let rows = conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE
             SET value = excluded.value, expires_at = excluded.expires_at
             WHERE kv.expires_at IS NOT NULL AND kv.expires_at <= ?4",
            params![key, value, expires, now],
        )?;
        Ok(rows == 1)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let conn = lock_conn(&self.conn);
        let rows = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let now = now_rfc3339();
        let pattern = format!("{}%", escape_like(prefix));
        let conn = lock_conn(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv
             WHERE key LIKE ?1 ESCAPE '\\'
               AND (expires_at IS NULL OR expires_at > ?2)
             ORDER BY key",
        )?;
        let entries = stmt
            .query_map(params![pattern, now], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn health_check(&self) -> Result<()> {
        let conn = lock_conn(&self.conn);
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}
