//! Engram: a hybrid memory engine for AI agents.
//!
//! Contexts are written once and retrieved many times, through three
//! complementary backends behind one normalized interface:
//!
//! - a **vector index** for semantic similarity,
//! - a **graph store** for keyword search, relationships, and structured
//!   read queries,
//! - a **key-value store** for exact facts, advisory namespace locks, and
//!   the query cache.
//!
//! [`engine::MemoryEngine`] is the entry point. Queries fan out across the
//! backends concurrently; a failed backend degrades the response instead of
//! failing it. Personal questions ("what's my name?") short-circuit to an
//! O(1) fact lookup before any search runs.
//!
//! ```no_run
//! use std::sync::Arc;
//! use engram::backends::sqlite::{SqliteGraphStore, SqliteKvStore, SqliteVectorStore};
//! use engram::config::EngramConfig;
//! use engram::embedding::hash::HashEmbedder;
//! use engram::engine::MemoryEngine;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = EngramConfig::load()?;
//! let dims = config.embedding.dimensions;
//! let engine = MemoryEngine::new(
//!     Arc::new(SqliteVectorStore::open_in_memory(dims)?),
//!     Arc::new(SqliteGraphStore::open_in_memory()?),
//!     Arc::new(SqliteKvStore::open_in_memory()?),
//!     Arc::new(HashEmbedder::new(dims)),
//!     config,
//! );
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod backends;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod facts;
pub mod model;
pub mod namespace;
pub mod ranking;
pub mod relationships;
pub mod telemetry;

pub use engine::MemoryEngine;
pub use error::{EngramError, Result};
