//! Typed error surface for the memory core.
//!
//! Backend and adapter failures are caught at the dispatcher boundary and
//! converted into per-backend status entries; they never reach callers as
//! errors. Only validation errors on the current request are fatal to it.

use thiserror::Error;

/// All error kinds the core can return to a caller.
#[derive(Debug, Error)]
pub enum EngramError {
    /// Malformed namespace path, fact key, or content schema. Rejected
    /// immediately, never partially applied.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A backend timed out or errored. Surfaces only from operations that
    /// require that specific backend; search paths degrade instead.
    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// The embedding service call failed. Non-fatal on the write path unless
    /// strict mode is enabled.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// `acquire_lock` was called on an already-held, non-expired lock.
    #[error("lock on '{path}' is held by another writer")]
    LockConflict { path: String },

    /// A context or fact key that must exist does not. Plain lookups return
    /// `Option::None` instead of this.
    #[error("not found: {0}")]
    NotFound(String),

    /// Local storage failure (SQLite, serialization).
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngramError {
    /// Machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            Self::Embedding(_) => "EMBEDDING_FAILURE",
            Self::LockConflict { .. } => "LOCK_CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Storage(_) => "STORAGE",
        }
    }
}

impl From<rusqlite::Error> for EngramError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngramError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization: {err}"))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngramError>;
