//! Deterministic fact storage.
//!
//! A fact is one (attribute, value) pair for a user inside a namespace,
//! stored under the key `facts:{namespace}:{user_id}:{attribute}` for O(1)
//! recall. Writing a new value archives the prior one into a history list
//! with a `superseded_by` pointer — last-write-wins at the key level, full
//! lineage retained. [`FactStore::delete_all`] is the only hard-delete path
//! in the system (forget-me compliance).

pub mod extract;
pub mod intent;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::backends::KvStore;
use crate::error::{EngramError, Result};
use crate::model::now_rfc3339;

/// One stored fact entry, current or historical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// UUID v7 of this entry. History pointers reference it.
    pub entry_id: String,
    pub attribute: String,
    pub value: String,
    pub confidence: f64,
    /// Where the fact came from (e.g. `"extraction"`, `"api"`).
    pub source: String,
    pub created_at: String,
    /// Entry id of the value that replaced this one. `None` for the current
    /// value.
    pub superseded_by: Option<String>,
}

/// Wire format for fact keys: `facts:{namespace}:{user_id}:{attribute}`.
pub fn fact_key(namespace: &str, user_id: &str, attribute: &str) -> String {
    format!("facts:{namespace}:{user_id}:{attribute}")
}

// Separate prefix so no attribute name (e.g. "history") can make a current
// key collide with a history key.
fn history_key(namespace: &str, user_id: &str, attribute: &str) -> String {
    format!("facthist:{namespace}:{user_id}:{attribute}")
}

/// Normalize a raw attribute name into key-safe form: lowercase,
/// whitespace/hyphens collapsed to underscores, other punctuation dropped.
pub fn normalize_attribute(raw: &str) -> Result<String> {
    let mut out = String::new();
    let mut last_sep = true;
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_sep = false;
        } else if (c.is_whitespace() || c == '-' || c == '_') && !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    let out = out.trim_end_matches('_').to_string();
    if out.is_empty() {
        return Err(EngramError::Validation(format!(
            "attribute '{raw}' normalizes to nothing"
        )));
    }
    Ok(out)
}

fn validate_user(user_id: &str) -> Result<()> {
    if user_id.is_empty() || user_id.contains(':') {
        return Err(EngramError::Validation(format!(
            "invalid user id '{user_id}': must be non-empty and contain no ':'"
        )));
    }
    Ok(())
}

/// Key-value backed fact store.
pub struct FactStore {
    kv: Arc<dyn KvStore>,
}

impl FactStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Store a fact, archiving any current value for the same key into
    /// history before the new value is written.
    pub fn store(
        &self,
        namespace: &str,
        user_id: &str,
        attribute: &str,
        value: &str,
        source: &str,
        confidence: f64,
    ) -> Result<Fact> {
        validate_user(user_id)?;
        let attribute = normalize_attribute(attribute)?;
        let value = value.trim();
        if value.is_empty() {
            return Err(EngramError::Validation("fact value is empty".into()));
        }

        let new_fact = Fact {
            entry_id: uuid::Uuid::now_v7().to_string(),
            attribute: attribute.clone(),
            value: value.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            source: source.to_string(),
            created_at: now_rfc3339(),
            superseded_by: None,
        };

        let key = fact_key(namespace, user_id, &attribute);
        if let Some(current_json) = self.kv.get(&key)? {
            let mut previous: Fact = serde_json::from_str(&current_json)?;
            previous.superseded_by = Some(new_fact.entry_id.clone());

            let hkey = history_key(namespace, user_id, &attribute);
            let mut history: Vec<Fact> = match self.kv.get(&hkey)? {
                Some(json) => serde_json::from_str(&json)?,
                None => Vec::new(),
            };
            history.insert(0, previous);
            self.kv.set(&hkey, &serde_json::to_string(&history)?, None)?;
            debug!(%key, "archived prior fact value");
        }

        self.kv.set(&key, &serde_json::to_string(&new_fact)?, None)?;
        Ok(new_fact)
    }

    /// O(1) lookup of the current value. Absence is a plain `None`.
    pub fn get(&self, namespace: &str, user_id: &str, attribute: &str) -> Result<Option<Fact>> {
        let attribute = normalize_attribute(attribute)?;
        let key = fact_key(namespace, user_id, &attribute);
        match self.kv.get(&key)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// All current facts for a user, ordered by attribute. With
    /// `include_history`, each attribute's archived values follow its
    /// current value, newest first.
    pub fn list(&self, namespace: &str, user_id: &str, include_history: bool) -> Result<Vec<Fact>> {
        validate_user(user_id)?;
        let prefix = format!("facts:{namespace}:{user_id}:");
        let mut facts = Vec::new();
        for (_, json) in self.kv.scan_prefix(&prefix)? {
            let fact: Fact = serde_json::from_str(&json)?;
            if include_history {
                let hkey = history_key(namespace, user_id, &fact.attribute);
                let history: Vec<Fact> = match self.kv.get(&hkey)? {
                    Some(json) => serde_json::from_str(&json)?,
                    None => Vec::new(),
                };
                facts.push(fact);
                facts.extend(history);
            } else {
                facts.push(fact);
            }
        }
        Ok(facts)
    }

    /// Forget-me: remove every current and historical fact for the user.
    /// Returns the number of current facts removed.
    pub fn delete_all(&self, namespace: &str, user_id: &str) -> Result<usize> {
        validate_user(user_id)?;
        let mut removed = 0;
        for (key, _) in self
            .kv
            .scan_prefix(&format!("facts:{namespace}:{user_id}:"))?
        {
            if self.kv.delete(&key)? {
                removed += 1;
            }
        }
        for (key, _) in self
            .kv
            .scan_prefix(&format!("facthist:{namespace}:{user_id}:"))?
        {
            self.kv.delete(&key)?;
        }
        Ok(removed)
    }

    pub fn health_check(&self) -> Result<()> {
        self.kv.health_check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sqlite::SqliteKvStore;

    fn store() -> FactStore {
        FactStore::new(Arc::new(SqliteKvStore::open_in_memory().unwrap()))
    }

    #[test]
    fn round_trip_until_next_store() {
        let facts = store();
        facts
            .store("/user/u1/context", "u1", "name", "Matt", "api", 0.9)
            .unwrap();

        let fact = facts.get("/user/u1/context", "u1", "name").unwrap().unwrap();
        assert_eq!(fact.value, "Matt");
        assert!(fact.superseded_by.is_none());

        facts
            .store("/user/u1/context", "u1", "name", "Matthew", "api", 0.9)
            .unwrap();
        let fact = facts.get("/user/u1/context", "u1", "name").unwrap().unwrap();
        assert_eq!(fact.value, "Matthew");
    }

    #[test]
    fn lineage_is_preserved_newest_first() {
        let facts = store();
        let first = facts
            .store("/global/default", "u1", "editor", "vim", "api", 0.9)
            .unwrap();
        let second = facts
            .store("/global/default", "u1", "editor", "helix", "api", 0.9)
            .unwrap();

        let all = facts.list("/global/default", "u1", true).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].value, "helix");
        assert_eq!(all[1].value, "vim");
        assert_eq!(all[1].entry_id, first.entry_id);
        assert_eq!(all[1].superseded_by.as_deref(), Some(second.entry_id.as_str()));

        // get returns only the newest
        let current = facts.get("/global/default", "u1", "editor").unwrap().unwrap();
        assert_eq!(current.value, "helix");
    }

    #[test]
    fn list_without_history_shows_current_only() {
        let facts = store();
        facts
            .store("/global/default", "u1", "editor", "vim", "api", 0.9)
            .unwrap();
        facts
            .store("/global/default", "u1", "editor", "helix", "api", 0.9)
            .unwrap();
        facts
            .store("/global/default", "u1", "name", "Matt", "api", 0.9)
            .unwrap();

        let current = facts.list("/global/default", "u1", false).unwrap();
        assert_eq!(current.len(), 2);
        assert!(current.iter().all(|f| f.superseded_by.is_none()));
    }

    #[test]
    fn delete_all_removes_current_and_history() {
        let facts = store();
        facts
            .store("/global/default", "u1", "editor", "vim", "api", 0.9)
            .unwrap();
        facts
            .store("/global/default", "u1", "editor", "helix", "api", 0.9)
            .unwrap();
        facts
            .store("/global/default", "u2", "editor", "nano", "api", 0.9)
            .unwrap();

        let removed = facts.delete_all("/global/default", "u1").unwrap();
        assert_eq!(removed, 1);
        assert!(facts.get("/global/default", "u1", "editor").unwrap().is_none());
        assert!(facts.list("/global/default", "u1", true).unwrap().is_empty());

        // Other users untouched.
        assert!(facts.get("/global/default", "u2", "editor").unwrap().is_some());
    }

    #[test]
    fn history_as_attribute_name_does_not_collide() {
        let facts = store();
        facts
            .store("/global/default", "u1", "history", "medieval", "api", 0.9)
            .unwrap();
        facts
            .store("/global/default", "u1", "history", "modern", "api", 0.9)
            .unwrap();

        let current = facts.list("/global/default", "u1", false).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].value, "modern");

        let all = facts.list("/global/default", "u1", true).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].value, "medieval");

        let removed = facts.delete_all("/global/default", "u1").unwrap();
        assert_eq!(removed, 1);
        assert!(facts.list("/global/default", "u1", true).unwrap().is_empty());
    }

    #[test]
    fn attribute_normalization() {
        assert_eq!(normalize_attribute("Favorite Color").unwrap(), "favorite_color");
        assert_eq!(normalize_attribute("  phone-number ").unwrap(), "phone_number");
        assert_eq!(normalize_attribute("name?").unwrap(), "name");
        assert!(normalize_attribute("???").is_err());
    }

    #[test]
    fn invalid_user_rejected() {
        let facts = store();
        let err = facts
            .store("/global/default", "a:b", "name", "x", "api", 0.9)
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn empty_value_rejected() {
        let facts = store();
        let err = facts
            .store("/global/default", "u1", "name", "   ", "api", 0.9)
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }
}
