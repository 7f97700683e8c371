//! Core data model.
//!
//! Defines [`MemoryResult`] (the single normalized search-hit shape every
//! adapter must produce), [`Context`] (a stored unit of knowledge),
//! [`Relationship`] (a directed graph edge), and their enums. Code above the
//! adapter boundary operates exclusively on these types — backend-native
//! shapes never leak upward.

use serde::{Deserialize, Serialize};

/// Current time as fixed-width RFC 3339 (microseconds, `Z` suffix), so that
/// lexicographic comparison of stored timestamps is chronological.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Which backend produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Vector,
    Graph,
    Fact,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Graph => "graph",
            Self::Fact => "fact",
        }
    }
}

impl std::fmt::Display for ResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized search hit. Produced only by backend adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryResult {
    pub id: String,
    /// The text content of the hit.
    pub text: String,
    /// Content type of the underlying context (e.g. `"decision"`, `"code"`).
    #[serde(rename = "type")]
    pub result_type: String,
    /// Relevance score in `[0.0, 1.0]`. Fact hits are always `1.0`.
    pub score: f64,
    /// ISO 8601 creation timestamp of the underlying record.
    pub timestamp: String,
    /// Backend that produced this hit.
    pub source: ResultSource,
    /// Ordered, deduplicated tags.
    pub tags: Vec<String>,
    /// Arbitrary JSON metadata carried through from the backend payload.
    pub metadata: serde_json::Value,
}

impl MemoryResult {
    /// Clamp the score into `[0.0, 1.0]` and dedupe tags preserving first
    /// occurrence. Adapters call this before handing results upward.
    pub fn normalized(mut self) -> Self {
        self.score = self.score.clamp(0.0, 1.0);
        self.tags = dedupe_tags(self.tags);
        self
    }
}

/// Dedupe tags while preserving first-occurrence order.
pub fn dedupe_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter().filter(|t| seen.insert(t.clone())).collect()
}

/// Who authored a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorType {
    Human,
    Agent,
}

impl AuthorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Agent => "agent",
        }
    }
}

impl std::str::FromStr for AuthorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Self::Human),
            "agent" => Ok(Self::Agent),
            _ => Err(format!("unknown author type: {s}")),
        }
    }
}

/// Outcome of the embedding step for a stored context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Completed,
    Failed,
    Unavailable,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unavailable => "unavailable",
        }
    }
}

impl std::str::FromStr for EmbeddingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "unavailable" => Ok(Self::Unavailable),
            _ => Err(format!("unknown embedding status: {s}")),
        }
    }
}

/// A stored unit of knowledge. The id is immutable once created; the only
/// structural mutations permitted are namespace re-assignment and
/// relationship attachment. Deletion archives rather than removes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    /// Content type (e.g. `"decision"`, `"sprint"`, `"code"`).
    #[serde(rename = "type")]
    pub context_type: String,
    /// Structured content. A plain string or a JSON object.
    pub content: serde_json::Value,
    /// Arbitrary JSON metadata (tags, project_id, sprint, ...).
    pub metadata: serde_json::Value,
    pub author: String,
    pub author_type: AuthorType,
    /// Hierarchical namespace path, e.g. `/project/phoenix/context`.
    pub namespace: String,
    pub embedding_status: EmbeddingStatus,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

impl Context {
    /// Text rendering used for embedding and keyword indexing: strings pass
    /// through, structured content is serialized.
    pub fn text(&self) -> String {
        match &self.content {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// The eight relationship kinds the detector and the graph store understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    RelatesTo,
    DependsOn,
    PrecededBy,
    FollowedBy,
    PartOf,
    Implements,
    Fixes,
    References,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelatesTo => "RELATES_TO",
            Self::DependsOn => "DEPENDS_ON",
            Self::PrecededBy => "PRECEDED_BY",
            Self::FollowedBy => "FOLLOWED_BY",
            Self::PartOf => "PART_OF",
            Self::Implements => "IMPLEMENTS",
            Self::Fixes => "FIXES",
            Self::References => "REFERENCES",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RELATES_TO" => Ok(Self::RelatesTo),
            "DEPENDS_ON" => Ok(Self::DependsOn),
            "PRECEDED_BY" => Ok(Self::PrecededBy),
            "FOLLOWED_BY" => Ok(Self::FollowedBy),
            "PART_OF" => Ok(Self::PartOf),
            "IMPLEMENTS" => Ok(Self::Implements),
            "FIXES" => Ok(Self::Fixes),
            "REFERENCES" => Ok(Self::References),
            _ => Err(format!("unknown relation type: {s}")),
        }
    }
}

/// A directed edge between two contexts. `to_id` may be an external key
/// such as `pr_42`; edges are never created dangling against internal ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from_id: String,
    pub to_id: String,
    pub relation_type: RelationType,
    /// Why this edge exists (human-readable, set by the detector or caller).
    pub reason: String,
    pub auto_detected: bool,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn relation_type_round_trips() {
        for rt in [
            RelationType::RelatesTo,
            RelationType::DependsOn,
            RelationType::PrecededBy,
            RelationType::FollowedBy,
            RelationType::PartOf,
            RelationType::Implements,
            RelationType::Fixes,
            RelationType::References,
        ] {
            assert_eq!(RelationType::from_str(rt.as_str()).unwrap(), rt);
        }
        assert!(RelationType::from_str("KNOWS").is_err());
    }

    #[test]
    fn normalized_clamps_and_dedupes() {
        let result = MemoryResult {
            id: "r1".into(),
            text: "hello".into(),
            result_type: "note".into(),
            score: 1.7,
            timestamp: "2026-01-01T00:00:00+00:00".into(),
            source: ResultSource::Vector,
            tags: vec!["a".into(), "b".into(), "a".into()],
            metadata: serde_json::Value::Null,
        }
        .normalized();

        assert_eq!(result.score, 1.0);
        assert_eq!(result.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn context_text_rendering() {
        let mut ctx = Context {
            id: "c1".into(),
            context_type: "note".into(),
            content: serde_json::json!("plain text"),
            metadata: serde_json::Value::Null,
            author: "matt".into(),
            author_type: AuthorType::Human,
            namespace: "/global/default".into(),
            embedding_status: EmbeddingStatus::Completed,
            created_at: "2026-01-01T00:00:00+00:00".into(),
        };
        assert_eq!(ctx.text(), "plain text");

        ctx.content = serde_json::json!({"title": "structured"});
        assert!(ctx.text().contains("structured"));
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_value(ResultSource::Vector).unwrap();
        assert_eq!(json, serde_json::json!("vector"));
        let json = serde_json::to_value(RelationType::PrecededBy).unwrap();
        assert_eq!(json, serde_json::json!("PRECEDED_BY"));
    }
}
