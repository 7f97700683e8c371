//! Ranking policies and pre-rank filters.
//!
//! Filters always run before ranking so policies never see results the
//! caller excluded. Every policy finishes with the same tie-break so
//! identical inputs produce identical orderings regardless of policy:
//! score descending, then timestamp descending, then id ascending.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{EngramError, Result};
use crate::model::MemoryResult;

/// Keep results sharing at least one tag with `tags`. An empty filter keeps
/// everything.
pub fn filter_by_tags(results: Vec<MemoryResult>, tags: &[String]) -> Vec<MemoryResult> {
    if tags.is_empty() {
        return results;
    }
    results
        .into_iter()
        .filter(|r| r.tags.iter().any(|t| tags.contains(t)))
        .collect()
}

/// Keep results whose timestamp is at or after `cutoff` (RFC 3339). Results
/// with unparseable timestamps are dropped rather than guessed at.
pub fn filter_by_time_window(results: Vec<MemoryResult>, cutoff: &str) -> Vec<MemoryResult> {
    let Ok(cutoff) = DateTime::parse_from_rfc3339(cutoff) else {
        return results;
    };
    let cutoff = cutoff.with_timezone(&Utc);
    results
        .into_iter()
        .filter(|r| match DateTime::parse_from_rfc3339(&r.timestamp) {
            Ok(ts) => ts.with_timezone(&Utc) >= cutoff,
            Err(_) => false,
        })
        .collect()
}

/// Merge hits that refer to the same record: the vector and graph backends
/// can both return one context. The higher-scoring hit survives; tags from
/// the duplicates are folded into it. Insertion order is preserved.
pub fn fuse_by_id(results: Vec<MemoryResult>) -> Vec<MemoryResult> {
    let mut fused: Vec<MemoryResult> = Vec::with_capacity(results.len());
    for result in results {
        match fused.iter_mut().find(|r| r.id == result.id) {
            Some(existing) => {
                let mut tags = std::mem::take(&mut existing.tags);
                tags.extend(result.tags.iter().cloned());
                if result.score > existing.score {
                    *existing = result;
                }
                existing.tags = crate::model::dedupe_tags(tags);
            }
            None => fused.push(result),
        }
    }
    fused
}

/// Total order over results: score desc, timestamp desc, id asc. Timestamps
/// are compared as instants when both parse, else as strings (stored
/// timestamps are fixed-width RFC 3339, so the string order matches).
fn compare(a: &MemoryResult, b: &MemoryResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            match (
                DateTime::parse_from_rfc3339(&a.timestamp),
                DateTime::parse_from_rfc3339(&b.timestamp),
            ) {
                (Ok(ta), Ok(tb)) => tb.cmp(&ta),
                _ => b.timestamp.cmp(&a.timestamp),
            }
        })
        .then_with(|| a.id.cmp(&b.id))
}

fn sort_ranked(results: &mut [MemoryResult]) {
    results.sort_by(compare);
}

/// A named, deterministic reordering of filtered results. Policies adjust
/// scores; they never add, remove, or truncate.
pub trait RankingPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn rank(&self, results: Vec<MemoryResult>) -> Vec<MemoryResult>;
}

impl std::fmt::Debug for dyn RankingPolicy + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankingPolicy")
            .field("name", &self.name())
            .finish()
    }
}

/// Pass-through: order by the universal tie-break only.
pub struct DefaultPolicy;

impl RankingPolicy for DefaultPolicy {
    fn name(&self) -> &str {
        "default"
    }

    fn rank(&self, mut results: Vec<MemoryResult>) -> Vec<MemoryResult> {
        sort_ranked(&mut results);
        results
    }
}

/// Multiply the score of one content type by a boost factor, clamped back
/// into `[0.0, 1.0]`.
pub struct TypeBoostPolicy {
    name: String,
    boost_type: String,
    factor: f64,
}

impl TypeBoostPolicy {
    pub fn new(name: impl Into<String>, boost_type: impl Into<String>, factor: f64) -> Self {
        Self {
            name: name.into(),
            boost_type: boost_type.into(),
            factor,
        }
    }
}

impl RankingPolicy for TypeBoostPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn rank(&self, mut results: Vec<MemoryResult>) -> Vec<MemoryResult> {
        for r in &mut results {
            if r.result_type == self.boost_type {
                r.score = (r.score * self.factor).clamp(0.0, 1.0);
            }
        }
        sort_ranked(&mut results);
        results
    }
}

/// Registry of policies addressable by name.
pub struct PolicyRegistry {
    policies: BTreeMap<String, Box<dyn RankingPolicy>>,
}

impl PolicyRegistry {
    /// Registry pre-loaded with the built-in policies.
    pub fn new() -> Self {
        let mut registry = Self {
            policies: BTreeMap::new(),
        };
        registry.register(Box::new(DefaultPolicy));
        registry.register(Box::new(TypeBoostPolicy::new(
            "decisions_first",
            "decision",
            1.5,
        )));
        registry
    }

    pub fn register(&mut self, policy: Box<dyn RankingPolicy>) {
        self.policies.insert(policy.name().to_string(), policy);
    }

    pub fn get(&self, name: &str) -> Result<&dyn RankingPolicy> {
        self.policies
            .get(name)
            .map(|p| p.as_ref())
            .ok_or_else(|| EngramError::Validation(format!("unknown ranking policy '{name}'")))
    }

    pub fn names(&self) -> Vec<&str> {
        self.policies.keys().map(String::as_str).collect()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResultSource;

    fn result(id: &str, score: f64, timestamp: &str, rtype: &str) -> MemoryResult {
        MemoryResult {
            id: id.into(),
            text: format!("text for {id}"),
            result_type: rtype.into(),
            score,
            timestamp: timestamp.into(),
            source: ResultSource::Vector,
            tags: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn default_policy_orders_by_score() {
        let ranked = DefaultPolicy.rank(vec![
            result("a", 0.3, "2026-01-01T00:00:00.000000Z", "note"),
            result("b", 0.9, "2026-01-01T00:00:00.000000Z", "note"),
            result("c", 0.6, "2026-01-01T00:00:00.000000Z", "note"),
        ]);
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
    }

    #[test]
    fn ties_break_on_timestamp_then_id() {
        let ranked = DefaultPolicy.rank(vec![
            result("z", 0.5, "2026-01-01T00:00:00.000000Z", "note"),
            result("a", 0.5, "2026-01-01T00:00:00.000000Z", "note"),
            result("m", 0.5, "2026-01-02T00:00:00.000000Z", "note"),
        ]);
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        // Newest first, then id ascending among equals.
        assert_eq!(ids, ["m", "a", "z"]);
    }

    #[test]
    fn mixed_offset_timestamps_compare_as_instants() {
        let ranked = DefaultPolicy.rank(vec![
            result("a", 0.5, "2026-01-01T00:00:00+00:00", "note"),
            // Same instant, different rendering; falls through to id asc.
            result("b", 0.5, "2026-01-01T02:00:00+02:00", "note"),
        ]);
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn type_boost_reorders_and_clamps() {
        let policy = TypeBoostPolicy::new("decisions_first", "decision", 1.5);
        let ranked = policy.rank(vec![
            result("note-1", 0.6, "2026-01-01T00:00:00.000000Z", "note"),
            result("dec-1", 0.5, "2026-01-01T00:00:00.000000Z", "decision"),
            result("dec-2", 0.9, "2026-01-01T00:00:00.000000Z", "decision"),
        ]);
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["dec-2", "dec-1", "note-1"]);
        assert_eq!(ranked[0].score, 1.0); // 0.9 * 1.5 clamped
        assert_eq!(ranked[1].score, 0.75);
    }

    #[test]
    fn policies_never_change_result_count() {
        let input = vec![
            result("a", 0.2, "2026-01-01T00:00:00.000000Z", "decision"),
            result("b", 0.8, "2026-01-01T00:00:00.000000Z", "note"),
        ];
        assert_eq!(DefaultPolicy.rank(input.clone()).len(), 2);
        let boost = TypeBoostPolicy::new("x", "decision", 2.0);
        assert_eq!(boost.rank(input).len(), 2);
    }

    #[test]
    fn tag_filter_intersects() {
        let mut a = result("a", 0.5, "2026-01-01T00:00:00.000000Z", "note");
        a.tags = vec!["auth".into(), "bug".into()];
        let mut b = result("b", 0.5, "2026-01-01T00:00:00.000000Z", "note");
        b.tags = vec!["infra".into()];

        let kept = filter_by_tags(vec![a, b], &["auth".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
    }

    #[test]
    fn empty_tag_filter_keeps_all() {
        let input = vec![result("a", 0.5, "2026-01-01T00:00:00.000000Z", "note")];
        assert_eq!(filter_by_tags(input, &[]).len(), 1);
    }

    #[test]
    fn time_window_filter() {
        let kept = filter_by_time_window(
            vec![
                result("old", 0.5, "2025-06-01T00:00:00.000000Z", "note"),
                result("new", 0.5, "2026-02-01T00:00:00.000000Z", "note"),
                result("bad", 0.5, "not-a-timestamp", "note"),
            ],
            "2026-01-01T00:00:00Z",
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "new");
    }

    #[test]
    fn fuse_keeps_best_score_per_id() {
        let mut vector_hit = result("c1", 0.8, "2026-01-01T00:00:00.000000Z", "note");
        vector_hit.tags = vec!["auth".into()];
        let mut graph_hit = result("c1", 0.4, "2026-01-01T00:00:00.000000Z", "note");
        graph_hit.source = ResultSource::Graph;
        graph_hit.tags = vec!["auth".into(), "infra".into()];
        let other = result("c2", 0.5, "2026-01-01T00:00:00.000000Z", "note");

        let fused = fuse_by_id(vec![vector_hit, graph_hit, other]);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].id, "c1");
        assert_eq!(fused[0].score, 0.8);
        assert_eq!(fused[0].source, ResultSource::Vector);
        assert_eq!(fused[0].tags, vec!["auth".to_string(), "infra".to_string()]);
    }

    #[test]
    fn registry_lookup() {
        let registry = PolicyRegistry::new();
        assert!(registry.get("default").is_ok());
        assert!(registry.get("decisions_first").is_ok());
        let err = registry.get("nope").unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }
}
