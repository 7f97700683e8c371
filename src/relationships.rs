//! Relationship auto-detection.
//!
//! Runs after a context is stored and proposes directed edges from it.
//! Four strategies: temporal succession within a type, textual references
//! to PRs/issues/context ids, hierarchical containment from metadata, and
//! sprint sequencing. Every candidate pointing at an internal id is
//! verified live before the edge is written — detection failures are
//! logged and skipped, never fatal to the store that triggered them.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::backends::GraphStore;
use crate::error::Result;
use crate::model::{now_rfc3339, Context, RelationType, Relationship};

/// One proposed edge before verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedRelationship {
    pub relation: RelationType,
    /// Internal context id or an external key like `pr_42`.
    pub target: String,
    pub reason: String,
}

static PR_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:PR|pull\s+request)\s*#(\d+)").expect("pattern"));
static ISSUE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bissue\s*#(\d+)").expect("pattern"));
static FIX_VERB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:fixes|closes|resolves)\b").expect("pattern"));
static UUID_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("pattern")
});
static SPRINT_NUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^sprint[-_\s]?(\d+)$").expect("pattern"));

fn is_external_key(target: &str) -> bool {
    target.starts_with("pr_") || target.starts_with("issue_")
}

/// Detects and persists relationships for newly stored contexts.
pub struct RelationshipDetector {
    graph: Arc<dyn GraphStore>,
}

impl RelationshipDetector {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    /// Propose edges for a context. Pure inspection plus graph reads; no
    /// writes happen here.
    pub fn detect(&self, context: &Context) -> Result<Vec<DetectedRelationship>> {
        let mut found = Vec::new();
        self.detect_temporal(context, &mut found)?;
        detect_references(context, &mut found);
        detect_hierarchical(context, &mut found);
        detect_sprint_sequence(context, &mut found);
        found.dedup_by(|a, b| a.relation == b.relation && a.target == b.target);
        Ok(found)
    }

    /// Detect, verify, and persist. Returns the number of edges created.
    /// Candidates whose internal target no longer exists are skipped.
    pub fn detect_and_create(&self, context: &Context) -> Result<usize> {
        let candidates = self.detect(context)?;
        let mut created = 0;
        for candidate in candidates {
            // External keys (pr_42, issue_7) are acceptable without a node;
            // internal ids must point at a live context.
            if !is_external_key(&candidate.target) {
                match self.graph.context_exists(&candidate.target) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(
                            from = %context.id,
                            target = %candidate.target,
                            "skipping edge to missing context"
                        );
                        continue;
                    }
                    Err(err) => {
                        warn!(
                            from = %context.id,
                            target = %candidate.target,
                            error = %err,
                            "could not verify edge target"
                        );
                        continue;
                    }
                }
            }
            let edge = Relationship {
                from_id: context.id.clone(),
                to_id: candidate.target,
                relation_type: candidate.relation,
                reason: candidate.reason,
                auto_detected: true,
                created_at: now_rfc3339(),
            };
            match self.graph.create_edge(&edge) {
                Ok(()) => created += 1,
                Err(err) => {
                    warn!(from = %edge.from_id, to = %edge.to_id, error = %err, "edge write failed");
                }
            }
        }
        Ok(created)
    }

    /// The previous context of the same type, if any, becomes PRECEDED_BY.
    fn detect_temporal(
        &self,
        context: &Context,
        out: &mut Vec<DetectedRelationship>,
    ) -> Result<()> {
        if let Some(previous) = self
            .graph
            .most_recent_of_type(&context.context_type, &context.id)?
        {
            out.push(DetectedRelationship {
                relation: RelationType::PrecededBy,
                target: previous.id,
                reason: format!("previous {} context", context.context_type),
            });
        }
        Ok(())
    }
}

/// PR/issue mentions and literal context ids in the text.
fn detect_references(context: &Context, out: &mut Vec<DetectedRelationship>) {
    let text = context.text();
    // "fixes PR #42" is a FIXES edge; a bare mention is only a reference.
    let fixing = FIX_VERB.is_match(&text);
    let ref_relation = if fixing {
        RelationType::Fixes
    } else {
        RelationType::References
    };

    for caps in PR_REF.captures_iter(&text) {
        out.push(DetectedRelationship {
            relation: ref_relation,
            target: format!("pr_{}", &caps[1]),
            reason: format!("mentions PR #{}", &caps[1]),
        });
    }
    for caps in ISSUE_REF.captures_iter(&text) {
        out.push(DetectedRelationship {
            relation: ref_relation,
            target: format!("issue_{}", &caps[1]),
            reason: format!("mentions issue #{}", &caps[1]),
        });
    }
    for m in UUID_REF.find_iter(&text) {
        if m.as_str() != context.id {
            out.push(DetectedRelationship {
                relation: RelationType::References,
                target: m.as_str().to_string(),
                reason: "mentions context id".into(),
            });
        }
    }
}

/// Metadata containment: sprint, project, or explicit parent.
fn detect_hierarchical(context: &Context, out: &mut Vec<DetectedRelationship>) {
    for (key, reason) in [
        ("parent_id", "explicit parent"),
        ("sprint", "part of sprint"),
        ("project_id", "part of project"),
    ] {
        if let Some(target) = context.metadata.get(key).and_then(|v| v.as_str()) {
            if !target.is_empty() && target != context.id {
                out.push(DetectedRelationship {
                    relation: RelationType::PartOf,
                    target: target.to_string(),
                    reason: reason.into(),
                });
            }
        }
    }
}

/// `sprint_7` is preceded by `sprint_6`.
fn detect_sprint_sequence(context: &Context, out: &mut Vec<DetectedRelationship>) {
    let Some(sprint) = context.metadata.get("sprint").and_then(|v| v.as_str()) else {
        return;
    };
    let Some(caps) = SPRINT_NUM.captures(sprint) else {
        return;
    };
    let Ok(n) = caps[1].parse::<u64>() else {
        return;
    };
    if n > 1 {
        out.push(DetectedRelationship {
            relation: RelationType::PrecededBy,
            target: format!("sprint_{}", n - 1),
            reason: format!("sprint {n} follows sprint {}", n - 1),
        });
    }
}
