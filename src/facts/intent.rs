//! Rule-based query intent classification.
//!
//! A small ordered table of linguistic templates; the first matching
//! template wins and carries a fixed confidence. No learned model — the
//! point is deterministic routing: a FACT_LOOKUP hit bypasses ranking
//! entirely, so classification must be exact and repeatable.

use regex::Regex;
use std::sync::LazyLock;

/// Query intent as seen by the read and write routers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    FactLookup,
    StoreFact,
    UpdateFact,
    GeneralQuery,
}

/// Outcome of classifying one query.
#[derive(Debug, Clone)]
pub struct Classification {
    pub intent: Intent,
    /// Fixed score per template, not a computed probability.
    pub confidence: f64,
    /// Attribute named by the query, normalized (e.g. `favorite_color`).
    pub attribute: Option<String>,
    /// Value named by the query, cleaned.
    pub value: Option<String>,
}

struct Template {
    pattern: Regex,
    intent: Intent,
    confidence: f64,
    /// Attribute implied by the template itself when the pattern has no
    /// `attr` capture (e.g. "i work at ..." → employer).
    implied_attribute: Option<&'static str>,
}

static TEMPLATES: LazyLock<Vec<Template>> = LazyLock::new(|| {
    let t = |pattern: &str, intent, confidence, implied_attribute| Template {
        pattern: Regex::new(pattern).expect("intent template must compile"),
        intent,
        confidence,
        implied_attribute,
    };
    vec![
        // Lookups first: questions must never be mistaken for declarations.
        t(
            r"(?i)^(?:what(?:'s|\s+is)|who(?:'s|\s+is))\s+(?:my|our)\s+(?P<attr>[\w\s-]+?)\s*\??$",
            Intent::FactLookup,
            0.95,
            None,
        ),
        t(
            r"(?i)^(?:do\s+you\s+know|tell\s+me|remind\s+me\s+of)\s+(?:my|our)\s+(?P<attr>[\w\s-]+?)\s*\??$",
            Intent::FactLookup,
            0.85,
            None,
        ),
        // Explicit updates before plain declarations.
        t(
            r"(?i)^(?:please\s+)?(?:change|update|set)\s+my\s+(?P<attr>[\w\s-]+?)\s+to\s+(?P<value>.+)$",
            Intent::UpdateFact,
            0.9,
            None,
        ),
        t(
            r"(?i)^my\s+(?P<attr>[\w\s-]+?)\s+is\s+now\s+(?P<value>.+)$",
            Intent::UpdateFact,
            0.9,
            None,
        ),
        // Declarations.
        t(
            r"(?i)^(?:remember\s+(?:that\s+)?)?my\s+(?P<attr>[\w\s-]+?)\s+is\s+(?P<value>.+)$",
            Intent::StoreFact,
            0.85,
            None,
        ),
        t(
            r"(?i)^i\s+work\s+(?:at|for)\s+(?P<value>.+)$",
            Intent::StoreFact,
            0.8,
            Some("employer"),
        ),
        t(
            r"(?i)^i\s+live\s+in\s+(?P<value>.+)$",
            Intent::StoreFact,
            0.8,
            Some("location"),
        ),
        t(
            r"(?i)^(?:call\s+me|my\s+name's)\s+(?P<value>.+)$",
            Intent::StoreFact,
            0.8,
            Some("name"),
        ),
    ]
});

/// Classify a query. First matching template wins; anything else is a
/// general query that falls through to hybrid search.
pub fn classify(text: &str) -> Classification {
    let trimmed = text.trim();
    for template in TEMPLATES.iter() {
        if let Some(caps) = template.pattern.captures(trimmed) {
            let attribute = caps
                .name("attr")
                .map(|m| m.as_str())
                .or(template.implied_attribute)
                .and_then(|raw| super::normalize_attribute(raw).ok());
            let value = caps
                .name("value")
                .map(|m| super::extract::clean_value(m.as_str()))
                .filter(|v| !v.is_empty());
            return Classification {
                intent: template.intent,
                confidence: template.confidence,
                attribute,
                value,
            };
        }
    }
    Classification {
        intent: Intent::GeneralQuery,
        confidence: 0.3,
        attribute: None,
        value: None,
    }
}
