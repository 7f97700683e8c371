//! Rule-based fact extraction from free text.
//!
//! Runs independently of intent classification: declarative statements
//! anywhere in stored content yield candidate (attribute, value) pairs,
//! validated and cleaned before they reach the fact store. One candidate
//! per attribute; the earliest (highest-priority) pattern wins.

use regex::Regex;
use std::sync::LazyLock;

/// One candidate fact pulled from text.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFact {
    pub attribute: String,
    pub value: String,
    pub confidence: f64,
}

struct Extractor {
    pattern: Regex,
    confidence: f64,
    implied_attribute: Option<&'static str>,
}

static EXTRACTORS: LazyLock<Vec<Extractor>> = LazyLock::new(|| {
    let e = |pattern: &str, confidence, implied_attribute| Extractor {
        pattern: Regex::new(pattern).expect("extractor must compile"),
        confidence,
        implied_attribute,
    };
    vec![
        e(
            r"(?i)\bmy\s+(?P<attr>[a-z][\w\s-]{0,40}?)\s+is\s+(?:now\s+)?(?P<value>[^.!?\n,]+)",
            0.9,
            None,
        ),
        e(
            r"(?i)\bi\s+work\s+(?:at|for)\s+(?P<value>[^.!?\n,]+)",
            0.8,
            Some("employer"),
        ),
        e(
            r"(?i)\bi\s+live\s+in\s+(?P<value>[^.!?\n,]+)",
            0.8,
            Some("location"),
        ),
        e(
            r"(?i)\bcall\s+me\s+(?P<value>[^.!?\n,]+)",
            0.7,
            Some("name"),
        ),
    ]
});

/// Trim, strip wrapping quotes, drop trailing punctuation, collapse
/// interior whitespace.
pub fn clean_value(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim_end_matches(['.', '!', '?', ',', ';'])
        .trim();
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pull all candidate facts out of a piece of text.
pub fn extract(text: &str) -> Vec<ExtractedFact> {
    let mut found: Vec<ExtractedFact> = Vec::new();
    for extractor in EXTRACTORS.iter() {
        for caps in extractor.pattern.captures_iter(text) {
            let Some(attribute) = caps
                .name("attr")
                .map(|m| m.as_str())
                .or(extractor.implied_attribute)
                .and_then(|raw| super::normalize_attribute(raw).ok())
            else {
                continue;
            };
            let value = clean_value(caps.name("value").map(|m| m.as_str()).unwrap_or(""));
            if value.is_empty() || value.len() > 200 {
                continue;
            }
            if found.iter().any(|f| f.attribute == attribute) {
                continue;
            }
            found.push(ExtractedFact {
                attribute,
                value,
                confidence: extractor.confidence,
            });
        }
    }
    found
}
