use crate::markdown::{bullet_items, Document};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

/// Markers every rewrite must contain before it is written to disk.
pub const REWRITE_MARKERS: [&str; 3] = [
    "## 🏷️ Labels (Proposed)",
    "**Rewrite Variant:",
    "## Original Story (Unmodified – For Traceability)",
];

pub const LABELS_HEADING: &str = "🏷️ Labels (Proposed)";

/// Content sections a story needs before it can be published.
pub const PUBLISH_SECTIONS: [&str; 8] = [
    "Story Header",
    "Story Intent",
    "Actors & Stakeholders",
    "Functional Behavior",
    "Business Rules",
    "Data Requirements",
    "Acceptance Criteria",
    "Audit & Observability",
];

const LABEL_SUBSECTIONS: [&str; 3] = ["Required", "Recommended", "Blocking / Risk"];

static VARIANT_RE: OnceLock<Regex> = OnceLock::new();

fn variant_re() -> &'static Regex {
    VARIANT_RE.get_or_init(|| Regex::new(r"(?m)^\*\*Rewrite Variant:\*\*[ \t]+\S+").unwrap())
}

// ---------------------------------------------------------------------------
// ValidationReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// One entry per missing marker or section.
    pub missing: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing: {}", self.missing.join("; "))
    }
}

/// Literal substring check for each required marker.
pub fn check_markers(text: &str, markers: &[String]) -> ValidationReport {
    ValidationReport {
        missing: markers
            .iter()
            .filter(|m| !text.contains(m.as_str()))
            .cloned()
            .collect(),
    }
}

/// Structural check of a rewritten story before publishing.
pub fn check_publishable(text: &str) -> ValidationReport {
    let doc = Document::parse(text);
    let mut missing = Vec::new();

    match doc.find_title(2, LABELS_HEADING) {
        Some(labels) => {
            for sub in LABEL_SUBSECTIONS {
                if doc.child_titled(labels, sub).is_none() {
                    missing.push(format!("'### {sub}' under '## {LABELS_HEADING}'"));
                }
            }
        }
        None => missing.push(format!("'## {LABELS_HEADING}' section")),
    }

    if !variant_re().is_match(text) {
        missing.push("'**Rewrite Variant:** <variant>' line".to_string());
    }

    for section in PUBLISH_SECTIONS {
        let found = doc
            .find(|s| s.level <= 2 && crate::markdown::title_eq(&s.title, section))
            .is_some();
        if !found {
            missing.push(format!("section '{section}' (H1 or H2, optionally numbered)"));
        }
    }

    ValidationReport { missing }
}

// ---------------------------------------------------------------------------
// Proposed labels and publish body
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProposedLabels {
    pub required: Vec<String>,
    pub recommended: Vec<String>,
    pub blocking: Vec<String>,
}

impl ProposedLabels {
    pub fn parse(text: &str) -> Self {
        let doc = Document::parse(text);
        let Some(labels) = doc.find_title(2, LABELS_HEADING) else {
            return Self::default();
        };
        let list = |title: &str| {
            doc.child_titled(labels, title)
                .map(|i| bullet_items(doc.body(i)))
                .unwrap_or_default()
        };
        Self {
            required: list("Required"),
            recommended: list("Recommended"),
            blocking: list("Blocking / Risk"),
        }
    }

    /// Labels to apply: required, then blocking, then recommended when
    /// asked for. Duplicates keep their first position.
    pub fn to_apply(&self, include_recommended: bool) -> Vec<String> {
        let mut seen = HashSet::new();
        self.required
            .iter()
            .chain(&self.blocking)
            .chain(self.recommended.iter().filter(|_| include_recommended))
            .filter(|l| seen.insert(l.as_str()))
            .cloned()
            .collect()
    }
}

/// Issue body for publishing: everything after the labels section, trimmed.
/// Without a labels section the whole text is the body.
pub fn publish_body(text: &str) -> String {
    let doc = Document::parse(text);
    match doc.find_title(2, LABELS_HEADING) {
        Some(labels) => doc.after_subtree(labels).trim().to_string(),
        None => text.to_string(),
    }
}
