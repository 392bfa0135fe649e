use crate::error::{Result, StoryworkError};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Default story marker: `Original Story` followed by `Story: #12 - Area: title`.
pub const DEFAULT_PATTERN: &str = r"Original Story\s+Story:\s+#\d{1,3}\s+-\s+.+?:\s+.+";

static FALLBACK_RE: OnceLock<Regex> = OnceLock::new();
static LABELS_RE: OnceLock<Regex> = OnceLock::new();
static PREFIX_RE: OnceLock<Regex> = OnceLock::new();
static ID_RE: OnceLock<Regex> = OnceLock::new();

/// `[STORY] Area: title` lines, optionally prefixed by a bold
/// `Original Story:` label. Title lines like `[FRONTEND] [STORY] ...` never
/// match because the line must open with `[STORY]`.
fn fallback_re() -> &'static Regex {
    FALLBACK_RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(?:\*\*?Original Story\*\*?:[ \t]*)?\[STORY\][ \t]*[^:\n]+:[ \t]*[^\n]+$",
        )
        .unwrap()
    })
}

fn labels_re() -> &'static Regex {
    LABELS_RE.get_or_init(|| Regex::new(r"(?mi)^Labels:[ \t]*(.+)$").unwrap())
}

fn prefix_re() -> &'static Regex {
    PREFIX_RE.get_or_init(|| {
        Regex::new(r"(?i)^\*{0,2}(?:Original\s+Story|Story)\*{0,2}:\s*").unwrap()
    })
}

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| Regex::new(r"#\d{1,6}").unwrap())
}

// ---------------------------------------------------------------------------
// Story files
// ---------------------------------------------------------------------------

/// Header block plus body, as written to `before.md` / `backend.md`.
pub fn render_issue(title: &str, url: &str, labels: &[String], body: &str) -> String {
    format!(
        "Title: {title}\nURL: {url}\nLabels: {}\n\n{body}",
        labels.join(", ")
    )
}

/// Labels from the first `Labels:` header line.
pub fn parse_labels_line(text: &str) -> Vec<String> {
    labels_re()
        .captures(text)
        .map(|caps| {
            caps[1]
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Story pattern
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoryMatch<'t> {
    pub matched: &'t str,
    /// Byte offset of the match in the searched text.
    pub start: usize,
}

impl<'t> StoryMatch<'t> {
    /// Last non-empty line of the match, trimmed.
    pub fn line(&self) -> &'t str {
        self.matched
            .trim()
            .lines()
            .last()
            .map(str::trim)
            .unwrap_or("")
    }

    /// One-based line number of the match start within `text`.
    pub fn line_number(&self, text: &str) -> usize {
        text[..self.start].matches('\n').count() + 1
    }
}

/// Compiled marker pattern with its tolerant and fallback variants.
#[derive(Debug, Clone)]
pub struct StoryPattern {
    source: String,
    primary: Regex,
    tolerant: Option<Regex>,
}

impl StoryPattern {
    /// Compile `raw`, accepting an `r"..."` / `r'...'` wrapper.
    pub fn new(raw: &str) -> Result<Self> {
        let source = unwrap_raw_literal(raw).to_string();
        let primary = compile(&source).map_err(|e| StoryworkError::InvalidPattern(e.to_string()))?;
        let tolerant = source
            .contains("Story:")
            .then(|| compile(&source.replace("Story:", r"\*\*?Story\*\*?:")).ok())
            .flatten();
        Ok(Self {
            source,
            primary,
            tolerant,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First match of the primary pattern, then the bold-tolerant variant,
    /// then the `[STORY] x: y` fallback.
    pub fn find<'t>(&self, text: &'t str) -> Option<StoryMatch<'t>> {
        std::iter::once(&self.primary)
            .chain(self.tolerant.as_ref())
            .chain(std::iter::once(fallback_re()))
            .find_map(|re| re.find(text))
            .map(|m| StoryMatch {
                matched: m.as_str(),
                start: m.start(),
            })
    }
}

impl Default for StoryPattern {
    fn default() -> Self {
        Self {
            source: DEFAULT_PATTERN.to_string(),
            primary: compile(DEFAULT_PATTERN).unwrap(),
            tolerant: compile(&DEFAULT_PATTERN.replace("Story:", r"\*\*?Story\*\*?:")).ok(),
        }
    }
}

fn compile(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).multi_line(true).build()
}

fn unwrap_raw_literal(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if raw.len() >= 3 && bytes[0] == b'r' && (bytes[1] == b'"' || bytes[1] == b'\'') {
        if bytes[raw.len() - 1] == bytes[1] {
            return &raw[2..raw.len() - 1];
        }
    }
    raw
}

// ---------------------------------------------------------------------------
// Search keys and synopsis
// ---------------------------------------------------------------------------

/// Backend search keys from a matched story line, most specific first:
/// the line without its `Story:` label, the bare title after `[STORY]`, and
/// the `#id` token.
pub fn derive_search_keys(matched_line: &str) -> Vec<String> {
    let line = prefix_re().replace(matched_line.trim(), "").trim().to_string();
    let mut keys = Vec::new();
    if !line.is_empty() {
        keys.push(line.clone());
    }
    if let Some(bare) = line.strip_prefix("[STORY]") {
        let bare = bare.trim();
        if !bare.is_empty() {
            keys.push(bare.to_string());
        }
    }
    if let Some(id) = id_re().find(&line) {
        keys.push(id.as_str().to_string());
    }
    let mut seen = HashSet::new();
    keys.retain(|k| seen.insert(k.clone()));
    keys
}

/// First line plus the first 200 characters of the next non-empty line.
pub fn synopsis(text: &str) -> String {
    let title = text.lines().next().unwrap_or("");
    let non_empty: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let first_para = non_empty
        .get(1)
        .or_else(|| non_empty.first())
        .copied()
        .unwrap_or("");
    let clipped: String = first_para.chars().take(200).collect();
    format!("{title} - {clipped}")
}
