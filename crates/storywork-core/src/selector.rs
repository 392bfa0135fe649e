use crate::error::{Result, StoryworkError};
use crate::paths::{self, Category};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

static RANGE_RE: OnceLock<Regex> = OnceLock::new();

fn range_re() -> &'static Regex {
    RANGE_RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s*(?:-+|\.\.)\s*(\d+)\s*$").unwrap())
}

/// Normalize one user selector to a plan key.
///
/// `123` becomes `frontend/123`; `./frontend/123` and absolute paths under
/// `root` become root-relative keys. Anything that is not `frontend/<n>` or
/// `backend/<n>` afterwards is rejected, so a key never leaves `root`.
pub fn normalize(root: &Path, raw: &str) -> Result<String> {
    let s = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    if s.is_empty() {
        return Err(StoryworkError::InvalidSelector(
            raw.to_string(),
            "empty selector".into(),
        ));
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return Ok(format!("{}/{s}", Category::Frontend.as_str()));
    }

    let s = s.strip_prefix("./").unwrap_or(s);
    let path = Path::new(s);
    if path.is_absolute() {
        if let Ok(rel) = path.strip_prefix(root) {
            return story_key(raw, &paths::relative_key(Path::new(""), rel));
        }
        let canonical = std::fs::canonicalize(path).ok();
        let canonical_root = std::fs::canonicalize(root).ok();
        if let (Some(p), Some(r)) = (canonical, canonical_root) {
            if let Ok(rel) = p.strip_prefix(&r) {
                return story_key(raw, &paths::relative_key(Path::new(""), rel));
            }
        }
        return Err(StoryworkError::InvalidSelector(
            raw.to_string(),
            "path is not under the story root".into(),
        ));
    }
    story_key(raw, &paths::relative_key(Path::new(""), path))
}

fn story_key(raw: &str, key: &str) -> Result<String> {
    let (category, number) = paths::parse_issue_key(key).map_err(|_| {
        StoryworkError::InvalidSelector(
            raw.to_string(),
            "expected a story number, frontend/<n> or backend/<n>".into(),
        )
    })?;
    Ok(paths::issue_key(category, number))
}

/// Parse an inclusive range `a-b` or `a..b`. Reversed bounds are swapped.
pub fn parse_range(raw: &str) -> Result<(u64, u64)> {
    let invalid = || StoryworkError::InvalidRange(raw.to_string());
    let caps = range_re().captures(raw).ok_or_else(invalid)?;
    let a: u64 = caps[1].parse().map_err(|_| invalid())?;
    let b: u64 = caps[2].parse().map_err(|_| invalid())?;
    if a == 0 || b == 0 {
        return Err(invalid());
    }
    Ok(if a > b { (b, a) } else { (a, b) })
}

/// Combine `--story`, `--stories` and `--range` into one ordered,
/// de-duplicated key list. `None` when no selector was given.
pub fn expand(
    root: &Path,
    stories: &[String],
    csv: Option<&str>,
    range: Option<&str>,
) -> Result<Option<Vec<String>>> {
    let mut selected = Vec::new();
    for s in stories {
        selected.push(normalize(root, s)?);
    }
    if let Some(csv) = csv {
        for part in csv
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
        {
            selected.push(normalize(root, part)?);
        }
    }
    if let Some(range) = range {
        let (start, end) = parse_range(range)?;
        selected.extend((start..=end).map(|n| paths::issue_key(Category::Frontend, n)));
    }
    if selected.is_empty() {
        return Ok(None);
    }
    let mut seen = HashSet::new();
    selected.retain(|k| seen.insert(k.clone()));
    Ok(Some(selected))
}
