use crate::error::{Result, StoryworkError};
use crate::paths;
use crate::story::parse_labels_line;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

static BUSINESS_RULES_RE: OnceLock<Regex> = OnceLock::new();

fn business_rules_re() -> &'static Regex {
    BUSINESS_RULES_RE
        .get_or_init(|| Regex::new(r"(?m)^\*\*Business Rules:\*\*[ \t]*(.+?)[ \t]*$").unwrap())
}

// ---------------------------------------------------------------------------
// Backend search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendMatch {
    /// Root-relative path of the matching file.
    pub path: String,
    /// The matching line with two lines of context on each side.
    pub excerpt: String,
    /// Labels from the file's `Labels:` header.
    pub labels: Vec<String>,
}

/// Case-insensitive literal search over `<root>/backend/**/*.md`.
///
/// Files are visited in sorted order; every occurrence counts as a match,
/// and the search stops at `max` matches.
pub fn search_backend(root: &Path, value: &str, max: usize) -> Vec<BackendMatch> {
    let mut matches = Vec::new();
    if value.is_empty() || max == 0 {
        return matches;
    }
    let re = match RegexBuilder::new(&regex::escape(value))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re,
        Err(e) => {
            debug!("backend search pattern rejected: {e}");
            return matches;
        }
    };

    for file in markdown_files(&paths::backend_dir(root)) {
        let text = match std::fs::read_to_string(&file) {
            Ok(t) => t,
            Err(e) => {
                debug!(path = %file.display(), "skipping unreadable file: {e}");
                continue;
            }
        };
        let lines: Vec<&str> = text.lines().collect();
        let labels = parse_labels_line(&text);
        for m in re.find_iter(&text) {
            let line_idx = text[..m.start()].matches('\n').count();
            let from = line_idx.saturating_sub(2);
            let to = (line_idx + 3).min(lines.len());
            matches.push(BackendMatch {
                path: paths::relative_key(root, &file),
                excerpt: lines[from..to].join("\n").trim().to_string(),
                labels: labels.clone(),
            });
            if matches.len() >= max {
                return matches;
            }
        }
    }
    matches
}

fn markdown_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    let mut entries: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            out.extend(markdown_files(&path));
        } else if path.extension().is_some_and(|ext| ext == "md") {
            out.push(path);
        }
    }
    out
}

/// Distinct `domain:*` names across the matches, sorted.
pub fn domains(matches: &[BackendMatch]) -> Vec<String> {
    matches
        .iter()
        .flat_map(|m| m.labels.iter())
        .filter_map(|l| l.strip_prefix("domain:"))
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// ---------------------------------------------------------------------------
// Domain agents and business rules
// ---------------------------------------------------------------------------

/// Locate the agent document for `domain` under the workspace repo.
pub fn resolve_domain_agent(repo_root: &Path, domain: &str) -> Result<PathBuf> {
    let names = [
        format!("{domain}-domain.agent.md"),
        format!("{domain}-domain.agent.txt"),
        format!("{domain}.md"),
        format!("{domain}.txt"),
    ];
    let dir = repo_root.join(paths::DOMAIN_AGENTS_DIR);
    if let Some(found) = names.iter().map(|n| dir.join(n)).find(|p| p.is_file()) {
        return Ok(found);
    }
    let candidates = names
        .iter()
        .map(|n| format!("{}/{n}", paths::DOMAIN_AGENTS_DIR))
        .collect::<Vec<_>>()
        .join(", ");
    Err(StoryworkError::MissingDomainAgent {
        domain: domain.to_string(),
        candidates,
    })
}

/// Repo-relative business rules directory named by an agent's
/// `**Business Rules:** <dir>` line. Backticks and a leading `durion/` are dropped.
pub fn business_rules_dir(agent_text: &str) -> Option<PathBuf> {
    let caps = business_rules_re().captures(agent_text)?;
    let raw = caps[1].trim().trim_matches('`');
    let raw = raw.strip_prefix("durion/").unwrap_or(raw);
    (!raw.is_empty()).then(|| PathBuf::from(raw))
}

/// Every file in the agent's business rules directory, sorted. An agent
/// without a `**Business Rules:**` line has none.
pub fn business_rule_files(repo_root: &Path, agent_text: &str) -> Result<Vec<PathBuf>> {
    let Some(rel) = business_rules_dir(agent_text) else {
        return Ok(Vec::new());
    };
    let dir = repo_root.join(rel);
    if !dir.is_dir() {
        return Err(StoryworkError::BusinessRulesMissing(dir));
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(StoryworkError::BusinessRulesEmpty(dir));
    }
    Ok(files)
}
