use crate::corpus::{self, BackendMatch};
use crate::error::{Result, StoryworkError};
use crate::paths;
use std::path::{Path, PathBuf};

const FINAL_INSTRUCTION: &str = "Review and update the issue: produce an implementation-ready \
rewrite (after.md) following the Story Authoring Agent rules and any appended domain-specific \
guidance and business rules. Preserve the original before.md content in the Original Story \
(Unmodified – For Traceability) section at the end. Ensure output contains required section headers.";

/// Prompt inputs that live in the workspace repo rather than the story tree.
#[derive(Debug, Clone)]
pub struct PromptSources {
    pub repo_root: PathBuf,
    pub agent_file: Option<PathBuf>,
    pub frontend_prompt: PathBuf,
    pub safe_defaults: PathBuf,
}

impl PromptSources {
    pub fn for_repo(repo_root: &Path, agent_file: Option<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            agent_file,
            frontend_prompt: repo_root.join(paths::FRONTEND_REWRITE_PROMPT),
            safe_defaults: repo_root.join(paths::SAFE_DEFAULTS),
        }
    }

    /// Fail fast when a mandatory include is missing. Run before any plan change.
    pub fn check(&self) -> Result<()> {
        let required = self
            .agent_file
            .iter()
            .chain([&self.frontend_prompt, &self.safe_defaults]);
        for path in required {
            if !path.is_file() {
                return Err(StoryworkError::MissingInput(path.clone()));
            }
        }
        Ok(())
    }
}

/// Per-item context gathered before the transform.
#[derive(Debug, Clone, Copy)]
pub struct StoryContext<'a> {
    pub synopsis: &'a str,
    pub matches: &'a [BackendMatch],
    pub matched_value: &'a str,
    pub location: &'a str,
}

/// Assemble the rewrite prompt. Parts are joined by blank lines in this
/// order: authoring agent, frontend rewrite prompt, domain agents with their
/// business rules, synopsis, backend matches, matched value, final
/// instruction, safe defaults.
///
/// A domain label without an agent document, or an agent naming a missing
/// or empty rules directory, is an error for this item.
pub fn build_prompt(sources: &PromptSources, ctx: &StoryContext<'_>) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();

    if let Some(agent) = &sources.agent_file {
        parts.push(read_required(agent)?);
    }
    parts.push(read_required(&sources.frontend_prompt)?);

    for domain in corpus::domains(ctx.matches) {
        let agent_path = corpus::resolve_domain_agent(&sources.repo_root, &domain)?;
        let agent_text = std::fs::read_to_string(&agent_path)?;
        let rule_files = corpus::business_rule_files(&sources.repo_root, &agent_text)?;
        parts.push(agent_text);
        for file in rule_files {
            parts.push(format!(
                "--- Business Rules: {} ---\n",
                paths::relative_key(&sources.repo_root, &file)
            ));
            parts.push(std::fs::read_to_string(&file)?);
        }
    }

    parts.push("Story Synopsis:\n".to_string());
    parts.push(ctx.synopsis.to_string());

    if ctx.matches.is_empty() {
        parts.push("No backend matches found.\n".to_string());
    } else {
        parts.push("Backend matches:\n".to_string());
        for m in ctx.matches {
            parts.push(format!(
                "- Path: {}\n  Excerpt:\n{}\n  Labels: {}\n",
                m.path,
                m.excerpt,
                m.labels.join(", ")
            ));
        }
    }

    parts.push(format!(
        "Matched value: {}\nLocation: {}\n",
        ctx.matched_value, ctx.location
    ));
    parts.push(FINAL_INSTRUCTION.to_string());

    parts.push(format!(
        "--- Assumptions / Safe Defaults: {} ---\n",
        paths::SAFE_DEFAULTS
    ));
    parts.push(read_required(&sources.safe_defaults)?);

    Ok(parts.join("\n\n"))
}

fn read_required(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StoryworkError::MissingInput(path.to_path_buf()),
        _ => e.into(),
    })
}
