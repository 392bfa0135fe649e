use crate::error::{Result, StoryworkError};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Story tree layout (relative to the batch root)
// ---------------------------------------------------------------------------

pub const FRONTEND_DIR: &str = "frontend";
pub const BACKEND_DIR: &str = "backend";

pub const BEFORE_MD: &str = "before.md";
pub const AFTER_MD: &str = "after.md";
pub const BACKEND_MD: &str = "backend.md";

pub const LOCK_FILE: &str = ".lock";
pub const CONFIG_FILE: &str = ".storywork.yaml";
pub const DRY_RUN_PROMPT_LOG: &str = ".story_update_dry_run_prompts.log";

// ---------------------------------------------------------------------------
// Workspace repo layout (prompts, agents, business rules)
// ---------------------------------------------------------------------------

pub const FRONTEND_REWRITE_PROMPT: &str = ".github/prompts/story-frontend-rewrite.prompt.md";
pub const DOMAIN_AGENTS_DIR: &str = ".github/agents/domains";
pub const SAFE_DEFAULTS: &str = "agents/assumptions/safe-defaults.md";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn frontend_dir(root: &Path) -> PathBuf {
    root.join(FRONTEND_DIR)
}

pub fn backend_dir(root: &Path) -> PathBuf {
    root.join(BACKEND_DIR)
}

pub fn item_dir(root: &Path, key: &str) -> PathBuf {
    root.join(key)
}

pub fn before_path(root: &Path, key: &str) -> PathBuf {
    item_dir(root, key).join(BEFORE_MD)
}

pub fn after_path(root: &Path, key: &str) -> PathBuf {
    item_dir(root, key).join(AFTER_MD)
}

pub fn dry_run_prompt_log(root: &Path) -> PathBuf {
    root.join(DRY_RUN_PROMPT_LOG)
}

/// Root-relative, forward-slash form of `path` for plan entries.
pub fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// Work item keys
// ---------------------------------------------------------------------------

/// Which side of the story tree a work item lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Frontend,
    Backend,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Frontend => FRONTEND_DIR,
            Category::Backend => BACKEND_DIR,
        }
    }
}

/// Build the canonical key for an issue, e.g. `frontend/123`.
pub fn issue_key(category: Category, number: u64) -> String {
    format!("{}/{number}", category.as_str())
}

/// Split `frontend/123` into its category and issue number.
pub fn parse_issue_key(key: &str) -> Result<(Category, u64)> {
    let invalid = || StoryworkError::InvalidKey(key.to_string());
    let (prefix, rest) = key.split_once('/').ok_or_else(invalid)?;
    let category = match prefix {
        FRONTEND_DIR => Category::Frontend,
        BACKEND_DIR => Category::Backend,
        _ => return Err(invalid()),
    };
    let number = rest.parse::<u64>().map_err(|_| invalid())?;
    Ok((category, number))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/stories");
        assert_eq!(lock_path(root), PathBuf::from("/tmp/stories/.lock"));
        assert_eq!(
            after_path(root, "frontend/12"),
            PathBuf::from("/tmp/stories/frontend/12/after.md")
        );
    }

    #[test]
    fn relative_key_uses_forward_slashes() {
        let root = Path::new("/tmp/stories");
        let p = root.join("frontend").join("12").join("after.md");
        assert_eq!(relative_key(root, &p), "frontend/12/after.md");
    }

    #[test]
    fn issue_keys_roundtrip() {
        let key = issue_key(Category::Backend, 45);
        assert_eq!(key, "backend/45");
        assert_eq!(parse_issue_key(&key).unwrap(), (Category::Backend, 45));
    }

    #[test]
    fn malformed_issue_keys() {
        for key in ["45", "frontend/", "frontend/abc", "docs/1"] {
            assert!(parse_issue_key(key).is_err(), "expected invalid: {key}");
        }
    }
}
