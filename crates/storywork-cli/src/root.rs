use std::path::{Path, PathBuf};
use storywork_core::paths;
use storywork_core::plan::PlanKind;

/// Resolve the story tree root.
///
/// Priority:
/// 1. `--root` flag / `STORYWORK_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for a plan file or `.storywork.yaml`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_marked(&cwd).unwrap_or(cwd)
}

/// Resolve the workspace repo holding prompts, agents and business rules:
/// `--repo` / `STORYWORK_REPO`, else `cwd`.
pub fn resolve_repo(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn find_marked(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| is_story_root(dir))
        .map(Path::to_path_buf)
}

fn is_story_root(dir: &Path) -> bool {
    paths::config_path(dir).is_file()
        || PlanKind::all()
            .iter()
            .any(|k| dir.join(k.file_name()).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        let result = resolve_root(Some(dir.path()));
        assert_eq!(result, dir.path());
    }

    #[test]
    fn plan_file_marks_the_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".rewrite_plan.json"), "{}").unwrap();
        let deep = dir.path().join("frontend/12");
        std::fs::create_dir_all(&deep).unwrap();
        assert_eq!(find_marked(&deep), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn config_file_marks_the_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".storywork.yaml"), "concurrency: 2\n").unwrap();
        assert_eq!(find_marked(dir.path()), Some(dir.path().to_path_buf()));
    }
}
