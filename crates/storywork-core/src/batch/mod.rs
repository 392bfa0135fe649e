//! The three batch flows, each a [`Processor`](crate::engine::Processor) plus
//! the scan that seeds its plan.
//!
//! | flow    | plan file              | reads                  | writes                     |
//! |---------|------------------------|------------------------|----------------------------|
//! | extract | `.extract_plan.json`   | GitHub issues          | `before.md`, `backend.md`  |
//! | rewrite | `.rewrite_plan.json`   | `before.md`, corpus    | `after.md`                 |
//! | publish | `.publish_plan.json`   | `after.md`             | GitHub issue body + labels |

pub mod extract;
pub mod publish;
pub mod rewrite;

pub use extract::{scan_issues, ExtractProcessor};
pub use publish::{plan_label_changes, scan_publishable, LabelChanges, PublishOptions, PublishProcessor};
pub use rewrite::{scan_candidates, RewriteOptions, RewriteProcessor};

use crate::error::Result;
use crate::paths;
use std::path::Path;

/// `frontend/<n>` keys whose directory holds `file`, in issue-number order.
pub fn scan_frontend(root: &Path, file: &str) -> Result<Vec<String>> {
    let dir = paths::frontend_dir(root);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut numbers: Vec<u64> = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Some(number) = entry.file_name().to_str().and_then(|n| n.parse().ok()) else {
            continue;
        };
        if entry.path().join(file).is_file() {
            numbers.push(number);
        }
    }
    numbers.sort_unstable();
    Ok(numbers
        .into_iter()
        .map(|n| paths::issue_key(paths::Category::Frontend, n))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn scan_orders_numerically_and_needs_the_file() {
        let dir = TempDir::new().unwrap();
        for n in ["10", "9", "100", "notes"] {
            let d = dir.path().join("frontend").join(n);
            std::fs::create_dir_all(&d).unwrap();
            std::fs::write(d.join("before.md"), "x").unwrap();
        }
        std::fs::create_dir_all(dir.path().join("frontend/11")).unwrap();

        let keys = scan_frontend(dir.path(), paths::BEFORE_MD).unwrap();
        assert_eq!(keys, vec!["frontend/9", "frontend/10", "frontend/100"]);
        assert!(scan_frontend(dir.path(), paths::AFTER_MD).unwrap().is_empty());
    }

    #[test]
    fn missing_frontend_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(scan_frontend(dir.path(), paths::BEFORE_MD).unwrap().is_empty());
    }
}
