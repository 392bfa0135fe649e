use crate::batch::scan_frontend;
use crate::engine::{ItemFailure, Outcome, Processor, Stage};
use crate::error::{Result, StoryworkError};
use crate::github::IssueSink;
use crate::paths;
use crate::validate::{check_publishable, publish_body, ProposedLabels};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

const DOMAIN_CONFLICT: &str = "blocked:domain-conflict";

/// Frontend stories with an `after.md`.
pub fn scan_publishable(root: &Path) -> Result<Vec<String>> {
    scan_frontend(root, paths::AFTER_MD)
}

// ---------------------------------------------------------------------------
// Label reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelChanges {
    pub remove: Vec<String>,
    pub add: Vec<String>,
}

/// Diff the issue's `current` labels against the `desired` set.
///
/// A desired `status:*` label replaces every other `status:*` label. The
/// same holds for `domain:*`, except while `blocked:domain-conflict` is on
/// the issue or in the desired set.
pub fn plan_label_changes(current: &[String], desired: &[String]) -> LabelChanges {
    let wants_prefix = |prefix: &str| desired.iter().any(|l| l.starts_with(prefix));
    let replace_status = wants_prefix("status:");
    let domain_conflict = current
        .iter()
        .chain(desired)
        .any(|l| l == DOMAIN_CONFLICT);
    let replace_domain = wants_prefix("domain:") && !domain_conflict;

    let remove = current
        .iter()
        .filter(|l| !desired.contains(l))
        .filter(|l| {
            (replace_status && l.starts_with("status:"))
                || (replace_domain && l.starts_with("domain:"))
        })
        .cloned()
        .collect();
    let add = desired
        .iter()
        .filter(|l| !current.contains(l))
        .cloned()
        .collect();
    LabelChanges { remove, add }
}

// ---------------------------------------------------------------------------
// PublishProcessor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub repo: String,
    pub include_recommended: bool,
    pub fail_on_blocking: bool,
    pub dry_run: bool,
}

/// Pushes a validated `after.md` to its GitHub issue: body first, then labels.
pub struct PublishProcessor<K> {
    root: PathBuf,
    sink: K,
    options: PublishOptions,
}

impl<K: IssueSink> PublishProcessor<K> {
    pub fn new(root: impl Into<PathBuf>, sink: K, options: PublishOptions) -> Self {
        Self {
            root: root.into(),
            sink,
            options,
        }
    }

    async fn run(&self, key: &str) -> std::result::Result<Outcome, ItemFailure> {
        let (_, number) =
            paths::parse_issue_key(key).map_err(|e| ItemFailure::from_error(Stage::Resolve, e))?;
        let after = paths::after_path(&self.root, key);
        let text = std::fs::read_to_string(&after).map_err(|e| {
            ItemFailure::new(
                Stage::Resolve,
                format!("{}: {e}", paths::relative_key(&self.root, &after)),
            )
        })?;

        let report = check_publishable(&text);
        if !report.is_ok() {
            return Err(ItemFailure::new(Stage::Validate, format!("not publishable, {report}")));
        }
        let labels = ProposedLabels::parse(&text);
        if self.options.fail_on_blocking && !labels.blocking.is_empty() {
            return Err(ItemFailure::new(
                Stage::Validate,
                format!("blocking labels present: {}", labels.blocking.join(", ")),
            ));
        }
        let body = publish_body(&text);
        if body.is_empty() {
            return Err(ItemFailure::new(
                Stage::Validate,
                "nothing follows the labels section",
            ));
        }
        let desired = labels.to_apply(self.options.include_recommended);

        let repo = &self.options.repo;
        if self.options.dry_run {
            return Ok(Outcome::Previewed {
                detail: format!(
                    "would update {repo}#{number}: body {} chars, labels [{}]",
                    body.chars().count(),
                    desired.join(", ")
                ),
            });
        }

        let persist = |e: StoryworkError| ItemFailure::from_error(Stage::Persist, e);
        self.sink
            .update_body(repo, number, &body)
            .await
            .map_err(persist)?;
        let current = self.sink.labels(repo, number).await.map_err(persist)?;
        let changes = plan_label_changes(&current, &desired);
        debug!(key, remove = ?changes.remove, add = ?changes.add, "label changes");
        for label in &changes.remove {
            self.sink
                .remove_label(repo, number, label)
                .await
                .map_err(persist)?;
        }
        for label in &changes.add {
            self.sink
                .add_label(repo, number, label)
                .await
                .map_err(persist)?;
        }
        Ok(Outcome::Completed {
            location: format!("{repo}#{number}"),
        })
    }
}

impl<K: IssueSink> Processor for PublishProcessor<K> {
    async fn process(&self, key: &str) -> Outcome {
        self.run(key).await.unwrap_or_else(Outcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const AFTER: &str = "\
**Rewrite Variant:** frontend-crud

## 🏷️ Labels (Proposed)
### Required
- status:ready-for-dev
- domain:billing

### Recommended
- agent:frontend

### Blocking / Risk
- none

# 1. Story Header
Invoices list

## 2. Story Intent
## 3. Actors & Stakeholders
## 4. Functional Behavior
## 5. Business Rules
## 6. Data Requirements
## 7. Acceptance Criteria
## 8. Audit & Observability
## Original Story (Unmodified – For Traceability)
old text
";

    #[derive(Default)]
    struct Recorder {
        current: Vec<String>,
        calls: Mutex<Vec<String>>,
        fail_body: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl IssueSink for Recorder {
        async fn update_body(&self, repo: &str, number: u64, body: &str) -> Result<()> {
            if self.fail_body {
                return Err(StoryworkError::Config("boom".into()));
            }
            let first = body.lines().next().unwrap_or_default();
            self.calls
                .lock()
                .unwrap()
                .push(format!("body {repo}#{number} {first}"));
            Ok(())
        }

        async fn labels(&self, _repo: &str, _number: u64) -> Result<Vec<String>> {
            Ok(self.current.clone())
        }

        async fn add_label(&self, _repo: &str, _number: u64, label: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("add {label}"));
            Ok(())
        }

        async fn remove_label(&self, _repo: &str, _number: u64, label: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("remove {label}"));
            Ok(())
        }
    }

    fn options() -> PublishOptions {
        PublishOptions {
            repo: "web".into(),
            include_recommended: false,
            fail_on_blocking: false,
            dry_run: false,
        }
    }

    fn story_root(text: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        let d = dir.path().join("frontend/12");
        std::fs::create_dir_all(&d).unwrap();
        std::fs::write(d.join("after.md"), text).unwrap();
        dir
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn status_and_domain_labels_are_replaced() {
        let changes = plan_label_changes(
            &strings(&["status:draft", "domain:crm", "type:story"]),
            &strings(&["status:ready-for-dev", "domain:billing"]),
        );
        assert_eq!(changes.remove, strings(&["status:draft", "domain:crm"]));
        assert_eq!(changes.add, strings(&["status:ready-for-dev", "domain:billing"]));
    }

    #[test]
    fn domain_conflict_keeps_existing_domains() {
        let changes = plan_label_changes(
            &strings(&["domain:crm", "blocked:domain-conflict"]),
            &strings(&["domain:billing"]),
        );
        assert!(changes.remove.is_empty());
        assert_eq!(changes.add, strings(&["domain:billing"]));

        let unchanged = plan_label_changes(&strings(&["status:draft"]), &strings(&["type:story"]));
        assert!(unchanged.remove.is_empty());
    }

    #[tokio::test]
    async fn publishes_body_then_labels() {
        let dir = story_root(AFTER);
        let sink = Recorder {
            current: strings(&["status:draft", "domain:billing"]),
            ..Default::default()
        };
        let p = PublishProcessor::new(dir.path(), sink, options());
        assert_eq!(
            p.process("frontend/12").await,
            Outcome::Completed {
                location: "web#12".into()
            }
        );
        assert_eq!(
            p.sink.calls(),
            strings(&[
                "body web#12 # 1. Story Header",
                "remove status:draft",
                "add status:ready-for-dev",
            ])
        );
    }

    #[tokio::test]
    async fn recommended_labels_need_the_flag() {
        let dir = story_root(AFTER);
        let p = PublishProcessor::new(
            dir.path(),
            Recorder::default(),
            PublishOptions {
                include_recommended: true,
                ..options()
            },
        );
        p.process("frontend/12").await;
        assert!(p.sink.calls().contains(&"add agent:frontend".to_string()));
    }

    #[tokio::test]
    async fn blocking_labels_can_fail_the_item() {
        let text = AFTER.replace("### Blocking / Risk\n- none", "### Blocking / Risk\n- blocked:clarification");
        let dir = story_root(&text);
        let p = PublishProcessor::new(
            dir.path(),
            Recorder::default(),
            PublishOptions {
                fail_on_blocking: true,
                ..options()
            },
        );
        match p.process("frontend/12").await {
            Outcome::Failed(f) => {
                assert_eq!(f.stage, Stage::Validate);
                assert!(f.message.contains("blocked:clarification"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(p.sink.calls().is_empty());
    }

    #[tokio::test]
    async fn incomplete_story_is_not_published() {
        let dir = story_root(&AFTER.replace("## 6. Data Requirements\n", ""));
        let p = PublishProcessor::new(dir.path(), Recorder::default(), options());
        match p.process("frontend/12").await {
            Outcome::Failed(f) => assert!(f.message.contains("Data Requirements")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(p.sink.calls().is_empty());
    }

    #[tokio::test]
    async fn dry_run_and_sink_errors() {
        let dir = story_root(AFTER);
        let preview = PublishProcessor::new(
            dir.path(),
            Recorder::default(),
            PublishOptions {
                dry_run: true,
                ..options()
            },
        );
        assert!(matches!(
            preview.process("frontend/12").await,
            Outcome::Previewed { .. }
        ));
        assert!(preview.sink.calls().is_empty());

        let broken = PublishProcessor::new(
            dir.path(),
            Recorder {
                fail_body: true,
                ..Default::default()
            },
            options(),
        );
        match broken.process("frontend/12").await {
            Outcome::Failed(f) => assert_eq!(f.stage, Stage::Persist),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn scan_lists_stories_with_after_md() {
        let dir = story_root(AFTER);
        std::fs::create_dir_all(dir.path().join("frontend/13")).unwrap();
        assert_eq!(scan_publishable(dir.path()).unwrap(), vec!["frontend/12"]);
    }
}
