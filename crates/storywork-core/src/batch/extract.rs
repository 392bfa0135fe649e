use crate::engine::{ItemFailure, Outcome, Processor, Stage};
use crate::error::Result;
use crate::github::{collect_open_issues, IssueSource};
use crate::io::atomic_write;
use crate::paths::{self, Category};
use crate::story::render_issue;
use std::path::PathBuf;
use tracing::info;

/// Plan keys for an extract run: every open frontend issue, and every open
/// backend issue not carrying `skip_label`.
pub async fn scan_issues<S: IssueSource>(
    source: &S,
    frontend_repo: &str,
    backend_repo: &str,
    skip_label: Option<&str>,
    per_page: u32,
) -> Result<Vec<String>> {
    let frontend = collect_open_issues(source, frontend_repo, per_page).await?;
    let backend = collect_open_issues(source, backend_repo, per_page).await?;
    let backend_keys: Vec<String> = backend
        .iter()
        .filter(|i| skip_label.map_or(true, |label| !i.has_label(label)))
        .map(|i| paths::issue_key(Category::Backend, i.number))
        .collect();
    info!(
        frontend = frontend.len(),
        backend = backend_keys.len(),
        backend_skipped = backend.len() - backend_keys.len(),
        "scanned open issues"
    );

    let mut keys: Vec<String> = frontend
        .iter()
        .map(|i| paths::issue_key(Category::Frontend, i.number))
        .collect();
    keys.extend(backend_keys);
    Ok(keys)
}

/// Fetches one issue and writes it into the story tree.
pub struct ExtractProcessor<S> {
    source: S,
    root: PathBuf,
    frontend_repo: String,
    backend_repo: String,
    readiness_labels: Vec<String>,
    dry_run: bool,
}

impl<S: IssueSource> ExtractProcessor<S> {
    pub fn new(
        source: S,
        root: impl Into<PathBuf>,
        frontend_repo: impl Into<String>,
        backend_repo: impl Into<String>,
    ) -> Self {
        Self {
            source,
            root: root.into(),
            frontend_repo: frontend_repo.into(),
            backend_repo: backend_repo.into(),
            readiness_labels: Vec::new(),
            dry_run: false,
        }
    }

    /// Backend issues need at least one of these labels. Empty accepts all.
    pub fn with_readiness_labels(mut self, labels: Vec<String>) -> Self {
        self.readiness_labels = labels;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    async fn run(&self, key: &str) -> std::result::Result<Outcome, ItemFailure> {
        let (category, number) =
            paths::parse_issue_key(key).map_err(|e| ItemFailure::from_error(Stage::Resolve, e))?;
        let (repo, target) = match category {
            Category::Frontend => (&self.frontend_repo, paths::before_path(&self.root, key)),
            Category::Backend => (
                &self.backend_repo,
                paths::item_dir(&self.root, key).join(paths::BACKEND_MD),
            ),
        };

        let issue = self
            .source
            .fetch_issue(repo, number)
            .await
            .map_err(|e| ItemFailure::from_error(Stage::Extract, e))?;

        if category == Category::Backend
            && !self.readiness_labels.is_empty()
            && !self.readiness_labels.iter().any(|l| issue.has_label(l))
        {
            return Ok(Outcome::skipped(format!(
                "backend issue #{number} has none of the readiness labels: {}",
                self.readiness_labels.join(", ")
            )));
        }

        let text = render_issue(
            &issue.title,
            &issue.html_url,
            &issue.label_names(),
            issue.body.as_deref().unwrap_or_default(),
        );
        let location = paths::relative_key(&self.root, &target);
        if self.dry_run {
            return Ok(Outcome::Previewed {
                detail: format!("would write {location} ({} bytes)", text.len()),
            });
        }
        atomic_write(&target, text.as_bytes())
            .map_err(|e| ItemFailure::from_error(Stage::Persist, e))?;
        Ok(Outcome::Completed { location })
    }
}

impl<S: IssueSource> Processor for ExtractProcessor<S> {
    async fn process(&self, key: &str) -> Outcome {
        self.run(key).await.unwrap_or_else(Outcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoryworkError;
    use crate::github::{Issue, Label};
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Tracker {
        issues: HashMap<(String, u64), Issue>,
    }

    impl Tracker {
        fn with(mut self, repo: &str, number: u64, labels: &[&str], pr: bool) -> Self {
            self.issues.insert(
                (repo.to_string(), number),
                Issue {
                    number,
                    title: format!("[STORY] Issue {number}"),
                    html_url: format!("https://github.com/acme/{repo}/issues/{number}"),
                    body: Some(format!("body of {number}")),
                    labels: labels.iter().map(|l| Label { name: l.to_string() }).collect(),
                    pull_request: pr.then(|| serde_json::json!({})),
                },
            );
            self
        }
    }

    impl IssueSource for Tracker {
        async fn list_open_page(&self, repo: &str, page: u32, _per_page: u32) -> Result<Vec<Issue>> {
            if page > 1 {
                return Ok(vec![]);
            }
            let mut found: Vec<Issue> = self
                .issues
                .iter()
                .filter(|((r, _), _)| r == repo)
                .map(|(_, i)| i.clone())
                .collect();
            found.sort_by_key(|i| i.number);
            Ok(found)
        }

        async fn fetch_issue(&self, repo: &str, number: u64) -> Result<Issue> {
            self.issues
                .get(&(repo.to_string(), number))
                .cloned()
                .ok_or_else(|| StoryworkError::Config(format!("no issue {repo}#{number}")))
        }
    }

    fn tracker() -> Tracker {
        Tracker::default()
            .with("web", 12, &["type:story"], false)
            .with("web", 13, &[], true)
            .with("api", 45, &["ready-for-frontend", "domain:billing"], false)
            .with("api", 46, &["status:draft"], false)
            .with("api", 47, &["frontend:skip"], false)
    }

    fn processor(dir: &TempDir) -> ExtractProcessor<Tracker> {
        ExtractProcessor::new(tracker(), dir.path(), "web", "api")
            .with_readiness_labels(vec!["ready-for-frontend".into()])
    }

    #[tokio::test]
    async fn scan_filters_pull_requests_and_skip_label() {
        let keys = scan_issues(&tracker(), "web", "api", Some("frontend:skip"), 100)
            .await
            .unwrap();
        assert_eq!(keys, vec!["frontend/12", "backend/45", "backend/46"]);
    }

    #[tokio::test]
    async fn frontend_issue_is_written_as_before_md() {
        let dir = TempDir::new().unwrap();
        let outcome = processor(&dir).process("frontend/12").await;
        assert_eq!(
            outcome,
            Outcome::Completed {
                location: "frontend/12/before.md".into()
            }
        );
        let text = std::fs::read_to_string(dir.path().join("frontend/12/before.md")).unwrap();
        assert!(text.starts_with("Title: [STORY] Issue 12\nURL: https://github.com/acme/web/issues/12\nLabels: type:story\n\n"));
        assert!(text.ends_with("body of 12"));
    }

    #[tokio::test]
    async fn backend_readiness_gate() {
        let dir = TempDir::new().unwrap();
        let p = processor(&dir);
        assert_eq!(
            p.process("backend/45").await,
            Outcome::Completed {
                location: "backend/45/backend.md".into()
            }
        );
        let skipped = p.process("backend/46").await;
        assert!(matches!(skipped, Outcome::Skipped { ref reason } if reason.contains("ready-for-frontend")));
        assert!(!dir.path().join("backend/46").exists());
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let outcome = processor(&dir).dry_run(true).process("frontend/12").await;
        assert!(matches!(outcome, Outcome::Previewed { .. }));
        assert!(!dir.path().join("frontend").exists());
    }

    #[tokio::test]
    async fn failures_carry_their_stage() {
        let dir = TempDir::new().unwrap();
        let p = processor(&dir);
        match p.process("frontend/99").await {
            Outcome::Failed(f) => {
                assert_eq!(f.stage, Stage::Extract);
                assert!(!f.transport);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        match p.process("sideways/1").await {
            Outcome::Failed(f) => assert_eq!(f.stage, Stage::Resolve),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
