use crate::batch::scan_frontend;
use crate::corpus::{self, BackendMatch};
use crate::engine::{Backoff, ItemFailure, Outcome, Processor, Stage, TextTransform};
use crate::error::Result;
use crate::io::atomic_write;
use crate::paths;
use crate::prompt::{build_prompt, PromptSources, StoryContext};
use crate::story::{self, StoryPattern};
use crate::validate::check_markers;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Frontend stories with a `before.md`. Stories that already have an
/// `after.md` are left out unless `reprocess` is set.
pub fn scan_candidates(root: &Path, reprocess: bool) -> Result<Vec<String>> {
    let mut keys = scan_frontend(root, paths::BEFORE_MD)?;
    if !reprocess {
        keys.retain(|k| !paths::after_path(root, k).is_file());
    }
    Ok(keys)
}

#[derive(Debug, Clone)]
pub struct RewriteOptions {
    pub pattern: StoryPattern,
    pub sources: PromptSources,
    pub max_backend_matches: usize,
    pub required_markers: Vec<String>,
    /// Build prompts only. The transform is never called and nothing is written.
    pub dry_run: bool,
}

/// Turns `frontend/<n>/before.md` into a validated `after.md`.
pub struct RewriteProcessor<T> {
    root: PathBuf,
    transform: T,
    backoff: Backoff,
    options: RewriteOptions,
}

impl<T: TextTransform> RewriteProcessor<T> {
    pub fn new(root: impl Into<PathBuf>, transform: T, backoff: Backoff, options: RewriteOptions) -> Self {
        Self {
            root: root.into(),
            transform,
            backoff,
            options,
        }
    }

    async fn run(&self, key: &str) -> std::result::Result<Outcome, ItemFailure> {
        // resolve
        let before = paths::before_path(&self.root, key);
        let before_rel = paths::relative_key(&self.root, &before);
        let text = match std::fs::read_to_string(&before) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ItemFailure::new(Stage::Resolve, format!("missing {before_rel}")));
            }
            Err(e) => return Err(ItemFailure::new(Stage::Resolve, format!("{before_rel}: {e}"))),
        };

        // extract
        let Some(found) = self.options.pattern.find(&text) else {
            return Ok(Outcome::skipped(format!("no story marker in {before_rel}")));
        };
        let matched_line = found.line();
        let location = format!(
            "{before_rel}:L{} (match@{})",
            found.line_number(&text),
            found.start
        );

        // context
        let (matched_value, matches) = self.backend_context(matched_line);
        debug!(key, matches = matches.len(), value = %matched_value, "backend context");
        let synopsis = story::synopsis(&text);
        let ctx = StoryContext {
            synopsis: &synopsis,
            matches: &matches,
            matched_value: &matched_value,
            location: &location,
        };
        let prompt = build_prompt(&self.options.sources, &ctx)
            .map_err(|e| ItemFailure::from_error(Stage::Context, e))?;
        if self.options.dry_run {
            return Ok(Outcome::Previewed { detail: prompt });
        }

        // transform
        let output = self
            .backoff
            .execute(|| self.transform.transform(&prompt))
            .await
            .map_err(|f| ItemFailure::from_call(Stage::Transform, f))?;

        // validate
        let report = check_markers(&output, &self.options.required_markers);
        if !report.is_ok() {
            return Err(ItemFailure::new(
                Stage::Validate,
                format!("rewrite output rejected, {report}"),
            )
            .with_output(output));
        }

        // persist
        let after = paths::after_path(&self.root, key);
        atomic_write(&after, output.as_bytes())
            .map_err(|e| ItemFailure::from_error(Stage::Persist, e))?;
        Ok(Outcome::Completed {
            location: paths::relative_key(&self.root, &after),
        })
    }

    /// First search key that finds anything in the backend corpus wins.
    /// With no hits the most specific key is reported as the matched value.
    fn backend_context(&self, matched_line: &str) -> (String, Vec<BackendMatch>) {
        let keys = story::derive_search_keys(matched_line);
        for key in &keys {
            let matches = corpus::search_backend(&self.root, key, self.options.max_backend_matches);
            if !matches.is_empty() {
                return (key.clone(), matches);
            }
        }
        let value = keys.into_iter().next().unwrap_or_else(|| matched_line.to_string());
        (value, Vec::new())
    }
}

impl<T: TextTransform> Processor for RewriteProcessor<T> {
    async fn process(&self, key: &str) -> Outcome {
        self.run(key).await.unwrap_or_else(Outcome::Failed)
    }
}
