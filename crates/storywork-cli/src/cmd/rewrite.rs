use super::{dispatch, finish, with_shutdown, BatchFlags, Global, Shutdown};
use crate::exit::BatchExit;
use anyhow::Context;
use chrono::Utc;
use clap::Args;
use llm_client::{LlmClient, LlmConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storywork_core::batch::{scan_candidates, RewriteOptions, RewriteProcessor};
use storywork_core::config::EngineConfig;
use storywork_core::engine::{Attempt, Backoff, Outcome, TextTransform};
use storywork_core::io::append_text;
use storywork_core::paths;
use storywork_core::plan::{PlanKind, PlanSettings};
use storywork_core::prompt::PromptSources;
use storywork_core::selector;
use storywork_core::story::{StoryPattern, DEFAULT_PATTERN};
use tracing::{info, warn};

const PREVIEW_COUNT: usize = 3;
const PREVIEW_CHARS: usize = 2000;
/// Slack on top of the HTTP timeout before the retry loop gives up on an attempt.
const CALL_MARGIN: Duration = Duration::from_secs(30);

#[derive(Args, Debug)]
pub struct RewriteArgs {
    /// Story marker regex; an r"..." wrapper is accepted
    #[arg(long, default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// Authoring agent document placed first in every prompt (relative to --repo)
    #[arg(long)]
    pub agent_file: Option<PathBuf>,

    /// Append dry-run prompts here instead of <root>/.story_update_dry_run_prompts.log
    #[arg(long)]
    pub dry_run_prompt_log: Option<PathBuf>,

    /// Include stories that already have an after.md
    #[arg(long)]
    pub reprocess: bool,

    /// Story to process, e.g. 123 or frontend/123 (repeatable)
    #[arg(long = "story")]
    pub story: Vec<String>,

    /// Comma or space separated stories, e.g. "101,102 frontend/103"
    #[arg(long)]
    pub stories: Option<String>,

    /// Inclusive story number range, e.g. 200-250 or 200..250
    #[arg(long)]
    pub range: Option<String>,

    /// Requeue selected stories that previously failed
    #[arg(long)]
    pub retry_failed: bool,

    /// Minimum seconds between LLM calls across all workers (0 disables)
    #[arg(long)]
    pub pause_seconds: Option<f64>,

    #[command(flatten)]
    pub batch: BatchFlags,
}

/// Dry runs stop before the transform, so no provider is needed.
struct NoProvider;

impl TextTransform for NoProvider {
    async fn transform(&self, _prompt: &str) -> Attempt<String> {
        Attempt::Fatal("no LLM provider configured for a dry run".into())
    }
}

pub fn run(global: &Global, args: RewriteArgs) -> anyhow::Result<()> {
    let root = &global.root;
    let mut config = args.batch.engine_config(root)?;
    if let Some(pause) = args.pause_seconds {
        config.pause_seconds = pause;
        config.validate()?;
    }
    let pattern = StoryPattern::new(&args.pattern)?;
    let agent_file = args.agent_file.as_ref().map(|p| global.repo.join(p));
    let sources = PromptSources::for_repo(&global.repo, agent_file);
    sources.check()?;
    let selection = selector::expand(
        root,
        &args.story,
        args.stories.as_deref(),
        args.range.as_deref(),
    )?;

    let options = RewriteOptions {
        pattern,
        sources,
        max_backend_matches: config.max_backend_matches,
        required_markers: config.required_markers.clone(),
        dry_run: args.batch.dry_run,
    };
    let args = &args;
    let rt = super::runtime()?;

    if args.batch.dry_run {
        let backoff = Backoff::new(config.retry.clone(), CALL_MARGIN);
        let processor = RewriteProcessor::new(root, NoProvider, backoff, options);
        return rt.block_on(with_shutdown(|shutdown| async move {
            execute(global, args, &config, selection, processor, &shutdown).await
        }));
    }

    let client = LlmClient::new(LlmConfig::from_env()?)?;
    rt.block_on(with_shutdown(|shutdown| async move {
        let _lock = args.batch.lock(root)?;
        info!(
            provider = client.config().provider.name(),
            model = client.config().provider.model(),
            "checking LLM provider"
        );
        shutdown
            .guard(async {
                client
                    .preflight()
                    .await
                    .map_err(|e| anyhow::Error::from(BatchExit::Preflight(e)))
            })
            .await?;

        let backoff = Backoff::new(config.retry.clone(), client.config().timeout + CALL_MARGIN)
            .with_limiter(Arc::new(config.rate_limiter()));
        let processor = RewriteProcessor::new(root, client, backoff, options);
        execute(global, args, &config, selection, processor, &shutdown).await
    }))
}

async fn execute<T: TextTransform>(
    global: &Global,
    args: &RewriteArgs,
    config: &EngineConfig,
    selection: Option<Vec<String>>,
    processor: RewriteProcessor<T>,
    shutdown: &Shutdown,
) -> anyhow::Result<()> {
    let root = &global.root;
    let dry_run = args.batch.dry_run;
    let store = args.batch.store(root, PlanKind::Rewrite);
    let settings = PlanSettings {
        pattern: Some(args.pattern.clone()),
        agent_file: args.agent_file.as_ref().map(|p| p.display().to_string()),
        ..Default::default()
    };
    let reprocess = args.reprocess;
    let scan = store.load_or_create(settings, args.batch.force_refresh_plan, || async move {
        scan_candidates(root, reprocess)
    });
    let (mut plan, origin) = shutdown
        .guard(async { scan.await.context("failed to prepare the rewrite plan") })
        .await?;
    info!(?origin, pending = plan.state.pending.len(), "rewrite plan ready");

    if let Some(selected) = &selection {
        let mut changed = 0;
        if args.retry_failed {
            changed += plan.requeue_failed(selected);
        }
        if args.reprocess {
            changed += plan.requeue_completed(selected);
        }
        changed += plan.merge_selection(selected, |key| paths::before_path(root, key).is_file());
        if changed > 0 {
            info!(changed, "selection updated the plan");
            store.save(&mut plan)?;
        }
    } else if args.retry_failed {
        warn!("--retry-failed only applies to stories picked with --story, --stories or --range");
    }
    let order = plan.dispatch_order(selection.as_deref());
    if order.is_empty() {
        info!("nothing to rewrite");
    }

    let log_path = args
        .dry_run_prompt_log
        .clone()
        .unwrap_or_else(|| paths::dry_run_prompt_log(root));
    let mut previews = 0;
    let report = dispatch(processor, config, &mut plan, &store, order, shutdown, |key, outcome| {
        if let Outcome::Previewed { detail } = outcome {
            if let Err(e) = append_prompt_log(&log_path, key, detail) {
                warn!(path = %log_path.display(), "cannot append prompt log: {e}");
            }
            if previews < PREVIEW_COUNT {
                previews += 1;
                let preview: String = detail.chars().take(PREVIEW_CHARS).collect();
                println!("--- prompt preview: {key} ---\n{preview}\n--- end preview ---");
            }
        }
    })
    .await?;
    if dry_run && report.previewed > 0 {
        info!(path = %log_path.display(), "prompts appended to log");
    }
    finish(PlanKind::Rewrite, &report, &plan, dry_run, global.verbose)
}

fn append_prompt_log(path: &Path, key: &str, prompt: &str) -> storywork_core::Result<()> {
    let rule = "=".repeat(100);
    let thin = "-".repeat(100);
    let newline = if prompt.ends_with('\n') { "" } else { "\n" };
    append_text(
        path,
        &format!(
            "\n{rule}\nitem: {key}\nprocessed_at: {}\n{thin}\n{prompt}{newline}",
            Utc::now().to_rfc3339()
        ),
    )
}
