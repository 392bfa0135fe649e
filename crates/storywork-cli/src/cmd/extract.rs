use super::{dispatch, finish, with_shutdown, BatchFlags, Global};
use anyhow::Context;
use clap::Args;
use std::time::Duration;
use storywork_core::batch::{scan_issues, ExtractProcessor};
use storywork_core::engine::{Backoff, Outcome};
use storywork_core::github::{GitHubClient, GITHUB_TIMEOUT};
use storywork_core::plan::{PlanKind, PlanSettings};
use tracing::info;

/// Dry runs preview this many items, then stop.
const DRY_RUN_LIMIT: usize = 5;

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// GitHub user or organization owning both repositories
    #[arg(long)]
    pub owner: String,

    /// Repository holding the frontend stories
    #[arg(long)]
    pub frontend_repo: String,

    /// Repository holding the backend stories
    #[arg(long)]
    pub backend_repo: String,

    /// Backend issues need one of these labels to be extracted (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "status:ready-for-dev,status:needs-review"
    )]
    pub readiness_labels: Vec<String>,

    /// Backend issues with this label are left out of the plan
    #[arg(long, default_value = "status:draft")]
    pub skip_label: String,

    /// Issues requested per page when listing (1-100)
    #[arg(long, default_value_t = 100)]
    pub per_page: u32,

    #[command(flatten)]
    pub batch: BatchFlags,
}

pub fn run(global: &Global, args: ExtractArgs) -> anyhow::Result<()> {
    let root = &global.root;
    let config = args.batch.engine_config(root)?;
    let readiness: Vec<String> = args
        .readiness_labels
        .iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    let skip_label = Some(args.skip_label.trim()).filter(|l| !l.is_empty());

    // Retries and the breaker cover GitHub too, without the LLM pause.
    let backoff = Backoff::new(config.retry.clone(), GITHUB_TIMEOUT + Duration::from_secs(5));
    let github = GitHubClient::from_env(&args.owner, backoff)?;

    let store = args.batch.store(root, PlanKind::Extract);
    let settings = PlanSettings {
        owner: Some(args.owner.clone()),
        frontend_repo: Some(args.frontend_repo.clone()),
        backend_repo: Some(args.backend_repo.clone()),
        readiness_labels: readiness.clone(),
        skip_label: skip_label.map(str::to_string),
        ..Default::default()
    };

    let args = &args;
    let rt = super::runtime()?;
    rt.block_on(with_shutdown(|shutdown| async move {
        let _lock = args.batch.lock(root)?;
        let scan = store.load_or_create(settings, args.batch.force_refresh_plan, || {
            scan_issues(
                &github,
                &args.frontend_repo,
                &args.backend_repo,
                skip_label,
                args.per_page,
            )
        });
        let (mut plan, origin) = shutdown
            .guard(async { scan.await.context("failed to prepare the extract plan") })
            .await?;
        info!(?origin, pending = plan.state.pending.len(), "extract plan ready");

        let mut order = plan.dispatch_order(None);
        if args.batch.dry_run {
            order.truncate(DRY_RUN_LIMIT);
        }
        let processor = ExtractProcessor::new(github, root, &args.frontend_repo, &args.backend_repo)
            .with_readiness_labels(readiness)
            .dry_run(args.batch.dry_run);
        let report = dispatch(
            processor,
            &config,
            &mut plan,
            &store,
            order,
            &shutdown,
            |key, outcome| {
                if let Outcome::Previewed { detail } = outcome {
                    println!("[dry-run] {key}: {detail}");
                }
            },
        )
        .await?;
        finish(
            PlanKind::Extract,
            &report,
            &plan,
            args.batch.dry_run,
            global.verbose,
        )
    }))
}
