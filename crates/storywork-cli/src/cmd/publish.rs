use super::{dispatch, finish, with_shutdown, BatchFlags, Global};
use anyhow::Context;
use clap::Args;
use std::time::Duration;
use storywork_core::batch::{scan_publishable, PublishOptions, PublishProcessor};
use storywork_core::engine::{Backoff, Outcome};
use storywork_core::github::{GitHubClient, GITHUB_TIMEOUT};
use storywork_core::paths::{self, Category};
use storywork_core::plan::{PlanKind, PlanSettings};
use tracing::info;

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// GitHub user or organization owning the repository
    #[arg(long)]
    pub owner: String,

    /// Repository whose issues receive the rewritten stories
    #[arg(long)]
    pub repo: String,

    /// Publish only this issue number, even if it was published before
    #[arg(long)]
    pub issue: Option<u64>,

    /// Apply the Recommended labels as well
    #[arg(long)]
    pub include_recommended: bool,

    /// Fail stories that propose Blocking / Risk labels instead of publishing them
    #[arg(long)]
    pub fail_on_blocking: bool,

    #[command(flatten)]
    pub batch: BatchFlags,
}

pub fn run(global: &Global, args: PublishArgs) -> anyhow::Result<()> {
    let root = &global.root;
    let config = args.batch.engine_config(root)?;
    let backoff = Backoff::new(config.retry.clone(), GITHUB_TIMEOUT + Duration::from_secs(5));
    let github = GitHubClient::from_env(&args.owner, backoff)?;

    let store = args.batch.store(root, PlanKind::Publish);
    let settings = PlanSettings {
        owner: Some(args.owner.clone()),
        repo: Some(args.repo.clone()),
        ..Default::default()
    };
    let options = PublishOptions {
        repo: args.repo.clone(),
        include_recommended: args.include_recommended,
        fail_on_blocking: args.fail_on_blocking,
        dry_run: args.batch.dry_run,
    };

    let args = &args;
    let rt = super::runtime()?;
    rt.block_on(with_shutdown(|shutdown| async move {
        let _lock = args.batch.lock(root)?;
        let scan = store.load_or_create(settings, args.batch.force_refresh_plan, || async {
            scan_publishable(root)
        });
        let (mut plan, origin) = shutdown
            .guard(async { scan.await.context("failed to prepare the publish plan") })
            .await?;
        info!(?origin, pending = plan.state.pending.len(), "publish plan ready");

        let selection = args
            .issue
            .map(|n| vec![paths::issue_key(Category::Frontend, n)]);
        // An explicit issue is republished whatever its history.
        if let Some(selected) = &selection {
            let changed = plan.requeue_failed(selected)
                + plan.requeue_completed(selected)
                + plan.merge_selection(selected, |key| paths::after_path(root, key).is_file());
            if changed > 0 {
                store.save(&mut plan)?;
            }
        }
        let order = plan.dispatch_order(selection.as_deref());

        let processor = PublishProcessor::new(root, github, options);
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
            PlanKind::Publish,
            &report,
            &plan,
            args.batch.dry_run,
            global.verbose,
        )
    }))
}
