pub mod extract;
pub mod plan;
pub mod publish;
pub mod rewrite;

use crate::exit::BatchExit;
use crate::output::print_json;
use anyhow::Context;
use clap::Args;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storywork_core::config::EngineConfig;
use storywork_core::engine::{Dispatcher, Outcome, Processor, RunReport};
use storywork_core::lock::LockGuard;
use storywork_core::plan::{Plan, PlanCounts, PlanKind, PlanStore};
use tokio::sync::watch;
use tracing::{info, warn};

/// Options every command receives from the top-level flags.
#[derive(Debug, Clone)]
pub struct Global {
    /// Story tree holding `frontend/`, `backend/` and the plan files.
    pub root: PathBuf,
    /// Workspace repo holding prompts, agents and business rules.
    pub repo: PathBuf,
    pub json: bool,
    pub verbose: bool,
}

/// Flags shared by the batch commands.
#[derive(Args, Debug, Clone, Default)]
pub struct BatchFlags {
    /// Prepare every item but call nothing external and write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Override a recent lock left by another run
    #[arg(long)]
    pub force: bool,

    /// Rescan and rebuild the pending queue; completed, failed and skipped history is kept
    #[arg(long)]
    pub force_refresh_plan: bool,

    /// Items processed in parallel
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Stop scheduling after this many consecutive transport failures (0 disables)
    #[arg(long)]
    pub max_consecutive_failures: Option<u32>,
}

impl BatchFlags {
    /// Engine config from `<root>/.storywork.yaml` with these flags on top.
    pub fn engine_config(&self, root: &Path) -> anyhow::Result<EngineConfig> {
        let mut config = EngineConfig::load(root)?;
        if let Some(c) = self.concurrency {
            config.concurrency = c;
        }
        if let Some(n) = self.max_consecutive_failures {
            config.breaker_threshold = n;
        }
        config.validate()?;
        Ok(config)
    }

    /// A dry run reads the plan but never saves it.
    pub fn store(&self, root: &Path, kind: PlanKind) -> PlanStore {
        let store = PlanStore::new(root, kind);
        if self.dry_run {
            store.read_only()
        } else {
            store
        }
    }

    /// Take the root lock unless this is a dry run.
    pub fn lock(&self, root: &Path) -> anyhow::Result<Option<LockGuard>> {
        if self.dry_run {
            return Ok(None);
        }
        Ok(Some(LockGuard::acquire(root, self.force)?))
    }
}

pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start the async runtime")
}

/// Ctrl-C as seen by every phase of a command.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    /// Resolves once Ctrl-C has been received.
    pub async fn signalled(mut self) {
        let closed = self.0.wait_for(|hit| *hit).await.is_err();
        if closed {
            std::future::pending::<()>().await
        }
    }

    /// Run `work` unless Ctrl-C arrives first, which yields [`BatchExit::Interrupted`].
    pub async fn guard<T>(
        &self,
        work: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        tokio::select! {
            biased;
            () = self.clone().signalled() => Err(BatchExit::Interrupted.into()),
            result = work => result,
        }
    }
}

/// Run `work` with the Ctrl-C handler installed before its first poll, so a
/// lock taken inside `work` is always released through `Drop`.
pub async fn with_shutdown<T, F, Fut>(work: F) -> anyhow::Result<T>
where
    F: FnOnce(Shutdown) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let (tx, rx) = watch::channel(false);
    let listener = async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received; stopping after saving the plan");
                let _ = tx.send(true);
            }
            Err(e) => warn!("cannot listen for Ctrl-C: {e}"),
        }
        // Keeps `tx` alive; `work` decides how to wind down.
        std::future::pending::<()>().await
    };
    tokio::select! {
        biased;
        () = listener => Err(BatchExit::Interrupted.into()),
        result = work(Shutdown(rx)) => result,
    }
}

/// Run `order` through `processor` until done, interrupted, or the breaker trips.
pub async fn dispatch<P: Processor>(
    processor: P,
    config: &EngineConfig,
    plan: &mut Plan,
    store: &PlanStore,
    order: Vec<String>,
    shutdown: &Shutdown,
    observe: impl FnMut(&str, &Outcome),
) -> anyhow::Result<RunReport> {
    info!(
        items = order.len(),
        concurrency = config.concurrency,
        plan = %store.path().display(),
        "dispatching"
    );
    let dispatcher = Dispatcher::new(Arc::new(processor), config.dispatch_options());
    let report = dispatcher
        .run(plan, store, order, shutdown.clone().signalled(), observe)
        .await?;
    Ok(report)
}

#[derive(Serialize)]
struct TopError {
    message: String,
    count: usize,
}

#[derive(Serialize)]
struct Summary<'a> {
    kind: &'a str,
    dry_run: bool,
    run: &'a RunReport,
    plan: PlanCounts,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    top_errors: Vec<TopError>,
}

/// Print the JSON summary. An interrupted run turns into [`BatchExit::Interrupted`].
pub fn finish(
    kind: PlanKind,
    report: &RunReport,
    plan: &Plan,
    dry_run: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    if report.breaker_tripped {
        warn!(
            left_pending = report.undispatched,
            "circuit breaker tripped: too many consecutive transport failures; rerun once the service recovers"
        );
    }
    let top_errors = if verbose {
        plan.top_errors(5)
            .into_iter()
            .map(|(message, count)| TopError { message, count })
            .collect()
    } else {
        Vec::new()
    };
    print_json(&Summary {
        kind: kind.as_str(),
        dry_run,
        run: report,
        plan: plan.counts(),
        top_errors,
    })?;
    if report.interrupted {
        return Err(BatchExit::Interrupted.into());
    }
    Ok(())
}
