use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::engine::{CircuitBreaker, Outcome, Processor, Stage};
use crate::error::Result;
use crate::plan::{Plan, PlanStore};

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Maximum in-flight items. Values below 1 are treated as 1.
    pub concurrency: usize,
    /// Consecutive transport failures before scheduling stops; 0 disables.
    pub breaker_threshold: u32,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            breaker_threshold: 3,
        }
    }
}

/// Tally of one dispatcher run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub previewed: usize,
    pub interrupted: bool,
    pub breaker_tripped: bool,
    /// Keys from the dispatch order that were never started.
    pub undispatched: usize,
}

impl RunReport {
    fn tally(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Completed { .. } => self.completed += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
            Outcome::Previewed { .. } => self.previewed += 1,
        }
    }
}

/// Runs a [`Processor`] over plan keys with bounded concurrency.
///
/// The dispatcher is the only writer of the plan. Every claim is saved before
/// its task starts and every outcome is saved before a replacement starts, so
/// a crash leaves at most the in-flight keys in `processing`.
pub struct Dispatcher<P> {
    processor: Arc<P>,
    options: DispatchOptions,
}

impl<P: Processor> Dispatcher<P> {
    pub fn new(processor: Arc<P>, options: DispatchOptions) -> Self {
        Self { processor, options }
    }

    /// Dispatch `order` FIFO until it drains, the breaker opens or `shutdown`
    /// resolves. On shutdown in-flight tasks are abandoned and their keys go
    /// back to the front of `pending`.
    ///
    /// `observe` sees every outcome after it has been saved.
    pub async fn run<S, O>(
        &self,
        plan: &mut Plan,
        store: &PlanStore,
        order: Vec<String>,
        shutdown: S,
        mut observe: O,
    ) -> Result<RunReport>
    where
        S: Future<Output = ()>,
        O: FnMut(&str, &Outcome),
    {
        let concurrency = self.options.concurrency.max(1);
        let mut queue: VecDeque<String> = order.into();
        let mut tasks: JoinSet<(String, Outcome)> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut breaker = CircuitBreaker::new(self.options.breaker_threshold);
        let mut report = RunReport::default();
        tokio::pin!(shutdown);

        loop {
            while !breaker.is_open() && tasks.len() < concurrency {
                let Some(key) = queue.pop_front() else { break };
                if !plan.claim(&key) {
                    debug!(key = %key, "not pending, not dispatched");
                    continue;
                }
                store.save(plan)?;
                info!(key = %key, "[start]");
                let processor = Arc::clone(&self.processor);
                let task_key = key.clone();
                let handle = tasks.spawn(async move {
                    let outcome = processor.process(&task_key).await;
                    (task_key, outcome)
                });
                in_flight.insert(handle.id(), key);
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    warn!(in_flight = tasks.len(), "interrupted; requeueing in-flight items");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    plan.requeue_processing();
                    store.save(plan)?;
                    report.interrupted = true;
                    report.undispatched = queue.len() + in_flight.len();
                    return Ok(report);
                }

                joined = tasks.join_next_with_id() => {
                    let (key, outcome) = match joined {
                        Some(Ok((id, result))) => {
                            in_flight.remove(&id);
                            result
                        }
                        Some(Err(err)) => {
                            let Some(key) = in_flight.remove(&err.id()) else {
                                warn!("worker task for an unknown key failed: {err}");
                                continue;
                            };
                            let outcome =
                                Outcome::failed(Stage::Dispatch, format!("worker task failed: {err}"));
                            (key, outcome)
                        }
                        None => break,
                    };

                    plan.record(&key, &outcome);
                    store.save(plan)?;
                    log_outcome(&key, &outcome);
                    report.tally(&outcome);
                    observe(&key, &outcome);

                    if breaker.record(&outcome) && !report.breaker_tripped {
                        report.breaker_tripped = true;
                        warn!(
                            consecutive = breaker.consecutive(),
                            "circuit breaker open: too many consecutive transport failures; \
                             no new items will be started"
                        );
                    }
                }
            }
        }

        report.undispatched = queue.len();
        Ok(report)
    }
}

fn log_outcome(key: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Completed { location } => info!(key, location = %location, "[done]"),
        Outcome::Skipped { reason } => info!(key, "[skip] {reason}"),
        Outcome::Failed(failure) => warn!(key, "[fail] {failure}"),
        Outcome::Previewed { .. } => info!(key, "[dry-run]"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ItemFailure;
    use crate::plan::{PlanKind, PlanSettings};
    use std::future::pending;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn setup(list: &[&str]) -> (TempDir, PlanStore, Plan) {
        let dir = TempDir::new().unwrap();
        let store = PlanStore::new(dir.path(), PlanKind::Rewrite);
        let mut plan = Plan::new(PlanSettings::default(), keys(list));
        store.save(&mut plan).unwrap();
        (dir, store, plan)
    }

    /// Completes every key except those containing "skip", which are skipped.
    struct Scripted;

    impl Processor for Scripted {
        async fn process(&self, key: &str) -> Outcome {
            if key.contains("skip") {
                Outcome::skipped("no story marker")
            } else {
                Outcome::Completed {
                    location: format!("{key}/after.md"),
                }
            }
        }
    }

    #[tokio::test]
    async fn three_items_one_skip() {
        let (_dir, store, mut plan) = setup(&["frontend/1", "frontend/skip", "frontend/3"]);
        let order = plan.dispatch_order(None);
        let dispatcher = Dispatcher::new(
            Arc::new(Scripted),
            DispatchOptions {
                concurrency: 2,
                breaker_threshold: 3,
            },
        );
        let report = dispatcher
            .run(&mut plan, &store, order, pending(), |_, _| {})
            .await
            .unwrap();

        assert_eq!((report.completed, report.skipped, report.failed), (2, 1, 0));
        let saved = store.load().unwrap();
        let c = saved.counts();
        assert_eq!((c.completed, c.skipped, c.failed), (2, 1, 0));
        assert!(saved.state.pending.is_empty());
        assert!(saved.state.processing.is_empty());
        assert!(saved.partition_violations().is_empty());
    }

    /// Verifies from disk that its own key was claimed before it started.
    struct ClaimChecker {
        plan_path: PathBuf,
    }

    impl Processor for ClaimChecker {
        async fn process(&self, key: &str) -> Outcome {
            let raw = std::fs::read_to_string(&self.plan_path).unwrap_or_default();
            let plan: Plan = match serde_json::from_str(&raw) {
                Ok(p) => p,
                Err(e) => return Outcome::failed(Stage::Resolve, e.to_string()),
            };
            if plan.state.processing.iter().any(|k| k == key) {
                Outcome::Completed {
                    location: key.to_string(),
                }
            } else {
                Outcome::failed(Stage::Resolve, "claim was not saved before dispatch")
            }
        }
    }

    #[tokio::test]
    async fn claims_are_saved_before_dispatch() {
        let (_dir, store, mut plan) = setup(&["a", "b", "c"]);
        let order = plan.dispatch_order(None);
        let processor = ClaimChecker {
            plan_path: store.path().to_path_buf(),
        };
        let report = Dispatcher::new(Arc::new(processor), DispatchOptions::default())
            .run(&mut plan, &store, order, pending(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(report.completed, 3);
    }

    struct Tracking {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Processor for Tracking {
        async fn process(&self, key: &str) -> Outcome {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Outcome::Completed {
                location: key.to_string(),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let (_dir, store, mut plan) = setup(&["1", "2", "3", "4", "5", "6"]);
        let order = plan.dispatch_order(None);
        let processor = Arc::new(Tracking {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let report = Dispatcher::new(
            Arc::clone(&processor),
            DispatchOptions {
                concurrency: 2,
                breaker_threshold: 0,
            },
        )
        .run(&mut plan, &store, order, pending(), |_, _| {})
        .await
        .unwrap();
        assert_eq!(report.completed, 6);
        assert_eq!(processor.peak.load(Ordering::SeqCst), 2);
    }

    struct AlwaysUnavailable;

    impl Processor for AlwaysUnavailable {
        async fn process(&self, _key: &str) -> Outcome {
            Outcome::Failed(ItemFailure {
                stage: Stage::Transform,
                message: "HTTP 503 (gave up after 4 attempt(s))".into(),
                transport: true,
                output: None,
            })
        }
    }

    #[tokio::test]
    async fn breaker_stops_new_dispatches() {
        let (_dir, store, mut plan) = setup(&["1", "2", "3", "4", "5"]);
        let order = plan.dispatch_order(None);
        let report = Dispatcher::new(
            Arc::new(AlwaysUnavailable),
            DispatchOptions {
                concurrency: 1,
                breaker_threshold: 2,
            },
        )
        .run(&mut plan, &store, order, pending(), |_, _| {})
        .await
        .unwrap();

        assert!(report.breaker_tripped);
        assert_eq!(report.failed, 2);
        assert_eq!(report.undispatched, 3);
        assert_eq!(store.load().unwrap().state.pending, keys(&["3", "4", "5"]));
    }

    struct Stalls;

    impl Processor for Stalls {
        async fn process(&self, key: &str) -> Outcome {
            if key == "fast" {
                return Outcome::Completed {
                    location: key.to_string(),
                };
            }
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Outcome::Completed {
                location: key.to_string(),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_requeues_in_flight_at_the_front() {
        let (_dir, store, mut plan) = setup(&["fast", "slow1", "slow2", "slow3"]);
        let order = plan.dispatch_order(None);
        let report = Dispatcher::new(
            Arc::new(Stalls),
            DispatchOptions {
                concurrency: 2,
                breaker_threshold: 0,
            },
        )
        .run(
            &mut plan,
            &store,
            order,
            tokio::time::sleep(Duration::from_secs(5)),
            |_, _| {},
        )
        .await
        .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.completed, 1);
        let saved = store.load().unwrap();
        assert!(saved.state.processing.is_empty());
        assert_eq!(saved.state.pending, keys(&["slow1", "slow2", "slow3"]));
        assert!(saved.state.completed.contains_key("fast"));
    }

    struct Panics;

    impl Processor for Panics {
        async fn process(&self, key: &str) -> Outcome {
            if key == "boom" {
                panic!("processor bug");
            }
            Outcome::Completed {
                location: key.to_string(),
            }
        }
    }

    #[tokio::test]
    async fn a_panicking_item_fails_alone() {
        let (_dir, store, mut plan) = setup(&["ok1", "boom", "ok2"]);
        let order = plan.dispatch_order(None);
        let mut seen = Vec::new();
        let report = Dispatcher::new(Arc::new(Panics), DispatchOptions::default())
            .run(&mut plan, &store, order, pending(), |key, outcome| {
                seen.push((key.to_string(), outcome.label()));
            })
            .await
            .unwrap();

        assert_eq!((report.completed, report.failed), (2, 1));
        assert_eq!(plan.state.failed["boom"].stage, Stage::Dispatch);
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn keys_not_pending_are_ignored() {
        let (_dir, store, mut plan) = setup(&["a"]);
        let report = Dispatcher::new(Arc::new(Scripted), DispatchOptions::default())
            .run(&mut plan, &store, keys(&["ghost", "a"]), pending(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(report.completed, 1);
        assert!(!plan.contains("ghost"));
    }
}
