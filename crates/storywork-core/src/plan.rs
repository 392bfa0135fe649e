use crate::engine::{Outcome, Stage};
use crate::error::{Result, StoryworkError};
use crate::io;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

pub const PLAN_VERSION: &str = "1.0";

/// Longest rejected transform output kept on a failed entry, in characters.
pub const MAX_AGENT_OUTPUT: usize = 20_000;

// ---------------------------------------------------------------------------
// PlanKind
// ---------------------------------------------------------------------------

/// Which batch flow a plan file belongs to. Each kind has its own file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Extract,
    Rewrite,
    Publish,
}

impl PlanKind {
    pub fn file_name(self) -> &'static str {
        match self {
            PlanKind::Extract => ".extract_plan.json",
            PlanKind::Rewrite => ".rewrite_plan.json",
            PlanKind::Publish => ".publish_plan.json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanKind::Extract => "extract",
            PlanKind::Rewrite => "rewrite",
            PlanKind::Publish => "publish",
        }
    }

    pub fn all() -> [PlanKind; 3] {
        [PlanKind::Extract, PlanKind::Rewrite, PlanKind::Publish]
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanKind {
    type Err = StoryworkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "extract" => Ok(PlanKind::Extract),
            "rewrite" => Ok(PlanKind::Rewrite),
            "publish" => Ok(PlanKind::Publish),
            other => Err(StoryworkError::Config(format!(
                "unknown plan kind '{other}' (expected extract, rewrite or publish)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Plan document
// ---------------------------------------------------------------------------

/// Static run configuration captured when the plan is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedEntry {
    pub location: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub stage: Stage,
    pub error: String,
    pub last_attempt: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub reason: String,
    pub skipped_at: DateTime<Utc>,
}

/// Partition of every known key. At rest `processing` is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanState {
    #[serde(default)]
    pub pending: Vec<String>,
    #[serde(default)]
    pub processing: Vec<String>,
    #[serde(default)]
    pub completed: BTreeMap<String, CompletedEntry>,
    #[serde(default)]
    pub failed: BTreeMap<String, FailedEntry>,
    #[serde(default)]
    pub skipped: BTreeMap<String, SkippedEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl PlanCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed + self.skipped
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub settings: PlanSettings,
    #[serde(default)]
    pub state: PlanState,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Plan {
    /// Fresh plan with `keys` pending in scan order, duplicates dropped.
    pub fn new(settings: PlanSettings, keys: impl IntoIterator<Item = String>) -> Self {
        let now = Utc::now();
        let mut seen = HashSet::new();
        let pending = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();
        Self {
            version: PLAN_VERSION.to_string(),
            created_at: now,
            updated_at: now,
            settings,
            state: PlanState {
                pending,
                ..PlanState::default()
            },
            extra: Map::new(),
        }
    }

    /// True when `key` is tracked in any partition.
    pub fn contains(&self, key: &str) -> bool {
        let s = &self.state;
        s.pending.iter().any(|k| k == key)
            || s.processing.iter().any(|k| k == key)
            || s.completed.contains_key(key)
            || s.failed.contains_key(key)
            || s.skipped.contains_key(key)
    }

    fn is_terminal(&self, key: &str) -> bool {
        self.state.completed.contains_key(key)
            || self.state.failed.contains_key(key)
            || self.state.skipped.contains_key(key)
    }

    /// Move `key` from `pending` to `processing`. Returns false when it was not pending.
    pub fn claim(&mut self, key: &str) -> bool {
        match self.state.pending.iter().position(|k| k == key) {
            Some(idx) => {
                let key = self.state.pending.remove(idx);
                self.state.processing.push(key);
                true
            }
            None => false,
        }
    }

    /// Return an in-flight key to the back of `pending` without an outcome.
    pub fn release(&mut self, key: &str) {
        self.state.processing.retain(|k| k != key);
        if !self.state.pending.iter().any(|k| k == key) {
            self.state.pending.push(key.to_string());
        }
    }

    /// Apply a terminal outcome. The key leaves every other partition.
    pub fn record(&mut self, key: &str, outcome: &Outcome) {
        if let Outcome::Previewed { .. } = outcome {
            self.release(key);
            return;
        }
        let now = Utc::now();
        let s = &mut self.state;
        s.processing.retain(|k| k != key);
        s.pending.retain(|k| k != key);
        s.completed.remove(key);
        s.failed.remove(key);
        s.skipped.remove(key);
        match outcome {
            Outcome::Completed { location } => {
                s.completed.insert(
                    key.to_string(),
                    CompletedEntry {
                        location: location.clone(),
                        completed_at: now,
                    },
                );
            }
            Outcome::Failed(failure) => {
                s.failed.insert(
                    key.to_string(),
                    FailedEntry {
                        stage: failure.stage,
                        error: llm_client::error::truncate_body(&failure.message),
                        last_attempt: now,
                        agent_output: failure.output.as_deref().map(clip_agent_output),
                    },
                );
            }
            Outcome::Skipped { reason } => {
                s.skipped.insert(
                    key.to_string(),
                    SkippedEntry {
                        reason: reason.clone(),
                        skipped_at: now,
                    },
                );
            }
            Outcome::Previewed { .. } => {}
        }
    }

    /// Put every `processing` key back at the front of `pending`, keeping
    /// their claim order. Used after a crash or an interrupt.
    pub fn requeue_processing(&mut self) -> usize {
        let stale: Vec<String> = std::mem::take(&mut self.state.processing);
        let count = stale.len();
        if count > 0 {
            let mut pending: Vec<String> = stale;
            for k in self.state.pending.drain(..) {
                if !pending.contains(&k) {
                    pending.push(k);
                }
            }
            self.state.pending = pending;
        }
        count
    }

    /// Rebuild `pending` from a fresh scan. Terminal history is untouched and
    /// terminal keys are not re-added. Returns how many keys are newly pending.
    pub fn refresh(&mut self, settings: PlanSettings, scanned: Vec<String>) -> usize {
        self.requeue_processing();
        let before: HashSet<String> = self.state.pending.iter().cloned().collect();
        let mut seen = HashSet::new();
        let pending: Vec<String> = scanned
            .into_iter()
            .filter(|k| !self.is_terminal(k) && seen.insert(k.clone()))
            .collect();
        let added = pending.iter().filter(|k| !before.contains(*k)).count();
        self.state.pending = pending;
        self.settings = settings;
        added
    }

    /// Requeue the given `failed` keys at the back of `pending`.
    pub fn requeue_failed(&mut self, keys: &[String]) -> usize {
        let mut count = 0;
        for key in keys {
            if self.state.failed.remove(key).is_some() {
                self.state.pending.push(key.clone());
                count += 1;
            }
        }
        count
    }

    /// Requeue the given `completed` keys at the back of `pending`, for
    /// deliberate reprocessing.
    pub fn requeue_completed(&mut self, keys: &[String]) -> usize {
        let mut count = 0;
        for key in keys {
            if self.state.completed.remove(key).is_some() {
                self.state.pending.push(key.clone());
                count += 1;
            }
        }
        count
    }

    /// Add selected keys the plan has never seen, when `eligible` accepts them.
    pub fn merge_selection(&mut self, keys: &[String], eligible: impl Fn(&str) -> bool) -> usize {
        let mut count = 0;
        for key in keys {
            if !self.contains(key) && eligible(key) {
                self.state.pending.push(key.clone());
                count += 1;
            }
        }
        count
    }

    /// Keys to dispatch, in order. With a selection, only selected pending keys.
    pub fn dispatch_order(&self, selection: Option<&[String]>) -> Vec<String> {
        match selection {
            None => self.state.pending.clone(),
            Some(selected) => selected
                .iter()
                .filter(|k| self.state.pending.contains(k))
                .cloned()
                .collect(),
        }
    }

    /// Keys that appear more than once across the partitions.
    pub fn partition_violations(&self) -> Vec<String> {
        let s = &self.state;
        let mut seen: HashMap<&str, &str> = HashMap::new();
        let mut violations = Vec::new();
        let lists = [("pending", &s.pending), ("processing", &s.processing)];
        let maps = [
            ("completed", s.completed.keys().collect::<Vec<_>>()),
            ("failed", s.failed.keys().collect()),
            ("skipped", s.skipped.keys().collect()),
        ];
        let all = lists
            .iter()
            .flat_map(|(name, keys)| keys.iter().map(move |k| (*name, k)))
            .chain(
                maps.iter()
                    .flat_map(|(name, keys)| keys.iter().map(move |k| (*name, *k))),
            );
        for (name, key) in all {
            if let Some(prev) = seen.insert(key.as_str(), name) {
                violations.push(format!("{key} appears in both {prev} and {name}"));
            }
        }
        violations
    }

    pub fn counts(&self) -> PlanCounts {
        let s = &self.state;
        PlanCounts {
            pending: s.pending.len(),
            processing: s.processing.len(),
            completed: s.completed.len(),
            failed: s.failed.len(),
            skipped: s.skipped.len(),
        }
    }

    /// Most frequent failure messages, highest count first.
    pub fn top_errors(&self, n: usize) -> Vec<(String, usize)> {
        let mut freq: HashMap<&str, usize> = HashMap::new();
        for entry in self.state.failed.values() {
            *freq.entry(entry.error.as_str()).or_default() += 1;
        }
        let mut ranked: Vec<(String, usize)> =
            freq.into_iter().map(|(m, c)| (m.to_string(), c)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }
}

fn clip_agent_output(output: &str) -> String {
    match output.char_indices().nth(MAX_AGENT_OUTPUT) {
        Some((idx, _)) => output[..idx].to_string(),
        None => output.to_string(),
    }
}

// ---------------------------------------------------------------------------
// PlanStore
// ---------------------------------------------------------------------------

/// How `load_or_create` arrived at the plan it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOrigin {
    /// Existing plan reused; `requeued` stale in-flight keys were put back.
    Loaded { requeued: usize },
    Created,
    Refreshed { added: usize },
}

/// Reads and atomically rewrites one plan file.
#[derive(Debug, Clone)]
pub struct PlanStore {
    path: PathBuf,
    persist: bool,
}

impl PlanStore {
    pub fn new(root: &Path, kind: PlanKind) -> Self {
        Self {
            path: root.join(kind.file_name()),
            persist: true,
        }
    }

    /// A store whose `save` is a no-op. Used for dry runs.
    pub fn read_only(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_persistent(&self) -> bool {
        self.persist
    }

    pub fn load(&self) -> Result<Plan> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoryworkError::PlanNotFound(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let plan: Plan =
            serde_json::from_str(&data).map_err(|e| StoryworkError::PlanCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if plan.version != PLAN_VERSION {
            warn!(path = %self.path.display(), version = %plan.version, "plan version differs from {PLAN_VERSION}");
        }
        Ok(plan)
    }

    pub fn save(&self, plan: &mut Plan) -> Result<()> {
        plan.updated_at = Utc::now();
        if !self.persist {
            return Ok(());
        }
        io::atomic_write_json(&self.path, plan)
    }

    /// Reuse the plan on disk, or build one from `scan`.
    ///
    /// An existing plan is never rescanned unless `force_refresh` is set.
    /// Stale `processing` keys from a crashed run go back to the front of
    /// `pending`. A corrupt plan is an error unless `force_refresh` is set.
    pub async fn load_or_create<F, Fut>(
        &self,
        settings: PlanSettings,
        force_refresh: bool,
        scan: F,
    ) -> Result<(Plan, PlanOrigin)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>>>,
    {
        match self.load() {
            Ok(mut plan) if !force_refresh => {
                let requeued = plan.requeue_processing();
                if requeued > 0 {
                    warn!(requeued, "requeued items left in processing by a previous run");
                    self.save(&mut plan)?;
                }
                info!(path = %self.path.display(), "loaded existing plan");
                Ok((plan, PlanOrigin::Loaded { requeued }))
            }
            Ok(mut plan) => {
                let scanned = scan().await?;
                let added = plan.refresh(settings, scanned);
                self.save(&mut plan)?;
                info!(added, "refreshed plan from a new scan");
                Ok((plan, PlanOrigin::Refreshed { added }))
            }
            Err(StoryworkError::PlanNotFound(_)) => self.create(settings, scan).await,
            Err(StoryworkError::PlanCorrupt { reason, .. }) if force_refresh => {
                warn!(path = %self.path.display(), "discarding corrupt plan: {reason}");
                self.create(settings, scan).await
            }
            Err(e) => Err(e),
        }
    }

    async fn create<F, Fut>(&self, settings: PlanSettings, scan: F) -> Result<(Plan, PlanOrigin)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>>>,
    {
        let keys = scan().await?;
        let mut plan = Plan::new(settings, keys);
        self.save(&mut plan)?;
        info!(
            path = %self.path.display(),
            pending = plan.state.pending.len(),
            "created plan"
        );
        Ok((plan, PlanOrigin::Created))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ItemFailure;
    use tempfile::TempDir;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn done(loc: &str) -> Outcome {
        Outcome::Completed {
            location: loc.into(),
        }
    }

    #[test]
    fn new_plan_dedupes_in_order() {
        let plan = Plan::new(PlanSettings::default(), keys(&["a", "b", "a", "c"]));
        assert_eq!(plan.state.pending, keys(&["a", "b", "c"]));
        assert_eq!(plan.version, PLAN_VERSION);
    }

    #[test]
    fn claim_and_record_keep_a_partition() {
        let mut plan = Plan::new(PlanSettings::default(), keys(&["a", "b", "c"]));
        assert!(plan.claim("a"));
        assert!(!plan.claim("a"));
        assert_eq!(plan.state.processing, keys(&["a"]));

        plan.record("a", &done("frontend/a/after.md"));
        plan.claim("b");
        plan.record("b", &Outcome::skipped("no marker"));
        plan.claim("c");
        plan.record("c", &Outcome::failed(Stage::Validate, "missing markers"));

        let c = plan.counts();
        assert_eq!((c.pending, c.processing), (0, 0));
        assert_eq!((c.completed, c.skipped, c.failed), (1, 1, 1));
        assert!(plan.partition_violations().is_empty());
        assert_eq!(plan.state.failed["c"].stage, Stage::Validate);
    }

    #[test]
    fn success_after_failure_clears_the_failure() {
        let mut plan = Plan::new(PlanSettings::default(), keys(&["a"]));
        plan.claim("a");
        plan.record("a", &Outcome::failed(Stage::Transform, "boom"));
        plan.requeue_failed(&keys(&["a"]));
        plan.claim("a");
        plan.record("a", &done("x"));
        assert!(plan.state.failed.is_empty());
        assert!(plan.state.completed.contains_key("a"));
    }

    #[test]
    fn previewed_items_go_back_to_pending() {
        let mut plan = Plan::new(PlanSettings::default(), keys(&["a"]));
        plan.claim("a");
        plan.record(
            "a",
            &Outcome::Previewed {
                detail: "prompt".into(),
            },
        );
        assert_eq!(plan.state.pending, keys(&["a"]));
        assert!(plan.state.processing.is_empty());
    }

    #[test]
    fn long_errors_are_truncated() {
        let mut plan = Plan::new(PlanSettings::default(), keys(&["a"]));
        plan.claim("a");
        let failure = ItemFailure::new(Stage::Transform, "x".repeat(5000));
        plan.record("a", &Outcome::Failed(failure));
        assert_eq!(plan.state.failed["a"].error.chars().count(), 2000);
    }

    #[test]
    fn rejected_output_is_kept_on_the_failed_entry() {
        let mut plan = Plan::new(PlanSettings::default(), keys(&["a", "b"]));
        plan.claim("a");
        let failure = ItemFailure::new(Stage::Validate, "rewrite output rejected")
            .with_output("é".repeat(MAX_AGENT_OUTPUT + 10));
        plan.record("a", &Outcome::Failed(failure));
        plan.claim("b");
        plan.record("b", &Outcome::failed(Stage::Transform, "HTTP 503"));

        let kept = plan.state.failed["a"].agent_output.as_deref().unwrap();
        assert_eq!(kept.chars().count(), MAX_AGENT_OUTPUT);
        assert_eq!(plan.state.failed["b"].agent_output, None);

        let json = serde_json::to_value(&plan).unwrap();
        assert!(json["state"]["failed"]["a"]["agent_output"].is_string());
        assert!(json["state"]["failed"]["b"].get("agent_output").is_none());
    }

    #[test]
    fn requeue_processing_goes_to_the_front_in_claim_order() {
        let mut plan = Plan::new(PlanSettings::default(), keys(&["a", "b", "c", "d"]));
        plan.claim("b");
        plan.claim("a");
        assert_eq!(plan.requeue_processing(), 2);
        assert_eq!(plan.state.pending, keys(&["b", "a", "c", "d"]));
        assert!(plan.state.processing.is_empty());
    }

    #[test]
    fn refresh_adds_only_new_keys_and_keeps_history() {
        let mut plan = Plan::new(PlanSettings::default(), keys(&["a", "b", "c"]));
        plan.claim("a");
        plan.record("a", &done("a.md"));
        plan.claim("b");
        plan.record("b", &Outcome::skipped("no marker"));
        let history = (plan.state.completed.clone(), plan.state.skipped.clone());

        let before = plan.state.pending.len();
        let added = plan.refresh(
            PlanSettings::default(),
            keys(&["a", "b", "c", "d", "e"]),
        );
        assert_eq!(added, 2);
        assert_eq!(plan.state.pending.len(), before + 2);
        assert_eq!(plan.state.pending, keys(&["c", "d", "e"]));
        assert_eq!((plan.state.completed.clone(), plan.state.skipped.clone()), history);
    }

    #[test]
    fn selection_merge_and_order() {
        let mut plan = Plan::new(PlanSettings::default(), keys(&["a", "b"]));
        plan.claim("b");
        plan.record("b", &Outcome::failed(Stage::Transform, "x"));

        let selection = keys(&["z", "b", "a", "q"]);
        let merged = plan.merge_selection(&selection, |k| k != "q");
        assert_eq!(merged, 1);
        assert_eq!(plan.dispatch_order(Some(&selection)), keys(&["z", "a"]));

        assert_eq!(plan.requeue_failed(&selection), 1);
        assert_eq!(plan.dispatch_order(Some(&selection)), keys(&["z", "b", "a"]));
        assert_eq!(plan.dispatch_order(None), keys(&["a", "z", "b"]));
    }

    #[test]
    fn reprocessing_requeues_selected_completed_keys() {
        let mut plan = Plan::new(PlanSettings::default(), keys(&["a", "b"]));
        for k in ["a", "b"] {
            plan.claim(k);
            plan.record(k, &Outcome::Completed { location: format!("{k}.md") });
        }
        assert_eq!(plan.requeue_completed(&keys(&["b", "x"])), 1);
        assert_eq!(plan.state.pending, keys(&["b"]));
        assert!(plan.state.completed.contains_key("a"));
        assert!(plan.partition_violations().is_empty());
    }

    #[test]
    fn partition_violations_are_reported() {
        let mut plan = Plan::new(PlanSettings::default(), keys(&["a", "b"]));
        plan.state.completed.insert(
            "a".into(),
            CompletedEntry {
                location: "a.md".into(),
                completed_at: Utc::now(),
            },
        );
        let v = plan.partition_violations();
        assert_eq!(v, vec!["a appears in both pending and completed".to_string()]);
    }

    #[test]
    fn top_errors_rank_by_frequency() {
        let mut plan = Plan::new(PlanSettings::default(), keys(&["a", "b", "c"]));
        for (k, msg) in [("a", "timeout"), ("b", "timeout"), ("c", "bad")] {
            plan.claim(k);
            plan.record(k, &Outcome::failed(Stage::Transform, msg));
        }
        assert_eq!(
            plan.top_errors(5),
            vec![("timeout".to_string(), 2), ("bad".to_string(), 1)]
        );
    }

    #[test]
    fn unknown_fields_survive_a_rewrite() {
        let dir = TempDir::new().unwrap();
        let store = PlanStore::new(dir.path(), PlanKind::Rewrite);
        let raw = r#"{
            "version": "1.0",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z",
            "settings": {"agent_file": "agent.md", "model_hint": "fast"},
            "state": {"pending": ["frontend/1"], "notes": {"owner": "ops"}},
            "operator": "night-shift"
        }"#;
        std::fs::write(store.path(), raw).unwrap();

        let mut plan = store.load().unwrap();
        store.save(&mut plan).unwrap();
        let value: Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(value["operator"], "night-shift");
        assert_eq!(value["state"]["notes"]["owner"], "ops");
        assert_eq!(value["settings"]["model_hint"], "fast");
    }

    #[test]
    fn corrupt_plan_is_a_loud_error() {
        let dir = TempDir::new().unwrap();
        let store = PlanStore::new(dir.path(), PlanKind::Extract);
        std::fs::write(store.path(), "{ not json").unwrap();
        let err = store.load().unwrap_err();
        assert!(matches!(err, StoryworkError::PlanCorrupt { .. }));
        assert!(err.to_string().contains("--force-refresh-plan"));
    }

    #[test]
    fn missing_plan_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = PlanStore::new(dir.path(), PlanKind::Publish);
        assert!(matches!(store.load(), Err(StoryworkError::PlanNotFound(_))));
    }

    #[tokio::test]
    async fn load_or_create_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = PlanStore::new(dir.path(), PlanKind::Rewrite);
        let (first, origin) = store
            .load_or_create(PlanSettings::default(), false, || async {
                Ok(keys(&["frontend/1", "frontend/2"]))
            })
            .await
            .unwrap();
        assert_eq!(origin, PlanOrigin::Created);

        let (second, origin) = store
            .load_or_create(PlanSettings::default(), false, || async {
                Err(StoryworkError::Config("existing plan was rescanned".into()))
            })
            .await
            .unwrap();
        assert_eq!(origin, PlanOrigin::Loaded { requeued: 0 });
        assert_eq!(first.state, second.state);
    }

    #[tokio::test]
    async fn crash_leaves_item_processing_and_next_load_requeues_it() {
        let dir = TempDir::new().unwrap();
        let store = PlanStore::new(dir.path(), PlanKind::Rewrite);
        let mut plan = Plan::new(PlanSettings::default(), keys(&["frontend/1", "frontend/2"]));
        plan.claim("frontend/2");
        store.save(&mut plan).unwrap();

        let on_disk = store.load().unwrap();
        assert_eq!(on_disk.state.processing, keys(&["frontend/2"]));

        let (plan, origin) = store
            .load_or_create(PlanSettings::default(), false, || async { Ok(vec![]) })
            .await
            .unwrap();
        assert_eq!(origin, PlanOrigin::Loaded { requeued: 1 });
        assert_eq!(plan.state.pending, keys(&["frontend/2", "frontend/1"]));
        assert!(store.load().unwrap().state.processing.is_empty());
    }

    #[tokio::test]
    async fn force_refresh_replaces_a_corrupt_plan() {
        let dir = TempDir::new().unwrap();
        let store = PlanStore::new(dir.path(), PlanKind::Extract);
        std::fs::write(store.path(), "garbage").unwrap();
        let (plan, origin) = store
            .load_or_create(PlanSettings::default(), true, || async { Ok(keys(&["backend/4"])) })
            .await
            .unwrap();
        assert_eq!(origin, PlanOrigin::Created);
        assert_eq!(plan.state.pending, keys(&["backend/4"]));
    }

    #[test]
    fn read_only_store_never_writes() {
        let dir = TempDir::new().unwrap();
        let store = PlanStore::new(dir.path(), PlanKind::Rewrite).read_only();
        let mut plan = Plan::new(PlanSettings::default(), keys(&["a"]));
        store.save(&mut plan).unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn plan_kind_parses() {
        assert_eq!("publish".parse::<PlanKind>().unwrap(), PlanKind::Publish);
        assert!("other".parse::<PlanKind>().is_err());
        assert_eq!(PlanKind::Rewrite.file_name(), ".rewrite_plan.json");
    }
}
