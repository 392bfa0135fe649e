use super::Global;
use crate::output::{print_json, print_table};
use clap::Subcommand;
use serde::Serialize;
use storywork_core::plan::{Plan, PlanCounts, PlanKind, PlanStore};
use storywork_core::StoryworkError;

// ---------------------------------------------------------------------------
// Subcommand definition
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
pub enum PlanSubcommand {
    /// Show partition counts and check that every key sits in exactly one partition
    Show {
        /// extract, rewrite or publish (default: every plan present)
        #[arg(long)]
        kind: Option<PlanKind>,
    },
}

pub fn run(global: &Global, subcommand: PlanSubcommand) -> anyhow::Result<()> {
    match subcommand {
        PlanSubcommand::Show { kind } => show(global, kind),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PlanView {
    kind: &'static str,
    path: String,
    version: String,
    updated_at: String,
    counts: PlanCounts,
    violations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    top_errors: Vec<(String, usize)>,
}

fn view(kind: PlanKind, store: &PlanStore, plan: &Plan, verbose: bool) -> PlanView {
    PlanView {
        kind: kind.as_str(),
        path: store.path().display().to_string(),
        version: plan.version.clone(),
        updated_at: plan.updated_at.to_rfc3339(),
        counts: plan.counts(),
        violations: plan.partition_violations(),
        top_errors: if verbose { plan.top_errors(5) } else { Vec::new() },
    }
}

fn show(global: &Global, kind: Option<PlanKind>) -> anyhow::Result<()> {
    let kinds = match kind {
        Some(k) => vec![k],
        None => PlanKind::all().to_vec(),
    };
    let mut views = Vec::new();
    for k in kinds {
        let store = PlanStore::new(&global.root, k);
        match store.load() {
            Ok(plan) => views.push(view(k, &store, &plan, global.verbose)),
            Err(StoryworkError::PlanNotFound(_)) if kind.is_none() => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if global.json {
        print_json(&views)?;
    } else if views.is_empty() {
        println!("No plans under {}.", global.root.display());
    } else {
        let rows = views
            .iter()
            .map(|v| {
                vec![
                    v.kind.to_string(),
                    v.counts.pending.to_string(),
                    v.counts.processing.to_string(),
                    v.counts.completed.to_string(),
                    v.counts.failed.to_string(),
                    v.counts.skipped.to_string(),
                    v.updated_at.clone(),
                ]
            })
            .collect();
        print_table(
            &["KIND", "PENDING", "PROCESSING", "COMPLETED", "FAILED", "SKIPPED", "UPDATED"],
            rows,
        );
        for v in &views {
            for (message, count) in &v.top_errors {
                println!("{}: {count}x {message}", v.kind);
            }
        }
    }

    let broken: Vec<&str> = views
        .iter()
        .filter(|v| !v.violations.is_empty())
        .map(|v| v.kind)
        .collect();
    if !broken.is_empty() {
        for v in &views {
            for violation in &v.violations {
                eprintln!("{}: {violation}", v.kind);
            }
        }
        anyhow::bail!("partition invariant violated in: {}", broken.join(", "));
    }
    Ok(())
}
