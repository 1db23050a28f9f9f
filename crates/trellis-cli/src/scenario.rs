//! Scripted engine sessions read from JSON.
//!
//! A scenario is a list of steps run in order. A `concurrent` step starts
//! its children together and waits for all of them, which is how races
//! like a double submit or a refresh during a slow page load are staged.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, info};
use trellis_core::{LoadOutcome, MutationOutcome, RefreshSummary, SyncEngine, SyncError};
use trellis_shared::{BoardFilter, ItemCreate, ItemId, Status};

use crate::datastore::{FaultPlan, JsonlStore};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    /// Demo items to seed before the first step, if any.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub faults: FaultPlan,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Mount,
    LoadMore {
        column: Status,
    },
    Move {
        item: ItemId,
        from: Status,
        to: Status,
    },
    SetStatus {
        item: ItemId,
        status: Status,
    },
    SetProgress {
        item: ItemId,
        progress: u8,
    },
    Refresh,
    FlatPage {
        page: u32,
        page_size: u32,
    },
    SetFilter {
        #[serde(default)]
        filter: BoardFilter,
    },
    Create {
        item: ItemCreate,
    },
    Delete {
        item: ItemId,
    },
    /// Replace the store's fault plan from here on.
    Faults {
        plan: FaultPlan,
    },
    Sleep {
        ms: u64,
    },
    Concurrent {
        steps: Vec<Step>,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Mount => write!(f, "mount"),
            Step::LoadMore { column } => write!(f, "load more {column}"),
            Step::Move { item, from, to } => write!(f, "move {item} {from} -> {to}"),
            Step::SetStatus { item, status } => write!(f, "status {item} -> {status}"),
            Step::SetProgress { item, progress } => write!(f, "progress {item} -> {progress}%"),
            Step::Refresh => write!(f, "refresh"),
            Step::FlatPage { page, page_size } => write!(f, "grid page {page} x{page_size}"),
            Step::SetFilter { filter } => write!(f, "filter {filter:?}"),
            Step::Create { item } => write!(f, "create {:?}", item.name),
            Step::Delete { item } => write!(f, "delete {item}"),
            Step::Faults { .. } => write!(f, "faults"),
            Step::Sleep { ms } => write!(f, "sleep {ms}ms"),
            Step::Concurrent { steps } => write!(f, "concurrent x{}", steps.len()),
        }
    }
}

/// How one step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: String,
    pub ok: bool,
    pub detail: String,
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.ok { "ok " } else { "ERR" };
        write!(f, "{mark} {}: {}", self.step, self.detail)
    }
}

impl Scenario {
    #[tracing::instrument]
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse scenario {}", path.display()))
    }

    /// Run every step. Step failures are reported, not propagated.
    #[tracing::instrument(skip_all, fields(name = %self.name, steps = self.steps.len()))]
    pub async fn run(&self, engine: &SyncEngine<JsonlStore>) -> anyhow::Result<Vec<StepReport>> {
        if let Some(count) = self.seed {
            engine.store().seed(count)?;
        }
        engine.store().set_faults(self.faults.clone());

        let mut reports = Vec::new();
        for step in &self.steps {
            reports.extend(run_step(engine, step).await);
        }
        info!(
            failed = reports.iter().filter(|report| !report.ok).count(),
            "scenario finished"
        );
        Ok(reports)
    }
}

async fn run_step(engine: &SyncEngine<JsonlStore>, step: &Step) -> Vec<StepReport> {
    debug!(%step, "running step");
    let label = step.to_string();
    let report = |result: Result<String, SyncError>| StepReport {
        step: label.clone(),
        ok: result.is_ok(),
        detail: result.unwrap_or_else(|err| err.to_string()),
    };

    let single = match step {
        Step::Mount => Ok(describe_refresh(&engine.mount().await)),
        Step::LoadMore { column } => engine.load_more(*column).await.map(|o| describe_load(&o)),
        Step::Move { item, from, to } => engine
            .move_item(*item, *from, *to)
            .await
            .map(|o| describe_mutation(&o)),
        Step::SetStatus { item, status } => engine
            .set_status(*item, *status)
            .await
            .map(|o| describe_mutation(&o)),
        Step::SetProgress { item, progress } => engine
            .set_progress(*item, *progress)
            .await
            .map(|o| describe_mutation(&o)),
        Step::Refresh => Ok(describe_refresh(&engine.refresh_all().await)),
        Step::FlatPage { page, page_size } => engine
            .change_flat_page(*page, *page_size)
            .await
            .map(|o| describe_load(&o)),
        Step::SetFilter { filter } => Ok(describe_refresh(
            &engine.set_filter(filter.clone()).await,
        )),
        Step::Create { item } => engine
            .create_item(item.clone())
            .await
            .map(|created| format!("created item {}", created.id)),
        Step::Delete { item } => engine
            .delete_item(*item)
            .await
            .map(|()| format!("deleted item {item}")),
        Step::Faults { plan } => {
            engine.store().set_faults(plan.clone());
            Ok(format!("{plan:?}"))
        }
        Step::Sleep { ms } => {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            Ok(String::from("slept"))
        }
        Step::Concurrent { steps } => {
            let runs = steps.iter().map(|child| Box::pin(run_step(engine, child)));
            let mut reports: Vec<StepReport> = join_all(runs).await.into_iter().flatten().collect();
            for child in &mut reports {
                child.step = format!("  {}", child.step);
            }
            let failed = reports.iter().filter(|child| !child.ok).count();
            reports.insert(
                0,
                StepReport {
                    step: label.clone(),
                    ok: true,
                    detail: format!("{} ran, {failed} failed", steps.len()),
                },
            );
            return reports;
        }
    };

    vec![report(single)]
}

fn describe_load(outcome: &LoadOutcome) -> String {
    match outcome {
        LoadOutcome::Applied {
            page,
            appended,
            has_more,
        } => {
            let tail = if *has_more { "more to load" } else { "last page" };
            format!("page {page} applied, {appended} new, {tail}")
        }
        LoadOutcome::Skipped { reason } => format!("skipped ({reason:?})"),
        LoadOutcome::Stale => "stale response discarded".to_string(),
    }
}

fn describe_mutation(outcome: &MutationOutcome) -> String {
    match outcome {
        MutationOutcome::Confirmed(item) => {
            format!("confirmed: {} at {}%", item.status, item.progress)
        }
        MutationOutcome::Superseded(item) => {
            format!("accepted after a refresh: {} at {}%", item.status, item.progress)
        }
        MutationOutcome::Unchanged => "nothing to change".to_string(),
    }
}

fn describe_refresh(summary: &RefreshSummary) -> String {
    let failures = summary.failures();
    if failures.is_empty() {
        format!("generation {} loaded", summary.generation)
    } else {
        let messages: Vec<String> = failures.iter().map(|err| err.to_string()).collect();
        format!(
            "generation {} with {} failed load(s): {}",
            summary.generation,
            failures.len(),
            messages.join("; ")
        )
    }
}
