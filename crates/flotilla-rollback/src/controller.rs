//! Per-workload rollback: last-healthy lookup, re-apply, re-gate.

use std::collections::BTreeMap;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use flotilla_apply::{ApplyError, ApplyOptions, ApplyOutcome, apply_one};
use flotilla_cluster::ControlApi;
use flotilla_health::{GateOptions, RolloutStatus, gate_workload};
use flotilla_state::{HistoryError, RevisionLog, RevisionOutcome, RevisionRecord};

/// Infrastructure failures during rollback. Per-workload results are
/// values ([`RollbackOutcome`]).
#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("apply error during rollback: {0}")]
    Apply(#[from] ApplyError),

    #[error("revision history error: {0}")]
    History(#[from] HistoryError),
}

/// Options for one rollback pass.
#[derive(Debug, Clone)]
pub struct RollbackOptions {
    pub apply: ApplyOptions,
    pub gate: GateOptions,
}

/// Per-workload rollback result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// The last healthy revision was re-applied and gated healthy again.
    Restored { revision: u64, revision_id: String },
    /// A target existed but did not converge when re-applied.
    RestoreFailed { status: RolloutStatus },
    /// No healthy revision exists; the workload is left untouched.
    NoRollbackTarget,
}

impl RollbackOutcome {
    pub fn severity(&self) -> RollbackSeverity {
        match self {
            RollbackOutcome::Restored { .. } => RollbackSeverity::Recovered,
            RollbackOutcome::NoRollbackTarget => RollbackSeverity::Degraded,
            RollbackOutcome::RestoreFailed { .. } => RollbackSeverity::Failed,
        }
    }
}

/// Aggregate severity, worst case across the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackSeverity {
    /// Every failing workload was restored.
    Recovered,
    /// At least one workload had no rollback target.
    Degraded,
    /// At least one restore attempt itself failed.
    Failed,
}

/// Aggregated result of one rollback pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackReport {
    pub outcomes: BTreeMap<String, RollbackOutcome>,
    pub worst: RollbackSeverity,
}

/// Roll every failing workload back to its last healthy revision.
///
/// Workloads roll back concurrently and independently: one member's
/// missing target never blocks a sibling's restore.
pub async fn rollback<C: ControlApi>(
    api: &C,
    history: &RevisionLog,
    failures: &[String],
    opts: &RollbackOptions,
) -> Result<RollbackReport, RollbackError> {
    let results = join_all(failures.iter().map(|workload| async move {
        let target = history.last_healthy(workload)?;
        let outcome = restore(api, history, workload, target, opts).await?;
        Ok::<_, RollbackError>((workload.clone(), outcome))
    }))
    .await;

    let mut outcomes = BTreeMap::new();
    for result in results {
        let (workload, outcome) = result?;
        outcomes.insert(workload, outcome);
    }
    Ok(report(outcomes))
}

/// Roll a workload back to the most recent healthy revision strictly older
/// than `before_revision`. Used for cascading rollback of waves that gated
/// healthy in the current run.
pub async fn rollback_to_previous<C: ControlApi>(
    api: &C,
    history: &RevisionLog,
    workload: &str,
    before_revision: u64,
    opts: &RollbackOptions,
) -> Result<RollbackOutcome, RollbackError> {
    let target = history.last_healthy_before(workload, before_revision)?;
    restore(api, history, workload, target, opts).await
}

/// Re-apply a rollback target and re-gate it.
async fn restore<C: ControlApi>(
    api: &C,
    history: &RevisionLog,
    workload: &str,
    target: Option<RevisionRecord>,
    opts: &RollbackOptions,
) -> Result<RollbackOutcome, RollbackError> {
    let Some(target) = target else {
        warn!(%workload, "no healthy revision to roll back to, leaving workload as-is");
        return Ok(RollbackOutcome::NoRollbackTarget);
    };

    info!(
        %workload,
        revision = target.revision,
        revision_id = %target.revision_id,
        "rolling back to last healthy revision"
    );

    let outcome = apply_one(api, history, &target.descriptor, &opts.apply).await?;
    let (revision, revision_id) = match &outcome {
        ApplyOutcome::Applied {
            revision,
            revision_id,
            ..
        } => (*revision, revision_id.clone()),
        _ => {
            let reason = outcome
                .failure_reason()
                .unwrap_or("apply failed")
                .to_string();
            warn!(%workload, %reason, "rollback apply failed");
            return Ok(RollbackOutcome::RestoreFailed {
                status: RolloutStatus::Failed { reason },
            });
        }
    };

    let status = gate_workload(api, workload, &opts.gate).await;
    if status.is_healthy() {
        history.record_outcome(workload, revision, RevisionOutcome::Healthy)?;
        info!(%workload, revision, "rollback restored workload to healthy");
        Ok(RollbackOutcome::Restored {
            revision,
            revision_id,
        })
    } else {
        history.record_outcome(workload, revision, outcome_of(&status))?;
        warn!(%workload, revision, ?status, "rollback did not converge");
        Ok(RollbackOutcome::RestoreFailed { status })
    }
}

fn report(outcomes: BTreeMap<String, RollbackOutcome>) -> RollbackReport {
    let worst = outcomes
        .values()
        .map(RollbackOutcome::severity)
        .max()
        .unwrap_or(RollbackSeverity::Recovered);
    RollbackReport { outcomes, worst }
}

fn outcome_of(status: &RolloutStatus) -> RevisionOutcome {
    match status {
        RolloutStatus::TimedOut => RevisionOutcome::TimedOut,
        _ => RevisionOutcome::Failed,
    }
}
