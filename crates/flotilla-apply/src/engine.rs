//! Create-or-update execution for one wave.

use std::collections::BTreeMap;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use flotilla_cluster::{ControlApi, ControlError, RetryPolicy, with_backoff};
use flotilla_core::Descriptor;
use flotilla_graph::Wave;
use flotilla_state::{HistoryError, RevisionLog, RevisionOutcome};

/// Infrastructure failures during an apply. Per-descriptor control-plane
/// outcomes are values ([`ApplyOutcome`]), not errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("revision history error: {0}")]
    History(#[from] HistoryError),
}

/// Options for one wave's apply pass.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub retry: RetryPolicy,
}

/// Per-descriptor result of a create-or-update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The control plane accepted the spec.
    Applied {
        revision: u64,
        revision_id: String,
        /// False when the spec matched what the cluster already ran.
        changed: bool,
    },
    /// The control plane declined the spec.
    Rejected { reason: String },
    /// The control plane stayed unreachable through the retry budget.
    Unreachable { reason: String },
}

impl ApplyOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }

    /// The failure reason, for outcomes that carry one.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ApplyOutcome::Applied { .. } => None,
            ApplyOutcome::Rejected { reason } | ApplyOutcome::Unreachable { reason } => {
                Some(reason)
            }
        }
    }

    /// The revision number assigned by the history, for accepted applies.
    pub fn revision(&self) -> Option<u64> {
        match self {
            ApplyOutcome::Applied { revision, .. } => Some(*revision),
            _ => None,
        }
    }
}

/// Apply every member of a wave concurrently.
///
/// Returns outcomes keyed by workload name. Only a history failure aborts
/// the pass; control-plane failures are per-member outcomes.
pub async fn apply_wave<C: ControlApi>(
    api: &C,
    history: &RevisionLog,
    wave: &Wave,
    opts: &ApplyOptions,
) -> Result<BTreeMap<String, ApplyOutcome>, ApplyError> {
    let results = join_all(
        wave.members
            .iter()
            .map(|descriptor| async move {
                let outcome = apply_one(api, history, descriptor, opts).await?;
                Ok::<_, ApplyError>((descriptor.name.clone(), outcome))
            }),
    )
    .await;

    let mut outcomes = BTreeMap::new();
    for result in results {
        let (name, outcome) = result?;
        outcomes.insert(name, outcome);
    }
    Ok(outcomes)
}

/// Apply a single descriptor with bounded retry, recording the attempt in
/// the revision history regardless of outcome.
pub async fn apply_one<C: ControlApi>(
    api: &C,
    history: &RevisionLog,
    descriptor: &Descriptor,
    opts: &ApplyOptions,
) -> Result<ApplyOutcome, ApplyError> {
    let ack = with_backoff(&opts.retry, || api.apply_workload(descriptor)).await;

    let outcome = match ack {
        Ok(ack) => {
            let record = history.append(descriptor, RevisionOutcome::Applied)?;
            info!(
                workload = %descriptor.name,
                revision = record.revision,
                revision_id = %record.revision_id,
                generation = ack.generation,
                changed = ack.changed,
                "workload applied"
            );
            ApplyOutcome::Applied {
                revision: record.revision,
                revision_id: record.revision_id,
                changed: ack.changed,
            }
        }
        Err(ControlError::Unreachable(reason)) => {
            history.append(descriptor, RevisionOutcome::Unreachable)?;
            warn!(workload = %descriptor.name, %reason, "apply abandoned, control plane unreachable");
            ApplyOutcome::Unreachable { reason }
        }
        Err(ControlError::Rejected(reason)) | Err(ControlError::NotFound(reason)) => {
            history.append(descriptor, RevisionOutcome::Rejected)?;
            warn!(workload = %descriptor.name, %reason, "apply rejected");
            ApplyOutcome::Rejected { reason }
        }
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use flotilla_cluster::{ApplyFault, SimCluster};
    use flotilla_core::RawDescriptor;

    fn descriptor(name: &str, image: &str) -> Descriptor {
        Descriptor::load(RawDescriptor {
            name: Some(name.to_string()),
            image: Some(image.to_string()),
            ..RawDescriptor::default()
        })
        .unwrap()
    }

    fn wave(members: Vec<Descriptor>) -> Wave {
        Wave { index: 0, members }
    }

    fn fast_opts() -> ApplyOptions {
        ApplyOptions {
            retry: RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(8),
            },
        }
    }

    #[tokio::test]
    async fn applies_and_records_revision() {
        let sim = SimCluster::new();
        let history = RevisionLog::open_in_memory(20).unwrap();
        let d = descriptor("db", "db:v1");

        let outcomes = apply_wave(&sim, &history, &wave(vec![d.clone()]), &fast_opts())
            .await
            .unwrap();

        match &outcomes["db"] {
            ApplyOutcome::Applied {
                revision, changed, ..
            } => {
                assert_eq!(*revision, 1);
                assert!(changed);
            }
            other => panic!("expected Applied, got {other:?}"),
        }

        let record = history.latest("db").unwrap().unwrap();
        assert_eq!(record.outcome, RevisionOutcome::Applied);
        assert_eq!(record.descriptor, d);
    }

    #[tokio::test]
    async fn identical_reapply_reports_unchanged() {
        let sim = SimCluster::new();
        let history = RevisionLog::open_in_memory(20).unwrap();
        let d = descriptor("db", "db:v1");

        apply_one(&sim, &history, &d, &fast_opts()).await.unwrap();
        let second = apply_one(&sim, &history, &d, &fast_opts()).await.unwrap();

        match second {
            ApplyOutcome::Applied {
                revision, changed, ..
            } => {
                assert_eq!(revision, 2);
                assert!(!changed);
            }
            other => panic!("expected Applied, got {other:?}"),
        }
        assert_eq!(sim.generation("db").await, Some(1));
    }

    #[tokio::test]
    async fn rejection_recorded_and_isolated_from_siblings() {
        let sim = SimCluster::new();
        sim.inject_apply_fault("bad", ApplyFault::Reject("quota exceeded".to_string()))
            .await;
        let history = RevisionLog::open_in_memory(20).unwrap();

        let members = vec![descriptor("bad", "bad:v1"), descriptor("good", "good:v1")];
        let outcomes = apply_wave(&sim, &history, &wave(members), &fast_opts())
            .await
            .unwrap();

        assert!(matches!(
            outcomes["bad"],
            ApplyOutcome::Rejected { ref reason } if reason == "quota exceeded"
        ));
        assert!(outcomes["good"].succeeded());

        // Both attempts were recorded.
        assert_eq!(
            history.latest("bad").unwrap().unwrap().outcome,
            RevisionOutcome::Rejected
        );
        assert_eq!(
            history.latest("good").unwrap().unwrap().outcome,
            RevisionOutcome::Applied
        );
    }

    #[tokio::test]
    async fn transient_unreachability_retried_to_success() {
        let sim = SimCluster::new();
        sim.inject_apply_fault("db", ApplyFault::UnreachableFor(2))
            .await;
        let history = RevisionLog::open_in_memory(20).unwrap();

        let outcome = apply_one(&sim, &history, &descriptor("db", "db:v1"), &fast_opts())
            .await
            .unwrap();
        assert!(outcome.succeeded());
    }

    #[tokio::test]
    async fn exhausted_retries_surface_unreachable() {
        let sim = SimCluster::new();
        sim.inject_apply_fault("db", ApplyFault::UnreachableFor(10))
            .await;
        let history = RevisionLog::open_in_memory(20).unwrap();

        let outcome = apply_one(&sim, &history, &descriptor("db", "db:v1"), &fast_opts())
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Unreachable { .. }));
        assert_eq!(
            history.latest("db").unwrap().unwrap().outcome,
            RevisionOutcome::Unreachable
        );
    }
}
