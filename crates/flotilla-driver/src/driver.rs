//! The deployment run state machine.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use flotilla_apply::{ApplyError, ApplyOptions, ApplyOutcome, apply_wave};
use flotilla_cluster::{ControlApi, RetryPolicy};
use flotilla_core::{Descriptor, DescriptorError, RawDescriptor, RunConfig};
use flotilla_endpoint::{ResolveOptions, resolve};
use flotilla_graph::{CycleError, Wave};
use flotilla_health::{GateOptions, RolloutStatus, gate_wave};
use flotilla_rollback::{
    RollbackError, RollbackOptions, RollbackOutcome, RollbackSeverity, rollback,
    rollback_to_previous,
};
use flotilla_state::{HistoryError, RevisionLog, RevisionOutcome};

use crate::report::{RunReport, RunVerdict, WaveReport, WorkloadReport};

/// Current phase of a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Resolving,
    Applying { wave: usize },
    Gating { wave: usize },
    RollingBack { wave: usize },
    ResolvingEndpoints,
    Done,
}

/// Pre-flight and infrastructure errors. A wave failing its gate is not a
/// `RunError` — it is reported through the [`RunReport`] verdict.
#[derive(Debug, Error)]
pub enum RunError {
    /// A second run was attempted while one is active on this driver.
    #[error("a deployment run is already in progress against this target")]
    RunInProgress,

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("rollback error: {0}")]
    Rollback(#[from] RollbackError),

    #[error("revision history error: {0}")]
    History(#[from] HistoryError),
}

/// Drives one deployment run end to end against a control plane.
pub struct Driver<C> {
    config: RunConfig,
    api: C,
    history: RevisionLog,
    in_flight: AtomicBool,
}

impl<C: ControlApi> Driver<C> {
    pub fn new(config: RunConfig, api: C, history: RevisionLog) -> Self {
        Self {
            config,
            api,
            history,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn history(&self) -> &RevisionLog {
        &self.history
    }

    /// Run a deployment with no external cancellation source.
    pub async fn run(&self, descriptors: Vec<RawDescriptor>) -> Result<RunReport, RunError> {
        let (_guard, cancel) = watch::channel(false);
        self.run_with_cancel(descriptors, cancel).await
    }

    /// Run a deployment; sending `true` on the channel aborts polling and
    /// lets the run wind down through its normal failure paths.
    ///
    /// One run at a time: a concurrent call fails with `RunInProgress`.
    pub async fn run_with_cancel(
        &self,
        descriptors: Vec<RawDescriptor>,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunReport, RunError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!(cluster = %self.config.target, "rejected concurrent deployment run");
            return Err(RunError::RunInProgress);
        }
        let result = self.run_inner(descriptors, cancel).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(
        &self,
        raws: Vec<RawDescriptor>,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunReport, RunError> {
        let started_at = epoch_secs();
        let mut phase = RunPhase::Idle;

        self.transition(&mut phase, RunPhase::Resolving);
        let descriptors = Descriptor::load_set(raws)?;
        let waves = flotilla_graph::resolve(&descriptors)?;
        info!(
            cluster = %self.config.target,
            workloads = descriptors.len(),
            waves = waves.len(),
            "deployment plan resolved"
        );

        let mut wave_reports: Vec<WaveReport> = Vec::with_capacity(waves.len());
        let mut failure_severity: Option<RollbackSeverity> = None;

        for wave in &waves {
            if failure_severity.is_some() {
                // Fail fast: later waves are never applied.
                wave_reports.push(skipped_wave(wave));
                continue;
            }

            self.transition(&mut phase, RunPhase::Applying { wave: wave.index });
            let applies =
                apply_wave(&self.api, &self.history, wave, &self.apply_opts()).await?;

            self.transition(&mut phase, RunPhase::Gating { wave: wave.index });
            let gated_names: Vec<String> = wave
                .members
                .iter()
                .filter(|d| applies.get(&d.name).is_some_and(ApplyOutcome::succeeded))
                .map(|d| d.name.clone())
                .collect();
            let mut statuses =
                gate_wave(&self.api, &gated_names, &self.gate_opts(cancel.clone())).await;

            // A member whose apply failed cannot converge; it gates as
            // failed without ever being polled.
            for (name, outcome) in &applies {
                if !outcome.succeeded() {
                    let reason = outcome
                        .failure_reason()
                        .unwrap_or("apply failed")
                        .to_string();
                    statuses.insert(name.clone(), RolloutStatus::Failed { reason });
                }
            }

            // Upgrade this run's revisions with their gate results so the
            // history only offers gate-confirmed rollback targets.
            for (name, status) in &statuses {
                if let Some(revision) = applies.get(name).and_then(ApplyOutcome::revision) {
                    self.history
                        .record_outcome(name, revision, revision_outcome(status))?;
                }
            }

            let failing: Vec<String> = wave
                .members
                .iter()
                .filter(|d| statuses.get(&d.name).is_some_and(|s| !s.is_healthy()))
                .map(|d| d.name.clone())
                .collect();

            if failing.is_empty() {
                info!(wave = wave.index, "wave healthy");
                wave_reports.push(wave_report(
                    wave,
                    &applies,
                    &statuses,
                    &BTreeMap::new(),
                    true,
                ));
                continue;
            }

            self.transition(&mut phase, RunPhase::RollingBack { wave: wave.index });
            warn!(
                wave = wave.index,
                failing = ?failing,
                "wave failed its health gate, rolling back failing workloads"
            );
            let rollback_report = rollback(
                &self.api,
                &self.history,
                &failing,
                &self.rollback_opts(cancel.clone()),
            )
            .await?;
            let mut severity = rollback_report.worst;

            wave_reports.push(wave_report(
                wave,
                &applies,
                &statuses,
                &rollback_report.outcomes,
                false,
            ));

            if self.config.cascade_rollback {
                let cascade_severity = self
                    .cascade(wave.index, &mut wave_reports, cancel.clone())
                    .await?;
                severity = severity.max(cascade_severity);
            }
            failure_severity = Some(severity);
        }

        let mut endpoints = Vec::new();
        if failure_severity.is_none() {
            self.transition(&mut phase, RunPhase::ResolvingEndpoints);
            let exposed: Vec<&Descriptor> = waves
                .iter()
                .flat_map(|w| w.members.iter())
                .filter(|d| d.expose)
                .collect();
            endpoints = join_all(exposed.iter().map(|d| {
                let opts = self.resolve_opts(cancel.clone());
                async move { resolve(&self.api, &d.name, &opts).await }
            }))
            .await;
        }

        self.transition(&mut phase, RunPhase::Done);
        let verdict = match failure_severity {
            None => RunVerdict::Success,
            Some(RollbackSeverity::Recovered) => RunVerdict::PartialFailure,
            Some(_) => RunVerdict::Failure,
        };
        info!(cluster = %self.config.target, ?verdict, "deployment run finished");

        Ok(RunReport {
            target: self.config.target.clone(),
            verdict,
            waves: wave_reports,
            endpoints,
            started_at,
            finished_at: epoch_secs(),
        })
    }

    /// Roll earlier, healthy waves back to what was healthy before this
    /// run. Runs in reverse wave order; only entered when the caller set
    /// `cascade_rollback`.
    async fn cascade(
        &self,
        failed_index: usize,
        reports: &mut [WaveReport],
        cancel: watch::Receiver<bool>,
    ) -> Result<RollbackSeverity, RunError> {
        let mut worst = RollbackSeverity::Recovered;
        let opts = self.rollback_opts(cancel);

        for report in reports[..failed_index].iter_mut().rev() {
            for workload in report.workloads.iter_mut() {
                let Some(revision) = workload.revision else {
                    continue;
                };
                let outcome = rollback_to_previous(
                    &self.api,
                    &self.history,
                    &workload.name,
                    revision,
                    &opts,
                )
                .await?;
                worst = worst.max(outcome.severity());
                workload.rollback = Some(outcome);
            }
        }
        Ok(worst)
    }

    fn transition(&self, phase: &mut RunPhase, next: RunPhase) {
        debug!(from = ?phase, to = ?next, "run phase transition");
        *phase = next;
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.config.control_attempts,
            base_delay: self.config.retry_base,
            max_delay: Duration::from_secs(60),
        }
    }

    fn apply_opts(&self) -> ApplyOptions {
        ApplyOptions {
            retry: self.retry_policy(),
        }
    }

    fn gate_opts(&self, cancel: watch::Receiver<bool>) -> GateOptions {
        GateOptions {
            interval: self.config.poll_interval,
            deadline: self.config.gate_deadline,
            confirmation_polls: self.config.confirmation_polls,
            retry: self.retry_policy(),
            cancel,
        }
    }

    fn resolve_opts(&self, cancel: watch::Receiver<bool>) -> ResolveOptions {
        ResolveOptions {
            interval: self.config.poll_interval,
            budget: self.config.endpoint_budget,
            retry: self.retry_policy(),
            cancel,
        }
    }

    fn rollback_opts(&self, cancel: watch::Receiver<bool>) -> RollbackOptions {
        RollbackOptions {
            apply: self.apply_opts(),
            gate: self.gate_opts(cancel),
        }
    }
}

/// Build the report for a wave that ran.
fn wave_report(
    wave: &Wave,
    applies: &BTreeMap<String, ApplyOutcome>,
    statuses: &BTreeMap<String, RolloutStatus>,
    rollbacks: &BTreeMap<String, RollbackOutcome>,
    healthy: bool,
) -> WaveReport {
    let workloads = wave
        .members
        .iter()
        .map(|d| {
            let apply = applies.get(&d.name).cloned();
            let revision = apply.as_ref().and_then(ApplyOutcome::revision);
            let revision_id = match &apply {
                Some(ApplyOutcome::Applied { revision_id, .. }) => Some(revision_id.clone()),
                _ => None,
            };
            WorkloadReport {
                name: d.name.clone(),
                tier: d.tier,
                wave: wave.index,
                apply,
                revision,
                revision_id,
                status: statuses
                    .get(&d.name)
                    .cloned()
                    .unwrap_or(RolloutStatus::Pending),
                rollback: rollbacks.get(&d.name).cloned(),
            }
        })
        .collect();

    WaveReport {
        index: wave.index,
        reached: true,
        healthy,
        workloads,
    }
}

/// Build the report for a wave an earlier failure prevented.
fn skipped_wave(wave: &Wave) -> WaveReport {
    let workloads = wave
        .members
        .iter()
        .map(|d| WorkloadReport {
            name: d.name.clone(),
            tier: d.tier,
            wave: wave.index,
            apply: None,
            revision: None,
            revision_id: None,
            status: RolloutStatus::Pending,
            rollback: None,
        })
        .collect();

    WaveReport {
        index: wave.index,
        reached: false,
        healthy: false,
        workloads,
    }
}

/// Map a terminal gate status onto the history outcome for the revision.
fn revision_outcome(status: &RolloutStatus) -> RevisionOutcome {
    match status {
        RolloutStatus::Healthy => RevisionOutcome::Healthy,
        RolloutStatus::TimedOut => RevisionOutcome::TimedOut,
        _ => RevisionOutcome::Failed,
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
