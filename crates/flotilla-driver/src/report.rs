//! Run reports — the structured outcome of a deployment run.
//!
//! Every descriptor's terminal state appears here, whatever happened to
//! it: applied, gated, rolled back, or skipped because an earlier wave
//! failed. The report serializes to JSON for logs or a dashboard.

use serde::{Deserialize, Serialize};

use flotilla_apply::ApplyOutcome;
use flotilla_endpoint::EndpointRecord;
use flotilla_health::RolloutStatus;
use flotilla_rollback::RollbackOutcome;

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    /// Every wave gated healthy. Endpoints may still be unresolved.
    Success,
    /// A wave failed, but every failing workload was restored to its
    /// previous healthy revision.
    PartialFailure,
    /// A wave failed and at least one workload could not be restored.
    Failure,
}

/// Final state of one workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadReport {
    pub name: String,
    pub tier: u32,
    pub wave: usize,
    /// Apply result; `None` when the wave was never reached.
    pub apply: Option<ApplyOutcome>,
    /// Revision assigned by the history, for accepted applies.
    pub revision: Option<u64>,
    pub revision_id: Option<String>,
    pub status: RolloutStatus,
    /// Rollback result, when one was attempted.
    pub rollback: Option<RollbackOutcome>,
}

/// Outcome of one wave.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaveReport {
    pub index: usize,
    /// False when an earlier wave's failure stopped the run first.
    pub reached: bool,
    pub healthy: bool,
    pub workloads: Vec<WorkloadReport>,
}

/// The structured result of one deployment run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub target: String,
    pub verdict: RunVerdict,
    pub waves: Vec<WaveReport>,
    /// One record per exposed workload; empty when the run failed before
    /// endpoint resolution.
    pub endpoints: Vec<EndpointRecord>,
    /// Unix timestamps (seconds).
    pub started_at: u64,
    pub finished_at: u64,
}

impl RunReport {
    /// Look a workload's report up by name.
    pub fn workload(&self, name: &str) -> Option<&WorkloadReport> {
        self.waves
            .iter()
            .flat_map(|w| w.workloads.iter())
            .find(|w| w.name == name)
    }

    /// The endpoint record for a workload, if one was resolved for it.
    pub fn endpoint(&self, name: &str) -> Option<&EndpointRecord> {
        self.endpoints.iter().find(|e| e.workload == name)
    }
}
