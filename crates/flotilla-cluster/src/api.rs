//! The control API — the three operations the orchestrator needs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use flotilla_core::Descriptor;

/// Errors surfaced by a control plane.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The control plane declined the spec (validation, quota).
    #[error("control plane rejected the spec: {0}")]
    Rejected(String),

    /// The control plane could not be reached. Transient; retried with
    /// bounded backoff before being surfaced.
    #[error("control plane unreachable: {0}")]
    Unreachable(String),

    #[error("workload not found: {0}")]
    NotFound(String),
}

/// Acknowledgement of a create-or-update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyAck {
    /// Control-plane generation after this apply.
    pub generation: u64,
    /// False when the submitted spec matched the stored one — the
    /// idempotence signal.
    pub changed: bool,
}

/// Point-in-time rollout state for one workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutObservation {
    pub desired: u32,
    pub ready: u32,
    /// Set when the control plane knows the rollout cannot converge.
    pub failure: Option<RolloutFailure>,
}

/// An explicit can't-converge signal from the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RolloutFailure {
    CrashLoop { restarts: u32 },
    SchedulingFailed { reason: String },
}

impl fmt::Display for RolloutFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloutFailure::CrashLoop { restarts } => {
                write!(f, "crash loop ({restarts} restarts)")
            }
            RolloutFailure::SchedulingFailed { reason } => {
                write!(f, "scheduling failed: {reason}")
            }
        }
    }
}

/// The cluster's management interface, as the orchestrator sees it.
///
/// Implementations must be idempotent on `apply_workload`: re-applying an
/// identical descriptor is a state-wise no-op (`changed == false`, same
/// generation).
pub trait ControlApi: Send + Sync {
    /// Create or update a workload, keyed by descriptor name.
    async fn apply_workload(&self, descriptor: &Descriptor) -> Result<ApplyAck, ControlError>;

    /// Observe the rollout state of a named workload.
    async fn rollout_status(&self, workload: &str) -> Result<RolloutObservation, ControlError>;

    /// The externally routable address of a named workload, once the
    /// cluster's load balancer has assigned one.
    async fn external_address(&self, workload: &str) -> Result<Option<String>, ControlError>;
}

impl<C: ControlApi> ControlApi for std::sync::Arc<C> {
    async fn apply_workload(&self, descriptor: &Descriptor) -> Result<ApplyAck, ControlError> {
        (**self).apply_workload(descriptor).await
    }

    async fn rollout_status(&self, workload: &str) -> Result<RolloutObservation, ControlError> {
        (**self).rollout_status(workload).await
    }

    async fn external_address(&self, workload: &str) -> Result<Option<String>, ControlError> {
        (**self).external_address(workload).await
    }
}
