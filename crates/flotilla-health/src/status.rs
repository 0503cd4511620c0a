//! Rollout status and the per-workload gate state machine.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flotilla_cluster::RolloutObservation;

/// Observed rollout state of one workload during a run. Transient —
/// replaced on each poll, not persisted beyond the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RolloutStatus {
    /// Not yet observed.
    Pending,
    /// Observed but not yet confirmed ready.
    Progressing,
    /// Ready replicas covered the desired count, sustained through the
    /// confirmation poll.
    Healthy,
    /// The control plane signalled the rollout cannot converge.
    Failed { reason: String },
    /// The gate deadline expired (or the run was cancelled) first.
    TimedOut,
}

impl RolloutStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RolloutStatus::Healthy | RolloutStatus::Failed { .. } | RolloutStatus::TimedOut
        )
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, RolloutStatus::Healthy)
    }
}

/// Debounced readiness tracker for one workload.
///
/// `Healthy` requires the ready count to cover the desired count for the
/// first satisfying poll plus `confirmation_polls` further polls, so a
/// single flapping observation cannot pass the gate. An explicit failure
/// signal is terminal immediately.
#[derive(Debug)]
pub struct GateTracker {
    workload: String,
    status: RolloutStatus,
    satisfied_streak: u32,
    confirmation_polls: u32,
}

impl GateTracker {
    pub fn new(workload: &str, confirmation_polls: u32) -> Self {
        Self {
            workload: workload.to_string(),
            status: RolloutStatus::Pending,
            satisfied_streak: 0,
            confirmation_polls,
        }
    }

    /// Record one observation and return the updated status.
    pub fn record(&mut self, obs: &RolloutObservation) -> &RolloutStatus {
        if self.status.is_terminal() {
            return &self.status;
        }

        if let Some(failure) = &obs.failure {
            warn!(workload = %self.workload, %failure, "rollout failed");
            self.status = RolloutStatus::Failed {
                reason: failure.to_string(),
            };
            return &self.status;
        }

        if obs.ready >= obs.desired {
            self.satisfied_streak += 1;
            if self.satisfied_streak > self.confirmation_polls {
                debug!(
                    workload = %self.workload,
                    ready = obs.ready,
                    desired = obs.desired,
                    "rollout confirmed healthy"
                );
                self.status = RolloutStatus::Healthy;
            } else {
                self.status = RolloutStatus::Progressing;
            }
        } else {
            self.satisfied_streak = 0;
            self.status = RolloutStatus::Progressing;
        }
        &self.status
    }

    /// Force a timeout. No-op once the tracker is terminal.
    pub fn time_out(&mut self) {
        if !self.status.is_terminal() {
            self.status = RolloutStatus::TimedOut;
        }
    }

    pub fn status(&self) -> &RolloutStatus {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_cluster::RolloutFailure;

    fn obs(ready: u32, desired: u32) -> RolloutObservation {
        RolloutObservation {
            desired,
            ready,
            failure: None,
        }
    }

    #[test]
    fn starts_pending() {
        let tracker = GateTracker::new("db", 1);
        assert_eq!(*tracker.status(), RolloutStatus::Pending);
    }

    #[test]
    fn one_satisfying_poll_is_not_enough() {
        let mut tracker = GateTracker::new("db", 1);
        let status = tracker.record(&obs(2, 2));
        assert_eq!(*status, RolloutStatus::Progressing);
    }

    #[test]
    fn confirmation_poll_promotes_to_healthy() {
        let mut tracker = GateTracker::new("db", 1);
        tracker.record(&obs(2, 2));
        let status = tracker.record(&obs(2, 2));
        assert_eq!(*status, RolloutStatus::Healthy);
    }

    #[test]
    fn flapping_resets_the_streak() {
        let mut tracker = GateTracker::new("db", 1);
        tracker.record(&obs(2, 2));
        tracker.record(&obs(1, 2)); // Flap.
        let status = tracker.record(&obs(2, 2));
        assert_eq!(*status, RolloutStatus::Progressing);

        let status = tracker.record(&obs(2, 2));
        assert_eq!(*status, RolloutStatus::Healthy);
    }

    #[test]
    fn zero_confirmation_promotes_on_first_satisfying_poll() {
        let mut tracker = GateTracker::new("db", 0);
        let status = tracker.record(&obs(1, 1));
        assert_eq!(*status, RolloutStatus::Healthy);
    }

    #[test]
    fn zero_desired_replicas_satisfy_immediately() {
        let mut tracker = GateTracker::new("db", 1);
        tracker.record(&obs(0, 0));
        let status = tracker.record(&obs(0, 0));
        assert_eq!(*status, RolloutStatus::Healthy);
    }

    #[test]
    fn failure_signal_is_immediately_terminal() {
        let mut tracker = GateTracker::new("app", 1);
        tracker.record(&obs(1, 2));
        let status = tracker.record(&RolloutObservation {
            desired: 2,
            ready: 1,
            failure: Some(RolloutFailure::CrashLoop { restarts: 5 }),
        });
        assert_eq!(
            *status,
            RolloutStatus::Failed {
                reason: "crash loop (5 restarts)".to_string()
            }
        );

        // Later observations cannot resurrect a failed gate.
        let status = tracker.record(&obs(2, 2)).clone();
        assert!(matches!(status, RolloutStatus::Failed { .. }));
    }

    #[test]
    fn time_out_is_terminal_unless_already_settled() {
        let mut tracker = GateTracker::new("app", 1);
        tracker.record(&obs(0, 2));
        tracker.time_out();
        assert_eq!(*tracker.status(), RolloutStatus::TimedOut);

        let mut healthy = GateTracker::new("db", 0);
        healthy.record(&obs(1, 1));
        healthy.time_out();
        assert_eq!(*healthy.status(), RolloutStatus::Healthy);
    }
}
