//! Gating loops — drive the tracker from control-plane polls.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, warn};

use flotilla_cluster::{ControlApi, Poller, RetryPolicy, Tick, with_backoff};

use crate::status::{GateTracker, RolloutStatus};

/// Options for one gating pass.
#[derive(Debug, Clone)]
pub struct GateOptions {
    /// Interval between status polls.
    pub interval: Duration,
    /// Wall-clock budget before the gate times out.
    pub deadline: Duration,
    /// Satisfying polls required beyond the first (debounce).
    pub confirmation_polls: u32,
    /// Retry budget for each individual status call.
    pub retry: RetryPolicy,
    /// Run-wide cancellation signal.
    pub cancel: watch::Receiver<bool>,
}

impl GateOptions {
    pub fn new(interval: Duration, deadline: Duration, cancel: watch::Receiver<bool>) -> Self {
        Self {
            interval,
            deadline,
            confirmation_polls: 1,
            retry: RetryPolicy::default(),
            cancel,
        }
    }
}

/// Poll one workload's rollout until the gate settles.
///
/// Cancellation and deadline expiry both yield `TimedOut`. A transient
/// status failure past its retry budget counts as a missed observation —
/// the deadline still bounds the gate, so nothing polls forever.
pub async fn gate_workload<C: ControlApi>(
    api: &C,
    workload: &str,
    opts: &GateOptions,
) -> RolloutStatus {
    let mut tracker = GateTracker::new(workload, opts.confirmation_polls);
    let mut poller = Poller::new(opts.interval, opts.deadline, opts.cancel.clone());

    loop {
        match poller.tick().await {
            Tick::Poll => match with_backoff(&opts.retry, || api.rollout_status(workload)).await {
                Ok(obs) => {
                    let status = tracker.record(&obs);
                    debug!(
                        %workload,
                        ready = obs.ready,
                        desired = obs.desired,
                        ?status,
                        "rollout observed"
                    );
                    if status.is_terminal() {
                        return status.clone();
                    }
                }
                Err(e) => {
                    debug!(%workload, error = %e, "rollout status unavailable");
                }
            },
            Tick::DeadlineExpired => {
                tracker.time_out();
                warn!(%workload, "health gate deadline expired");
                return tracker.status().clone();
            }
            Tick::Cancelled => {
                tracker.time_out();
                warn!(%workload, "health gate cancelled");
                return tracker.status().clone();
            }
        }
    }
}

/// Gate a set of workloads concurrently. Returns statuses keyed by name.
pub async fn gate_wave<C: ControlApi>(
    api: &C,
    workloads: &[String],
    opts: &GateOptions,
) -> BTreeMap<String, RolloutStatus> {
    join_all(workloads.iter().map(|workload| async move {
        (workload.clone(), gate_workload(api, workload, opts).await)
    }))
    .await
    .into_iter()
    .collect()
}

/// A wave is healthy only when every member gated healthy.
pub fn wave_healthy(statuses: &BTreeMap<String, RolloutStatus>) -> bool {
    statuses.values().all(RolloutStatus::is_healthy)
}

#[cfg(test)]
mod tests {
    use super::*;

    use flotilla_cluster::{Behavior, SimCluster};
    use flotilla_core::{Descriptor, RawDescriptor};

    fn descriptor(name: &str, replicas: i64) -> Descriptor {
        Descriptor::load(RawDescriptor {
            name: Some(name.to_string()),
            image: Some(format!("registry.local/{name}:v1")),
            replicas: Some(replicas),
            ..RawDescriptor::default()
        })
        .unwrap()
    }

    fn fast_opts(deadline_ms: u64) -> GateOptions {
        GateOptions {
            interval: Duration::from_millis(10),
            deadline: Duration::from_millis(deadline_ms),
            confirmation_polls: 1,
            retry: RetryPolicy {
                attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            cancel: Poller::never_cancelled(),
        }
    }

    #[tokio::test]
    async fn converging_rollout_gates_healthy() {
        let sim = SimCluster::new();
        sim.script("db", Behavior::ReadyAfter(2)).await;
        sim.apply_workload(&descriptor("db", 2)).await.unwrap();

        let status = gate_workload(&sim, "db", &fast_opts(2_000)).await;
        assert_eq!(status, RolloutStatus::Healthy);
    }

    #[tokio::test]
    async fn never_ready_rollout_times_out() {
        let sim = SimCluster::new();
        sim.script("db", Behavior::NeverReady).await;
        sim.apply_workload(&descriptor("db", 2)).await.unwrap();

        let status = gate_workload(&sim, "db", &fast_opts(80)).await;
        assert_eq!(status, RolloutStatus::TimedOut);
    }

    #[tokio::test]
    async fn crash_loop_fails_immediately() {
        let sim = SimCluster::new();
        sim.script("app", Behavior::CrashLoop).await;
        sim.apply_workload(&descriptor("app", 1)).await.unwrap();

        let status = gate_workload(&sim, "app", &fast_opts(5_000)).await;
        assert!(matches!(status, RolloutStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn transient_outage_does_not_fail_the_gate() {
        let sim = SimCluster::new();
        sim.script("db", Behavior::ReadyAfter(1)).await;
        sim.apply_workload(&descriptor("db", 1)).await.unwrap();
        // Outlasts one status call's retry budget; later polls succeed.
        sim.inject_status_outage("db", 3).await;

        let status = gate_workload(&sim, "db", &fast_opts(2_000)).await;
        assert_eq!(status, RolloutStatus::Healthy);
    }

    #[tokio::test]
    async fn cancellation_stops_the_gate() {
        let sim = SimCluster::new();
        sim.script("db", Behavior::NeverReady).await;
        sim.apply_workload(&descriptor("db", 1)).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let mut opts = fast_opts(60_000);
        opts.cancel = rx;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(true);
        });

        let started = std::time::Instant::now();
        let status = gate_workload(&sim, "db", &opts).await;
        assert_eq!(status, RolloutStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn wave_gates_members_concurrently() {
        let sim = SimCluster::new();
        sim.script("db", Behavior::ReadyAfter(1)).await;
        sim.script("cache", Behavior::ReadyAfter(3)).await;
        sim.apply_workload(&descriptor("db", 1)).await.unwrap();
        sim.apply_workload(&descriptor("cache", 1)).await.unwrap();

        let names = vec!["cache".to_string(), "db".to_string()];
        let statuses = gate_wave(&sim, &names, &fast_opts(2_000)).await;

        assert!(wave_healthy(&statuses));
        assert_eq!(statuses.len(), 2);
    }

    #[tokio::test]
    async fn wave_with_one_failure_is_not_healthy() {
        let sim = SimCluster::new();
        sim.script("db", Behavior::ReadyAfter(1)).await;
        sim.script("app", Behavior::CrashLoop).await;
        sim.apply_workload(&descriptor("db", 1)).await.unwrap();
        sim.apply_workload(&descriptor("app", 1)).await.unwrap();

        let names = vec!["app".to_string(), "db".to_string()];
        let statuses = gate_wave(&sim, &names, &fast_opts(2_000)).await;

        assert!(!wave_healthy(&statuses));
        assert_eq!(statuses["db"], RolloutStatus::Healthy);
        assert!(matches!(statuses["app"], RolloutStatus::Failed { .. }));
    }
}
