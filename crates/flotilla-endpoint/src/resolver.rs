//! Address polling within a bounded budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use flotilla_cluster::{ControlApi, Poller, RetryPolicy, Tick, with_backoff};

/// A workload's externally resolvable address, or `None` when the budget
/// expired unresolved. Never mutated after assignment; a fresh run
/// re-resolves from scratch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointRecord {
    pub workload: String,
    pub address: Option<String>,
}

impl EndpointRecord {
    pub fn resolved(&self) -> bool {
        self.address.is_some()
    }
}

/// Options for one resolution pass.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Interval between address polls.
    pub interval: Duration,
    /// Total wall-clock budget.
    pub budget: Duration,
    /// Retry budget for each individual address call.
    pub retry: RetryPolicy,
    /// Run-wide cancellation signal.
    pub cancel: watch::Receiver<bool>,
}

impl ResolveOptions {
    pub fn new(interval: Duration, budget: Duration, cancel: watch::Receiver<bool>) -> Self {
        Self {
            interval,
            budget,
            retry: RetryPolicy::default(),
            cancel,
        }
    }
}

/// Poll for a workload's external address until assigned or out of budget.
pub async fn resolve<C: ControlApi>(
    api: &C,
    workload: &str,
    opts: &ResolveOptions,
) -> EndpointRecord {
    let mut poller = Poller::new(opts.interval, opts.budget, opts.cancel.clone());

    loop {
        match poller.tick().await {
            Tick::Poll => match with_backoff(&opts.retry, || api.external_address(workload)).await
            {
                Ok(Some(address)) => {
                    info!(%workload, %address, "external address assigned");
                    return EndpointRecord {
                        workload: workload.to_string(),
                        address: Some(address),
                    };
                }
                Ok(None) => {
                    debug!(%workload, "no external address yet");
                }
                Err(e) => {
                    debug!(%workload, error = %e, "address lookup unavailable");
                }
            },
            Tick::DeadlineExpired | Tick::Cancelled => {
                warn!(%workload, "endpoint unresolved within budget");
                return EndpointRecord {
                    workload: workload.to_string(),
                    address: None,
                };
            }
        }
    }
}
