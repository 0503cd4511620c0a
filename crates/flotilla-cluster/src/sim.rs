//! A scriptable in-memory control plane.
//!
//! Used by the test suites across the workspace and by `flotillad`'s
//! rehearsal mode. Workload convergence, apply faults, control-plane
//! outages, and address assignment are all scriptable per workload, keyed
//! by name before the workload exists.

use std::collections::HashMap;

use tokio::sync::Mutex;

use flotilla_core::Descriptor;

use crate::api::{ApplyAck, ControlApi, ControlError, RolloutFailure, RolloutObservation};

/// How a workload's rollout behaves once applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// All replicas ready from the Nth status poll onward.
    ReadyAfter(u32),
    /// Replicas never become ready.
    NeverReady,
    /// Report a crash loop on every status poll.
    CrashLoop,
    /// Report a scheduling failure on every status poll.
    SchedulingFailed,
}

impl Default for Behavior {
    fn default() -> Self {
        Self::ReadyAfter(1)
    }
}

/// A scripted apply-time fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyFault {
    /// Decline every apply with this reason.
    Reject(String),
    /// Fail the next N applies with `Unreachable`, then accept.
    UnreachableFor(u32),
}

#[derive(Debug)]
struct SimWorkload {
    spec_json: String,
    descriptor: Descriptor,
    generation: u64,
    status_polls: u32,
    address_polls: u32,
}

#[derive(Debug, Default)]
struct Inner {
    workloads: HashMap<String, SimWorkload>,
    behaviors: HashMap<String, Behavior>,
    /// Behaviour per (workload, image) — takes precedence over the
    /// per-workload default, so an upgrade can misbehave while the
    /// revision it rolls back to converges.
    image_behaviors: HashMap<(String, String), Behavior>,
    apply_faults: HashMap<String, ApplyFault>,
    status_outages: HashMap<String, u32>,
    addresses: HashMap<String, (String, u32)>,
    apply_log: Vec<String>,
}

/// In-memory control plane with per-workload scripting.
#[derive(Debug, Default)]
pub struct SimCluster {
    inner: Mutex<Inner>,
}

impl SimCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a workload's rollout behaviour (default: ready on the first
    /// status poll).
    pub async fn script(&self, workload: &str, behavior: Behavior) {
        self.inner
            .lock()
            .await
            .behaviors
            .insert(workload.to_string(), behavior);
    }

    /// Script a rollout behaviour for one specific image of a workload.
    /// Takes precedence over [`SimCluster::script`].
    pub async fn script_for_image(&self, workload: &str, image: &str, behavior: Behavior) {
        self.inner
            .lock()
            .await
            .image_behaviors
            .insert((workload.to_string(), image.to_string()), behavior);
    }

    /// Script an apply-time fault for a workload.
    pub async fn inject_apply_fault(&self, workload: &str, fault: ApplyFault) {
        self.inner
            .lock()
            .await
            .apply_faults
            .insert(workload.to_string(), fault);
    }

    /// Make the next N status polls for a workload fail with `Unreachable`.
    pub async fn inject_status_outage(&self, workload: &str, calls: u32) {
        self.inner
            .lock()
            .await
            .status_outages
            .insert(workload.to_string(), calls);
    }

    /// Assign an external address, visible from the Nth address poll onward.
    pub async fn set_address(&self, workload: &str, address: &str, after_polls: u32) {
        self.inner
            .lock()
            .await
            .addresses
            .insert(workload.to_string(), (address.to_string(), after_polls));
    }

    /// Names of accepted applies, in acceptance order.
    pub async fn apply_log(&self) -> Vec<String> {
        self.inner.lock().await.apply_log.clone()
    }

    /// Current generation of a workload.
    pub async fn generation(&self, workload: &str) -> Option<u64> {
        self.inner
            .lock()
            .await
            .workloads
            .get(workload)
            .map(|w| w.generation)
    }

    /// The descriptor currently applied for a workload.
    pub async fn applied_descriptor(&self, workload: &str) -> Option<Descriptor> {
        self.inner
            .lock()
            .await
            .workloads
            .get(workload)
            .map(|w| w.descriptor.clone())
    }

    /// How many status polls a workload has received.
    pub async fn status_poll_count(&self, workload: &str) -> u32 {
        self.inner
            .lock()
            .await
            .workloads
            .get(workload)
            .map(|w| w.status_polls)
            .unwrap_or(0)
    }
}

impl ControlApi for SimCluster {
    async fn apply_workload(&self, descriptor: &Descriptor) -> Result<ApplyAck, ControlError> {
        let mut inner = self.inner.lock().await;

        match inner.apply_faults.get(&descriptor.name).cloned() {
            Some(ApplyFault::Reject(reason)) => {
                return Err(ControlError::Rejected(reason));
            }
            Some(ApplyFault::UnreachableFor(n)) if n > 0 => {
                inner
                    .apply_faults
                    .insert(descriptor.name.clone(), ApplyFault::UnreachableFor(n - 1));
                return Err(ControlError::Unreachable("injected outage".to_string()));
            }
            Some(ApplyFault::UnreachableFor(_)) => {
                inner.apply_faults.remove(&descriptor.name);
            }
            None => {}
        }

        let spec_json =
            serde_json::to_string(descriptor).unwrap_or_default();
        inner.apply_log.push(descriptor.name.clone());

        match inner.workloads.get_mut(&descriptor.name) {
            Some(existing) if existing.spec_json == spec_json => Ok(ApplyAck {
                generation: existing.generation,
                changed: false,
            }),
            Some(existing) => {
                existing.generation += 1;
                existing.spec_json = spec_json;
                existing.descriptor = descriptor.clone();
                // A changed spec restarts the rollout.
                existing.status_polls = 0;
                Ok(ApplyAck {
                    generation: existing.generation,
                    changed: true,
                })
            }
            None => {
                inner.workloads.insert(
                    descriptor.name.clone(),
                    SimWorkload {
                        spec_json,
                        descriptor: descriptor.clone(),
                        generation: 1,
                        status_polls: 0,
                        address_polls: 0,
                    },
                );
                Ok(ApplyAck {
                    generation: 1,
                    changed: true,
                })
            }
        }
    }

    async fn rollout_status(&self, workload: &str) -> Result<RolloutObservation, ControlError> {
        let mut inner = self.inner.lock().await;

        if let Some(outage) = inner.status_outages.get_mut(workload) {
            if *outage > 0 {
                *outage -= 1;
                return Err(ControlError::Unreachable("injected outage".to_string()));
            }
        }

        let name_behavior = inner.behaviors.get(workload).copied();
        let image = inner
            .workloads
            .get(workload)
            .map(|w| w.descriptor.image.clone());
        let image_behavior = image.and_then(|image| {
            inner
                .image_behaviors
                .get(&(workload.to_string(), image))
                .copied()
        });
        let behavior = image_behavior.or(name_behavior).unwrap_or_default();

        let w = inner
            .workloads
            .get_mut(workload)
            .ok_or_else(|| ControlError::NotFound(workload.to_string()))?;
        w.status_polls += 1;

        let desired = w.descriptor.replicas;
        let observation = match behavior {
            Behavior::ReadyAfter(n) => RolloutObservation {
                desired,
                ready: if w.status_polls >= n { desired } else { 0 },
                failure: None,
            },
            Behavior::NeverReady => RolloutObservation {
                desired,
                ready: 0,
                failure: None,
            },
            Behavior::CrashLoop => RolloutObservation {
                desired,
                ready: 0,
                failure: Some(RolloutFailure::CrashLoop {
                    restarts: w.status_polls,
                }),
            },
            Behavior::SchedulingFailed => RolloutObservation {
                desired,
                ready: 0,
                failure: Some(RolloutFailure::SchedulingFailed {
                    reason: "insufficient capacity".to_string(),
                }),
            },
        };
        Ok(observation)
    }

    async fn external_address(&self, workload: &str) -> Result<Option<String>, ControlError> {
        let mut inner = self.inner.lock().await;

        let assigned = inner.addresses.get(workload).cloned();
        let w = inner
            .workloads
            .get_mut(workload)
            .ok_or_else(|| ControlError::NotFound(workload.to_string()))?;
        w.address_polls += 1;

        match assigned {
            Some((address, after)) if w.address_polls >= after => Ok(Some(address)),
            _ => Ok(None),
        }
    }
}
