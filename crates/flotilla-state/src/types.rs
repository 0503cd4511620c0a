//! Revision history types.

use serde::{Deserialize, Serialize};

use flotilla_core::Descriptor;

/// One apply attempt for one workload, as recorded in the history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevisionRecord {
    pub workload: String,
    /// Monotonically increasing per workload.
    pub revision: u64,
    /// Content digest of the descriptor (see `Descriptor::revision_id`).
    pub revision_id: String,
    /// Snapshot of the descriptor as applied.
    pub descriptor: Descriptor,
    /// Unix timestamp (seconds) of the apply attempt.
    pub applied_at: u64,
    pub outcome: RevisionOutcome,
}

/// What became of a revision. Appended as an apply result, upgraded to a
/// gate result once the health gate settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionOutcome {
    /// The control plane accepted the spec; the gate has not settled yet.
    Applied,
    /// The control plane declined the spec.
    Rejected,
    /// The control plane stayed unreachable through the retry budget.
    Unreachable,
    /// Gated healthy.
    Healthy,
    /// Gated failed (crash loop or scheduling failure).
    Failed,
    /// The gate deadline expired before the rollout converged.
    TimedOut,
    /// Superseded by a rollback to an earlier revision.
    RolledBack,
}

impl RevisionRecord {
    /// Build the composite key for the revisions table.
    pub fn table_key(&self) -> String {
        revision_key(&self.workload, self.revision)
    }
}

/// Composite revisions-table key for a workload revision.
pub fn revision_key(workload: &str, revision: u64) -> String {
    format!("{workload}:{revision:010}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_keys_order_numerically() {
        let k9 = revision_key("db", 9);
        let k10 = revision_key("db", 10);
        assert!(k9 < k10);
    }
}
