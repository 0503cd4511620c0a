//! RevisionLog — redb-backed revision history for Flotilla.
//!
//! Append-only per workload, truncated to a bounded window so the history
//! cannot grow without bound over the orchestrator's lifetime. Values are
//! JSON-serialized into redb's `&[u8]` value columns. The log supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use flotilla_core::Descriptor;

use crate::error::{HistoryError, HistoryResult};
use crate::tables::{COUNTERS, REVISIONS};
use crate::types::{RevisionOutcome, RevisionRecord, revision_key};

/// Convert any `Display` error into a `HistoryError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| HistoryError::$variant(e.to_string())
    };
}

/// Thread-safe revision history backed by redb.
#[derive(Clone)]
pub struct RevisionLog {
    db: Arc<Database>,
    /// Revisions retained per workload.
    window: usize,
}

impl RevisionLog {
    /// Open (or create) a persistent revision log at the given path.
    pub fn open(path: &Path, window: usize) -> HistoryResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let log = Self {
            db: Arc::new(db),
            window,
        };
        log.ensure_tables()?;
        debug!(?path, window, "revision log opened");
        Ok(log)
    }

    /// Create an ephemeral in-memory revision log (for testing).
    pub fn open_in_memory(window: usize) -> HistoryResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let log = Self {
            db: Arc::new(db),
            window,
        };
        log.ensure_tables()?;
        debug!(window, "in-memory revision log opened");
        Ok(log)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> HistoryResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Append an apply attempt, assigning the workload's next revision
    /// number and truncating the workload's history to the window.
    pub fn append(
        &self,
        descriptor: &Descriptor,
        outcome: RevisionOutcome,
    ) -> HistoryResult<RevisionRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let next = counters
                .get(descriptor.name.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0)
                + 1;
            counters
                .insert(descriptor.name.as_str(), next)
                .map_err(map_err!(Write))?;

            record = RevisionRecord {
                workload: descriptor.name.clone(),
                revision: next,
                revision_id: descriptor.revision_id(),
                descriptor: descriptor.clone(),
                applied_at: epoch_secs(),
                outcome,
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Encode))?;

            let mut revisions = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            revisions
                .insert(record.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            // Truncate the workload's history to the window, oldest first.
            let prefix = format!("{}:", descriptor.name);
            let keys: Vec<String> = revisions
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect();
            if self.window > 0 && keys.len() > self.window {
                for key in &keys[..keys.len() - self.window] {
                    revisions.remove(key.as_str()).map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            workload = %record.workload,
            revision = record.revision,
            revision_id = %record.revision_id,
            ?outcome,
            "revision appended"
        );
        Ok(record)
    }

    /// Upgrade a revision's outcome (apply result → gate result).
    pub fn record_outcome(
        &self,
        workload: &str,
        revision: u64,
        outcome: RevisionOutcome,
    ) -> HistoryResult<()> {
        let key = revision_key(workload, revision);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            let mut record: RevisionRecord = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?
                }
                None => return Err(HistoryError::NotFound(key)),
            };
            record.outcome = outcome;
            let value = serde_json::to_vec(&record).map_err(map_err!(Encode))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%workload, revision, ?outcome, "revision outcome recorded");
        Ok(())
    }

    /// All retained revisions for a workload, oldest first.
    pub fn revisions(&self, workload: &str) -> HistoryResult<Vec<RevisionRecord>> {
        let prefix = format!("{workload}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: RevisionRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// The most recent revision for a workload, if any.
    pub fn latest(&self, workload: &str) -> HistoryResult<Option<RevisionRecord>> {
        Ok(self.revisions(workload)?.into_iter().next_back())
    }

    /// The most recent revision that gated healthy, if any.
    pub fn last_healthy(&self, workload: &str) -> HistoryResult<Option<RevisionRecord>> {
        Ok(self
            .revisions(workload)?
            .into_iter()
            .filter(|r| r.outcome == RevisionOutcome::Healthy)
            .next_back())
    }

    /// The most recent healthy revision strictly older than `revision`.
    ///
    /// Used by cascading rollback: a wave that gated healthy in the current
    /// run reverts to what was healthy before this run touched it.
    pub fn last_healthy_before(
        &self,
        workload: &str,
        revision: u64,
    ) -> HistoryResult<Option<RevisionRecord>> {
        Ok(self
            .revisions(workload)?
            .into_iter()
            .filter(|r| r.outcome == RevisionOutcome::Healthy && r.revision < revision)
            .next_back())
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
