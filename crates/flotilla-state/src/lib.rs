//! Flotilla revision history — an append-only log of applies per workload.
//!
//! Every apply attempt appends a [`RevisionRecord`]; the rollback
//! controller reads the log back to find the last revision that gated
//! healthy. The log is redb-backed (on-disk or in-memory for tests) and
//! truncated to a bounded per-workload window.

pub mod error;
pub mod log;
pub mod tables;
pub mod types;

pub use error::{HistoryError, HistoryResult};
pub use log::RevisionLog;
pub use types::{RevisionOutcome, RevisionRecord};
