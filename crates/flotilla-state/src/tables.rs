//! redb table definitions for the revision history.
//!
//! Revision keys follow the pattern `{workload}:{revision:010}` — the
//! zero-padded revision keeps lexicographic and numeric order aligned, so a
//! prefix scan yields a workload's revisions oldest first.

use redb::TableDefinition;

/// Revision records keyed by `{workload}:{revision:010}`.
pub const REVISIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("revisions");

/// Last assigned revision number per workload.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("revision_counters");
