//! Flotilla rollback controller.
//!
//! When a wave's health gate fails, each failing workload is reverted to
//! the last revision that gated healthy: re-applied through the apply
//! engine and re-gated through the health gate. A workload with no healthy
//! history is left exactly as it is — rollback never deletes anything.
//!
//! Rollback is confined to the failing wave unless the caller explicitly
//! opts into cascading over earlier, healthy waves.

pub mod controller;

pub use controller::{
    RollbackError, RollbackOptions, RollbackOutcome, RollbackReport, RollbackSeverity, rollback,
    rollback_to_previous,
};
