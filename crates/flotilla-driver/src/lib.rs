//! Flotilla orchestration driver.
//!
//! One deployment run is a single sequential state machine across waves:
//! `Resolving -> Applying(i) -> Gating(i) -> { Applying(i+1) |
//! RollingBack(i) } -> ResolvingEndpoints -> Done`. Within a wave, applies
//! and gates run concurrently across members. The run fails fast at the
//! first wave that does not gate all-healthy — after a rollback attempt —
//! and always produces a [`RunReport`].

pub mod driver;
pub mod report;

pub use driver::{Driver, RunError, RunPhase};
pub use report::{RunReport, RunVerdict, WaveReport, WorkloadReport};
