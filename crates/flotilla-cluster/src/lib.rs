//! Flotilla control-plane surface.
//!
//! The orchestrator depends on exactly three cluster operations: create-or-
//! update a workload, read its rollout status, and read its external
//! address. [`ControlApi`] is that seam; any control plane exposing the
//! three calls can sit behind it.
//!
//! # Components
//!
//! - **`api`** — the `ControlApi` trait and its wire types
//! - **`retry`** — bounded exponential backoff for transient unreachability
//! - **`poll`** — the cancellable fixed-interval poller shared by the
//!   health gate and the endpoint resolver
//! - **`sim`** — a scriptable in-memory control plane for tests and
//!   rehearsal runs

pub mod api;
pub mod poll;
pub mod retry;
pub mod sim;

pub use api::{ApplyAck, ControlApi, ControlError, RolloutFailure, RolloutObservation};
pub use poll::{Poller, Tick};
pub use retry::{RetryPolicy, with_backoff};
pub use sim::{ApplyFault, Behavior, SimCluster};
