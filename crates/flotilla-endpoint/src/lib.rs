//! Flotilla endpoint resolver — polls the control plane until a workload's
//! externally routable address is assigned, within a bounded budget.
//!
//! An expired budget is not a failure: the workload may be healthy and
//! reachable internally. The resolver reports `Unresolved` (an address of
//! `None`) and the run carries on.

pub mod resolver;

pub use resolver::{EndpointRecord, ResolveOptions, resolve};
