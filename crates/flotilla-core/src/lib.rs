//! Flotilla core types — workload descriptors, deployment manifests, and
//! run configuration.
//!
//! This crate owns the declarative input side of a deployment run:
//!
//! - **`descriptor`** — the validated workload model (`Descriptor`) and its
//!   serde-facing raw form (`RawDescriptor`)
//! - **`manifest`** — TOML deployment manifests (`[[workload]]` tables)
//! - **`config`** — the immutable `RunConfig` handed to the driver at run
//!   start

pub mod config;
pub mod descriptor;
pub mod manifest;

pub use config::{RunConfig, parse_duration};
pub use descriptor::{Descriptor, DescriptorError, RawDescriptor};
pub use manifest::Manifest;
