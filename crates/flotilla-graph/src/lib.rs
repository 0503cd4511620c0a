//! Flotilla dependency resolution — orders descriptors into deployment
//! waves.
//!
//! A wave is a batch of workloads with no unresolved ordering dependency:
//! everything a wave member depends on (its tier's lower tiers, plus any
//! explicit `depends_on` targets) lives in an earlier wave. Waves deploy
//! strictly in order; members within a wave deploy concurrently.

pub mod resolver;

pub use resolver::{CycleError, Wave, resolve};
