//! Workload descriptors — the declarative input to a deployment run.
//!
//! A `RawDescriptor` is whatever the manifest (or an external caller) handed
//! us; `Descriptor::load` validates it field by field and `load_set` adds the
//! batch-level checks (unique names, resolvable dependencies). Descriptors
//! are immutable once loaded; a changed workload produces a new revision, it
//! never mutates an old one.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Validation errors, naming the offending workload and field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("workload name is missing or empty")]
    EmptyName,

    #[error("duplicate workload name: {0}")]
    DuplicateName(String),

    #[error("workload {name}: missing required field `{field}`")]
    MissingField { name: String, field: &'static str },

    #[error("workload {name}: image reference is empty")]
    EmptyImage { name: String },

    #[error("workload {name}: tier {tier} is not a non-negative integer")]
    InvalidTier { name: String, tier: i64 },

    #[error("workload {name}: replica count {replicas} is negative")]
    InvalidReplicas { name: String, replicas: i64 },

    #[error("workload {name}: port {port} is outside 1-65535")]
    InvalidPort { name: String, port: i64 },

    #[error("workload {name}: depends_on references unknown workload {target}")]
    UnknownDependency { name: String, target: String },

    #[error("workload {name}: depends_on references itself")]
    SelfDependency { name: String },
}

/// Unvalidated descriptor as read from a manifest or handed in by a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDescriptor {
    pub name: Option<String>,
    /// Dependency rank. Defaults to 0.
    pub tier: Option<i64>,
    pub image: Option<String>,
    /// Desired replica count. Defaults to 1.
    pub replicas: Option<i64>,
    #[serde(default)]
    pub ports: Vec<i64>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Resolve an externally routable address for this workload once the
    /// run succeeds.
    #[serde(default)]
    pub expose: bool,
    /// Explicit dependencies on other workloads in the batch.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A validated workload descriptor. Immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    /// Dependency rank: tier *k* deploys after every lower tier in the batch.
    pub tier: u32,
    pub image: String,
    pub replicas: u32,
    pub ports: Vec<u16>,
    pub env: BTreeMap<String, String>,
    pub expose: bool,
    pub depends_on: Vec<String>,
}

impl Descriptor {
    /// Validate a single raw descriptor.
    ///
    /// Batch-level checks (name uniqueness, dependency targets) live in
    /// [`Descriptor::load_set`]. No partial acceptance: the first invalid
    /// field aborts the load.
    pub fn load(raw: RawDescriptor) -> Result<Self, DescriptorError> {
        let name = match raw.name {
            Some(n) if !n.trim().is_empty() => n,
            _ => return Err(DescriptorError::EmptyName),
        };

        let tier = raw.tier.unwrap_or(0);
        if !(0..=i64::from(u32::MAX)).contains(&tier) {
            return Err(DescriptorError::InvalidTier { name, tier });
        }

        let image = match raw.image {
            Some(i) if !i.trim().is_empty() => i,
            Some(_) => return Err(DescriptorError::EmptyImage { name }),
            None => {
                return Err(DescriptorError::MissingField {
                    name,
                    field: "image",
                });
            }
        };

        let replicas = raw.replicas.unwrap_or(1);
        if !(0..=i64::from(u32::MAX)).contains(&replicas) {
            return Err(DescriptorError::InvalidReplicas { name, replicas });
        }

        let mut ports = Vec::with_capacity(raw.ports.len());
        for port in raw.ports {
            if !(1..=65535).contains(&port) {
                return Err(DescriptorError::InvalidPort { name, port });
            }
            ports.push(port as u16);
        }

        if raw.depends_on.iter().any(|d| d == &name) {
            return Err(DescriptorError::SelfDependency { name });
        }

        Ok(Descriptor {
            name,
            tier: tier as u32,
            image,
            replicas: replicas as u32,
            ports,
            env: raw.env,
            expose: raw.expose,
            depends_on: raw.depends_on,
        })
    }

    /// Validate a whole batch: per-descriptor checks plus unique names and
    /// resolvable `depends_on` targets.
    pub fn load_set(raws: Vec<RawDescriptor>) -> Result<Vec<Descriptor>, DescriptorError> {
        let mut descriptors = Vec::with_capacity(raws.len());
        let mut seen = BTreeSet::new();

        for raw in raws {
            let descriptor = Descriptor::load(raw)?;
            if !seen.insert(descriptor.name.clone()) {
                return Err(DescriptorError::DuplicateName(descriptor.name));
            }
            descriptors.push(descriptor);
        }

        for descriptor in &descriptors {
            for target in &descriptor.depends_on {
                if !seen.contains(target) {
                    return Err(DescriptorError::UnknownDependency {
                        name: descriptor.name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        Ok(descriptors)
    }

    /// Content digest of the canonical JSON form, shortened to 12 hex chars.
    ///
    /// Two descriptors with identical specs share a revision id; any field
    /// change produces a new one.
    pub fn revision_id(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        hex::encode(&digest[..6])
    }
}
