//! Deployment manifest parsing (TOML).
//!
//! A manifest is a list of `[[workload]]` tables:
//!
//! ```toml
//! [[workload]]
//! name = "db"
//! tier = 0
//! image = "registry.local/db:v1"
//! replicas = 1
//! ports = [5432]
//!
//! [[workload]]
//! name = "app"
//! tier = 1
//! image = "registry.local/app:v1"
//! replicas = 2
//! expose = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::descriptor::{Descriptor, DescriptorError, RawDescriptor};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "workload")]
    pub workloads: Vec<RawDescriptor>,
}

impl Manifest {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest = toml::from_str(&content)?;
        Ok(manifest)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate every workload in the manifest into a descriptor set.
    pub fn load(self) -> Result<Vec<Descriptor>, DescriptorError> {
        Descriptor::load_set(self.workloads)
    }
}
