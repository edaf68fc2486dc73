//! Stack hashing for change detection.
//!
//! The hash covers the project identity and every resource. It is stored in
//! the state with each run so `status` can tell whether the stack file
//! changed since the last apply.

use sha2::{Digest, Sha256};

use crate::resource::ResourceDescriptor;

use super::spec::StackConfig;

/// Hasher for stack files.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hashes the whole stack.
    ///
    /// Resource order in the file does not matter. Orchestrator and sandbox
    /// settings are excluded: they change how a run behaves, not what it
    /// provisions.
    #[must_use]
    pub fn hash_config(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();

        let project = &config.project;
        for part in [
            Some(project.name.as_str()),
            Some(project.environment.as_str()),
            project.region.as_deref(),
            project.account_id.as_deref(),
        ] {
            hasher.update(part.unwrap_or_default().as_bytes());
            hasher.update([0u8]);
        }

        let mut resources: Vec<(String, String)> = config
            .descriptors()
            .iter()
            .map(|d| (d.id().to_string(), self.hash_resource(d)))
            .collect();
        resources.sort();
        for (id, hash) in resources {
            hasher.update(id.as_bytes());
            hasher.update(hash.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Hashes one resource, dependencies included.
    #[must_use]
    pub fn hash_resource(&self, descriptor: &ResourceDescriptor) -> String {
        let mut hasher = Sha256::new();
        hasher.update(descriptor.id().as_str().as_bytes());
        hasher.update(descriptor.kind().to_string().as_bytes());

        // serde_json keeps struct field order, so this encoding is stable.
        if let Ok(spec) = serde_json::to_vec(descriptor.spec()) {
            hasher.update(&spec);
        }
        for dep in descriptor.dependencies() {
            hasher.update(b"->");
            hasher.update(dep.as_str().as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Returns the first `len` characters of a hash.
    #[must_use]
    pub fn short_hash(hash: &str, len: usize) -> &str {
        &hash[..len.min(hash.len())]
    }
}
