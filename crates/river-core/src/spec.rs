//! Run specification and identity.

use river_plugin::Capability;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::config::Config;

/// Identity of a verification run's configuration.
///
/// Two runs with the same ISA and the same ordered plugin lists share a
/// digest, so reports from equivalent setups can be matched up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSpec {
    pub isa: String,
    pub work_dir: PathBuf,
    pub generators: Vec<String>,
    pub duts: Vec<String>,
    pub references: Vec<String>,

    /// SHA-256 over ISA and ordered plugin names (deterministic).
    pub config_digest: String,
}

impl RunSpec {
    pub fn from_config(config: &Config) -> Self {
        let generators = config.plugins_for(Capability::Generator).to_vec();
        let duts = config.plugins_for(Capability::Dut).to_vec();
        let references = config.plugins_for(Capability::Reference).to_vec();
        let config_digest = compute_config_digest(config.isa(), &generators, &duts, &references);
        Self {
            isa: config.isa().to_string(),
            work_dir: config.work_dir().to_path_buf(),
            generators,
            duts,
            references,
            config_digest,
        }
    }

    /// Short form of the digest (first 12 hex chars).
    pub fn short_digest(&self) -> &str {
        &self.config_digest[..12.min(self.config_digest.len())]
    }
}

fn compute_config_digest(
    isa: &str,
    generators: &[String],
    duts: &[String],
    references: &[String],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(isa.as_bytes());
    for (tag, names) in [("gen", generators), ("dut", duts), ("ref", references)] {
        hasher.update(b"\x1e");
        hasher.update(tag.as_bytes());
        for name in names {
            hasher.update(b"\0");
            hasher.update(name.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}
