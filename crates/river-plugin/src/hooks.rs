//! Hook contract definitions for RiVer Core plugins
//!
//! Three capabilities exist:
//! - `GeneratorPlugin`: produces tests (`pre_gen`, `gen`, `post_gen`)
//! - `DutPlugin`: the device under test (`init`, `build`, `run`, `post_run`, `merge_db`)
//! - `ReferencePlugin`: the trusted model (`init`, `build`, `run`, `post_run`)
//!
//! DUT and reference share the [`SimulatorPlugin`] lifecycle. Every hook takes
//! one typed argument struct so the parameter contract is fixed and the same
//! struct can be shipped as JSON to an out-of-process plugin.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};
use crate::test_list::TestList;

/// Opaque per-plugin key/value parameters, passed through unmodified.
pub type ParamBag = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Capabilities and hook names
// ---------------------------------------------------------------------------

/// What role a plugin plays in the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Generator,
    Dut,
    Reference,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Generator => "generator",
            Capability::Dut => "dut",
            Capability::Reference => "reference",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every lifecycle hook a plugin can be asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookName {
    PreGen,
    Gen,
    PostGen,
    Init,
    Build,
    Run,
    PostRun,
    MergeDb,
}

impl HookName {
    /// Wire name of the hook.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookName::PreGen => "pre_gen",
            HookName::Gen => "gen",
            HookName::PostGen => "post_gen",
            HookName::Init => "init",
            HookName::Build => "build",
            HookName::Run => "run",
            HookName::PostRun => "post_run",
            HookName::MergeDb => "merge_db",
        }
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Hook arguments
// ---------------------------------------------------------------------------

/// Per-plugin configuration: the plugin's own section merged with global settings.
///
/// Built once before dispatch and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,
    pub isa: String,
    pub params: ParamBag,
}

impl PluginConfig {
    /// Look up a key, with `isa` resolving to the global ISA.
    pub fn get(&self, key: &str) -> Option<&str> {
        if key == "isa" {
            return Some(&self.isa);
        }
        self.params.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreGenArgs {
    pub spec_config: PluginConfig,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenArgs {
    pub gen_config: PathBuf,
    pub module_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostGenArgs {
    pub output_dir: PathBuf,
    pub regress_list: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitArgs {
    pub plugin_config: PluginConfig,
    /// Path of the persisted test list.
    pub test_list: PathBuf,
    pub work_dir: PathBuf,
    /// Present only when coverage is enabled for the run.
    pub coverage_config: Option<ParamBag>,
    pub plugin_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArgs {
    pub module_dir: PathBuf,
}

/// What a `run` hook hands back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    /// Path prefix of the line-delimited structured log (`<prefix>.json`).
    pub log_prefix: Option<PathBuf>,
}

impl RunOutput {
    pub fn with_log_prefix(prefix: impl Into<PathBuf>) -> Self {
        Self {
            log_prefix: Some(prefix.into()),
        }
    }

    /// The `<prefix>.json` log file, if the plugin reported one.
    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_prefix.as_deref().map(log_file_for_prefix)
    }
}

/// `<prefix>` → `<prefix>.json`, appending rather than replacing any extension.
pub fn log_file_for_prefix(prefix: &Path) -> PathBuf {
    let mut raw = prefix.as_os_str().to_owned();
    raw.push(".json");
    PathBuf::from(raw)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRunArgs {
    pub test_list: TestList,
    /// Serialized run configuration.
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeDbArgs {
    pub db_files: Vec<PathBuf>,
    pub config: serde_json::Value,
    pub output_db: String,
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Test generator capability.
#[async_trait]
pub trait GeneratorPlugin: Send + Sync {
    /// Prepare the generator's output directory.
    async fn pre_gen(&self, _args: &PreGenArgs) -> PluginResult<()> {
        Ok(())
    }

    /// Generate tests and return the resulting test list (the `gen` hook).
    async fn generate(&self, args: &GenArgs) -> PluginResult<TestList>;

    /// Post-process generated tests (regression lists etc).
    async fn post_gen(&self, _args: &PostGenArgs) -> PluginResult<()> {
        Ok(())
    }
}

/// Lifecycle shared by DUT and reference plugins.
#[async_trait]
pub trait SimulatorPlugin: Send + Sync {
    /// Prepare the build environment.
    async fn init(&self, args: &InitArgs) -> PluginResult<()>;

    /// Build every test.
    async fn build(&self) -> PluginResult<()>;

    /// Run every test, leaving `dut.dump`/`ref.dump` in each test's work dir.
    async fn run(&self, args: &RunArgs) -> PluginResult<RunOutput>;

    /// Inspect results after comparison (cleanup, space saving).
    async fn post_run(&self, _args: &PostRunArgs) -> PluginResult<()> {
        Ok(())
    }
}

/// Device-under-test capability.
#[async_trait]
pub trait DutPlugin: SimulatorPlugin {
    /// Merge coverage databases into `output_db`.
    async fn merge_db(&self, _args: &MergeDbArgs) -> PluginResult<()> {
        Err(PluginError::Unsupported {
            hook: HookName::MergeDb.as_str().to_string(),
        })
    }
}

/// Reference-model capability.
pub trait ReferencePlugin: SimulatorPlugin {}

/// An instantiated plugin, tagged by capability.
#[derive(Clone)]
pub enum PluginHandle {
    Generator(Arc<dyn GeneratorPlugin>),
    Dut(Arc<dyn DutPlugin>),
    Reference(Arc<dyn ReferencePlugin>),
}

impl PluginHandle {
    pub fn capability(&self) -> Capability {
        match self {
            PluginHandle::Generator(_) => Capability::Generator,
            PluginHandle::Dut(_) => Capability::Dut,
            PluginHandle::Reference(_) => Capability::Reference,
        }
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginHandle::{}", self.capability())
    }
}
