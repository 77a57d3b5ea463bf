//! RiVer Core plugin contract
//!
//! This crate defines what a plugin must implement to take part in a
//! verification flow:
//! - `GeneratorPlugin`: produces the test list
//! - `DutPlugin` / `ReferencePlugin`: build and run tests, leaving dumps behind
//!
//! It also owns the persisted [`TestList`], an adapter for executables that
//! speak the hook protocol ([`ProcessPlugin`]) and in-memory fakes for tests.

pub mod error;
pub mod fakes;
pub mod hooks;
pub mod process;
pub mod test_list;

pub use error::{PluginError, PluginResult};
pub use hooks::{
    log_file_for_prefix, Capability, DutPlugin, GenArgs, GeneratorPlugin, HookName, InitArgs,
    MergeDbArgs, ParamBag, PluginConfig, PluginHandle, PostGenArgs, PostRunArgs, PreGenArgs,
    ReferencePlugin, RunArgs, RunOutput, SimulatorPlugin,
};
pub use process::{PluginManifest, ProcessPlugin};
pub use test_list::{ResultCounts, TestList, TestListEntry, TestResult};
