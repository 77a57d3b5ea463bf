//! RiVer Core - verification flow orchestration
//!
//! Drives generator, DUT and reference plugins through their lifecycle and
//! turns the resulting dumps into a pass/fail report:
//! - `config`: validated run configuration
//! - `registry` / `dispatch`: plugin resolution and hook fan-out
//! - `controller`: the compile state machine
//! - `compare` / `report`: dump comparison and the HTML report
//! - `flows`: `generate`, `merge` and `clean`

pub mod compare;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod flows;
pub mod logs;
pub mod obs;
pub mod registry;
pub mod report;
pub mod spec;
pub mod stage;
pub mod telemetry;

// Re-export key types
pub use compare::{ComparisonEngine, DUT_DUMP, REF_DUMP};
pub use config::Config;
pub use controller::{CompileOptions, CompileSummary, StageController};
pub use dispatch::{DispatchGroup, DispatchMode, HookFailure, HookOutput};
pub use error::{CompareError, ConfigError, RegistryError, ReportError, Result, RiverError};
pub use flows::{clean, generate, merge, GenerateSummary, TEST_LIST_FILE};
pub use logs::StructuredLogRecord;
pub use registry::{PluginDescriptor, PluginLocation, PluginRegistry};
pub use report::{LogSources, ReportAggregator, ReportData};
pub use spec::RunSpec;
pub use stage::{resolve_stages, RunState, SidePlan, Stage, StageOutcome, StagePlan, StageSelector};
pub use telemetry::{init_tracing, parse_level, RunContext};
