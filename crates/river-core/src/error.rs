//! Error taxonomy for river-core.

use std::path::PathBuf;

use river_plugin::{Capability, PluginError};

use crate::dispatch::HookFailure;

/// Configuration is missing or malformed. Always fatal, raised before any stage runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing config section [{0}]")]
    MissingSection(String),

    #[error("missing key `{key}` in config section [{section}]")]
    MissingKey { section: String, key: String },

    #[error("invalid value for `{key}` in config section [{section}]: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        reason: String,
    },
}

/// Plugin resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{capability} plugin `{name}` not found at {path:?}")]
    PluginNotFound {
        name: String,
        capability: Capability,
        path: PathBuf,
    },

    #[error("{capability} plugin `{name}` failed to load: {reason}")]
    PluginLoadError {
        name: String,
        capability: Capability,
        reason: String,
    },

    #[error("plugin `{name}` is already registered")]
    DuplicatePlugin { name: String },
}

/// Comparison could not persist its results.
#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    #[error("cannot persist test list {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: PluginError,
    },
}

/// Report generation failed. Never invalidates already-persisted results.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("report io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no report found under {0:?}")]
    NoReport(PathBuf),
}

/// Top-level error for a flow invocation.
#[derive(Debug, thiserror::Error)]
pub enum RiverError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("test list not found: {0:?}")]
    TestListMissing(PathBuf),

    #[error("no generator configured and no test list supplied")]
    NoTestSource,

    #[error("{stage} stage failed in plugin `{plugin}`: {source}")]
    Hook {
        stage: String,
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error("comparison error: {0}")]
    Compare(#[from] CompareError),

    #[error("report error: {0}")]
    Report(#[from] ReportError),

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HookFailure> for RiverError {
    fn from(failure: HookFailure) -> Self {
        RiverError::Hook {
            stage: failure.hook.to_string(),
            plugin: failure.plugin,
            source: failure.source,
        }
    }
}

/// Result type for river-core flows.
pub type Result<T> = std::result::Result<T, RiverError>;
