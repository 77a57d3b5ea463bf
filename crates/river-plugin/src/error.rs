//! Error types for river-plugin

use thiserror::Error;

/// Errors a plugin hook can raise.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The hook ran and reported failure
    #[error("hook {hook} failed: {message}")]
    HookFailed { hook: String, message: String },

    /// The plugin does not implement this hook
    #[error("hook {hook} is not supported by this plugin")]
    Unsupported { hook: String },

    /// An out-of-process plugin broke the request/reply protocol
    #[error("plugin protocol violation: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PluginError {
    pub fn hook_failed(hook: impl Into<String>, message: impl Into<String>) -> Self {
        PluginError::HookFailed {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

/// Result type for plugin hook operations
pub type PluginResult<T> = std::result::Result<T, PluginError>;
