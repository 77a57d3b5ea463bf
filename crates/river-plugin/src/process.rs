//! Out-of-process plugins.
//!
//! An on-disk plugin is an executable. The host talks to it one hook at a
//! time:
//!
//! - `<exe> describe` prints a manifest line:
//!   `{"name": "spike", "capabilities": ["reference"]}`
//! - `<exe> <hook>` receives the hook's argument struct as one JSON document
//!   on stdin and prints, as its last non-empty stdout line, either
//!   `{"status": "ok", "value": ...}` or `{"status": "error", "message": "..."}`.
//!
//! Any other stdout lines (tool chatter) are ignored. A non-zero exit status
//! is always a hook failure.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::hooks::{
    Capability, DutPlugin, GenArgs, GeneratorPlugin, HookName, InitArgs, MergeDbArgs, PostGenArgs,
    PostRunArgs, PreGenArgs, ReferencePlugin, RunArgs, RunOutput, SimulatorPlugin,
};
use crate::test_list::TestList;

/// Argument used for the load-time handshake.
pub const DESCRIBE_ARG: &str = "describe";

/// Self-description printed by `<exe> describe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub capabilities: Vec<Capability>,
}

impl PluginManifest {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Reply {
    Ok {
        #[serde(default)]
        value: serde_json::Value,
    },
    Error {
        message: String,
    },
}

/// A plugin backed by an executable speaking the hook protocol.
#[derive(Debug, Clone)]
pub struct ProcessPlugin {
    name: String,
    executable: PathBuf,
}

impl ProcessPlugin {
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Run the `describe` handshake.
    pub async fn describe(&self) -> PluginResult<PluginManifest> {
        let output = Command::new(&self.executable)
            .arg(DESCRIBE_ARG)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(PluginError::Protocol(format!(
                "{} describe exited with {}: {}",
                self.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = last_line(&stdout).ok_or_else(|| {
            PluginError::Protocol(format!("{} describe printed nothing", self.name))
        })?;
        Ok(serde_json::from_str(line)?)
    }

    async fn call<A, T>(&self, hook: HookName, args: &A) -> PluginResult<T>
    where
        A: Serialize + Sync,
        T: DeserializeOwned,
    {
        let request = serde_json::to_vec(args)?;
        debug!(plugin = %self.name, hook = %hook, bytes = request.len(), "spawning plugin hook");

        let mut child = Command::new(&self.executable)
            .arg(hook.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // stdin is fed while stdout/stderr drain; dropping it signals EOF
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A plugin that ignores its arguments may exit before reading them.
                match stdin.write_all(&request).await {
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            Ok::<(), std::io::Error>(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            return Err(PluginError::hook_failed(
                hook.as_str(),
                format!(
                    "{} exited with {}: {}",
                    self.name,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let line = last_line(&stdout).ok_or_else(|| {
            PluginError::Protocol(format!("{} {} printed no reply", self.name, hook))
        })?;

        match serde_json::from_str::<Reply>(line) {
            Ok(Reply::Ok { value }) => Ok(serde_json::from_value(value)?),
            Ok(Reply::Error { message }) => Err(PluginError::hook_failed(hook.as_str(), message)),
            Err(e) => Err(PluginError::Protocol(format!(
                "{} {} reply is not valid: {}",
                self.name, hook, e
            ))),
        }
    }
}

fn last_line(stdout: &str) -> Option<&str> {
    stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

#[async_trait]
impl GeneratorPlugin for ProcessPlugin {
    async fn pre_gen(&self, args: &PreGenArgs) -> PluginResult<()> {
        self.call(HookName::PreGen, args).await
    }

    async fn generate(&self, args: &GenArgs) -> PluginResult<TestList> {
        self.call(HookName::Gen, args).await
    }

    async fn post_gen(&self, args: &PostGenArgs) -> PluginResult<()> {
        self.call(HookName::PostGen, args).await
    }
}

#[async_trait]
impl SimulatorPlugin for ProcessPlugin {
    async fn init(&self, args: &InitArgs) -> PluginResult<()> {
        self.call(HookName::Init, args).await
    }

    async fn build(&self) -> PluginResult<()> {
        self.call(HookName::Build, &serde_json::json!({})).await
    }

    async fn run(&self, args: &RunArgs) -> PluginResult<RunOutput> {
        self.call(HookName::Run, args).await
    }

    async fn post_run(&self, args: &PostRunArgs) -> PluginResult<()> {
        self.call(HookName::PostRun, args).await
    }
}

#[async_trait]
impl DutPlugin for ProcessPlugin {
    async fn merge_db(&self, args: &MergeDbArgs) -> PluginResult<()> {
        self.call(HookName::MergeDb, args).await
    }
}

impl ReferencePlugin for ProcessPlugin {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_line_skips_blank_lines() {
        assert_eq!(last_line("building...\n{\"status\":\"ok\"}\n\n"), Some("{\"status\":\"ok\"}"));
        assert_eq!(last_line("\n  \n"), None);
    }

    #[test]
    fn test_reply_parsing() {
        let ok: Reply = serde_json::from_str(r#"{"status":"ok","value":{"log_prefix":"/w/x"}}"#).unwrap();
        match ok {
            Reply::Ok { value } => {
                let out: RunOutput = serde_json::from_value(value).unwrap();
                assert_eq!(out.log_prefix, Some(PathBuf::from("/w/x")));
            }
            Reply::Error { .. } => panic!("expected ok reply"),
        }

        let unit: Reply = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        match unit {
            Reply::Ok { value } => {
                let () = serde_json::from_value(value).unwrap();
            }
            Reply::Error { .. } => panic!("expected ok reply"),
        }

        let err: Reply = serde_json::from_str(r#"{"status":"error","message":"no simulator"}"#).unwrap();
        assert!(matches!(err, Reply::Error { message } if message == "no simulator"));
    }

    #[test]
    fn test_manifest_supports() {
        let manifest: PluginManifest =
            serde_json::from_str(r#"{"name":"spike","capabilities":["reference","dut"]}"#).unwrap();
        assert!(manifest.supports(Capability::Reference));
        assert!(manifest.supports(Capability::Dut));
        assert!(!manifest.supports(Capability::Generator));
    }
}
