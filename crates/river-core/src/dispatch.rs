//! Hook dispatch across a group of plugins sharing one capability.
//!
//! A [`DispatchGroup`] holds plugins in registration order. `dispatch` invokes
//! one hook on every member and collects one result per plugin, in order.
//! Empty results never stop dispatch; a hook *failure* is handed back to the
//! caller, which decides whether the stage is fatal.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use river_plugin::{Capability, HookName, PluginError, PluginResult};
use tracing::debug;

use crate::obs::emit_hook_dispatched;

/// How one hook is fanned out over a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// One plugin at a time, in registration order.
    #[default]
    Sequential,
    /// All plugins at once; results are still reported in registration order.
    Concurrent,
}

/// A plugin registered under a name.
pub struct RegisteredPlugin<P: ?Sized> {
    pub name: String,
    pub handle: Arc<P>,
}

impl<P: ?Sized> Clone for RegisteredPlugin<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handle: Arc::clone(&self.handle),
        }
    }
}

/// One plugin's return value from a hook.
#[derive(Debug, Clone, PartialEq)]
pub struct HookOutput<T> {
    pub plugin: String,
    pub value: T,
}

/// A hook raised an error in one plugin.
#[derive(Debug, thiserror::Error)]
#[error("hook {hook} failed in plugin `{plugin}`: {source}")]
pub struct HookFailure {
    pub plugin: String,
    pub hook: HookName,
    #[source]
    pub source: PluginError,
}

/// Look up the arguments prepared for `plugin` before a dispatch.
pub(crate) fn args_for<T: Clone>(
    prepared: &BTreeMap<String, T>,
    plugin: &str,
    hook: HookName,
) -> PluginResult<T> {
    prepared.get(plugin).cloned().ok_or_else(|| {
        PluginError::hook_failed(hook.as_str(), format!("no arguments prepared for `{plugin}`"))
    })
}

/// Plugins of one capability, addressed together.
pub struct DispatchGroup<P: ?Sized> {
    capability: Capability,
    members: Vec<RegisteredPlugin<P>>,
}

impl<P: ?Sized + Send + Sync> DispatchGroup<P> {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            members: Vec::new(),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, handle: Arc<P>) {
        self.members.push(RegisteredPlugin {
            name: name.into(),
            handle,
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Invoke `hook` on every member via `call(name, plugin)`.
    ///
    /// Sequential mode stops at the first failure (later plugins are not
    /// invoked). Concurrent mode lets every invocation finish and reports the
    /// first failure in registration order.
    pub async fn dispatch<T, F, Fut>(
        &self,
        hook: HookName,
        mode: DispatchMode,
        call: F,
    ) -> Result<Vec<HookOutput<T>>, HookFailure>
    where
        F: Fn(&str, Arc<P>) -> Fut,
        Fut: Future<Output = PluginResult<T>>,
    {
        emit_hook_dispatched(self.capability, hook, self.members.len());

        match mode {
            DispatchMode::Sequential => {
                let mut outputs = Vec::with_capacity(self.members.len());
                for member in &self.members {
                    debug!(plugin = %member.name, hook = %hook, "invoking hook");
                    let value = call(&member.name, Arc::clone(&member.handle))
                        .await
                        .map_err(|source| HookFailure {
                            plugin: member.name.clone(),
                            hook,
                            source,
                        })?;
                    outputs.push(HookOutput {
                        plugin: member.name.clone(),
                        value,
                    });
                }
                Ok(outputs)
            }
            DispatchMode::Concurrent => {
                let pending = self
                    .members
                    .iter()
                    .map(|member| call(&member.name, Arc::clone(&member.handle)));
                let results = join_all(pending).await;

                let mut outputs = Vec::with_capacity(results.len());
                for (member, result) in self.members.iter().zip(results) {
                    match result {
                        Ok(value) => outputs.push(HookOutput {
                            plugin: member.name.clone(),
                            value,
                        }),
                        Err(source) => {
                            return Err(HookFailure {
                                plugin: member.name.clone(),
                                hook,
                                source,
                            })
                        }
                    }
                }
                Ok(outputs)
            }
        }
    }
}
