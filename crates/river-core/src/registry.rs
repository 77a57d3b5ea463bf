//! Plugin resolution and registration.
//!
//! A plugin name resolves, in order, to:
//! 1. a built-in entry point registered with [`PluginRegistry::with_builtin`];
//! 2. an executable at `<search_path>/<name>_plugin/<name>_plugin` that passes
//!    the `describe` handshake.
//!
//! Resolved plugins land in one [`DispatchGroup`] per capability, in
//! resolution order.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use river_plugin::{
    Capability, DutPlugin, GeneratorPlugin, PluginHandle, PluginResult, ProcessPlugin,
    ReferencePlugin,
};
use tracing::{debug, info};

use crate::config::Config;
use crate::dispatch::DispatchGroup;
use crate::error::RegistryError;

/// In-process entry point: builds a handle for the requested capability.
pub type BuiltinFactory = Arc<dyn Fn(Capability) -> PluginResult<PluginHandle> + Send + Sync>;

/// Where a resolved plugin came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginLocation {
    Builtin,
    Executable(PathBuf),
}

impl fmt::Display for PluginLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginLocation::Builtin => f.write_str("<builtin>"),
            PluginLocation::Executable(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A resolved plugin.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub capability: Capability,
    pub location: PluginLocation,
    pub handle: PluginHandle,
}

/// Conventional executable path for a plugin.
pub fn plugin_executable(search_path: &Path, name: &str) -> PathBuf {
    let dir = format!("{name}_plugin");
    search_path.join(&dir).join(&dir)
}

/// Resolves plugins for one run and groups them by capability.
pub struct PluginRegistry {
    builtins: BTreeMap<String, BuiltinFactory>,
    descriptors: Vec<PluginDescriptor>,
    generators: DispatchGroup<dyn GeneratorPlugin>,
    duts: DispatchGroup<dyn DutPlugin>,
    references: DispatchGroup<dyn ReferencePlugin>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            builtins: BTreeMap::new(),
            descriptors: Vec::new(),
            generators: DispatchGroup::new(Capability::Generator),
            duts: DispatchGroup::new(Capability::Dut),
            references: DispatchGroup::new(Capability::Reference),
        }
    }

    /// Add an in-process entry point, consulted before the filesystem.
    pub fn with_builtin<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Capability) -> PluginResult<PluginHandle> + Send + Sync + 'static,
    {
        self.builtins.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn generators(&self) -> &DispatchGroup<dyn GeneratorPlugin> {
        &self.generators
    }

    pub fn duts(&self) -> &DispatchGroup<dyn DutPlugin> {
        &self.duts
    }

    pub fn references(&self) -> &DispatchGroup<dyn ReferencePlugin> {
        &self.references
    }

    /// Everything resolved so far, in resolution order.
    pub fn descriptors(&self) -> &[PluginDescriptor] {
        &self.descriptors
    }

    /// Resolve `name` for `capability` and register it for dispatch.
    pub async fn resolve(
        &mut self,
        capability: Capability,
        name: &str,
        search_path: &Path,
    ) -> Result<&PluginDescriptor, RegistryError> {
        if self.is_registered(capability, name) {
            return Err(RegistryError::DuplicatePlugin {
                name: name.to_string(),
            });
        }

        let (handle, location) = match self.builtins.get(name) {
            Some(factory) => (load_builtin(factory, capability, name)?, PluginLocation::Builtin),
            None => {
                let path = plugin_executable(search_path, name);
                let handle = load_executable(&path, capability, name).await?;
                (handle, PluginLocation::Executable(path))
            }
        };

        info!(plugin = %name, capability = %capability, location = %location, "plugin resolved");
        self.register(name, handle.clone());
        self.descriptors.push(PluginDescriptor {
            name: name.to_string(),
            capability,
            location,
            handle,
        });
        let last = self.descriptors.len() - 1;
        Ok(&self.descriptors[last])
    }

    /// Resolve every configured plugin of each capability, in config order.
    ///
    /// Stops at the first failure; nothing is dispatched by this call.
    pub async fn resolve_all(
        &mut self,
        config: &Config,
        capabilities: &[Capability],
    ) -> Result<(), RegistryError> {
        for &capability in capabilities {
            let names = config.plugins_for(capability);
            if names.is_empty() {
                continue;
            }
            let search_path = config.search_path(capability).map_err(|e| {
                RegistryError::PluginLoadError {
                    name: names.join(","),
                    capability,
                    reason: e.to_string(),
                }
            })?;
            for name in names {
                self.resolve(capability, name, search_path).await?;
            }
        }
        Ok(())
    }

    fn is_registered(&self, capability: Capability, name: &str) -> bool {
        match capability {
            Capability::Generator => self.generators.contains(name),
            Capability::Dut => self.duts.contains(name),
            Capability::Reference => self.references.contains(name),
        }
    }

    fn register(&mut self, name: &str, handle: PluginHandle) {
        debug!(plugin = %name, capability = %handle.capability(), "registering plugin");
        match handle {
            PluginHandle::Generator(p) => self.generators.push(name, p),
            PluginHandle::Dut(p) => self.duts.push(name, p),
            PluginHandle::Reference(p) => self.references.push(name, p),
        }
    }
}

fn load_builtin(
    factory: &BuiltinFactory,
    capability: Capability,
    name: &str,
) -> Result<PluginHandle, RegistryError> {
    let handle = factory(capability).map_err(|e| RegistryError::PluginLoadError {
        name: name.to_string(),
        capability,
        reason: e.to_string(),
    })?;
    if handle.capability() != capability {
        return Err(RegistryError::PluginLoadError {
            name: name.to_string(),
            capability,
            reason: format!("entry point provides a {} plugin", handle.capability()),
        });
    }
    Ok(handle)
}

async fn load_executable(
    path: &Path,
    capability: Capability,
    name: &str,
) -> Result<PluginHandle, RegistryError> {
    if !path.is_file() {
        return Err(RegistryError::PluginNotFound {
            name: name.to_string(),
            capability,
            path: path.to_path_buf(),
        });
    }

    let load_error = |reason: String| RegistryError::PluginLoadError {
        name: name.to_string(),
        capability,
        reason,
    };

    let plugin = ProcessPlugin::new(name, path);
    let manifest = plugin
        .describe()
        .await
        .map_err(|e| load_error(format!("describe handshake failed: {e}")))?;

    if manifest.name != name {
        return Err(load_error(format!(
            "executable identifies itself as `{}`",
            manifest.name
        )));
    }
    if !manifest.supports(capability) {
        return Err(load_error(format!("does not provide the {capability} capability")));
    }

    let plugin = Arc::new(plugin);
    Ok(match capability {
        Capability::Generator => PluginHandle::Generator(plugin),
        Capability::Dut => PluginHandle::Dut(plugin),
        Capability::Reference => PluginHandle::Reference(plugin),
    })
}
