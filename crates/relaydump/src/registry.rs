//! Explicit registry of output plugins.
//!
//! Nothing registers itself at load time; the binary calls
//! [`PluginRegistry::with_builtin`] during startup.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Names must be strictly shorter than this many bytes.
pub const MAX_PLUGIN_NAME: usize = 64;

/// An output plugin as seen by the dump cycle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PluginInfo {
    /// Name used for lookup and as the tag inside object keys.
    pub name: String,
    /// Default file extension of the produced objects.
    pub ext: String,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ext: ext.into(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, PluginInfo>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the zip-container plugins shipped with this crate.
    pub fn with_builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(PluginInfo::new("zips3", "zip"))?;
        registry.register(PluginInfo::new("zip", "zip"))?;
        Ok(registry)
    }

    pub fn register(&mut self, plugin: PluginInfo) -> Result<()> {
        if plugin.name.is_empty() || plugin.name.len() >= MAX_PLUGIN_NAME {
            return Err(Error::Registry {
                reason: format!(
                    "plugin name `{}` must be 1 to {} bytes",
                    plugin.name,
                    MAX_PLUGIN_NAME - 1
                ),
            });
        }
        if self.plugins.contains_key(&plugin.name) {
            return Err(Error::Registry {
                reason: format!("plugin `{}` is already registered", plugin.name),
            });
        }
        self.plugins.insert(plugin.name.clone(), plugin);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&PluginInfo> {
        self.plugins.get(name).ok_or_else(|| Error::Registry {
            reason: format!(
                "unknown plugin `{name}`, available: {}",
                self.names().collect::<Vec<_>>().join(", ")
            ),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }
}
