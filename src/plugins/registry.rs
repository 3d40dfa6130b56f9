use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PluginEntry;
use crate::errors::{OrdenadorError, OrdenadorResult};

/// Name and description advertised to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub description: String,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Runs the plugin; the returned string is logged.
    async fn invoke(&self, args: &[String]) -> OrdenadorResult<String>;
}

/// Read-only snapshot of the available plugins, keyed by name.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        tracing::debug!(plugin = %plugin.name(), "plugin registered");
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    /// Builds a registry of [`CommandPlugin`]s from the enabled config entries.
    pub fn from_config(entries: &[PluginEntry]) -> Self {
        let mut registry = Self::new();
        for entry in entries.iter().filter(|e| e.enabled) {
            registry.register(Arc::new(CommandPlugin::from(entry)));
        }
        tracing::info!(count = registry.plugins.len(), "plugins loaded");
        registry
    }

    /// Sorted by name.
    pub fn list(&self) -> Vec<PluginInfo> {
        self.plugins
            .values()
            .map(|p| PluginInfo {
                name: p.name().to_string(),
                description: p.description().to_string(),
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub async fn invoke(&self, name: &str, args: &[String]) -> OrdenadorResult<String> {
        let plugin = self
            .plugins
            .get(name)
            .ok_or_else(|| OrdenadorError::Plugin(format!("unknown plugin: {name}")))?;
        plugin.invoke(args).await
    }
}

/// A plugin declared in config.toml that runs an external command and waits
/// for it to exit.
pub struct CommandPlugin {
    name: String,
    description: String,
    command: String,
    args: Vec<String>,
}

impl From<&PluginEntry> for CommandPlugin {
    fn from(entry: &PluginEntry) -> Self {
        let description = if entry.description.trim().is_empty() {
            "No description provided.".to_string()
        } else {
            entry.description.clone()
        };
        Self {
            name: entry.name.clone(),
            description,
            command: entry.command.clone(),
            args: entry.args.clone(),
        }
    }
}

#[async_trait]
impl Plugin for CommandPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, args: &[String]) -> OrdenadorResult<String> {
        let output = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| OrdenadorError::Plugin(format!("{}: {e}", self.name)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(OrdenadorError::Plugin(format!(
                "{} exited with {}: {}",
                self.name,
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, command: &str, enabled: bool) -> PluginEntry {
        PluginEntry {
            name: name.into(),
            description: String::new(),
            command: command.into(),
            args: Vec::new(),
            enabled,
        }
    }

    #[test]
    fn from_config_skips_disabled_and_sorts() {
        let registry = PluginRegistry::from_config(&[
            entry("zeta", "true", true),
            entry("alpha", "true", true),
            entry("off", "true", false),
        ]);
        let names: Vec<String> = registry.list().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(registry.list()[0].description, "No description provided.");
        assert!(!registry.contains("off"));
    }

    #[tokio::test]
    async fn unknown_plugin_is_an_error() {
        let registry = PluginRegistry::new();
        let err = registry.invoke("nope", &[]).await.unwrap_err();
        assert!(matches!(err, OrdenadorError::Plugin(msg) if msg.contains("nope")));
    }

    #[tokio::test]
    async fn missing_command_is_an_error() {
        let registry =
            PluginRegistry::from_config(&[entry("ghost", "ordenador-no-such-plugin-binary", true)]);
        assert!(registry.invoke("ghost", &[]).await.is_err());
    }
}
