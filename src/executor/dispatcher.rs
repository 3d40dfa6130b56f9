// Command routing: one validated command in, one uniform ActionResult out.
use std::collections::HashMap;
use std::sync::Arc;

use crate::agent_engine::command::CommandKind;
use crate::agent_engine::state::ActionResult;
use crate::errors::OrdenadorError;
use crate::executor::input::ActionDriver;
use crate::memory::spatial::{Point, SpatialMemory};
use crate::plugins::registry::PluginRegistry;

/// Program alias → executable path, matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct ProgramTable {
    aliases: HashMap<String, String>,
}

impl ProgramTable {
    pub fn new(aliases: &HashMap<String, String>) -> Self {
        Self {
            aliases: aliases
                .iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v.clone()))
                .collect(),
        }
    }

    /// Mapped path, or the alias itself when unmapped.
    pub fn resolve<'a>(&'a self, alias: &'a str) -> &'a str {
        self.aliases
            .get(&alias.trim().to_lowercase())
            .map(String::as_str)
            .unwrap_or(alias)
    }
}

pub struct Dispatcher {
    driver: Arc<dyn ActionDriver>,
    plugins: Arc<PluginRegistry>,
    programs: ProgramTable,
}

impl Dispatcher {
    pub fn new(
        driver: Arc<dyn ActionDriver>,
        plugins: Arc<PluginRegistry>,
        programs: ProgramTable,
    ) -> Self {
        Self {
            driver,
            plugins,
            programs,
        }
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn driver(&self) -> &Arc<dyn ActionDriver> {
        &self.driver
    }

    /// Execute one command. Click coordinates must already be in device space.
    /// Driver and plugin failures come back as `success: false`, never as a panic
    /// or an early return.
    pub async fn dispatch(&self, command: &CommandKind, memory: &SpatialMemory) -> ActionResult {
        let tag = command.tag();
        let result = match command {
            CommandKind::Click { x, y, label } => self.click(*x, *y, label.as_deref(), memory).await,
            CommandKind::TypeText { text } => self.type_text(text.as_deref()).await,
            CommandKind::LaunchProgram { alias, args } => self.launch(alias, args).await,
            CommandKind::RunPlugin { name } => self.run_plugin(name).await,
            other => Err(format!("{} is not an executable command", other.tag())),
        };
        match result {
            Ok(()) => ActionResult::ok(tag),
            Err(e) => {
                tracing::warn!(command = %tag, error = %e, "command failed");
                ActionResult::failed(tag, e)
            }
        }
    }

    async fn click(
        &self,
        x: Option<i32>,
        y: Option<i32>,
        label: Option<&str>,
        memory: &SpatialMemory,
    ) -> Result<(), String> {
        let supplied = x.zip(y).map(|(x, y)| Point::new(x, y));
        let stored = || label.and_then(|l| memory.lookup(l));
        let target = supplied.or_else(stored).ok_or_else(|| {
            "click: coordinates required (no position supplied and no stored element)".to_string()
        })?;

        if supplied.is_none() {
            tracing::info!(element = ?label, x = target.x, y = target.y, "click resolved from spatial memory");
        }

        self.driver
            .click(target.x, target.y)
            .await
            .map_err(|e| format!("click at ({}, {}) failed: {e}", target.x, target.y))?;

        // Successful named clicks with fresh coordinates teach the element.
        if let (Some(point), Some(label)) = (supplied, label) {
            if let Err(e) = memory.remember(label, point) {
                tracing::warn!(element = %label, error = %e, "could not store element position");
            }
        }
        Ok(())
    }

    async fn type_text(&self, text: Option<&str>) -> Result<(), String> {
        let text = text
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "type_text: text required".to_string())?;
        self.driver
            .type_text(text)
            .await
            .map_err(|e| format!("typing failed: {e}"))
    }

    async fn launch(&self, alias: &str, args: &[String]) -> Result<(), String> {
        let path = self.programs.resolve(alias);
        tracing::info!(alias = %alias, path = %path, "launching program");
        match self.driver.launch(path, args).await {
            Ok(()) => Ok(()),
            Err(OrdenadorError::ProgramNotFound(p)) => {
                Err(format!("program not found: {alias} (resolved to {p})"))
            }
            Err(e) => Err(format!("could not start {alias}: {e}")),
        }
    }

    async fn run_plugin(&self, name: &str) -> Result<(), String> {
        if !self.plugins.contains(name) {
            return Err(format!("unknown plugin: {name}"));
        }
        match self.plugins.invoke(name, &[]).await {
            Ok(output) => {
                tracing::info!(plugin = %name, output = %output, "plugin finished");
                Ok(())
            }
            Err(e) => Err(format!("plugin {name} failed: {e}")),
        }
    }
}
