use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{OrdenadorError, OrdenadorResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Program alias → executable path.
    #[serde(default)]
    pub programs: HashMap<String, String>,
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions endpoint URL.
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var ORDENADOR_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Maps oracle roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Per-iteration decision call of the task loop.
    pub decision: Option<RoleEntry>,
    /// Single-shot element lookup used by calibration.
    pub calibration: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    pub model: String,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    /// 0 disables the wall-clock limit.
    #[serde(default)]
    pub max_loop_duration_minutes: u32,
    /// Write a JSONL transcript of every run under the data directory.
    #[serde(default)]
    pub record_sessions: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_failures(),
            max_loop_duration_minutes: 0,
            record_sessions: false,
        }
    }
}

fn default_max_failures() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_low_max_edge")]
    pub low_max_edge: u32,
    #[serde(default = "default_high_max_edge")]
    pub high_max_edge: u32,
    #[serde(default = "default_low_quality")]
    pub low_jpeg_quality: u8,
    #[serde(default = "default_high_quality")]
    pub high_jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            low_max_edge: default_low_max_edge(),
            high_max_edge: default_high_max_edge(),
            low_jpeg_quality: default_low_quality(),
            high_jpeg_quality: default_high_quality(),
        }
    }
}

fn default_low_max_edge() -> u32 {
    1280
}

fn default_high_max_edge() -> u32 {
    2560
}

fn default_low_quality() -> u8 {
    60
}

fn default_high_quality() -> u8 {
    90
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryConfig {
    /// Location of the element table; defaults to the per-user data directory.
    pub path: Option<PathBuf>,
}

impl MemoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| data_dir().join("gui_elements.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CalibrationConfig {
    #[serde(default)]
    pub elements: Vec<String>,
}

/// `<data_local_dir>/Ordenador`, falling back to the working directory.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("Ordenador"))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn resolve_config_path() -> OrdenadorResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(OrdenadorError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn parse_config(content: &str) -> OrdenadorResult<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    if config.agent.max_consecutive_failures == 0 {
        return Err(OrdenadorError::Config(
            "agent.max_consecutive_failures must be at least 1".into(),
        ));
    }
    Ok(config)
}

pub fn load_config_from(path: &Path) -> OrdenadorResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn load_config() -> OrdenadorResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}
