use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrdenadorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Program not found: {0}")]
    ProgramNotFound(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Spatial memory error: {0}")]
    Memory(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("A task or calibration run is already in progress")]
    Busy,
}

impl serde::Serialize for OrdenadorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type OrdenadorResult<T> = Result<T, OrdenadorError>;
