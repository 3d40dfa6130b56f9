/// Lifecycle states of a task run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Running { task: String, iteration: u32 },
    Calibrating { element: String },
    Completed { message: Option<String> },
    Aborted { failures: u32 },
    Cancelled,
}

/// Terminal result of a task run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { message: Option<String> },
    Aborted { reason: String },
    Cancelled,
}

impl RunOutcome {
    pub fn as_state(&self, failures: u32) -> TaskState {
        match self {
            RunOutcome::Completed { message } => TaskState::Completed {
                message: message.clone(),
            },
            RunOutcome::Aborted { .. } => TaskState::Aborted { failures },
            RunOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

/// Requested capture fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    #[default]
    Low,
    High,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Low => "low",
            DetailLevel::High => "high",
        }
    }
}

/// Uniform result of executing one command.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ActionResult {
    pub command: String,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ActionResult {
    pub fn ok(command: &str) -> Self {
        Self {
            command: command.to_string(),
            success: true,
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn failed(command: &str, error: impl Into<String>) -> Self {
        Self {
            command: command.to_string(),
            success: false,
            error: Some(error.into()),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoopConfig {
    pub max_failures: u32,
    pub max_duration_minutes: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            max_duration_minutes: None,
        }
    }
}

impl From<&crate::config::AgentConfig> for LoopConfig {
    fn from(cfg: &crate::config::AgentConfig) -> Self {
        Self {
            max_failures: cfg.max_consecutive_failures.max(1),
            max_duration_minutes: (cfg.max_loop_duration_minutes > 0)
                .then_some(cfg.max_loop_duration_minutes),
        }
    }
}

/// Per-element result of a calibration run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CalibrationReport {
    pub element: String,
    /// Device-space position stored for the element, if it was located.
    pub position: Option<(i32, i32)>,
    pub error: Option<String>,
}

impl CalibrationReport {
    pub fn success(&self) -> bool {
        self.position.is_some()
    }
}
