use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::loop_control::RunClaim;
use crate::agent_engine::state::{CalibrationReport, RunOutcome, TaskState};

/// One-way notifications from the engine to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum AgentNotification {
    StateChanged(TaskState),
    Status(String),
    /// 0–100.
    Progress(u8),
    Log(String),
    CalibrationResult(CalibrationReport),
    /// Emitted exactly once per run.
    Finished(RunOutcome),
}

/// Requests from the presentation layer into the engine task. Start requests
/// carry the run claim their sender already acquired.
#[derive(Debug)]
pub enum AgentEvent {
    StartTask {
        input: String,
        cancel: CancellationToken,
        claim: RunClaim,
    },
    StartCalibration {
        elements: Vec<String>,
        cancel: CancellationToken,
        claim: RunClaim,
    },
    Shutdown,
}

/// Broadcast fan-out of notifications plus the engine's inbound command queue.
pub struct EventBus {
    tx: broadcast::Sender<AgentNotification>,
    command_tx: mpsc::Sender<AgentEvent>,
    command_rx: Option<mpsc::Receiver<AgentEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        let (command_tx, command_rx) = mpsc::channel(32);
        Self {
            tx,
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentNotification> {
        self.tx.subscribe()
    }

    pub fn notifier(&self) -> Notifier {
        Notifier {
            tx: self.tx.clone(),
        }
    }

    pub fn command_sender(&self) -> mpsc::Sender<AgentEvent> {
        self.command_tx.clone()
    }

    /// The receiving end can be taken once, by the engine task.
    pub fn take_command_receiver(&mut self) -> Option<mpsc::Receiver<AgentEvent>> {
        self.command_rx.take()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending half held by the engine. Sends never fail the caller: with no
/// subscribers a notification is simply dropped.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<AgentNotification>,
}

impl Notifier {
    pub fn emit(&self, note: AgentNotification) {
        let _ = self.tx.send(note);
    }

    pub fn status(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(status = %text, "status");
        self.emit(AgentNotification::Status(text));
    }

    pub fn progress(&self, percent: u32) {
        self.emit(AgentNotification::Progress(percent.min(100) as u8));
    }

    pub fn log(&self, line: impl Into<String>) {
        self.emit(AgentNotification::Log(line.into()));
    }

    pub fn state(&self, state: &TaskState) {
        self.emit(AgentNotification::StateChanged(state.clone()));
    }
}
