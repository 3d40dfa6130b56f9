use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::agent_engine::command::{parse_decision, CommandKind, REPLY_TO_USER};
use crate::agent_engine::event_bus::{AgentEvent, AgentNotification, Notifier};
use crate::agent_engine::history::{session_transcript_path, ActionRecord, TaskHistory};
use crate::agent_engine::loop_control::{LoopController, RunClaim, RunLock};
use crate::agent_engine::state::{
    CalibrationReport, DetailLevel, LoopConfig, RunOutcome, TaskState,
};
use crate::config::AppConfig;
use crate::errors::{OrdenadorError, OrdenadorResult};
use crate::executor::coordinator::capture_to_device;
use crate::executor::dispatcher::{Dispatcher, ProgramTable};
use crate::executor::input::ActionDriver;
use crate::llm::oracle::{DecisionOracle, DecisionRequest, VisionOracle};
use crate::llm::registry::ProviderRegistry;
use crate::memory::spatial::{extract_quoted_name, Point, SpatialMemory};
use crate::perception::screenshot::CaptureService;
use crate::perception::types::Capture;
use crate::plugins::registry::PluginRegistry;

const UNRECOGNIZED_HINT: &str =
    "Use one of: click, type_text, launch_program, run_plugin, request_higher_detail, task_complete.";

/// The perceive → decide → act loop.
///
/// The engine is the only writer of the task state, history, failure budget
/// and detail level. Everything it wants the presentation layer to know goes
/// out through the [`Notifier`].
pub struct AgentEngine {
    state: TaskState,
    capture: Arc<dyn CaptureService>,
    oracle: Arc<dyn DecisionOracle>,
    dispatcher: Dispatcher,
    memory: SpatialMemory,
    loop_ctrl: LoopController,
    history: TaskHistory,
    detail: DetailLevel,
    notifier: Notifier,
    lock: RunLock,
    record_sessions: bool,
    stop_notified: bool,
}

impl AgentEngine {
    pub fn new(
        capture: Arc<dyn CaptureService>,
        oracle: Arc<dyn DecisionOracle>,
        dispatcher: Dispatcher,
        memory: SpatialMemory,
        loop_config: LoopConfig,
        notifier: Notifier,
    ) -> Self {
        Self {
            state: TaskState::Idle,
            capture,
            oracle,
            dispatcher,
            memory,
            loop_ctrl: LoopController::new(loop_config),
            history: TaskHistory::new(),
            detail: DetailLevel::Low,
            notifier,
            lock: RunLock::new(),
            record_sessions: false,
            stop_notified: false,
        }
    }

    /// Wire the engine from a config snapshot. Providers, plugins and the
    /// program table are read once here and never reloaded.
    pub fn from_config(
        config: &AppConfig,
        capture: Arc<dyn CaptureService>,
        driver: Arc<dyn ActionDriver>,
        notifier: Notifier,
    ) -> Self {
        let oracle = VisionOracle::new(ProviderRegistry::from_config(config));
        let plugins = PluginRegistry::from_config(&config.plugins);
        let dispatcher = Dispatcher::new(
            driver,
            Arc::new(plugins),
            ProgramTable::new(&config.programs),
        );
        let mut engine = Self::new(
            capture,
            Arc::new(oracle),
            dispatcher,
            SpatialMemory::new(config.memory.resolved_path()),
            LoopConfig::from(&config.agent),
            notifier,
        );
        engine.record_sessions = config.agent.record_sessions;
        engine
    }

    /// Shared with [`AgentHandle`](crate::commands::AgentHandle) so that a
    /// second run is refused before it is queued.
    pub fn run_lock(&self) -> RunLock {
        self.lock.clone()
    }

    pub fn memory(&self) -> &SpatialMemory {
        &self.memory
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn history(&self) -> &TaskHistory {
        &self.history
    }

    pub fn detail_level(&self) -> DetailLevel {
        self.detail
    }

    /// Consume requests until the channel closes or a shutdown arrives.
    pub async fn run_loop(&mut self, mut rx: mpsc::Receiver<AgentEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::StartTask {
                    input,
                    cancel,
                    claim,
                } => {
                    self.run_task_claimed(claim, &input, &cancel).await;
                }
                AgentEvent::StartCalibration {
                    elements,
                    cancel,
                    claim,
                } => {
                    self.run_calibration_claimed(claim, &elements, &cancel).await;
                }
                AgentEvent::Shutdown => break,
            }
        }
        tracing::info!("agent loop ended");
    }

    /// Run one task to a terminal state. Fails only with
    /// [`OrdenadorError::Busy`] when another run holds the lock.
    pub async fn run_task(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
    ) -> OrdenadorResult<RunOutcome> {
        let claim = self.lock.try_claim().ok_or(OrdenadorError::Busy)?;
        Ok(self.run_task_claimed(claim, input, cancel).await)
    }

    pub async fn run_task_claimed(
        &mut self,
        claim: RunClaim,
        input: &str,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("task", run_id = %run_id);
        self.begin_run();
        self.history = if self.record_sessions {
            TaskHistory::with_transcript(session_transcript_path(&run_id))
        } else {
            TaskHistory::new()
        };
        self.history.reset(input);

        let outcome = AssertUnwindSafe(self.drive_task(input, cancel).instrument(span.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!(run_id = %run_id, "task loop panicked");
                RunOutcome::Aborted {
                    reason: "internal error".into(),
                }
            });
        span.in_scope(|| self.finish(outcome, claim))
    }

    /// Locate each element once and store it in spatial memory. No history,
    /// no failure budget: every element gets exactly one oracle query.
    pub async fn run_calibration(
        &mut self,
        elements: &[String],
        cancel: &CancellationToken,
    ) -> OrdenadorResult<(RunOutcome, Vec<CalibrationReport>)> {
        let claim = self.lock.try_claim().ok_or(OrdenadorError::Busy)?;
        Ok(self.run_calibration_claimed(claim, elements, cancel).await)
    }

    pub async fn run_calibration_claimed(
        &mut self,
        claim: RunClaim,
        elements: &[String],
        cancel: &CancellationToken,
    ) -> (RunOutcome, Vec<CalibrationReport>) {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("calibration", run_id = %run_id);
        self.begin_run();

        let mut reports = Vec::with_capacity(elements.len());
        let outcome = AssertUnwindSafe(
            self.drive_calibration(elements, cancel, &mut reports)
                .instrument(span.clone()),
        )
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            tracing::error!(run_id = %run_id, "calibration panicked");
            RunOutcome::Aborted {
                reason: "internal error".into(),
            }
        });
        (span.in_scope(|| self.finish(outcome, claim)), reports)
    }

    fn begin_run(&mut self) {
        self.loop_ctrl.reset();
        self.detail = DetailLevel::Low;
        self.stop_notified = false;
    }

    async fn drive_task(&mut self, input: &str, cancel: &CancellationToken) -> RunOutcome {
        if input.trim().is_empty() {
            self.notifier.log("No instruction received.");
            return RunOutcome::Completed {
                message: Some("Nothing to do.".into()),
            };
        }

        tracing::info!(task = %input, "task started");
        self.notifier.progress(0);
        self.notifier.status("Starting task...");
        self.notifier.log(format!("Task: {input}"));

        if self.check_for_stop(cancel) {
            return RunOutcome::Cancelled;
        }
        if let Some(outcome) = self.try_from_memory(input).await {
            return outcome;
        }

        let mut iteration: u32 = 0;
        loop {
            if self.check_for_stop(cancel) {
                return RunOutcome::Cancelled;
            }
            if self.loop_ctrl.should_stop() {
                return RunOutcome::Aborted {
                    reason: self.abort_reason(),
                };
            }

            iteration += 1;
            self.set_state(TaskState::Running {
                task: input.to_string(),
                iteration,
            });

            // Upgraded detail lasts for this capture only.
            let detail = std::mem::take(&mut self.detail);
            self.notifier.status("Capturing screen state...");
            let captured = until_cancelled(cancel, self.capture.capture(detail)).await;
            let capture = match captured {
                None => return self.cancelled(cancel),
                Some(Ok(capture)) => capture,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "capture failed, continuing with an empty capture");
                    self.notifier.log(format!("Screen capture failed: {e}"));
                    Capture::empty()
                }
            };
            self.notifier.progress(10 + 5 * iteration.min(4));
            if self.check_for_stop(cancel) {
                return RunOutcome::Cancelled;
            }

            self.notifier.status("Asking for the next step...");
            let summary = self.history.summarize();
            let plugins = self.dispatcher.plugins().list();
            let request = DecisionRequest {
                task: input,
                history_summary: &summary,
                capture: &capture,
                available_plugins: &plugins,
                detail_level: detail,
            };
            let decided = until_cancelled(cancel, self.oracle.decide(&request)).await;
            let command = match decided {
                None => return self.cancelled(cancel),
                Some(Ok(raw)) => parse_decision(&raw),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "decision request failed");
                    CommandKind::OracleError {
                        message: e.to_string(),
                    }
                }
            };
            self.notifier.progress(40 + 5 * iteration.min(4));
            if self.check_for_stop(cancel) {
                return RunOutcome::Cancelled;
            }

            tracing::info!(iteration, command = %command.tag(), "decision received");
            if let Some(outcome) = self.apply(command, &capture, iteration, cancel).await {
                return outcome;
            }
        }
    }

    /// Act on one decision. `Some` ends the run.
    async fn apply(
        &mut self,
        command: CommandKind,
        capture: &Capture,
        iteration: u32,
        cancel: &CancellationToken,
    ) -> Option<RunOutcome> {
        match command {
            CommandKind::Unrecognized { ref raw, ref arguments } => {
                let tag = command.tag().to_string();
                self.loop_ctrl.record_failure();
                if raw.as_deref() == Some(REPLY_TO_USER) {
                    let message = arguments
                        .get("message")
                        .and_then(|v| v.as_str())
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(str::to_string);
                    self.history
                        .record_feedback("reply_to_user is not an action; control returned to the user.");
                    if let Some(m) = &message {
                        self.notifier.log(format!("Reply: {m}"));
                    }
                    return Some(RunOutcome::Completed { message });
                }
                self.notifier.status("Received an invalid command.");
                self.notifier.log(format!("Unrecognized command: {tag}"));
                self.history
                    .record_feedback(format!("Command '{tag}' was not recognized. {UNRECOGNIZED_HINT}"));
                self.budget_exhausted()
            }
            CommandKind::OracleError { ref message } => {
                self.loop_ctrl.record_failure();
                self.notifier.log(format!("Decision service error: {message}"));
                self.history
                    .record_feedback(format!("decision service error: {message}"));
                self.budget_exhausted()
            }
            CommandKind::RequestHigherDetail { ref reason } => {
                tracing::info!(reason = ?reason, "higher detail requested");
                self.notifier.log("Higher detail capture requested.");
                self.history.record_action(ActionRecord::from(&command));
                self.detail = DetailLevel::High;
                None
            }
            CommandKind::TaskComplete { ref message } => {
                self.history.record_action(ActionRecord::from(&command));
                let message = message
                    .as_deref()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string);
                if let Some(m) = &message {
                    self.notifier.log(format!("Assistant: {m}"));
                }
                Some(RunOutcome::Completed { message })
            }
            executable => {
                debug_assert!(executable.is_executable(), "{} reached dispatch", executable.tag());
                let command = to_device_space(executable, capture);
                let record = ActionRecord::from(&command);
                self.notifier.status("Executing command...");
                self.notifier.log(format!(
                    "Command: {} {}",
                    record.command,
                    serde_json::Value::Object(record.arguments.clone())
                ));

                let result = self.dispatcher.dispatch(&command, &self.memory).await;
                if result.success {
                    self.history.record_action(record);
                    self.loop_ctrl.record_success();
                    self.detail = DetailLevel::Low;
                } else {
                    let error = result.error.unwrap_or_else(|| "unknown error".into());
                    self.notifier.log(format!("Command failed: {error}"));
                    self.history
                        .record_feedback(format!("Command '{}' failed: {error}", record.command));
                    self.loop_ctrl.record_failure();
                }
                self.notifier.progress(70 + 5 * iteration.min(4));

                if self.check_for_stop(cancel) {
                    return Some(RunOutcome::Cancelled);
                }
                self.budget_exhausted()
            }
        }
    }

    /// Click a taught element named in quotes in the instruction, skipping
    /// the oracle entirely. Any miss falls through to the normal loop.
    async fn try_from_memory(&mut self, input: &str) -> Option<RunOutcome> {
        let name = extract_quoted_name(input)?;
        let point = self.memory.lookup(&name)?;

        self.notifier.status("Using a stored position...");
        self.notifier
            .log(format!("Found '{name}' in memory at ({}, {})", point.x, point.y));
        if let Err(e) = self.dispatcher.driver().click(point.x, point.y).await {
            tracing::warn!(element = %name, error = %e, "stored-position click failed");
            self.notifier.log(format!("Stored-position click failed: {e}"));
            return None;
        }

        self.history.record_action(ActionRecord::from(&CommandKind::Click {
            x: Some(point.x),
            y: Some(point.y),
            label: Some(name.clone()),
        }));
        Some(RunOutcome::Completed {
            message: Some(format!("Clicked '{name}' from memory.")),
        })
    }

    async fn drive_calibration(
        &mut self,
        elements: &[String],
        cancel: &CancellationToken,
        reports: &mut Vec<CalibrationReport>,
    ) -> RunOutcome {
        if elements.is_empty() {
            return RunOutcome::Completed {
                message: Some("No elements to calibrate.".into()),
            };
        }

        tracing::info!(count = elements.len(), "calibration started");
        self.notifier.progress(0);
        self.notifier.status("Starting calibration...");

        let total = elements.len();
        for (k, element) in elements.iter().enumerate() {
            if self.check_for_stop(cancel) {
                return RunOutcome::Cancelled;
            }
            self.set_state(TaskState::Calibrating {
                element: element.clone(),
            });
            self.notifier.status(format!("Locating '{element}'..."));

            let captured = until_cancelled(cancel, self.capture.capture(DetailLevel::High)).await;
            let capture = match captured {
                None => return self.cancelled(cancel),
                Some(Ok(capture)) => capture,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "calibration capture failed");
                    Capture::empty()
                }
            };
            if self.check_for_stop(cancel) {
                return RunOutcome::Cancelled;
            }

            let report = if capture.is_empty() {
                CalibrationReport {
                    element: element.clone(),
                    position: None,
                    error: Some("screen capture unavailable".into()),
                }
            } else {
                let Some(reply) =
                    until_cancelled(cancel, self.oracle.locate(element, &capture)).await
                else {
                    return self.cancelled(cancel);
                };
                if self.check_for_stop(cancel) {
                    return RunOutcome::Cancelled;
                }
                match reply {
                    Ok(raw) => self.store_located(element, &raw, &capture),
                    Err(e) => CalibrationReport {
                        element: element.clone(),
                        position: None,
                        error: Some(e.to_string()),
                    },
                }
            };
            match (&report.position, &report.error) {
                (Some((x, y)), _) => self.notifier.log(format!("'{element}' stored at ({x}, {y})")),
                (None, err) => self.notifier.log(format!(
                    "'{element}' not located: {}",
                    err.as_deref().unwrap_or("unknown error")
                )),
            }
            self.notifier
                .emit(AgentNotification::CalibrationResult(report.clone()));
            reports.push(report);
            self.notifier.progress((100 * (k + 1) / total) as u32);
        }

        let located = reports.iter().filter(|r| r.success()).count();
        RunOutcome::Completed {
            message: Some(format!(
                "Calibration finished: {located}/{total} elements located."
            )),
        }
    }

    fn store_located(&self, element: &str, raw: &str, capture: &Capture) -> CalibrationReport {
        let failed = |error: String| CalibrationReport {
            element: element.to_string(),
            position: None,
            error: Some(error),
        };
        let CommandKind::Click {
            x: Some(x),
            y: Some(y),
            ..
        } = parse_decision(raw)
        else {
            return failed("response carried no click coordinates".into());
        };

        let (dx, dy) = capture_to_device(x, y, capture);
        match self.memory.remember(element, Point::new(dx, dy)) {
            Ok(()) => CalibrationReport {
                element: element.to_string(),
                position: Some((dx, dy)),
                error: None,
            },
            Err(e) => failed(e.to_string()),
        }
    }

    fn budget_exhausted(&self) -> Option<RunOutcome> {
        self.loop_ctrl.exhausted().then(|| RunOutcome::Aborted {
            reason: self.abort_reason(),
        })
    }

    fn abort_reason(&self) -> String {
        if self.loop_ctrl.exhausted() {
            format!(
                "{} of {} allowed consecutive failures",
                self.loop_ctrl.failures(),
                self.loop_ctrl.max_failures()
            )
        } else {
            "time limit reached".to_string()
        }
    }

    /// True once the token is cancelled; the user is told only the first time.
    fn check_for_stop(&mut self, cancel: &CancellationToken) -> bool {
        if !cancel.is_cancelled() {
            return false;
        }
        if !self.stop_notified {
            self.stop_notified = true;
            tracing::info!("stop requested");
            self.notifier.status("Cancelling...");
            self.notifier.log("Stop requested.");
        }
        true
    }

    /// A suspension point lost the race against the stop signal.
    fn cancelled(&mut self, cancel: &CancellationToken) -> RunOutcome {
        self.check_for_stop(cancel);
        RunOutcome::Cancelled
    }

    fn set_state(&mut self, state: TaskState) {
        self.state = state;
        self.notifier.state(&self.state);
    }

    /// Emit the terminal notifications and make the engine reusable. The lock
    /// is free by the time `Finished` goes out.
    fn finish(&mut self, outcome: RunOutcome, claim: RunClaim) -> RunOutcome {
        let status = match &outcome {
            RunOutcome::Completed { message: Some(m) } => m.clone(),
            RunOutcome::Completed { message: None } => "Task completed.".to_string(),
            RunOutcome::Aborted { reason } => {
                tracing::warn!(reason = %reason, "run aborted");
                self.notifier.log(format!("Aborted: {reason}"));
                "Could not complete the task.".to_string()
            }
            RunOutcome::Cancelled => {
                self.notifier.log("Task cancelled.");
                "Task cancelled.".to_string()
            }
        };
        tracing::info!(outcome = ?outcome, "run finished");

        self.notifier.progress(100);
        self.notifier.status(status);
        self.set_state(outcome.as_state(self.loop_ctrl.failures()));

        self.loop_ctrl.reset();
        self.detail = DetailLevel::Low;
        self.stop_notified = false;
        drop(claim);
        self.notifier.emit(AgentNotification::Finished(outcome.clone()));
        outcome
    }
}

/// Race a suspension point against cancellation. `None` means the token fired
/// first and the step's result, if any, was dropped.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Oracle click coordinates refer to the capture; the driver wants device pixels.
fn to_device_space(command: CommandKind, capture: &Capture) -> CommandKind {
    match command {
        CommandKind::Click {
            x: Some(x),
            y: Some(y),
            label,
        } => {
            let (dx, dy) = capture_to_device(x, y, capture);
            if (dx, dy) != (x, y) {
                tracing::debug!(x, y, dx, dy, "click mapped to device space");
            }
            CommandKind::Click {
                x: Some(dx),
                y: Some(dy),
                label,
            }
        }
        other => other,
    }
}
