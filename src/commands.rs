// Presentation-facing entry points into the running engine.
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::event_bus::AgentEvent;
use crate::agent_engine::loop_control::RunLock;
use crate::errors::{OrdenadorError, OrdenadorResult};
use crate::memory::spatial::{Point, SpatialMemory};

/// Cloneable only through `Arc`; one handle per presentation layer.
pub struct AgentHandle {
    tx: mpsc::Sender<AgentEvent>,
    lock: RunLock,
    current: Mutex<CancellationToken>,
    memory: SpatialMemory,
}

impl AgentHandle {
    pub fn new(tx: mpsc::Sender<AgentEvent>, lock: RunLock, memory: SpatialMemory) -> Self {
        Self {
            tx,
            lock,
            current: Mutex::new(CancellationToken::new()),
            memory,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.lock.is_busy()
    }

    /// Queue a task. Refused with [`OrdenadorError::Busy`] while another task
    /// or calibration is in flight.
    pub async fn start_task(&self, input: impl Into<String>) -> OrdenadorResult<()> {
        let claim = self.lock.try_claim().ok_or(OrdenadorError::Busy)?;
        let cancel = self.fresh_token();
        let input = input.into();
        tracing::info!(task = %input, "start_task");
        self.tx
            .send(AgentEvent::StartTask {
                input,
                cancel,
                claim,
            })
            .await
            .map_err(|e| OrdenadorError::Agent(format!("engine not running: {e}")))
    }

    pub async fn start_calibration(&self, elements: Vec<String>) -> OrdenadorResult<()> {
        let claim = self.lock.try_claim().ok_or(OrdenadorError::Busy)?;
        let cancel = self.fresh_token();
        tracing::info!(count = elements.len(), "start_calibration");
        self.tx
            .send(AgentEvent::StartCalibration {
                elements,
                cancel,
                claim,
            })
            .await
            .map_err(|e| OrdenadorError::Agent(format!("engine not running: {e}")))
    }

    /// Request cooperative cancellation of the current run. Safe to call any
    /// number of times, with or without a run in flight.
    pub fn stop_task(&self) {
        let token = self.token();
        if !token.is_cancelled() {
            tracing::info!("stop_task");
            token.cancel();
        }
    }

    /// Store an element position picked by the user. Holds the run lock for
    /// the write, so no run can start halfway through it.
    pub fn teach_element(&self, name: &str, x: i32, y: i32) -> OrdenadorResult<()> {
        let _claim = self.lock.try_claim().ok_or(OrdenadorError::Busy)?;
        self.memory.remember(name, Point::new(x, y))?;
        tracing::info!(element = %name, x, y, "element taught");
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub fn forget_element(&self, name: &str) -> OrdenadorResult<bool> {
        let _claim = self.lock.try_claim().ok_or(OrdenadorError::Busy)?;
        self.memory.forget(name)
    }

    pub fn elements(&self) -> BTreeMap<String, Point> {
        self.memory.entries()
    }

    pub async fn shutdown(&self) {
        self.stop_task();
        let _ = self.tx.send(AgentEvent::Shutdown).await;
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.token() = token.clone();
        token
    }

    fn token(&self) -> MutexGuard<'_, CancellationToken> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (tempfile::TempDir, AgentHandle, mpsc::Receiver<AgentEvent>) {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(4);
        let memory = SpatialMemory::new(dir.path().join("gui_elements.json"));
        (dir, AgentHandle::new(tx, RunLock::new(), memory), rx)
    }

    #[tokio::test]
    async fn second_start_is_busy_until_the_run_ends() {
        let (_dir, handle, mut rx) = handle();
        handle.start_task("first").await.unwrap();
        assert!(matches!(
            handle.start_task("second").await,
            Err(OrdenadorError::Busy)
        ));
        assert!(matches!(
            handle.start_calibration(vec!["OK".into()]).await,
            Err(OrdenadorError::Busy)
        ));

        let Some(AgentEvent::StartTask { input, claim, .. }) = rx.recv().await else {
            panic!("expected a queued task");
        };
        assert_eq!(input, "first");
        drop(claim);
        assert!(!handle.is_busy());
        handle.start_task("third").await.unwrap();
    }

    #[tokio::test]
    async fn stop_cancels_the_current_token_idempotently() {
        let (_dir, handle, mut rx) = handle();
        handle.start_task("run").await.unwrap();
        let Some(AgentEvent::StartTask { cancel, .. }) = rx.recv().await else {
            panic!("expected a queued task");
        };
        handle.stop_task();
        handle.stop_task();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn new_run_gets_an_uncancelled_token() {
        let (_dir, handle, mut rx) = handle();
        handle.stop_task();
        handle.start_task("run").await.unwrap();
        let Some(AgentEvent::StartTask { cancel, .. }) = rx.recv().await else {
            panic!("expected a queued task");
        };
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn teaching_is_refused_during_a_run() {
        let (_dir, handle, _rx) = handle();
        handle.teach_element("Mail", 10, 20).unwrap();
        assert_eq!(handle.elements().get("Mail"), Some(&Point::new(10, 20)));

        handle.start_task("run").await.unwrap();
        assert!(matches!(
            handle.teach_element("Mail", 1, 1),
            Err(OrdenadorError::Busy)
        ));
        assert!(matches!(handle.forget_element("Mail"), Err(OrdenadorError::Busy)));
    }

    #[tokio::test]
    async fn editing_memory_holds_the_lock_only_for_the_write() {
        let (_dir, handle, _rx) = handle();
        let held = handle.lock.try_claim().unwrap();
        assert!(matches!(
            handle.teach_element("Mail", 1, 1),
            Err(OrdenadorError::Busy)
        ));
        assert!(handle.elements().is_empty());
        drop(held);

        handle.teach_element("Mail", 1, 1).unwrap();
        assert!(!handle.is_busy());
        assert!(handle.forget_element("Mail").unwrap());
        assert!(!handle.is_busy());
        handle.start_task("run").await.unwrap();
    }

    #[tokio::test]
    async fn forget_reports_whether_anything_was_removed() {
        let (_dir, handle, _rx) = handle();
        handle.teach_element("Mail", 10, 20).unwrap();
        assert!(handle.forget_element("Mail").unwrap());
        assert!(!handle.forget_element("Mail").unwrap());
    }
}
