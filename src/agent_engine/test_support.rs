//! Scripted collaborators for engine and dispatcher tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::state::DetailLevel;
use crate::errors::{OrdenadorError, OrdenadorResult};
use crate::executor::input::ActionDriver;
use crate::llm::oracle::{DecisionOracle, DecisionRequest};
use crate::perception::screenshot::CaptureService;
use crate::perception::types::{Capture, ScreenshotMeta};
use crate::plugins::registry::Plugin;

pub enum OracleReply {
    Text(String),
    Fail(String),
    Hang,
    Panic,
}

pub fn reply(json: serde_json::Value) -> OracleReply {
    OracleReply::Text(json.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeenRequest {
    pub task: String,
    pub history_summary: String,
    pub detail_level: DetailLevel,
    pub plugin_names: Vec<String>,
    pub had_screen: bool,
}

#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<OracleReply>>,
    seen: Mutex<Vec<SeenRequest>>,
    located: Mutex<Vec<String>>,
    /// Cancel the token while answering the n-th (1-based) call.
    cancel_on_call: Mutex<Option<(usize, CancellationToken)>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<OracleReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn cancel_on_call(self, n: usize, token: CancellationToken) -> Self {
        *self.cancel_on_call.lock().unwrap() = Some((n, token));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn located(&self) -> Vec<String> {
        self.located.lock().unwrap().clone()
    }

    async fn answer(&self) -> OrdenadorResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, token)) = self.cancel_on_call.lock().unwrap().as_ref() {
            if *at == n {
                token.cancel();
            }
        }
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(OracleReply::Text(t)) => Ok(t),
            Some(OracleReply::Fail(e)) => Err(OrdenadorError::LlmProvider(e)),
            Some(OracleReply::Hang) => std::future::pending().await,
            Some(OracleReply::Panic) => panic!("scripted oracle panic"),
            None => Err(OrdenadorError::LlmProvider("script exhausted".into())),
        }
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn decide(&self, request: &DecisionRequest<'_>) -> OrdenadorResult<String> {
        self.seen.lock().unwrap().push(SeenRequest {
            task: request.task.to_string(),
            history_summary: request.history_summary.to_string(),
            detail_level: request.detail_level,
            plugin_names: request.available_plugins.iter().map(|p| p.name.clone()).collect(),
            had_screen: !request.capture.is_empty(),
        });
        self.answer().await
    }

    async fn locate(&self, element: &str, _capture: &Capture) -> OrdenadorResult<String> {
        self.located.lock().unwrap().push(element.to_string());
        self.answer().await
    }
}

/// Fixed-size capture that records every requested detail level.
pub struct FakeCapture {
    pub width: u32,
    pub height: u32,
    pub device: Option<(u32, u32)>,
    pub fail: bool,
    pub hang: bool,
    requested: Mutex<Vec<DetailLevel>>,
}

impl FakeCapture {
    /// A capture that is already at device resolution.
    pub fn identity(width: u32, height: u32) -> Self {
        Self::scaled((width, height), (width, height))
    }

    pub fn scaled(capture: (u32, u32), device: (u32, u32)) -> Self {
        Self {
            width: capture.0,
            height: capture.1,
            device: Some(device),
            fail: false,
            hang: false,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::identity(0, 0)
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::identity(0, 0)
        }
    }

    pub fn requested(&self) -> Vec<DetailLevel> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureService for FakeCapture {
    async fn capture(&self, detail: DetailLevel) -> OrdenadorResult<Capture> {
        self.requested.lock().unwrap().push(detail);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(OrdenadorError::Perception("no display".into()));
        }
        Ok(Capture {
            image_base64: "AAAA".into(),
            width: self.width,
            height: self.height,
            meta: self.device.map(|(w, h)| ScreenshotMeta {
                monitor_index: 0,
                scale_factor: 1.0,
                physical_width: w,
                physical_height: h,
            }),
        })
    }
}

#[derive(Default)]
pub struct RecordingDriver {
    fail_clicks: bool,
    missing_programs: bool,
    cancel_on_click: Option<CancellationToken>,
    clicks: Mutex<Vec<(i32, i32)>>,
    typed: Mutex<Vec<String>>,
    launches: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingDriver {
    pub fn failing_clicks() -> Self {
        Self {
            fail_clicks: true,
            ..Self::default()
        }
    }

    pub fn missing_programs() -> Self {
        Self {
            missing_programs: true,
            ..Self::default()
        }
    }

    pub fn cancelling_on_click(token: CancellationToken) -> Self {
        Self {
            cancel_on_click: Some(token),
            ..Self::default()
        }
    }

    pub fn clicks(&self) -> Vec<(i32, i32)> {
        self.clicks.lock().unwrap().clone()
    }

    pub fn typed(&self) -> Vec<String> {
        self.typed.lock().unwrap().clone()
    }

    pub fn launches(&self) -> Vec<(String, Vec<String>)> {
        self.launches.lock().unwrap().clone()
    }

    pub fn side_effects(&self) -> usize {
        self.clicks().len() + self.typed().len() + self.launches().len()
    }
}

#[async_trait]
impl ActionDriver for RecordingDriver {
    async fn click(&self, x: i32, y: i32) -> OrdenadorResult<()> {
        if self.fail_clicks {
            return Err(OrdenadorError::Executor("pointer unavailable".into()));
        }
        self.clicks.lock().unwrap().push((x, y));
        if let Some(token) = &self.cancel_on_click {
            token.cancel();
        }
        Ok(())
    }

    async fn type_text(&self, text: &str) -> OrdenadorResult<()> {
        self.typed.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn launch(&self, path: &str, args: &[String]) -> OrdenadorResult<()> {
        if self.missing_programs {
            return Err(OrdenadorError::ProgramNotFound(path.to_string()));
        }
        self.launches
            .lock()
            .unwrap()
            .push((path.to_string(), args.to_vec()));
        Ok(())
    }
}

pub struct FakePlugin {
    name: String,
    fail: bool,
    invocations: AtomicUsize,
}

impl FakePlugin {
    pub fn ok(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::ok(name)
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for FakePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "test plugin"
    }

    async fn invoke(&self, _args: &[String]) -> OrdenadorResult<String> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(OrdenadorError::Plugin(format!("{} crashed", self.name)))
        } else {
            Ok("ok".into())
        }
    }
}
