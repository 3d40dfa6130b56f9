use async_trait::async_trait;

use crate::agent_engine::state::DetailLevel;
use crate::errors::{OrdenadorError, OrdenadorResult};
use crate::llm::prompts;
use crate::llm::registry::{ProviderRegistry, Role};
use crate::llm::types::{ChatMessage, ContentPart, ImageUrl};
use crate::perception::types::Capture;
use crate::plugins::registry::PluginInfo;

/// Everything the oracle sees for one decision.
#[derive(Debug, Clone)]
pub struct DecisionRequest<'a> {
    pub task: &'a str,
    pub history_summary: &'a str,
    pub capture: &'a Capture,
    pub available_plugins: &'a [PluginInfo],
    pub detail_level: DetailLevel,
}

/// Maps (task, history, capture) to one raw JSON decision text.
///
/// Implementations return the response body as-is; parsing and validation
/// happen in the engine, so a malformed body is not an error here.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, request: &DecisionRequest<'_>) -> OrdenadorResult<String>;

    /// Single-shot lookup of one named element, used by calibration.
    async fn locate(&self, element: &str, capture: &Capture) -> OrdenadorResult<String>;
}

/// Vision chat-completion oracle backed by the provider registry.
pub struct VisionOracle {
    registry: ProviderRegistry,
}

impl VisionOracle {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }
}

fn image_part(capture: &Capture, detail: DetailLevel) -> ContentPart {
    ContentPart::ImageUrl {
        image_url: ImageUrl {
            url: format!("data:image/jpeg;base64,{}", capture.image_base64),
            detail: Some(detail.as_str().to_string()),
        },
    }
}

#[async_trait]
impl DecisionOracle for VisionOracle {
    async fn decide(&self, request: &DecisionRequest<'_>) -> OrdenadorResult<String> {
        let (provider, cfg) = self.registry.call_config_for_role(Role::Decision)?;
        let capture = request.capture;
        let screen = (!capture.is_empty()).then_some((capture.width, capture.height));
        let text = prompts::build_decision_prompt(
            request.task,
            request.history_summary,
            screen,
            request.available_plugins,
        );
        tracing::debug!(
            detail = request.detail_level.as_str(),
            image_len = capture.image_base64.len(),
            plugins = request.available_plugins.len(),
            "requesting decision"
        );
        // An empty data URL is rejected upstream; send the text alone instead.
        let mut parts = vec![ContentPart::Text { text }];
        if screen.is_some() {
            parts.push(image_part(capture, request.detail_level));
        }
        let messages = vec![
            ChatMessage::system(prompts::DECISION_SYSTEM_PROMPT),
            ChatMessage::user_parts(parts),
        ];
        provider.chat(messages, &cfg).await
    }

    async fn locate(&self, element: &str, capture: &Capture) -> OrdenadorResult<String> {
        if capture.is_empty() {
            return Err(OrdenadorError::Perception(format!(
                "no screenshot to search for '{element}'"
            )));
        }
        let (provider, cfg) = self.registry.call_config_for_role(Role::Calibration)?;
        let messages = vec![
            ChatMessage::system(prompts::CALIBRATION_SYSTEM_PROMPT),
            ChatMessage::user_parts(vec![
                ContentPart::Text {
                    text: prompts::build_calibration_prompt(element, capture.width, capture.height),
                },
                image_part(capture, DetailLevel::High),
            ]),
        ];
        provider.chat(messages, &cfg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::llm::provider::LlmProvider;
    use crate::llm::types::{CallConfig, MessageContent};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Capturing {
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl LlmProvider for Capturing {
        fn name(&self) -> &str {
            "main"
        }

        async fn chat(&self, messages: Vec<ChatMessage>, _cfg: &CallConfig) -> OrdenadorResult<String> {
            self.seen.lock().unwrap().push(messages);
            Ok(r#"{"command":"task_complete"}"#.into())
        }
    }

    fn oracle(provider: Arc<Capturing>) -> VisionOracle {
        let mut registry = ProviderRegistry::with_config(LlmConfig {
            active_provider: "main".into(),
            ..LlmConfig::default()
        });
        registry.register(provider);
        VisionOracle::new(registry)
    }

    #[tokio::test]
    async fn decide_sends_prompt_and_image_at_detail() {
        let provider = Arc::new(Capturing::default());
        let oracle = oracle(provider.clone());
        let capture = Capture {
            image_base64: "QUJD".into(),
            width: 640,
            height: 360,
            meta: None,
        };
        let plugins = vec![PluginInfo {
            name: "notes".into(),
            description: "open notes".into(),
        }];
        let out = oracle
            .decide(&DecisionRequest {
                task: "open notes",
                history_summary: "This is the first step.",
                capture: &capture,
                available_plugins: &plugins,
                detail_level: DetailLevel::High,
            })
            .await
            .unwrap();
        assert!(out.contains("task_complete"));

        let seen = provider.seen.lock().unwrap();
        let MessageContent::Parts(parts) = &seen[0][1].content else {
            panic!("expected multi-part user message");
        };
        match (&parts[0], &parts[1]) {
            (ContentPart::Text { text }, ContentPart::ImageUrl { image_url }) => {
                assert!(text.contains("- notes: open notes"));
                assert!(text.contains("640x360"));
                assert_eq!(image_url.url, "data:image/jpeg;base64,QUJD");
                assert_eq!(image_url.detail.as_deref(), Some("high"));
            }
            other => panic!("unexpected parts {other:?}"),
        }
    }

    #[tokio::test]
    async fn decide_without_capture_sends_text_only() {
        let provider = Arc::new(Capturing::default());
        let oracle = oracle(provider.clone());
        oracle
            .decide(&DecisionRequest {
                task: "open notes",
                history_summary: "This is the first step.",
                capture: &Capture::empty(),
                available_plugins: &[],
                detail_level: DetailLevel::Low,
            })
            .await
            .unwrap();

        let seen = provider.seen.lock().unwrap();
        let MessageContent::Parts(parts) = &seen[0][1].content else {
            panic!("expected multi-part user message");
        };
        assert_eq!(parts.len(), 1);
        assert!(!parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. })));
        assert!(matches!(&parts[0], ContentPart::Text { text } if text.contains(prompts::NO_SCREENSHOT)));
    }

    #[tokio::test]
    async fn locate_names_the_element() {
        let provider = Arc::new(Capturing::default());
        let oracle = oracle(provider.clone());
        let capture = Capture {
            image_base64: "QUJD".into(),
            width: 640,
            height: 360,
            meta: None,
        };
        oracle.locate("Start Menu", &capture).await.unwrap();
        let seen = provider.seen.lock().unwrap();
        let MessageContent::Parts(parts) = &seen[0][1].content else {
            panic!("expected multi-part user message");
        };
        assert!(matches!(&parts[0], ContentPart::Text { text } if text.contains("'Start Menu'")));
        assert!(matches!(&parts[1], ContentPart::ImageUrl { image_url } if image_url.detail.as_deref() == Some("high")));
    }

    #[tokio::test]
    async fn locate_without_capture_never_calls_the_provider() {
        let provider = Arc::new(Capturing::default());
        let oracle = oracle(provider.clone());
        let err = oracle.locate("Start Menu", &Capture::empty()).await.unwrap_err();
        assert!(matches!(err, OrdenadorError::Perception(_)));
        assert!(provider.seen.lock().unwrap().is_empty());
    }
}
