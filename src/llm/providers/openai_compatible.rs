use async_trait::async_trait;

use crate::errors::{OrdenadorError, OrdenadorResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, ChatMessage};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> OrdenadorResult<String> {
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "temperature": cfg.temperature,
        });
        if cfg.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        tracing::debug!(provider = %self.id, model = %cfg.model, "sending LLM request");
        tracing::trace!(body = %sanitized_for_log(&body), "request body (base64 omitted)");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(OrdenadorError::LlmProvider(format!("{}: {}", status, err_body)));
        }

        let json: serde_json::Value = response.json().await?;
        let content = extract_message_content(&json)?;
        tracing::debug!(provider = %self.id, len = content.len(), "LLM response received");
        Ok(content)
    }
}

/// `choices[0].message.content` of a chat-completions response.
fn extract_message_content(json: &serde_json::Value) -> OrdenadorResult<String> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            OrdenadorError::LlmProvider("response has no choices[0].message.content".into())
        })
}

/// Copy of `body` with image payloads replaced, for logging only.
fn sanitized_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) != Some("image_url") {
                    continue;
                }
                if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                    *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}
