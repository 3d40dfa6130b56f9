use async_trait::async_trait;

use crate::errors::OrdenadorResult;
use crate::llm::types::{CallConfig, ChatMessage};

/// Unified chat-completion provider. New providers implement this trait and
/// register in config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    /// Sends one completion request and returns the assistant's message text.
    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> OrdenadorResult<String>;
}
