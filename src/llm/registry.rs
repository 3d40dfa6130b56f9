use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig};
use crate::errors::{OrdenadorError, OrdenadorResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Oracle roles that can be mapped to their own provider+model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Decision,
    Calibration,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Decision => "decision",
            Role::Calibration => "calibration",
        }
    }
}

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(active: String) -> Self {
        Self {
            providers: HashMap::new(),
            active,
            llm_config: LlmConfig::default(),
        }
    }

    pub fn with_config(llm_config: LlmConfig) -> Self {
        Self {
            providers: HashMap::new(),
            active: llm_config.active_provider.clone(),
            llm_config,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> OrdenadorResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            OrdenadorError::Config(format!("Active provider '{}' not found in registry", self.active))
        })
    }

    pub fn list_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Return the provider and call configuration for a role.
    ///
    /// Resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model / temperature
    pub fn call_config_for_role(&self, role: Role) -> OrdenadorResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let role_entry = match role {
            Role::Decision => self.llm_config.roles.decision.as_ref(),
            Role::Calibration => self.llm_config.roles.calibration.as_ref(),
        };

        if let Some(entry) = role_entry {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                OrdenadorError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role.as_str(),
                    entry.provider
                ))
            })?;
            let temperature = entry.temperature.unwrap_or_else(|| {
                self.llm_config
                    .providers
                    .get(&entry.provider)
                    .map(|p| p.temperature)
                    .unwrap_or(0.1)
            });
            tracing::debug!(
                role = role.as_str(),
                provider = %entry.provider,
                model = %entry.model,
                temperature = temperature,
                "resolved role config"
            );
            return Ok((
                provider,
                CallConfig {
                    model: entry.model.clone(),
                    temperature,
                    json_mode: true,
                },
            ));
        }

        let provider = self.get_active()?;
        let (model, temperature) = self
            .llm_config
            .providers
            .get(&self.active)
            .map(|p| (p.model.clone(), p.temperature))
            .unwrap_or_else(|| (String::new(), 0.1));
        tracing::debug!(
            role = role.as_str(),
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok((
            provider,
            CallConfig {
                model,
                temperature,
                json_mode: true,
            },
        ))
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `ORDENADOR_<ID>_API_KEY`.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::with_config(config.llm.clone());
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(format!("ORDENADOR_{}_API_KEY", id.to_uppercase()))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            if api_key.is_empty() {
                tracing::warn!(provider = %id, "no API key configured");
            }
            let provider = OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key);
            registry.register(Arc::new(provider));
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::llm::types::ChatMessage;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl LlmProvider for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn chat(&self, _messages: Vec<ChatMessage>, _cfg: &CallConfig) -> OrdenadorResult<String> {
            Ok(String::new())
        }
    }

    fn registry(extra: &str) -> ProviderRegistry {
        let cfg = parse_config(&format!(
            r#"
            [llm]
            active_provider = "main"
            [llm.providers.main]
            display_name = "Main"
            api_base = "http://localhost/v1/chat/completions"
            model = "base-model"
            temperature = 0.3
            [llm.providers.vision]
            display_name = "Vision"
            api_base = "http://localhost/v1/chat/completions"
            model = "vision-model"
            {extra}
            "#
        ))
        .unwrap();
        let mut reg = ProviderRegistry::with_config(cfg.llm);
        reg.register(Arc::new(Named("main")));
        reg.register(Arc::new(Named("vision")));
        reg
    }

    #[test]
    fn unconfigured_role_falls_back_to_active_provider() {
        let reg = registry("");
        let (provider, cfg) = reg.call_config_for_role(Role::Decision).unwrap();
        assert_eq!(provider.name(), "main");
        assert_eq!(cfg.model, "base-model");
        assert!((cfg.temperature - 0.3).abs() < f64::EPSILON);
        assert!(cfg.json_mode);
    }

    #[test]
    fn configured_role_uses_its_provider() {
        let reg = registry(
            r#"
            [llm.roles.calibration]
            provider = "vision"
            model = "vision-large"
            "#,
        );
        let (provider, cfg) = reg.call_config_for_role(Role::Calibration).unwrap();
        assert_eq!(provider.name(), "vision");
        assert_eq!(cfg.model, "vision-large");
        assert!((cfg.temperature - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn role_with_unknown_provider_is_config_error() {
        let reg = registry(
            r#"
            [llm.roles.decision]
            provider = "missing"
            model = "x"
            "#,
        );
        assert!(matches!(
            reg.call_config_for_role(Role::Decision),
            Err(OrdenadorError::Config(_))
        ));
    }
}
