//! Client settings and registry construction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use xcheck_core::{AgentClient, ClientRegistry, Provider, ProviderCredentials};

use crate::anthropic::{self, AnthropicApi};
use crate::error::Result;
use crate::google::{self, GoogleApi};
use crate::http::{CompletionAgent, CompletionApi};
use crate::openai::{self, OpenAiApi};
use crate::prompt::{PromptBuilder, DEFAULT_MAX_DOCUMENT_CHARS};
use crate::retry::RetryPolicy;

/// Per-vendor overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Settings shared by the HTTP clients, typically the `[clients]` table of
/// the CLI config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    pub google: ProviderSettings,
    /// Output token cap for vendors that require one.
    pub max_output_tokens: u32,
    pub max_document_chars: usize,
    pub retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            openai: ProviderSettings::default(),
            anthropic: ProviderSettings::default(),
            google: ProviderSettings::default(),
            max_output_tokens: anthropic::DEFAULT_MAX_TOKENS,
            max_document_chars: DEFAULT_MAX_DOCUMENT_CHARS,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientSettings {
    pub fn provider(&self, provider: Provider) -> &ProviderSettings {
        match provider {
            Provider::OpenAi => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::Google => &self.google,
        }
    }

    /// Configured model, or the vendor default.
    pub fn model(&self, provider: Provider) -> &str {
        let default = match provider {
            Provider::OpenAi => openai::DEFAULT_MODEL,
            Provider::Anthropic => anthropic::DEFAULT_MODEL,
            Provider::Google => google::DEFAULT_MODEL,
        };
        self.provider(provider)
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(default)
    }

    fn agent<A: CompletionApi + 'static>(&self, api: A) -> Arc<dyn AgentClient> {
        Arc::new(
            CompletionAgent::new(api)
                .with_prompt(PromptBuilder::new(self.max_document_chars))
                .with_retry(self.retry),
        )
    }

    fn client_for(&self, provider: Provider, api_key: &str) -> Result<Arc<dyn AgentClient>> {
        let model = self.model(provider);
        let base_url = self.provider(provider).base_url.as_deref();
        let client = match provider {
            Provider::OpenAi => {
                let mut api = OpenAiApi::new(api_key, model)?;
                if let Some(url) = base_url {
                    api = api.with_base_url(url);
                }
                self.agent(api)
            }
            Provider::Anthropic => {
                let mut api =
                    AnthropicApi::new(api_key, model)?.with_max_tokens(self.max_output_tokens);
                if let Some(url) = base_url {
                    api = api.with_base_url(url);
                }
                self.agent(api)
            }
            Provider::Google => {
                let mut api = GoogleApi::new(api_key, model)?
                    .with_max_output_tokens(self.max_output_tokens);
                if let Some(url) = base_url {
                    api = api.with_base_url(url);
                }
                self.agent(api)
            }
        };
        Ok(client)
    }
}

/// One HTTP client per provider that has a credential.
pub fn http_registry(
    credentials: &ProviderCredentials,
    settings: &ClientSettings,
) -> Result<ClientRegistry> {
    let mut registry = ClientRegistry::new();
    for provider in credentials.enabled_providers() {
        let Some(api_key) = credentials.get(provider) else {
            continue;
        };
        registry.register(provider, settings.client_for(provider, api_key)?);
        info!(
            event = "provider.client_ready",
            provider = %provider,
            model = settings.model(provider),
        );
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_vendor_models() {
        let settings = ClientSettings::default();
        assert_eq!(settings.model(Provider::OpenAi), "gpt-5.2");
        assert_eq!(settings.model(Provider::Anthropic), "claude-sonnet-4-5");
        assert_eq!(settings.model(Provider::Google), "gemini-3-pro-preview");
        assert_eq!(settings.max_document_chars, 15_000);
        assert_eq!(settings.retry.max_retries, 3);
    }

    #[test]
    fn test_partial_settings_deserialize() {
        let settings: ClientSettings = serde_json::from_value(serde_json::json!({
            "google": {"model": "gemini-2.5-flash"},
            "retry": {"max_retries": 1}
        }))
        .unwrap();
        assert_eq!(settings.model(Provider::Google), "gemini-2.5-flash");
        assert_eq!(settings.model(Provider::OpenAi), "gpt-5.2");
        assert_eq!(settings.retry.max_retries, 1);
        assert_eq!(settings.retry.base_delay_ms, 2_000);
    }

    #[test]
    fn test_registry_covers_only_credentialed_providers() {
        let credentials = ProviderCredentials::new()
            .with_key(Provider::Anthropic, "a-key")
            .with_key(Provider::Google, "   ");
        let registry = http_registry(&credentials, &ClientSettings::default()).unwrap();

        assert!(registry.contains(Provider::Anthropic));
        assert!(!registry.contains(Provider::Google));
        assert!(!registry.contains(Provider::OpenAi));
        assert_eq!(registry.len(), 1);
    }
}
