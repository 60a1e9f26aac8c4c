//! Orchestrator: one dispatch per document, one consensus per field.

use std::collections::{BTreeMap, BTreeSet};

use tokio::time::Instant;
use tracing::{instrument, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::consensus::ConsensusEngine;
use crate::dispatch::{ClientRegistry, Dispatcher};
use crate::domain::{ConfigResult, Document, Provider, Schema};
use crate::obs;
use crate::report::{ExecutionSummary, VerifiedReport};

/// Provider API keys. A provider counts as configured when its key is
/// non-blank.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderCredentials {
    keys: BTreeMap<Provider, String>,
}

impl ProviderCredentials {
    /// Environment variable read for each provider by [`Self::from_env`].
    pub const ENV_VARS: [(Provider, &'static str); 3] = [
        (Provider::OpenAi, "OPENAI_API_KEY"),
        (Provider::Anthropic, "ANTHROPIC_API_KEY"),
        (Provider::Google, "GOOGLE_API_KEY"),
    ];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let mut credentials = Self::new();
        for (provider, var) in Self::ENV_VARS {
            if let Ok(key) = std::env::var(var) {
                credentials.set(provider, key);
            }
        }
        credentials
    }

    pub fn with_key(mut self, provider: Provider, key: impl Into<String>) -> Self {
        self.set(provider, key);
        self
    }

    pub fn set(&mut self, provider: Provider, key: impl Into<String>) {
        self.keys.insert(provider, key.into());
    }

    /// The key for `provider`, if one is configured.
    pub fn get(&self, provider: Provider) -> Option<&str> {
        self.keys
            .get(&provider)
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
    }

    pub fn enabled_providers(&self) -> BTreeSet<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.get(*p).is_some())
            .collect()
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("enabled", &self.enabled_providers())
            .finish()
    }
}

/// Runs a full extraction: dispatch, per-field consensus, report assembly.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: EngineConfig,
    dispatcher: Dispatcher,
    engine: ConsensusEngine,
}

impl Orchestrator {
    /// Validates `config` up front so a bad configuration never reaches an
    /// agent call.
    pub fn new(config: EngineConfig, registry: ClientRegistry) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            dispatcher: Dispatcher::new(registry, config.agent_timeout()),
            engine: ConsensusEngine::from_engine_config(&config),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Extract every field of `schema` from `document` with the providers
    /// `credentials` enables.
    ///
    /// Only configuration problems are errors; agent failures and weak
    /// evidence show up inside the report.
    #[instrument(skip_all, fields(fields = schema.len(), document_bytes = document.len()))]
    pub async fn run(
        &self,
        document: &Document,
        schema: &Schema,
        credentials: &ProviderCredentials,
    ) -> ConfigResult<VerifiedReport> {
        let run_id = Uuid::new_v4();
        let span = obs::run_span(&run_id.to_string());
        self.run_inner(run_id, document, schema, credentials)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        document: &Document,
        schema: &Schema,
        credentials: &ProviderCredentials,
    ) -> ConfigResult<VerifiedReport> {
        let run_label = run_id.to_string();
        let started = Instant::now();
        let enabled = credentials.enabled_providers();
        obs::emit_extraction_started(&run_label, schema.len(), document.len(), &enabled);

        let results = match self.dispatcher.dispatch(document, schema, &enabled).await {
            Ok(results) => results,
            Err(err) => {
                obs::emit_extraction_rejected(&run_label, &err);
                return Err(err);
            }
        };

        let execution = ExecutionSummary::from_results(&results, started.elapsed());
        obs::emit_extraction_dispatched(&execution);

        let fields = schema
            .fields()
            .iter()
            .map(|field| {
                let consensus = self.engine.resolve(&field.name, field.data_type, &results);
                obs::emit_field_resolved(&consensus);
                consensus
            })
            .collect();

        let report =
            VerifiedReport::assemble(run_id, document.digest(), fields, results, execution);
        obs::emit_extraction_finished(
            &run_label,
            report.fields().len(),
            report.overall_confidence(),
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_credentials_do_not_enable_providers() {
        let credentials = ProviderCredentials::new()
            .with_key(Provider::OpenAi, "sk-test")
            .with_key(Provider::Anthropic, "   ")
            .with_key(Provider::Google, "");
        assert_eq!(
            credentials.enabled_providers(),
            BTreeSet::from([Provider::OpenAi])
        );
        assert_eq!(credentials.get(Provider::OpenAi), Some("sk-test"));
        assert_eq!(credentials.get(Provider::Anthropic), None);
    }

    #[test]
    fn test_debug_output_redacts_keys() {
        let credentials = ProviderCredentials::new().with_key(Provider::Google, "secret-key");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("Google"));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = EngineConfig {
            agent_timeout_secs: 0,
            ..EngineConfig::default()
        };
        assert!(Orchestrator::new(config, ClientRegistry::new()).is_err());
    }
}
