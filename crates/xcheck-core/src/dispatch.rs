//! Agent dispatcher.
//!
//! Fans one document + schema out to three replicas of every enabled provider.
//! Each identity runs in its own task under its own deadline, and results are
//! message-passed back to a single collector. A slow, failing or panicking
//! agent only ever affects its own result.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{instrument, Instrument};

use crate::domain::{
    AgentFailure, AgentIdentity, AgentResult, ConfigResult, ConfigurationError, Document,
    FailureKind, Provider, Schema,
};
use crate::obs;

/// Provider-specific extraction capability.
///
/// Implementations report ordinary failures (auth, rate limit, malformed
/// output, transport) on the returned [`AgentResult`]; they do not panic. The
/// dispatcher enforces `timeout` itself, so a client may also use it to bound
/// its own retries.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn extract(
        &self,
        document: &Document,
        schema: &Schema,
        identity: AgentIdentity,
        timeout: Duration,
    ) -> AgentResult;
}

/// `Provider → client` lookup used by the dispatcher.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: BTreeMap<Provider, Arc<dyn AgentClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, provider: Provider, client: Arc<dyn AgentClient>) -> Self {
        self.register(provider, client);
        self
    }

    /// Register `client` for `provider`, replacing any previous one.
    pub fn register(&mut self, provider: Provider, client: Arc<dyn AgentClient>) {
        self.clients.insert(provider, client);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn AgentClient>> {
        self.clients.get(&provider).cloned()
    }

    pub fn contains(&self, provider: Provider) -> bool {
        self.clients.contains_key(&provider)
    }

    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.clients.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("providers", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: ClientRegistry,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: ClientRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Run every replica of every provider in `enabled` concurrently.
    ///
    /// Returns exactly one result per dispatched identity, sorted by
    /// (provider, replica). Fails before any call when `enabled` is empty or
    /// names a provider with no registered client.
    #[instrument(skip(self, document, schema), fields(fields = schema.len()))]
    pub async fn dispatch(
        &self,
        document: &Document,
        schema: &Schema,
        enabled: &BTreeSet<Provider>,
    ) -> ConfigResult<Vec<AgentResult>> {
        if enabled.is_empty() {
            return Err(ConfigurationError::NoProvidersEnabled);
        }

        let mut roster = Vec::with_capacity(enabled.len() * 3);
        for provider in enabled {
            let client = self
                .registry
                .get(*provider)
                .ok_or(ConfigurationError::MissingClient(*provider))?;
            roster.extend(AgentIdentity::roster(*provider).map(|id| (id, Arc::clone(&client))));
        }

        let (tx, mut rx) = mpsc::channel(roster.len());
        let schema = Arc::new(schema.clone());

        for (identity, client) in &roster {
            let tx = tx.clone();
            let client = Arc::clone(client);
            let document = document.clone();
            let schema = Arc::clone(&schema);
            let timeout = self.timeout;
            let identity = *identity;

            tokio::spawn(
                async move {
                    let result = call_agent(client, &document, &schema, identity, timeout).await;
                    // The collector only goes away if the caller dropped the run.
                    let _ = tx.send(result).await;
                }
                .in_current_span(),
            );
        }
        drop(tx);

        let mut results: BTreeMap<AgentIdentity, AgentResult> = BTreeMap::new();
        while let Some(result) = rx.recv().await {
            obs::emit_agent_finished(&result);
            results.insert(result.identity, result);
        }

        for (identity, _) in &roster {
            results.entry(*identity).or_insert_with(|| {
                AgentResult::failed(
                    *identity,
                    AgentFailure::new(FailureKind::Internal, "agent task ended without a result"),
                )
            });
        }

        Ok(results.into_values().collect())
    }
}

/// One bounded, panic-isolated agent call.
async fn call_agent(
    client: Arc<dyn AgentClient>,
    document: &Document,
    schema: &Schema,
    identity: AgentIdentity,
    timeout: Duration,
) -> AgentResult {
    let started = Instant::now();
    let call = AssertUnwindSafe(client.extract(document, schema, identity, timeout)).catch_unwind();

    let result = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) if result.identity == identity => result,
        Ok(Ok(result)) => AgentResult::failed(
            identity,
            AgentFailure::new(
                FailureKind::Internal,
                format!("client answered as {} instead", result.identity),
            ),
        ),
        Ok(Err(panic)) => AgentResult::failed(
            identity,
            AgentFailure::new(
                FailureKind::Internal,
                format!("agent panicked: {}", panic_message(&*panic)),
            ),
        ),
        Err(_) => AgentResult::timed_out(identity, timeout),
    };

    result.with_elapsed(started.elapsed())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DataType, SchemaField};

    struct EchoClient;

    #[async_trait]
    impl AgentClient for EchoClient {
        async fn extract(
            &self,
            _document: &Document,
            _schema: &Schema,
            identity: AgentIdentity,
            _timeout: Duration,
        ) -> AgentResult {
            AgentResult::ok(identity, BTreeMap::new())
        }
    }

    struct ImpostorClient;

    #[async_trait]
    impl AgentClient for ImpostorClient {
        async fn extract(
            &self,
            _document: &Document,
            _schema: &Schema,
            _identity: AgentIdentity,
            _timeout: Duration,
        ) -> AgentResult {
            AgentResult::ok(
                AgentIdentity::new(Provider::Google, 1).unwrap(),
                BTreeMap::new(),
            )
        }
    }

    fn schema() -> Schema {
        Schema::new(vec![SchemaField::new("company", DataType::Text)]).unwrap()
    }

    #[tokio::test]
    async fn test_empty_enabled_set_fails_fast() {
        let dispatcher = Dispatcher::new(
            ClientRegistry::new().with_client(Provider::OpenAi, Arc::new(EchoClient)),
            Duration::from_secs(5),
        );
        let err = dispatcher
            .dispatch(&Document::from("x"), &schema(), &BTreeSet::new())
            .await
            .unwrap_err();
        assert_eq!(err, ConfigurationError::NoProvidersEnabled);
    }

    #[tokio::test]
    async fn test_missing_client_is_configuration_error() {
        let dispatcher = Dispatcher::new(
            ClientRegistry::new().with_client(Provider::OpenAi, Arc::new(EchoClient)),
            Duration::from_secs(5),
        );
        let enabled = BTreeSet::from([Provider::OpenAi, Provider::Anthropic]);
        let err = dispatcher
            .dispatch(&Document::from("x"), &schema(), &enabled)
            .await
            .unwrap_err();
        assert_eq!(err, ConfigurationError::MissingClient(Provider::Anthropic));
    }

    #[tokio::test]
    async fn test_one_sorted_result_per_identity() {
        let dispatcher = Dispatcher::new(
            ClientRegistry::new()
                .with_client(Provider::Google, Arc::new(EchoClient))
                .with_client(Provider::OpenAi, Arc::new(EchoClient)),
            Duration::from_secs(5),
        );
        let enabled = BTreeSet::from([Provider::Google, Provider::OpenAi]);
        let results = dispatcher
            .dispatch(&Document::from("x"), &schema(), &enabled)
            .await
            .unwrap();
        let labels: Vec<String> = results.iter().map(|r| r.identity.label()).collect();
        assert_eq!(
            labels,
            ["openai-1", "openai-2", "openai-3", "google-1", "google-2", "google-3"]
        );
        assert!(results.iter().all(AgentResult::is_ok));
    }

    #[tokio::test]
    async fn test_mismatched_identity_is_internal_failure() {
        let dispatcher = Dispatcher::new(
            ClientRegistry::new().with_client(Provider::Anthropic, Arc::new(ImpostorClient)),
            Duration::from_secs(5),
        );
        let enabled = BTreeSet::from([Provider::Anthropic]);
        let results = dispatcher
            .dispatch(&Document::from("x"), &schema(), &enabled)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        for result in results {
            assert_eq!(result.identity.provider, Provider::Anthropic);
            assert_eq!(result.error.unwrap().kind, FailureKind::Internal);
        }
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*boxed), "non-string panic payload");
    }
}
