//! Registry wiring against an endpoint that refuses connections.

use std::collections::BTreeSet;
use std::time::Duration;

use xcheck_clients::{http_registry, ClientSettings, ProviderSettings, RetryPolicy};
use xcheck_core::{
    AgentStatus, DataType, Dispatcher, Document, FailureKind, Provider, ProviderCredentials,
    Schema, SchemaField,
};

fn unreachable_settings() -> ClientSettings {
    let unreachable = ProviderSettings {
        model: None,
        base_url: Some("http://127.0.0.1:9".to_string()),
    };
    ClientSettings {
        openai: unreachable.clone(),
        anthropic: unreachable.clone(),
        google: unreachable,
        retry: RetryPolicy::none(),
        ..ClientSettings::default()
    }
}

#[tokio::test]
async fn test_unreachable_provider_yields_failed_results() {
    let credentials = ProviderCredentials::new()
        .with_key(Provider::OpenAi, "sk-test")
        .with_key(Provider::Google, "g-test");
    let registry = http_registry(&credentials, &unreachable_settings()).unwrap();
    let dispatcher = Dispatcher::new(registry, Duration::from_secs(10));
    let schema = Schema::new(vec![SchemaField::new("ceo", DataType::Text)]).unwrap();

    let results = dispatcher
        .dispatch(
            &Document::from("CEO: Kim"),
            &schema,
            &credentials.enabled_providers(),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 6);
    let providers: BTreeSet<Provider> = results.iter().map(|r| r.identity.provider).collect();
    assert_eq!(providers, BTreeSet::from([Provider::OpenAi, Provider::Google]));
    for result in &results {
        assert_ne!(result.status, AgentStatus::Ok);
        let kind = result.error.as_ref().unwrap().kind;
        assert!(
            matches!(kind, FailureKind::Transport | FailureKind::Timeout),
            "unexpected failure kind {kind:?}"
        );
    }
}
