//! Shared plumbing for the HTTP provider clients.
//!
//! Each vendor module implements [`CompletionApi`]: one prompt in, the model's
//! text out. [`CompletionAgent`] turns any such API into an
//! [`AgentClient`] by adding prompt construction, retries and answer parsing.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, instrument};
use xcheck_core::{
    AgentClient, AgentIdentity, AgentResult, Document, Provider, RawAnswer, Schema,
};

use crate::error::{ClientError, Result};
use crate::prompt::{PromptBuilder, SYSTEM_PROMPT};
use crate::response::parse_answers;
use crate::retry::RetryPolicy;

pub const USER_AGENT: &str = concat!("xcheck/", env!("CARGO_PKG_VERSION"));

/// Sampling temperature used by every vendor client.
pub const TEMPERATURE: f64 = 0.1;

const MAX_ERROR_BODY_CHARS: usize = 500;

/// A vendor text-completion endpoint.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    /// Send one request and return the model's text output.
    async fn complete(&self, system: &str, prompt: &str, timeout: Duration) -> Result<String>;
}

pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().user_agent(USER_AGENT).build()?)
}

/// Map a non-success status and its body to an error.
pub fn classify_status(status: u16, body: &str) -> ClientError {
    let body: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
    match status {
        401 | 403 => ClientError::Auth(format!("HTTP {status}: {body}")),
        429 => ClientError::RateLimit(body),
        408 | 504 => ClientError::Timeout(format!("HTTP {status}: {body}")),
        _ => ClientError::Status { status, body },
    }
}

/// Pass successful responses through; turn everything else into an error.
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status.as_u16(), &body))
}

// ---------------------------------------------------------------------------
// CompletionAgent
// ---------------------------------------------------------------------------

/// [`AgentClient`] over a [`CompletionApi`].
pub struct CompletionAgent<A> {
    api: A,
    prompt: PromptBuilder,
    retry: RetryPolicy,
}

impl<A: CompletionApi> CompletionAgent<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            prompt: PromptBuilder::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_prompt(mut self, prompt: PromptBuilder) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    async fn extract_answers(
        &self,
        document: &Document,
        schema: &Schema,
        identity: AgentIdentity,
        timeout: Duration,
    ) -> Result<BTreeMap<String, RawAnswer>> {
        let prompt = self.prompt.build(schema, document);
        let deadline = Instant::now() + timeout;
        let label = identity.label();
        debug!(
            agent = %label,
            model = self.api.model(),
            prompt_chars = prompt.len(),
            "sending extraction prompt"
        );

        self.retry
            .run(&label, |_| {
                let api = &self.api;
                let prompt = &prompt;
                async move {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ClientError::Timeout(format!(
                            "no answer within {}s",
                            timeout.as_secs_f64()
                        )));
                    }
                    let text = api.complete(SYSTEM_PROMPT, prompt, remaining).await?;
                    parse_answers(&text)
                }
            })
            .await
    }
}

impl<A: CompletionApi> std::fmt::Debug for CompletionAgent<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionAgent")
            .field("provider", &self.api.provider())
            .field("model", &self.api.model())
            .field("retry", &self.retry)
            .finish()
    }
}

#[async_trait]
impl<A: CompletionApi> AgentClient for CompletionAgent<A> {
    #[instrument(skip_all, fields(agent = %identity))]
    async fn extract(
        &self,
        document: &Document,
        schema: &Schema,
        identity: AgentIdentity,
        timeout: Duration,
    ) -> AgentResult {
        match self
            .extract_answers(document, schema, identity, timeout)
            .await
        {
            Ok(answers) => AgentResult::ok(identity, answers),
            Err(err) => AgentResult::failed(identity, err.into_failure()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use xcheck_core::{AgentStatus, DataType, FailureKind, SchemaField};

    struct FakeApi {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: Mutex<u32>,
    }

    impl FakeApi {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CompletionApi for FakeApi {
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn model(&self) -> &str {
            "fake-model"
        }

        async fn complete(&self, system: &str, prompt: &str, _timeout: Duration) -> Result<String> {
            assert_eq!(system, SYSTEM_PROMPT);
            assert!(prompt.contains("- **ceo**"));
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Transport("script exhausted".into())))
        }
    }

    fn schema() -> Schema {
        Schema::new(vec![SchemaField::new("ceo", DataType::Text)]).unwrap()
    }

    fn identity() -> AgentIdentity {
        AgentIdentity::new(Provider::Anthropic, 2).unwrap()
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(classify_status(401, "nope"), ClientError::Auth(_)));
        assert!(matches!(classify_status(403, ""), ClientError::Auth(_)));
        assert!(matches!(classify_status(429, ""), ClientError::RateLimit(_)));
        assert!(matches!(classify_status(504, ""), ClientError::Timeout(_)));
        match classify_status(500, &"x".repeat(2_000)) {
            ClientError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), MAX_ERROR_BODY_CHARS);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fenced_answer_becomes_ok_result() {
        let agent = CompletionAgent::new(FakeApi::new(vec![Ok(
            "```json\n{\"ceo\": {\"value\": \"Kim\", \"source\": \"p.1\"}}\n```".into(),
        )]));
        let result = agent
            .extract(&Document::from("x"), &schema(), identity(), Duration::from_secs(30))
            .await;
        assert!(result.is_ok());
        assert_eq!(result.identity, identity());
        assert_eq!(result.raw_value("ceo").unwrap().source.as_deref(), Some("p.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_output_is_retried() {
        let agent = CompletionAgent::new(FakeApi::new(vec![
            Ok("I could not find it".into()),
            Ok(r#"{"ceo": null}"#.into()),
        ]));
        let result = agent
            .extract(&Document::from("x"), &schema(), identity(), Duration::from_secs(30))
            .await;
        assert!(result.is_ok());
        assert_eq!(agent.api().calls(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let agent = CompletionAgent::new(FakeApi::new(vec![Err(classify_status(401, "bad key"))]));
        let result = agent
            .extract(&Document::from("x"), &schema(), identity(), Duration::from_secs(30))
            .await;
        assert_eq!(result.status, AgentStatus::Error);
        assert_eq!(result.error.unwrap().kind, FailureKind::Auth);
        assert_eq!(agent.api().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_at_deadline() {
        let agent = CompletionAgent::new(FakeApi::new(vec![
            Err(ClientError::Transport("reset".into())),
            Err(ClientError::Transport("reset".into())),
        ]))
        .with_retry(RetryPolicy {
            max_retries: 3,
            base_delay_ms: 5_000,
        });
        let result = agent
            .extract(&Document::from("x"), &schema(), identity(), Duration::from_secs(4))
            .await;
        assert_eq!(result.status, AgentStatus::Timeout);
        assert_eq!(agent.api().calls(), 1);
    }
}
