//! In-memory agent clients for tests and offline replays.
//!
//! [`ScriptedAgentClient`] answers from a per-replica script instead of a
//! network API. [`Recording`] captures the agent results of a run as JSON and
//! turns them back into a client registry.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::{AgentClient, ClientRegistry};
use crate::domain::{
    AgentFailure, AgentIdentity, AgentResult, Document, FailureKind, IngestError, Provider,
    RawAnswer, Schema,
};
use crate::orchestrator::ProviderCredentials;
use crate::report::VerifiedReport;

// ---------------------------------------------------------------------------
// ScriptedAgentClient
// ---------------------------------------------------------------------------

/// What one replica does when called.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Field name → raw answer JSON (bare value or `{"value", "source"}`).
    Answer(BTreeMap<String, Value>),
    Fail(AgentFailure),
    /// Never answers; only the dispatcher's deadline ends the call.
    Hang,
    Panic(String),
}

/// Scripted client for one provider.
#[derive(Debug)]
pub struct ScriptedAgentClient {
    provider: Provider,
    replies: BTreeMap<u8, ScriptedReply>,
    delays: BTreeMap<u8, Duration>,
    calls: AtomicUsize,
}

impl ScriptedAgentClient {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            replies: BTreeMap::new(),
            delays: BTreeMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn reply(mut self, replica: u8, reply: ScriptedReply) -> Self {
        self.replies.insert(replica, reply);
        self
    }

    /// `answers` must be a JSON object of field name → answer; anything else
    /// scripts an empty answer set.
    pub fn answer(self, replica: u8, answers: Value) -> Self {
        let map = match answers {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        self.reply(replica, ScriptedReply::Answer(map))
    }

    /// Script the same answers for every replica.
    pub fn answer_all(mut self, answers: Value) -> Self {
        for identity in AgentIdentity::roster(self.provider) {
            self = self.answer(identity.replica_index, answers.clone());
        }
        self
    }

    pub fn fail(self, replica: u8, kind: FailureKind, detail: impl Into<String>) -> Self {
        self.reply(replica, ScriptedReply::Fail(AgentFailure::new(kind, detail)))
    }

    pub fn hang(self, replica: u8) -> Self {
        self.reply(replica, ScriptedReply::Hang)
    }

    pub fn panic(self, replica: u8, message: impl Into<String>) -> Self {
        self.reply(replica, ScriptedReply::Panic(message.into()))
    }

    /// Sleep before replying.
    pub fn delay(mut self, replica: u8, delay: Duration) -> Self {
        self.delays.insert(replica, delay);
        self
    }

    /// Number of `extract` calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<dyn AgentClient> {
        Arc::new(self)
    }
}

#[async_trait]
impl AgentClient for ScriptedAgentClient {
    async fn extract(
        &self,
        _document: &Document,
        _schema: &Schema,
        identity: AgentIdentity,
        _timeout: Duration,
    ) -> AgentResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&identity.replica_index) {
            tokio::time::sleep(*delay).await;
        }

        match self.replies.get(&identity.replica_index) {
            Some(ScriptedReply::Answer(answers)) => AgentResult::ok(
                identity,
                answers
                    .iter()
                    .map(|(field, value)| (field.clone(), RawAnswer::from_json(value.clone())))
                    .collect(),
            ),
            Some(ScriptedReply::Fail(failure)) => AgentResult::failed(identity, failure.clone()),
            Some(ScriptedReply::Hang) => std::future::pending::<AgentResult>().await,
            Some(ScriptedReply::Panic(message)) => panic!("{message}"),
            None => AgentResult::failed(
                identity,
                AgentFailure::new(FailureKind::Internal, "no scripted reply for this replica"),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

/// Agent results of one run, replayable without network access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub results: Vec<AgentResult>,
}

impl Recording {
    pub fn from_report(report: &VerifiedReport) -> Self {
        Self {
            results: report.agent_results().to_vec(),
        }
    }

    /// Read a recording, rejecting files with two results for one agent.
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let text = std::fs::read_to_string(path)?;
        let recording: Self = serde_json::from_str(&text)?;

        let mut seen = BTreeSet::new();
        for result in &recording.results {
            if !seen.insert(result.identity) {
                return Err(IngestError::DuplicateAgent(result.identity.label()));
            }
        }
        Ok(recording)
    }

    pub fn save(&self, path: &Path) -> Result<(), IngestError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Providers with at least one recorded result.
    pub fn providers(&self) -> BTreeSet<Provider> {
        self.results.iter().map(|r| r.identity.provider).collect()
    }

    /// Placeholder credentials enabling exactly the recorded providers.
    pub fn credentials(&self) -> ProviderCredentials {
        self.providers()
            .into_iter()
            .fold(ProviderCredentials::new(), |creds, provider| {
                creds.with_key(provider, "recorded")
            })
    }

    /// One scripted client per recorded provider, replaying each result.
    pub fn into_registry(self) -> ClientRegistry {
        let mut clients: BTreeMap<Provider, ScriptedAgentClient> = BTreeMap::new();
        for result in self.results {
            let provider = result.identity.provider;
            let client = clients
                .remove(&provider)
                .unwrap_or_else(|| ScriptedAgentClient::new(provider));
            let reply = match (result.raw_values, result.error) {
                (Some(values), _) => ScriptedReply::Answer(
                    values
                        .into_iter()
                        .map(|(field, answer)| (field, answer_json(answer)))
                        .collect(),
                ),
                (None, Some(failure)) => ScriptedReply::Fail(failure),
                (None, None) => ScriptedReply::Fail(AgentFailure::new(
                    FailureKind::Internal,
                    "recorded result carried neither answers nor an error",
                )),
            };
            clients.insert(provider, client.reply(result.identity.replica_index, reply));
        }

        clients
            .into_iter()
            .fold(ClientRegistry::new(), |registry, (provider, client)| {
                registry.with_client(provider, client.into_arc())
            })
    }
}

fn answer_json(answer: RawAnswer) -> Value {
    match answer.source {
        Some(source) => serde_json::json!({"value": answer.value, "source": source}),
        None => answer.value,
    }
}
