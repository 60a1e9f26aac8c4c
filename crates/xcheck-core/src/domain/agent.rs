//! Agent vocabulary: providers, identities, and per-agent results.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of replicas dispatched for every enabled provider.
pub const REPLICAS_PER_PROVIDER: u8 = 3;

/// A language-model vendor. Declaration order is the default tie-break priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Anthropic, Provider::Google];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
        }
    }

    /// Vendor name as shown in reports.
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Google => "Google",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "gpt" => Ok(Provider::OpenAi),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "google" | "gemini" => Ok(Provider::Google),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// One (provider, replica) extraction unit.
///
/// `replica_index` is always in `1..=REPLICAS_PER_PROVIDER`; deserialization
/// and [`AgentIdentity::new`] both reject anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "IdentityRepr")]
pub struct AgentIdentity {
    pub provider: Provider,
    pub replica_index: u8,
}

#[derive(Deserialize)]
struct IdentityRepr {
    provider: Provider,
    replica_index: u8,
}

impl TryFrom<IdentityRepr> for AgentIdentity {
    type Error = String;

    fn try_from(repr: IdentityRepr) -> Result<Self, Self::Error> {
        AgentIdentity::new(repr.provider, repr.replica_index).ok_or_else(|| {
            format!(
                "replica index {} out of range 1..={}",
                repr.replica_index, REPLICAS_PER_PROVIDER
            )
        })
    }
}

impl AgentIdentity {
    pub fn new(provider: Provider, replica_index: u8) -> Option<Self> {
        (1..=REPLICAS_PER_PROVIDER)
            .contains(&replica_index)
            .then_some(Self {
                provider,
                replica_index,
            })
    }

    /// Every identity dispatched for `provider`, lowest replica first.
    pub fn roster(provider: Provider) -> impl Iterator<Item = AgentIdentity> {
        (1..=REPLICAS_PER_PROVIDER).map(move |replica_index| AgentIdentity {
            provider,
            replica_index,
        })
    }

    /// Stable label such as `openai-2`, used for CSV headers and log fields.
    pub fn label(&self) -> String {
        format!("{}-{}", self.provider, self.replica_index)
    }
}

impl std::fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.provider, self.replica_index)
    }
}

impl FromStr for AgentIdentity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, replica) = s
            .rsplit_once('-')
            .ok_or_else(|| format!("expected <provider>-<replica>, got {s}"))?;
        let provider: Provider = provider.parse()?;
        let replica: u8 = replica
            .parse()
            .map_err(|_| format!("invalid replica index in {s}"))?;
        AgentIdentity::new(provider, replica)
            .ok_or_else(|| format!("replica index {replica} out of range"))
    }
}

/// A single field answer exactly as an agent returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAnswer {
    pub value: serde_json::Value,
    /// Passage or page reference the agent cited for the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl RawAnswer {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            source: None,
        }
    }

    /// Build from an agent's JSON, unwrapping the `{"value": .., "source": ..}`
    /// envelope the extraction prompt asks for. Anything else is taken as the
    /// bare value.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Object(mut map) if map.contains_key("value") => {
                let value = map.remove("value").unwrap_or(serde_json::Value::Null);
                let source = match map.remove("source") {
                    Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
                    Some(serde_json::Value::Null) | None => None,
                    Some(serde_json::Value::String(_)) => None,
                    Some(other) => Some(other.to_string()),
                };
                Self { value, source }
            }
            other => Self::new(other),
        }
    }
}

/// Terminal state of one agent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Ok,
    Error,
    Timeout,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Ok => "ok",
            AgentStatus::Error => "error",
            AgentStatus::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Why an agent produced no answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Auth,
    RateLimit,
    Timeout,
    InvalidResponse,
    Transport,
    Internal,
}

impl FailureKind {
    /// Message suitable for showing to the person who started the run.
    pub fn user_message(self) -> &'static str {
        match self {
            FailureKind::Auth => "The API key was rejected. Check the provider credential.",
            FailureKind::RateLimit => "The provider rate limit was reached. Try again shortly.",
            FailureKind::Timeout => "The request timed out before the provider answered.",
            FailureKind::InvalidResponse => "The provider answered with malformed output.",
            FailureKind::Transport => "The provider could not be reached.",
            FailureKind::Internal => "The agent failed unexpectedly.",
        }
    }
}

/// Failure detail recorded on a non-ok [`AgentResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl AgentFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

/// Outcome of one agent's extraction call.
///
/// # Invariants
///
/// `raw_values` is `Some` iff `status == Ok`; `error` is `Some` iff
/// `status != Ok`. The constructors are the only way this crate builds a
/// result, and they keep both invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub identity: AgentIdentity,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_values: Option<BTreeMap<String, RawAnswer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentFailure>,
    /// Wall time of the call in milliseconds.
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl AgentResult {
    pub fn ok(identity: AgentIdentity, raw_values: BTreeMap<String, RawAnswer>) -> Self {
        Self {
            identity,
            status: AgentStatus::Ok,
            raw_values: Some(raw_values),
            error: None,
            elapsed_ms: 0,
        }
    }

    /// A failed call. A failure of kind `Timeout` yields `status = Timeout`.
    pub fn failed(identity: AgentIdentity, failure: AgentFailure) -> Self {
        let status = if failure.kind == FailureKind::Timeout {
            AgentStatus::Timeout
        } else {
            AgentStatus::Error
        };
        Self {
            identity,
            status,
            raw_values: None,
            error: Some(failure),
            elapsed_ms: 0,
        }
    }

    pub fn timed_out(identity: AgentIdentity, limit: Duration) -> Self {
        Self::failed(
            identity,
            AgentFailure::new(
                FailureKind::Timeout,
                format!("no answer within {}s", limit.as_secs_f64()),
            ),
        )
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == AgentStatus::Ok
    }

    /// The agent's answer for `field`, if the call succeeded and the field
    /// was returned at all.
    pub fn raw_value(&self, field: &str) -> Option<&RawAnswer> {
        self.raw_values.as_ref().and_then(|values| values.get(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_range_enforced() {
        assert!(AgentIdentity::new(Provider::OpenAi, 1).is_some());
        assert!(AgentIdentity::new(Provider::OpenAi, 3).is_some());
        assert!(AgentIdentity::new(Provider::OpenAi, 0).is_none());
        assert!(AgentIdentity::new(Provider::OpenAi, 4).is_none());

        let bad = serde_json::from_value::<AgentIdentity>(
            json!({"provider": "google", "replica_index": 7}),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_roster_covers_three_replicas() {
        let labels: Vec<String> = AgentIdentity::roster(Provider::Anthropic)
            .map(|id| id.label())
            .collect();
        assert_eq!(labels, ["anthropic-1", "anthropic-2", "anthropic-3"]);
    }

    #[test]
    fn test_identity_label_roundtrips_through_from_str() {
        let id: AgentIdentity = "google-2".parse().unwrap();
        assert_eq!(id.provider, Provider::Google);
        assert_eq!(id.replica_index, 2);
        assert!("google-9".parse::<AgentIdentity>().is_err());
        assert!("mistral-1".parse::<AgentIdentity>().is_err());
    }

    #[test]
    fn test_provider_order_is_priority_order() {
        let mut providers = vec![Provider::Google, Provider::OpenAi, Provider::Anthropic];
        providers.sort();
        assert_eq!(providers, Provider::ALL);
    }

    #[test]
    fn test_raw_answer_unwraps_value_source_envelope() {
        let answer = RawAnswer::from_json(json!({"value": 1200, "source": "[PAGE 3] revenue"}));
        assert_eq!(answer.value, json!(1200));
        assert_eq!(answer.source.as_deref(), Some("[PAGE 3] revenue"));

        let bare = RawAnswer::from_json(json!("ACME"));
        assert_eq!(bare.value, json!("ACME"));
        assert!(bare.source.is_none());
    }

    #[test]
    fn test_failed_timeout_kind_sets_timeout_status() {
        let id = AgentIdentity::new(Provider::Google, 1).unwrap();
        let result = AgentResult::failed(id, AgentFailure::new(FailureKind::Timeout, "slow"));
        assert_eq!(result.status, AgentStatus::Timeout);
        assert!(result.raw_values.is_none());

        let result = AgentResult::failed(id, AgentFailure::new(FailureKind::Auth, "401"));
        assert_eq!(result.status, AgentStatus::Error);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_raw_value_only_for_ok_results() {
        let id = AgentIdentity::new(Provider::OpenAi, 1).unwrap();
        let mut values = BTreeMap::new();
        values.insert("revenue".to_string(), RawAnswer::new(json!(10)));
        let ok = AgentResult::ok(id, values);
        assert_eq!(ok.raw_value("revenue").unwrap().value, json!(10));
        assert!(ok.raw_value("missing").is_none());

        let timed_out = AgentResult::timed_out(id, Duration::from_secs(5));
        assert!(timed_out.raw_value("revenue").is_none());
    }
}
