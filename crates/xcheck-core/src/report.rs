//! The verified report produced by one extraction run.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::consensus::FieldConsensus;
use crate::domain::{AgentIdentity, AgentResult, AgentStatus, Provider, RawAnswer};

/// Per-provider agent outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderExecution {
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// How the agent calls of a run went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_agents: usize,
    pub succeeded: usize,
    /// Agents that ended with `status = error`.
    pub failed: usize,
    pub timed_out: usize,
    pub per_provider: BTreeMap<Provider, ProviderExecution>,
    pub elapsed_ms: u64,
}

impl ExecutionSummary {
    pub fn from_results(results: &[AgentResult], elapsed: Duration) -> Self {
        let mut per_provider: BTreeMap<Provider, ProviderExecution> = BTreeMap::new();
        for result in results {
            let counts = per_provider.entry(result.identity.provider).or_default();
            match result.status {
                AgentStatus::Ok => counts.succeeded += 1,
                AgentStatus::Error => counts.failed += 1,
                AgentStatus::Timeout => counts.timed_out += 1,
            }
        }

        Self {
            total_agents: results.len(),
            succeeded: per_provider.values().map(|c| c.succeeded).sum(),
            failed: per_provider.values().map(|c| c.failed).sum(),
            timed_out: per_provider.values().map(|c| c.timed_out).sum(),
            per_provider,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Outcome of one run: a consensus per schema field, in schema order, plus
/// every agent result for audit.
///
/// Built once by the orchestrator and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedReport {
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    document_digest: String,
    overall_confidence: f64,
    execution: ExecutionSummary,
    fields: Vec<FieldConsensus>,
    agent_results: Vec<AgentResult>,
}

impl VerifiedReport {
    pub(crate) fn assemble(
        run_id: Uuid,
        document_digest: String,
        fields: Vec<FieldConsensus>,
        agent_results: Vec<AgentResult>,
        execution: ExecutionSummary,
    ) -> Self {
        let overall_confidence = if fields.is_empty() {
            0.0
        } else {
            fields.iter().map(|f| f.final_confidence).sum::<f64>() / fields.len() as f64
        };
        Self {
            run_id,
            generated_at: Utc::now(),
            document_digest,
            overall_confidence,
            execution,
            fields,
            agent_results,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn document_digest(&self) -> &str {
        &self.document_digest
    }

    /// Mean final confidence over all fields.
    pub fn overall_confidence(&self) -> f64 {
        self.overall_confidence
    }

    pub fn execution(&self) -> &ExecutionSummary {
        &self.execution
    }

    pub fn fields(&self) -> &[FieldConsensus] {
        &self.fields
    }

    pub fn get(&self, field_name: &str) -> Option<&FieldConsensus> {
        self.fields.iter().find(|f| f.field_name == field_name)
    }

    pub fn agent_results(&self) -> &[AgentResult] {
        &self.agent_results
    }

    pub fn agent_result(&self, identity: AgentIdentity) -> Option<&AgentResult> {
        self.agent_results.iter().find(|r| r.identity == identity)
    }

    /// What `identity` answered for `field_name`, if it answered at all.
    pub fn raw_answer(&self, identity: AgentIdentity, field_name: &str) -> Option<&RawAnswer> {
        self.agent_result(identity)
            .and_then(|result| result.raw_value(field_name))
    }

    /// Mean intra-model score of `provider` over the fields it qualified for.
    pub fn provider_consistency(&self, provider: Provider) -> Option<f64> {
        let scores: Vec<f64> = self
            .fields
            .iter()
            .filter_map(|f| f.intra_model_scores.get(&provider).copied())
            .collect();
        (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64)
    }
}
