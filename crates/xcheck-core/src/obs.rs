//! Structured observability hooks for the extraction run lifecycle.
//!
//! Every event carries an `event` field so log pipelines can filter on it:
//! `extraction.started`, `agent.finished`, `extraction.dispatched`,
//! `field.resolved` (debug), `extraction.finished`, `extraction.rejected`.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::consensus::FieldConsensus;
use crate::domain::{AgentResult, Provider};
use crate::report::ExecutionSummary;

/// RAII guard that enters a run-scoped span for synchronous work such as
/// report export.
///
/// Async code should attach [`run_span`] with `tracing::Instrument` instead,
/// since an entered guard must not be held across `.await`.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// The span every event of one run is recorded under.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("xcheck.run", run_id = %run_id)
}

fn provider_list(providers: &BTreeSet<Provider>) -> String {
    providers
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn emit_extraction_started(
    run_id: &str,
    field_count: usize,
    document_bytes: usize,
    providers: &BTreeSet<Provider>,
) {
    info!(
        event = "extraction.started",
        run_id = %run_id,
        fields = field_count,
        document_bytes = document_bytes,
        providers = %provider_list(providers),
    );
}

/// One agent call completed, failed or timed out.
pub fn emit_agent_finished(result: &AgentResult) {
    match &result.error {
        None => info!(
            event = "agent.finished",
            provider = %result.identity.provider,
            replica = result.identity.replica_index,
            status = %result.status,
            elapsed_ms = result.elapsed_ms,
        ),
        Some(failure) => warn!(
            event = "agent.finished",
            provider = %result.identity.provider,
            replica = result.identity.replica_index,
            status = %result.status,
            elapsed_ms = result.elapsed_ms,
            kind = ?failure.kind,
            error = %failure.detail,
        ),
    }
}

pub fn emit_extraction_dispatched(summary: &ExecutionSummary) {
    info!(
        event = "extraction.dispatched",
        total = summary.total_agents,
        succeeded = summary.succeeded,
        failed = summary.failed,
        timed_out = summary.timed_out,
        elapsed_ms = summary.elapsed_ms,
    );
}

pub fn emit_field_resolved(consensus: &FieldConsensus) {
    debug!(
        event = "field.resolved",
        field = %consensus.field_name,
        confidence = consensus.final_confidence,
        tier = %consensus.confidence_tier,
        supporting = consensus.supporting_agents.len(),
    );
}

pub fn emit_extraction_finished(
    run_id: &str,
    field_count: usize,
    overall_confidence: f64,
    duration_ms: u64,
) {
    info!(
        event = "extraction.finished",
        run_id = %run_id,
        fields = field_count,
        overall_confidence = overall_confidence,
        duration_ms = duration_ms,
    );
}

/// The run was refused before any agent call.
pub fn emit_extraction_rejected(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "extraction.rejected", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgentIdentity;
    use std::time::Duration;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
    }

    #[test]
    fn test_emitters_accept_failed_results() {
        let identity = AgentIdentity::new(Provider::Google, 2).unwrap();
        emit_agent_finished(&AgentResult::timed_out(identity, Duration::from_secs(3)));
        let providers: BTreeSet<Provider> = Provider::ALL.into_iter().collect();
        assert_eq!(provider_list(&providers), "openai,anthropic,google");
    }
}
