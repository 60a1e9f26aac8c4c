use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use crate::config::ConfidenceTier;
use crate::domain::{AgentStatus, DataType, Provider};
use crate::report::{ExecutionSummary, VerifiedReport};

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// One agent's answer for one field, as persisted for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentAnswerArtifact {
    pub agent: String,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Field section of the report artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldArtifact {
    pub field_name: String,
    pub data_type: DataType,
    pub resolved_value: Value,
    pub final_confidence: f64,
    pub confidence_tier: ConfidenceTier,
    pub intra_model_scores: BTreeMap<String, f64>,
    pub representative_values: BTreeMap<String, Value>,
    pub cross_model_score: Option<f64>,
    pub supporting_agents: Vec<String>,
    pub answers: Vec<AgentAnswerArtifact>,
}

/// Canonical report artifact written next to the CSV export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportArtifact {
    pub schema_version: String,
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub document_digest: String,
    pub overall_confidence: f64,
    pub execution: ExecutionSummary,
    pub fields: Vec<FieldArtifact>,
}

impl ReportArtifact {
    pub fn from_report(report: &VerifiedReport) -> Self {
        let fields = report
            .fields()
            .iter()
            .map(|consensus| FieldArtifact {
                field_name: consensus.field_name.clone(),
                data_type: consensus.data_type,
                resolved_value: consensus
                    .resolved_value
                    .as_ref()
                    .map(|v| v.to_json())
                    .unwrap_or(Value::Null),
                final_confidence: consensus.final_confidence,
                confidence_tier: consensus.confidence_tier,
                intra_model_scores: consensus
                    .intra_model_scores
                    .iter()
                    .map(|(p, s)| (p.to_string(), *s))
                    .collect(),
                representative_values: consensus
                    .representative_values
                    .iter()
                    .map(|(p, v)| (p.to_string(), v.to_json()))
                    .collect(),
                cross_model_score: consensus.cross_model_score,
                supporting_agents: consensus
                    .supporting_agents
                    .iter()
                    .map(|id| id.label())
                    .collect(),
                answers: report
                    .agent_results()
                    .iter()
                    .map(|result| {
                        let answer = result.raw_value(&consensus.field_name);
                        AgentAnswerArtifact {
                            agent: result.identity.label(),
                            status: result.status,
                            value: answer.map(|a| a.value.clone()),
                            source: answer.and_then(|a| a.source.clone()),
                            error: result.error.as_ref().map(|e| e.to_string()),
                        }
                    })
                    .collect(),
            })
            .collect();

        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            run_id: report.run_id(),
            generated_at: report.generated_at(),
            document_digest: report.document_digest().to_string(),
            overall_confidence: report.overall_confidence(),
            execution: report.execution().clone(),
            fields,
        }
    }
}

/// Write the report artifact as pretty JSON.
pub fn write_report_json(path: &Path, artifact: &ReportArtifact) -> Result<()> {
    let content = serde_json::to_string_pretty(artifact).context("serialize report artifact")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render the CSV export: one row per field with the resolved value,
/// confidence and tier, then one column per agent holding its raw answer
/// (or `[status]` when the agent failed).
pub fn render_report_csv(report: &VerifiedReport) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec![
        "field".to_string(),
        "data_type".to_string(),
        "resolved_value".to_string(),
        "confidence".to_string(),
        "tier".to_string(),
    ];
    header.extend(report.agent_results().iter().map(|r| r.identity.label()));
    writer.write_record(&header).context("write csv header")?;

    for consensus in report.fields() {
        let mut row = vec![
            consensus.field_name.clone(),
            consensus.data_type.to_string(),
            consensus
                .resolved_value
                .as_ref()
                .map(|v| v.display())
                .unwrap_or_default(),
            format!("{:.3}", consensus.final_confidence),
            consensus.confidence_tier.to_string(),
        ];
        for result in report.agent_results() {
            let cell = if result.is_ok() {
                result
                    .raw_value(&consensus.field_name)
                    .map(|a| cell_text(&a.value))
                    .unwrap_or_default()
            } else {
                format!("[{}]", result.status)
            };
            row.push(cell);
        }
        writer
            .write_record(&row)
            .with_context(|| format!("write csv row for {}", consensus.field_name))?;
    }

    let bytes = writer.into_inner().context("flush csv writer")?;
    String::from_utf8(bytes).context("csv output is not utf-8")
}

/// Write the CSV export with a UTF-8 BOM so spreadsheet tools pick the right
/// encoding for Korean text.
pub fn write_report_csv(path: &Path, report: &VerifiedReport) -> Result<()> {
    let csv = render_report_csv(report)?;
    let mut content = String::with_capacity(csv.len() + 3);
    content.push('\u{feff}');
    content.push_str(&csv);
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn md_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

/// Render a markdown summary of the run.
pub fn render_summary_md(report: &VerifiedReport) -> String {
    let execution = report.execution();
    let mut out = String::new();
    out.push_str("# Extraction Summary\n\n");
    out.push_str(&format!(
        "- run: `{}`\n- generated: {}\n- document sha256: `{}`\n- overall confidence: {:.1}%\n\n",
        report.run_id(),
        report.generated_at().to_rfc3339(),
        report.document_digest(),
        report.overall_confidence() * 100.0
    ));

    out.push_str("## Agents\n");
    out.push_str(&format!(
        "- total: {}\n- succeeded: {}\n- failed: {}\n- timed out: {}\n- elapsed: {:.1}s\n\n",
        execution.total_agents,
        execution.succeeded,
        execution.failed,
        execution.timed_out,
        execution.elapsed_ms as f64 / 1000.0
    ));

    out.push_str("### Provider consistency\n");
    for provider in Provider::ALL {
        let Some(counts) = execution.per_provider.get(&provider) else {
            continue;
        };
        let consistency = report
            .provider_consistency(provider)
            .map(|c| format!("{:.1}%", c * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        out.push_str(&format!(
            "- {}: {} ({}/{} agents ok)\n",
            provider.display_name(),
            consistency,
            counts.succeeded,
            counts.succeeded + counts.failed + counts.timed_out
        ));
    }
    out.push('\n');

    out.push_str("## Fields\n");
    out.push_str("| Field | Value | Confidence | Tier | Supporting |\n");
    out.push_str("|---|---|---|---|---|\n");
    for consensus in report.fields() {
        let value = consensus
            .resolved_value
            .as_ref()
            .map(|v| v.display())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "| {} | {} | {:.1}% | {} | {} |\n",
            md_cell(&consensus.field_name),
            md_cell(&value),
            consensus.final_confidence * 100.0,
            consensus.confidence_tier,
            consensus.supporting_agents.len()
        ));
    }

    let failures: Vec<_> = report
        .agent_results()
        .iter()
        .filter_map(|r| r.error.as_ref().map(|e| (r.identity, e)))
        .collect();
    if !failures.is_empty() {
        out.push_str("\n## Agent failures\n");
        for (identity, failure) in failures {
            out.push_str(&format!(
                "- `{}`: {} ({})\n",
                identity,
                failure.kind.user_message(),
                failure.detail
            ));
        }
    }
    out
}

/// Write the markdown summary.
pub fn write_summary_md(path: &Path, report: &VerifiedReport) -> Result<()> {
    let md = render_summary_md(report);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
