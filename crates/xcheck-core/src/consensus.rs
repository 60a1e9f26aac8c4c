//! Consensus engine.
//!
//! Reconciles the nine agents' answers for one field into a [`FieldConsensus`]:
//! per-provider consistency, agreement between providers, a final confidence
//! score and the resolved value. [`ConsensusEngine::resolve`] is a pure function
//! of the ok results it is given; failed agents and absent answers simply do not
//! contribute evidence.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{AgreementMeasure, ConfidenceTier, ConsensusConfig, EngineConfig, TierThresholds};
use crate::domain::{AgentIdentity, AgentResult, DataType, Provider};
use crate::normalize::{normalize, values_match, MatchTolerance, TypedValue};

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Consensus outcome for one schema field.
///
/// # Invariants
///
/// `intra_model_scores` and `representative_values` share the same key set:
/// the qualifying providers (at least one present answer). `cross_model_score`
/// is `Some` iff two or more providers qualify. With no qualifying provider,
/// `resolved_value` is `None`, `final_confidence` is 0 and the tier is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldConsensus {
    pub field_name: String,
    pub data_type: DataType,
    pub resolved_value: Option<TypedValue>,
    pub intra_model_scores: BTreeMap<Provider, f64>,
    pub representative_values: BTreeMap<Provider, TypedValue>,
    pub cross_model_score: Option<f64>,
    pub final_confidence: f64,
    pub confidence_tier: ConfidenceTier,
    /// Agents whose answer matched the resolved value, in identity order.
    pub supporting_agents: Vec<AgentIdentity>,
}

impl FieldConsensus {
    pub fn is_resolved(&self) -> bool {
        self.resolved_value.is_some()
    }

    /// Providers that contributed at least one present answer.
    pub fn qualifying_providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.intra_model_scores.keys().copied()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One present, normalized answer.
#[derive(Debug, Clone)]
struct Observation {
    identity: AgentIdentity,
    value: TypedValue,
}

#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    config: ConsensusConfig,
    tiers: TierThresholds,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig, tiers: TierThresholds) -> Self {
        Self { config, tiers }
    }

    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self::new(config.consensus.clone(), config.tiers)
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Resolve `field_name` from every agent's raw answer.
    ///
    /// Never fails: thin or conflicting evidence degrades the confidence tier
    /// down to `None`. The input order of `results` does not matter.
    pub fn resolve(
        &self,
        field_name: &str,
        data_type: DataType,
        results: &[AgentResult],
    ) -> FieldConsensus {
        let observations = collect_observations(field_name, data_type, results);
        let tolerance = self.config.tolerance.for_field(field_name);

        let mut by_provider: BTreeMap<Provider, Vec<&Observation>> = BTreeMap::new();
        for observation in &observations {
            by_provider
                .entry(observation.identity.provider)
                .or_default()
                .push(observation);
        }

        let mut intra_model_scores = BTreeMap::new();
        let mut representative_values = BTreeMap::new();
        let mut weighted_intra = 0.0;
        for (provider, group) in &by_provider {
            let values: Vec<&TypedValue> = group.iter().map(|o| &o.value).collect();
            let score = agreement(&values, self.config.intra_measure, &tolerance);
            weighted_intra += score * values.len() as f64;
            intra_model_scores.insert(*provider, score);
            if let Some(representative) = plurality_value(&values, &tolerance) {
                representative_values.insert(*provider, representative.clone());
            }
        }

        let cross_model_score = (representative_values.len() >= 2).then(|| {
            let values: Vec<&TypedValue> = representative_values.values().collect();
            agreement(&values, self.config.cross_measure, &tolerance)
        });

        let mean_intra = (!observations.is_empty())
            .then(|| weighted_intra / observations.len() as f64);
        let final_confidence = self.final_confidence(mean_intra, cross_model_score);
        let confidence_tier = if intra_model_scores.is_empty() {
            ConfidenceTier::None
        } else {
            self.tiers.tier_for(final_confidence)
        };

        let (resolved_value, supporting_agents) =
            match self.resolve_value(&observations, &tolerance) {
                Some(value) => {
                    let supporting = observations
                        .iter()
                        .filter(|o| values_match(&value, &o.value, &tolerance))
                        .map(|o| o.identity)
                        .collect();
                    (Some(value), supporting)
                }
                None => (None, Vec::new()),
            };

        FieldConsensus {
            field_name: field_name.to_string(),
            data_type,
            resolved_value,
            intra_model_scores,
            representative_values,
            cross_model_score,
            final_confidence,
            confidence_tier,
            supporting_agents,
        }
    }

    /// Blend the intra-model mean with the cross-model score.
    ///
    /// `mean_intra` weights each provider by its present replicas, so a lone
    /// unchallenged answer counts for one replica rather than a full provider.
    fn final_confidence(&self, mean_intra: Option<f64>, cross_model_score: Option<f64>) -> f64 {
        let Some(mean_intra) = mean_intra else {
            return 0.0;
        };

        let Some(cross) = cross_model_score else {
            return mean_intra;
        };

        let intra_weight = self.config.intra_weight;
        let cross_weight = self.config.cross_weight();
        let combined = (intra_weight * mean_intra + cross_weight * cross)
            / (intra_weight + cross_weight);
        combined.clamp(0.0, 1.0)
    }

    /// Value with the most matching answers across the whole agent pool.
    ///
    /// Candidates are visited in provider-priority then replica order and only
    /// a strictly larger support count displaces the current leader.
    fn resolve_value(
        &self,
        observations: &[Observation],
        tolerance: &MatchTolerance,
    ) -> Option<TypedValue> {
        let mut candidates: Vec<&Observation> = observations.iter().collect();
        candidates.sort_by_key(|o| {
            (
                self.config.priority_rank(o.identity.provider),
                o.identity.replica_index,
            )
        });

        let mut best: Option<(&Observation, usize)> = None;
        for candidate in candidates {
            let support = observations
                .iter()
                .filter(|o| values_match(&candidate.value, &o.value, tolerance))
                .count();
            if best.map_or(true, |(_, leader)| support > leader) {
                best = Some((candidate, support));
            }
        }
        best.map(|(observation, _)| observation.value.clone())
    }
}

// ---------------------------------------------------------------------------
// Scoring helpers
// ---------------------------------------------------------------------------

/// Present, normalized answers from ok results, one per identity, in identity
/// order. When an identity answers twice the smaller canonical value is kept,
/// whatever order the results arrived in.
fn collect_observations(
    field_name: &str,
    data_type: DataType,
    results: &[AgentResult],
) -> Vec<Observation> {
    let mut observations: Vec<Observation> = results
        .iter()
        .filter(|r| r.is_ok())
        .filter_map(|r| {
            let answer = r.raw_value(field_name)?;
            let value = normalize(&answer.value, data_type).into_value()?;
            Some(Observation {
                identity: r.identity,
                value,
            })
        })
        .collect();
    observations.sort_by_cached_key(|o| (o.identity, o.value.to_json().to_string()));
    observations.dedup_by_key(|o| o.identity);
    observations
}

/// How many of `values` match `values[index]`, itself included.
fn support(values: &[&TypedValue], index: usize, tolerance: &MatchTolerance) -> usize {
    values
        .iter()
        .filter(|other| values_match(values[index], other, tolerance))
        .count()
}

/// The most supported value; ties go to the earliest.
fn plurality_value<'a>(values: &[&'a TypedValue], tolerance: &MatchTolerance) -> Option<&'a TypedValue> {
    let mut best: Option<(usize, usize)> = None;
    for index in 0..values.len() {
        let count = support(values, index, tolerance);
        if best.map_or(true, |(_, leader)| count > leader) {
            best = Some((index, count));
        }
    }
    best.map(|(index, _)| values[index])
}

/// Agreement within a group, in [0, 1]. A group of one agrees with itself.
fn agreement(values: &[&TypedValue], measure: AgreementMeasure, tolerance: &MatchTolerance) -> f64 {
    let n = values.len();
    if n <= 1 {
        return 1.0;
    }
    match measure {
        AgreementMeasure::PluralityShare => {
            let largest = (0..n)
                .map(|index| support(values, index, tolerance))
                .max()
                .unwrap_or(0);
            largest as f64 / n as f64
        }
        AgreementMeasure::Pairwise => {
            let mut matching = 0usize;
            for i in 0..n {
                for j in 0..n {
                    if i != j && values_match(values[i], values[j], tolerance) {
                        matching += 1;
                    }
                }
            }
            matching as f64 / (n * (n - 1)) as f64
        }
    }
}
