//! Engine configuration.
//!
//! One immutable [`EngineConfig`] is built per process (defaults, or a TOML
//! file where every key is optional) and handed to the orchestrator at
//! construction. Nothing in the engine reads configuration from globals.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ConfigResult, ConfigurationError, Provider};
use crate::normalize::MatchTolerance;

/// How agreement inside a group of values is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementMeasure {
    /// Size of the largest group matching one value, divided by the group size.
    PluralityShare,
    /// Fraction of ordered pairs of distinct members whose values match.
    Pairwise,
}

/// Confidence band derived from a final confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
    None,
}

impl ConfidenceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
            ConfidenceTier::None => "none",
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lower bounds (inclusive) of each confidence tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high: 0.9,
            medium: 0.7,
            low: 0.5,
        }
    }
}

impl TierThresholds {
    pub fn tier_for(&self, confidence: f64) -> ConfidenceTier {
        if confidence >= self.high {
            ConfidenceTier::High
        } else if confidence >= self.medium {
            ConfidenceTier::Medium
        } else if confidence >= self.low {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::None
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let ordered = 0.0 <= self.low && self.low <= self.medium && self.medium <= self.high;
        if !ordered || self.high > 1.0 {
            return Err(ConfigurationError::InvalidConfig(format!(
                "tier thresholds must satisfy 0 <= low <= medium <= high <= 1 (got low={}, medium={}, high={})",
                self.low, self.medium, self.high
            )));
        }
        Ok(())
    }
}

/// Matching tolerances, with per-field absolute overrides for currency-like
/// fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    pub relative: f64,
    pub absolute: f64,
    pub list_jaccard: f64,
    /// Field name → absolute tolerance replacing `absolute` for that field.
    pub field_absolute: BTreeMap<String, f64>,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        let base = MatchTolerance::default();
        Self {
            relative: base.relative,
            absolute: base.absolute,
            list_jaccard: base.list_jaccard,
            field_absolute: BTreeMap::new(),
        }
    }
}

impl ToleranceConfig {
    pub fn for_field(&self, field: &str) -> MatchTolerance {
        MatchTolerance {
            relative: self.relative,
            absolute: self
                .field_absolute
                .get(field)
                .copied()
                .unwrap_or(self.absolute),
            list_jaccard: self.list_jaccard,
        }
    }

    pub fn with_field_absolute(mut self, field: impl Into<String>, absolute: f64) -> Self {
        self.field_absolute.insert(field.into(), absolute);
        self
    }

    fn validate(&self) -> ConfigResult<()> {
        if !(self.relative.is_finite() && self.relative >= 0.0) {
            return Err(invalid(format!(
                "relative tolerance must be a non-negative number (got {})",
                self.relative
            )));
        }
        if !(self.absolute.is_finite() && self.absolute >= 0.0) {
            return Err(invalid(format!(
                "absolute tolerance must be a non-negative number (got {})",
                self.absolute
            )));
        }
        if !(self.list_jaccard > 0.0 && self.list_jaccard <= 1.0) {
            return Err(invalid(format!(
                "list_jaccard must be in (0, 1] (got {})",
                self.list_jaccard
            )));
        }
        for (field, absolute) in &self.field_absolute {
            if !(absolute.is_finite() && *absolute >= 0.0) {
                return Err(invalid(format!(
                    "absolute tolerance for field '{field}' must be non-negative (got {absolute})"
                )));
            }
        }
        Ok(())
    }
}

/// Scoring rules for the consensus engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub intra_weight: f64,
    /// Defaults to `1 - intra_weight` when unset.
    pub cross_weight: Option<f64>,
    pub intra_measure: AgreementMeasure,
    pub cross_measure: AgreementMeasure,
    /// Tie-break order for resolved values; providers not listed rank last.
    pub provider_priority: Vec<Provider>,
    pub tolerance: ToleranceConfig,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            intra_weight: 0.4,
            cross_weight: None,
            intra_measure: AgreementMeasure::PluralityShare,
            cross_measure: AgreementMeasure::Pairwise,
            provider_priority: Provider::ALL.to_vec(),
            tolerance: ToleranceConfig::default(),
        }
    }
}

impl ConsensusConfig {
    pub fn cross_weight(&self) -> f64 {
        self.cross_weight.unwrap_or(1.0 - self.intra_weight)
    }

    /// Position of `provider` in the tie-break order (lower wins).
    pub fn priority_rank(&self, provider: Provider) -> usize {
        self.provider_priority
            .iter()
            .position(|p| *p == provider)
            .unwrap_or(self.provider_priority.len() + provider as usize)
    }

    pub fn with_tolerance(mut self, tolerance: ToleranceConfig) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_measures(mut self, intra: AgreementMeasure, cross: AgreementMeasure) -> Self {
        self.intra_measure = intra;
        self.cross_measure = cross;
        self
    }

    pub fn with_provider_priority(mut self, priority: Vec<Provider>) -> Self {
        self.provider_priority = priority;
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let intra = self.intra_weight;
        let cross = self.cross_weight();
        for (name, weight) in [("intra_weight", intra), ("cross_weight", cross)] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(invalid(format!("{name} must be in [0, 1] (got {weight})")));
            }
        }
        if intra + cross <= 0.0 {
            return Err(invalid("intra_weight and cross_weight must not both be zero"));
        }

        let mut seen = HashSet::new();
        for provider in &self.provider_priority {
            if !seen.insert(*provider) {
                return Err(invalid(format!(
                    "provider '{provider}' listed twice in provider_priority"
                )));
            }
        }

        self.tolerance.validate()
    }
}

/// Everything the orchestrator needs besides clients and credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub consensus: ConsensusConfig,
    pub tiers: TierThresholds,
    /// Per-agent-call deadline in seconds.
    pub agent_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            tiers: TierThresholds::default(),
            agent_timeout_secs: 300,
        }
    }
}

impl EngineConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn with_consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.consensus = consensus;
        self
    }

    pub fn with_tiers(mut self, tiers: TierThresholds) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout_secs = timeout.as_secs();
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.consensus.validate()?;
        self.tiers.validate()?;
        if self.agent_timeout_secs == 0 {
            return Err(invalid("agent_timeout_secs must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidConfig(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.consensus.intra_weight, 0.4);
        assert!((config.consensus.cross_weight() - 0.6).abs() < 1e-12);
        assert_eq!(config.tiers, TierThresholds { high: 0.9, medium: 0.7, low: 0.5 });
        assert_eq!(config.agent_timeout(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tier_boundaries_are_inclusive() {
        let tiers = TierThresholds::default();
        assert_eq!(tiers.tier_for(1.0), ConfidenceTier::High);
        assert_eq!(tiers.tier_for(0.9), ConfidenceTier::High);
        assert_eq!(tiers.tier_for(0.89), ConfidenceTier::Medium);
        assert_eq!(tiers.tier_for(0.7), ConfidenceTier::Medium);
        assert_eq!(tiers.tier_for(0.5), ConfidenceTier::Low);
        assert_eq!(tiers.tier_for(0.49), ConfidenceTier::None);
        assert_eq!(tiers.tier_for(0.0), ConfidenceTier::None);
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let mut consensus = ConsensusConfig {
            intra_weight: 1.5,
            ..ConsensusConfig::default()
        };
        assert!(matches!(
            consensus.validate(),
            Err(ConfigurationError::InvalidConfig(_))
        ));

        consensus.intra_weight = 0.0;
        consensus.cross_weight = Some(0.0);
        assert!(consensus.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unordered_thresholds() {
        let tiers = TierThresholds {
            high: 0.6,
            medium: 0.7,
            low: 0.5,
        };
        assert!(tiers.validate().is_err());
        let config = EngineConfig::default().with_tiers(tiers);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout_and_duplicate_priority() {
        let config = EngineConfig {
            agent_timeout_secs: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let consensus = ConsensusConfig::default()
            .with_provider_priority(vec![Provider::Google, Provider::Google]);
        assert!(consensus.validate().is_err());
    }

    #[test]
    fn test_priority_rank_places_unlisted_providers_last() {
        let consensus =
            ConsensusConfig::default().with_provider_priority(vec![Provider::Google]);
        assert_eq!(consensus.priority_rank(Provider::Google), 0);
        assert!(consensus.priority_rank(Provider::OpenAi) > 0);
        assert!(
            consensus.priority_rank(Provider::OpenAi) < consensus.priority_rank(Provider::Anthropic)
        );
    }

    #[test]
    fn test_field_absolute_overrides_default() {
        let tolerance = ToleranceConfig::default().with_field_absolute("총매출액", 1.0);
        assert_eq!(tolerance.for_field("총매출액").absolute, 1.0);
        assert_eq!(tolerance.for_field("other").absolute, 0.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
agent_timeout_secs = 60

[consensus]
intra_measure = "pairwise"

[consensus.tolerance.field_absolute]
revenue = 0.5

[tiers]
high = 0.95
"#,
        )
        .unwrap();

        assert_eq!(config.agent_timeout_secs, 60);
        assert_eq!(config.consensus.intra_measure, AgreementMeasure::Pairwise);
        assert_eq!(config.consensus.cross_measure, AgreementMeasure::Pairwise);
        assert_eq!(config.consensus.intra_weight, 0.4);
        assert_eq!(config.consensus.tolerance.for_field("revenue").absolute, 0.5);
        assert_eq!(config.tiers.high, 0.95);
        assert_eq!(config.tiers.medium, 0.7);
        assert!(config.validate().is_ok());
    }
}
