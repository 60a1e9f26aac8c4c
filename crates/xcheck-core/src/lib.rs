//! xcheck-core: cross-validation confidence engine.
//!
//! Nine agents (three providers, three replicas each) extract the same schema
//! fields from one document. The engine dispatches them concurrently,
//! normalizes their answers per field type and scores intra- and cross-model
//! agreement into a resolved value with a confidence tier.
//!
//! ```text
//! Schema + Document ─► Dispatcher (9 tasks) ─► AgentResults
//!                                                  │
//!          VerifiedReport ◄─ ConsensusEngine ◄─ normalize (per field, per agent)
//! ```

pub mod config;
pub mod consensus;
pub mod dispatch;
pub mod domain;
pub mod fakes;
pub mod ingest;
pub mod normalize;
pub mod obs;
pub mod orchestrator;
pub mod report;
pub mod reporting;
pub mod telemetry;

pub use config::{
    AgreementMeasure, ConfidenceTier, ConsensusConfig, EngineConfig, TierThresholds,
    ToleranceConfig,
};
pub use consensus::{ConsensusEngine, FieldConsensus};
pub use dispatch::{AgentClient, ClientRegistry, Dispatcher};
pub use domain::{
    AgentFailure, AgentIdentity, AgentResult, AgentStatus, ConfigResult, ConfigurationError,
    DataType, Document, FailureKind, IngestError, Provider, RawAnswer, Schema, SchemaField,
    REPLICAS_PER_PROVIDER,
};
pub use normalize::{normalize, values_match, MatchTolerance, NormalizedValue, TypedValue};
pub use orchestrator::{Orchestrator, ProviderCredentials};
pub use report::{ExecutionSummary, ProviderExecution, VerifiedReport};

/// Crate version, recorded by the CLI in its startup log line.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
