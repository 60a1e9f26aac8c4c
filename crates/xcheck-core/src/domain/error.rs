//! Error taxonomy for the extraction engine.
//!
//! Only [`ConfigurationError`] can abort a run. Per-agent failures live on the
//! [`AgentResult`](crate::domain::agent::AgentResult) itself and per-field
//! evidence gaps surface as a `none` confidence tier.

use crate::domain::agent::Provider;

/// Fatal problems detected before any agent call is made.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no provider credentials configured (expected at least one of openai, anthropic, google)")]
    NoProvidersEnabled,

    #[error("no agent client registered for enabled provider {0}")]
    MissingClient(Provider),

    #[error("duplicate schema field name: {0}")]
    DuplicateField(String),

    #[error("unknown data type '{label}'")]
    UnknownDataType { label: String },

    #[error("schema field name must not be empty")]
    EmptyFieldName,

    #[error("schema contains no fields")]
    EmptySchema,

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for configuration-level operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;

/// Errors raised while loading schemas and documents from disk.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("document is {size} bytes, above the {limit} byte limit")]
    DocumentTooLarge { size: u64, limit: u64 },

    #[error("schema sheet is missing required column: {0}")]
    MissingColumn(String),

    #[error("unsupported schema file extension: {0}")]
    UnsupportedFormat(String),

    #[error("schema row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },

    #[error("recording has more than one result for agent {0}")]
    DuplicateAgent(String),

    #[error("could not extract PDF text: {0}")]
    Pdf(String),

    #[error("document is neither UTF-8 nor CP949 text")]
    UndecodableText,

    #[error("could not read workbook: {0}")]
    Workbook(String),

    #[error("invalid schema: {0}")]
    Schema(#[from] ConfigurationError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
