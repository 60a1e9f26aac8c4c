//! Domain types shared by every engine component.

pub mod agent;
pub mod document;
pub mod error;
pub mod schema;

pub use agent::{
    AgentFailure, AgentIdentity, AgentResult, AgentStatus, FailureKind, Provider, RawAnswer,
    REPLICAS_PER_PROVIDER,
};
pub use document::Document;
pub use error::{ConfigResult, ConfigurationError, IngestError};
pub use schema::{DataType, Schema, SchemaField};
