//! HTTP extraction clients for the xcheck engine.
//!
//! Each supported vendor gets a [`CompletionApi`] implementation. Wrapped in a
//! [`CompletionAgent`], it becomes an [`xcheck_core::AgentClient`] that the
//! dispatcher can run as three replicas.

pub mod anthropic;
pub mod error;
pub mod google;
pub mod http;
pub mod openai;
pub mod prompt;
pub mod response;
pub mod retry;
pub mod settings;

pub use anthropic::AnthropicApi;
pub use error::{ClientError, Result};
pub use google::GoogleApi;
pub use http::{CompletionAgent, CompletionApi};
pub use openai::OpenAiApi;
pub use prompt::PromptBuilder;
pub use response::parse_answers;
pub use retry::RetryPolicy;
pub use settings::{http_registry, ClientSettings, ProviderSettings};
