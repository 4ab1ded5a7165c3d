//! Multi-provider AI orchestration
//!
//! Features:
//! - Multiple backend support (Claude, OpenAI, Ollama) behind one trait
//! - Provider fallback driven by health-aware candidate ordering
//! - Per-provider circuit breaking with cool-down and half-open probes
//! - Fingerprinted response cache with TTL expiry
//! - Structured generation validated against a JSON schema

pub mod backend;
pub mod cache;
pub mod claude;
pub mod factory;
pub mod health;
pub mod mock;
pub mod orchestrator;

pub use backend::{CompletionOptions, OllamaBackend, OpenAiBackend, ProviderBackend};
pub use cache::{fingerprint, CacheEntry, ResponseCache};
pub use claude::ClaudeBackend;
pub use factory::build_backend;
pub use health::{CircuitState, HealthRegistry, ProviderHealthSnapshot};
pub use mock::MockBackend;
pub use orchestrator::{GenerateRequest, GenerateResponse, Orchestrator};

use thiserror::Error;

/// Provider-level errors. The orchestrator maps these onto the pipeline
/// error taxonomy per attempted provider.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}
