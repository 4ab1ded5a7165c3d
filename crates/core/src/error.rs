//! Error types shared across the pipeline crates.
//!
//! Transient provider failures are absorbed by the retry/fallback machinery
//! and never surface to submitters; only permanent states and input
//! validation failures are user-visible.

use thiserror::Error;
use uuid::Uuid;

/// Result alias used throughout the pipeline crates.
pub type Result<T> = std::result::Result<T, Error>;

/// One failed provider attempt, kept for offline diagnosis.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderAttempt {
    /// Provider identifier (e.g. "claude", "openai", "ollama")
    pub provider: String,
    /// Error message from that attempt
    pub error: String,
    /// Latency until the attempt failed, in milliseconds
    pub latency_ms: u64,
}

/// Pipeline errors
#[derive(Error, Debug)]
pub enum Error {
    /// Queue backing store unreachable or shut down. Surfaced to the caller;
    /// submission fails loudly.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// Provider did not answer within the configured timeout.
    #[error("Provider {provider} timed out after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    /// Provider returned an error response.
    #[error("Provider {provider} error: {message}")]
    ProviderError { provider: String, message: String },

    /// Provider output did not match the expected shape.
    #[error("Provider {provider} returned malformed output: {message}")]
    ProviderMalformedOutput { provider: String, message: String },

    /// All candidate providers exhausted for one attempt. Triggers a job
    /// retry, not an immediate lead failure.
    #[error("AI generation failed across {} provider(s)", attempts.len())]
    AiGenerationFailed { attempts: Vec<ProviderAttempt> },

    /// Malformed campaign rule. Fails fast; retrying will not help.
    #[error("Scoring rule error: {0}")]
    ScoringRule(String),

    /// Terminal job failure after exhausting retries.
    #[error("Job {job_id} exhausted its retry attempts")]
    RetriesExhausted { job_id: Uuid },

    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("Lead not found: {0}")]
    LeadNotFound(Uuid),

    /// Result requested before the lead completed.
    #[error("Lead {0} has no result yet")]
    ResultNotReady(Uuid),

    /// A visible required question was left unanswered.
    #[error("Missing required answer for question '{0}'")]
    MissingAnswer(String),

    /// Attempted lead status transition the state machine does not allow.
    #[error("Invalid lead transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::lead::LeadStatus,
        to: crate::lead::LeadStatus,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Whether a job attempt that failed with this error should be retried.
    ///
    /// Scoring rule errors and validation failures are deterministic, so a
    /// retry cannot succeed. Provider and queue failures are transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::ScoringRule(_)
                | Error::MissingAnswer(_)
                | Error::CampaignNotFound(_)
                | Error::LeadNotFound(_)
                | Error::InvalidTransition { .. }
                | Error::Config(_)
        )
    }
}
