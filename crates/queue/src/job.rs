//! Job types and the worker handler contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use leadpipe_core::LeadId;

use crate::names;

/// Identifier for one queued unit of work.
pub type JobId = Uuid;

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    /// Terminal; attempts exhausted or a non-retryable failure
    Failed,
    /// Scheduled for a later run (initial delay or retry backoff)
    Delayed,
}

/// Kind-specific payload, discriminated per queue. Validated against the
/// queue name at enqueue time so a payload can never land on the wrong
/// queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    AiProcessing { lead_id: LeadId },
    Export { lead_id: LeadId },
    Notification { lead_id: LeadId },
    Analytics { lead_id: LeadId },
}

impl JobPayload {
    /// The only queue this payload kind is valid on.
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobPayload::AiProcessing { .. } => names::AI_PROCESSING,
            JobPayload::Export { .. } => names::EXPORT,
            JobPayload::Notification { .. } => names::NOTIFICATION,
            JobPayload::Analytics { .. } => names::ANALYTICS,
        }
    }

    pub fn lead_id(&self) -> LeadId {
        match self {
            JobPayload::AiProcessing { lead_id }
            | JobPayload::Export { lead_id }
            | JobPayload::Notification { lead_id }
            | JobPayload::Analytics { lead_id } => *lead_id,
        }
    }
}

/// One unit of queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: JobPayload,
    pub state: JobState,
    /// Attempts started so far; never exceeds `max_attempts`
    pub attempts: u32,
    pub max_attempts: u32,
    /// Higher dispatches first within a queue
    pub priority: u8,
    /// Earliest dispatch time while `Delayed`
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Lease deadline while `Active`; an expired lease returns the job to
    /// the retry path
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Monotonic enqueue sequence, used for FIFO tie-breaking
    pub(crate) seq: u64,
}

/// Options accepted at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Initial dispatch delay
    pub delay: Option<std::time::Duration>,
    /// Override the queue's configured max attempts
    pub max_attempts: Option<u32>,
    pub priority: u8,
}

/// Non-blocking snapshot of one queue's job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

/// Worker failure, carrying the retry decision.
///
/// Attempt counting and backoff stay a first-class data path: handlers
/// return this instead of driving control flow through panics.
#[derive(Debug, Clone)]
pub struct JobError {
    pub message: String,
    pub retryable: bool,
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<leadpipe_core::Error> for JobError {
    fn from(err: leadpipe_core::Error) -> Self {
        Self {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Processes jobs for one queue. Exactly one worker owns a job while it is
/// active.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

/// Published on the queue's event channel after every finished attempt that
/// settles a job.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Completed { job: Job },
    Failed { job: Job, terminal: bool },
}
