//! Job queue
//!
//! Named, independently configured queues with:
//! - Bounded per-queue worker pools (fixed concurrency)
//! - At-least-once delivery with leased active jobs
//! - Exponential backoff with jitter on retry, terminal failure after
//!   `max_attempts`
//! - Pause/resume without dropping queued jobs
//! - A completion/failure event stream for downstream consumers
//!
//! Cross-queue ordering is not guaranteed; within one queue dispatch is
//! FIFO modulo priority and delay.

pub mod backoff;
pub mod job;
pub mod queue;

pub use backoff::retry_delay;
pub use job::{
    EnqueueOptions, Job, JobError, JobEvent, JobHandler, JobPayload, JobState, QueueStats,
};
pub use queue::JobQueue;

/// Canonical queue names, one per job kind.
pub mod names {
    pub const AI_PROCESSING: &str = "ai-processing";
    pub const EXPORT: &str = "export";
    pub const NOTIFICATION: &str = "notification";
    pub const ANALYTICS: &str = "analytics";

    pub const ALL: [&str; 4] = [AI_PROCESSING, EXPORT, NOTIFICATION, ANALYTICS];
}
