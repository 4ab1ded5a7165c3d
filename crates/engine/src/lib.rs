//! Lead processing engine
//!
//! Ties submission, scoring, AI generation and result delivery together
//! exactly once per lead:
//! - `Coordinator`: the lifecycle state machine and the API the surrounding
//!   framework calls (submit, status, result, reprocess, operational resets)
//! - In-memory `CampaignStore`/`LeadStore` implementations backed by
//!   concurrent maps
//!
//! The coordinator owns the per-lead "at most one active AI job" invariant
//! via an atomic check-and-insert marker, never a lock held across a
//! provider call.

pub mod coordinator;
pub mod store;

pub use coordinator::{Coordinator, LeadStatusView};
pub use store::{MemoryCampaignStore, MemoryLeadStore};
