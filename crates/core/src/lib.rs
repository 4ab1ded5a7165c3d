//! Core types and traits for the lead processing pipeline
//!
//! This crate provides foundational types used across all other crates:
//! - Campaign configuration (questions, scoring rules, prompt template)
//! - Lead lifecycle types (status state machine, quality tiers)
//! - Storage traits for pluggable campaign/lead backends
//! - Error types

pub mod campaign;
pub mod error;
pub mod lead;
pub mod traits;

pub use campaign::{
    AccumulationPolicy, AnswerValue, Answers, Campaign, Predicate, PredicateOp, Question,
    QuestionKind, ScoringRule, ScoringRuleSet, VisibilityRule,
};
pub use error::{Error, ProviderAttempt, Result};
pub use lead::{Lead, LeadQuality, LeadStatus};
pub use traits::{CampaignStore, LeadStore};

use uuid::Uuid;

/// Identifier for a single campaign submission.
pub type LeadId = Uuid;

/// Identifier for a campaign configuration version.
pub type CampaignId = Uuid;
