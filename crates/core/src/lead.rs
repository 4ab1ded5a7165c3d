//! Lead lifecycle types
//!
//! A lead is one campaign submission plus its derived score and AI result.
//! Status follows a strict state machine; the coordinator is the only
//! component that advances it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::Answers;
use crate::{CampaignId, LeadId};

/// Coarse qualification bucket derived from the lead score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadQuality {
    /// High intent, ready to act
    Hot,
    /// Showing interest, gathering information
    Warm,
    /// Just exploring, low intent
    Cold,
    Unqualified,
}

impl LeadQuality {
    /// Default banding applied when no scoring rule set the tier explicitly.
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => LeadQuality::Hot,
            60..=79 => LeadQuality::Warm,
            40..=59 => LeadQuality::Cold,
            _ => LeadQuality::Unqualified,
        }
    }
}

/// Lead processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Submitted,
    Scoring,
    QueuedForAi,
    AiProcessing,
    Completed,
    /// Attempt failed; a retry is pending
    Failed,
    /// Retries exhausted or deterministic failure; requires manual reprocess
    FailedPermanent,
}

impl LeadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStatus::Completed | LeadStatus::FailedPermanent)
    }

    /// Allowed state-machine transitions. `FailedPermanent -> Scoring` is
    /// the manual reprocess path.
    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        use LeadStatus::*;
        matches!(
            (self, next),
            (Submitted, Scoring)
                | (Scoring, QueuedForAi)
                | (Scoring, FailedPermanent)
                | (QueuedForAi, AiProcessing)
                | (QueuedForAi, Failed)
                | (QueuedForAi, FailedPermanent)
                | (AiProcessing, Completed)
                | (AiProcessing, QueuedForAi)
                | (AiProcessing, Failed)
                | (AiProcessing, FailedPermanent)
                | (Failed, QueuedForAi)
                | (Failed, AiProcessing)
                | (Failed, FailedPermanent)
                | (FailedPermanent, Scoring)
                | (Completed, Scoring)
        )
    }
}

/// One campaign submission instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub campaign_id: CampaignId,
    pub answers: Answers,
    pub status: LeadStatus,
    /// 0..=100, set during scoring
    pub lead_score: Option<u8>,
    pub lead_quality: Option<LeadQuality>,
    /// Generated assessment text, set on completion
    pub ai_result: Option<String>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(campaign_id: CampaignId, answers: Answers) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            campaign_id,
            answers,
            status: LeadStatus::Submitted,
            lead_score: None,
            lead_quality: None,
            ai_result: None,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
