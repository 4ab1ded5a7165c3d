//! In-memory store implementations.
//!
//! Concurrent-map backed stands-ins for the external record stores. They
//! satisfy the read-your-writes expectation trivially and keep the engine
//! testable without infrastructure.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use leadpipe_core::{
    Campaign, CampaignId, CampaignStore, Error, Lead, LeadId, LeadStore, Result,
};

/// Campaigns keyed by id, with slug lookup.
#[derive(Default)]
pub struct MemoryCampaignStore {
    campaigns: DashMap<CampaignId, Campaign>,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, campaign: Campaign) {
        self.campaigns.insert(campaign.id, campaign);
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn get(&self, id: CampaignId) -> Result<Campaign> {
        self.campaigns
            .get(&id)
            .map(|c| c.clone())
            .ok_or_else(|| Error::CampaignNotFound(id.to_string()))
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Campaign> {
        self.campaigns
            .iter()
            .find(|c| c.slug == slug)
            .map(|c| c.clone())
            .ok_or_else(|| Error::CampaignNotFound(slug.to_string()))
    }
}

/// Lead records keyed by id.
#[derive(Default)]
pub struct MemoryLeadStore {
    leads: DashMap<LeadId, Lead>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn insert(&self, lead: Lead) -> Result<()> {
        self.leads.insert(lead.id, lead);
        Ok(())
    }

    async fn get(&self, id: LeadId) -> Result<Lead> {
        self.leads
            .get(&id)
            .map(|l| l.clone())
            .ok_or(Error::LeadNotFound(id))
    }

    async fn update(&self, mut lead: Lead) -> Result<()> {
        if !self.leads.contains_key(&lead.id) {
            return Err(Error::LeadNotFound(lead.id));
        }
        lead.updated_at = Utc::now();
        self.leads.insert(lead.id, lead);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadpipe_core::{Answers, ScoringRuleSet};
    use uuid::Uuid;

    fn campaign(slug: &str) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            questions: vec![],
            scoring: ScoringRuleSet::default(),
            prompt_template: String::new(),
        }
    }

    #[tokio::test]
    async fn test_campaign_lookup_by_id_and_slug() {
        let store = MemoryCampaignStore::new();
        let c = campaign("quiz-2026");
        let id = c.id;
        store.insert(c);

        assert_eq!(store.get(id).await.unwrap().slug, "quiz-2026");
        assert_eq!(store.get_by_slug("quiz-2026").await.unwrap().id, id);
        assert!(matches!(
            store.get_by_slug("missing").await,
            Err(Error::CampaignNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lead_update_requires_existing_record() {
        let store = MemoryLeadStore::new();
        let lead = Lead::new(Uuid::new_v4(), Answers::new());
        assert!(matches!(
            store.update(lead.clone()).await,
            Err(Error::LeadNotFound(_))
        ));
        store.insert(lead.clone()).await.unwrap();
        assert!(store.update(lead).await.is_ok());
    }
}
