//! Storage traits
//!
//! The pipeline treats campaign and lead persistence as opaque external
//! collaborators with at-least read-your-writes consistency. In-memory
//! implementations live in `leadpipe-engine`; production deployments plug in
//! their own stores.

use async_trait::async_trait;

use crate::campaign::Campaign;
use crate::error::Result;
use crate::lead::Lead;
use crate::{CampaignId, LeadId};

/// Read-only campaign lookup, keyed by id or slug.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn get(&self, id: CampaignId) -> Result<Campaign>;

    async fn get_by_slug(&self, slug: &str) -> Result<Campaign>;
}

/// Durable lead record store.
///
/// Leads are created on submission and mutated only by the coordinator and
/// queue workers; the core never deletes them.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn insert(&self, lead: Lead) -> Result<()>;

    async fn get(&self, id: LeadId) -> Result<Lead>;

    /// Replace the stored record. Callers read-modify-write whole leads;
    /// per-lead write serialization is the coordinator's job.
    async fn update(&self, lead: Lead) -> Result<()>;
}
