//! Persistence Boundary
//!
//! The engine reads and writes campaigns through `CampaignStore`; the
//! concrete database is an external collaborator behind this trait. An
//! in-memory implementation is provided for embedding and tests.

use crate::{Campaign, CampaignId, CustomerId, Result};
use dashmap::DashMap;

#[async_trait::async_trait]
pub trait CampaignStore: Send + Sync {
    async fn get(&self, id: &CampaignId) -> Result<Option<Campaign>>;
    async fn put(&self, campaign: Campaign) -> Result<()>;
    async fn customer_campaigns(&self, customer_id: &CustomerId) -> Result<Vec<Campaign>>;
    async fn remove(&self, id: &CampaignId) -> Result<()>;
}

/// DashMap-backed store keyed by campaign id.
#[derive(Default)]
pub struct InMemoryCampaignStore {
    campaigns: DashMap<CampaignId, Campaign>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}

#[async_trait::async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn get(&self, id: &CampaignId) -> Result<Option<Campaign>> {
        Ok(self.campaigns.get(id).map(|c| c.clone()))
    }

    async fn put(&self, campaign: Campaign) -> Result<()> {
        self.campaigns.insert(campaign.id.clone(), campaign);
        Ok(())
    }

    async fn customer_campaigns(&self, customer_id: &CustomerId) -> Result<Vec<Campaign>> {
        Ok(self
            .campaigns
            .iter()
            .filter(|c| &c.customer_id == customer_id)
            .map(|c| c.clone())
            .collect())
    }

    async fn remove(&self, id: &CampaignId) -> Result<()> {
        self.campaigns.remove(id);
        Ok(())
    }
}
