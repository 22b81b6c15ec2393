//! System-of-record port
//!
//! The reconciler asks an [`ActiveCampaignSource`] which campaigns the durable
//! system of record still considers running. Anything the store holds beyond
//! that set was abandoned without an explicit stop.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use livequery_model::CampaignId;

use crate::error::LiveQueryResult;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::{DEFAULT_ACTIVE_CAMPAIGNS_QUERY, PostgresCampaignSource};

/// Supplies a fresh snapshot of active campaign ids on every call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActiveCampaignSource: Send + Sync + fmt::Debug {
    async fn active_campaign_ids(&self) -> LiveQueryResult<HashSet<CampaignId>>;
}

/// Fixed snapshot, for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCampaignSource {
    ids: HashSet<CampaignId>,
}

impl StaticCampaignSource {
    pub fn new(ids: impl IntoIterator<Item = CampaignId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ActiveCampaignSource for StaticCampaignSource {
    async fn active_campaign_ids(&self) -> LiveQueryResult<HashSet<CampaignId>> {
        Ok(self.ids.clone())
    }
}
