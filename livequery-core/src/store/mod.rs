//! Live-query distribution store
//!
//! A campaign is a named SQL query broadcast to a set of target hosts. The
//! store keeps three views of the same state in step with each other:
//!
//! - the campaign registry (name → SQL, creation time, activity),
//! - one pending delivery record per (campaign, host) that has not reported
//!   completion,
//! - a per-host index (host → campaign names) so a device check-in costs time
//!   proportional to the campaigns targeting that device, not the fleet.
//!
//! Two backends implement [`LiveQueryStore`]: [`RedisLiveQueryStore`] for
//! horizontally scaled deployments and [`MemoryLiveQueryStore`] for
//! single-process runs and tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use livequery_model::{Campaign, CampaignId, CampaignName, HostId};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{LiveQueryError, LiveQueryResult};

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryLiveQueryStore;
#[cfg(feature = "redis")]
pub use self::redis::{RedisLiveQueryStore, RedisStoreOptions};

/// Creation-sequence mark taken at the start of a cleanup pass.
///
/// Every campaign started after the mark was taken carries a larger sequence
/// number and is left alone by the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CleanupWatermark(pub u64);

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Active campaigns considered by the pass.
    pub examined: usize,
    /// Names evicted because the system of record no longer lists them.
    pub evicted: Vec<String>,
    /// Campaigns kept because they are still listed as active.
    pub retained: usize,
    /// Campaigns kept because they were started after the pass began.
    pub skipped_recent: usize,
}

/// Storage backend for live query campaigns.
///
/// Every method is safe to call concurrently from any number of tasks and,
/// for shared backends, from any number of processes.
#[async_trait]
pub trait LiveQueryStore: Send + Sync + fmt::Debug {
    /// Admit a campaign and create one pending delivery per distinct host.
    ///
    /// Fails with [`LiveQueryError::AlreadyExists`] while a campaign with the
    /// same name is active, and with [`LiveQueryError::InvalidInput`] when
    /// `host_ids` is empty.
    async fn start_campaign(
        &self,
        name: &CampaignName,
        sql: &str,
        host_ids: &[HostId],
    ) -> LiveQueryResult<()>;

    /// Deactivate a campaign and drop all of its pending deliveries.
    ///
    /// Unknown or already stopped campaigns yield [`LiveQueryError::NotFound`].
    async fn stop_campaign(&self, name: &str) -> LiveQueryResult<()>;

    /// Map of campaign name to SQL for every delivery still pending for
    /// `host_id`. Empty when nothing is pending.
    async fn queries_for_host(
        &self,
        host_id: HostId,
    ) -> LiveQueryResult<HashMap<String, String>>;

    /// Record that `host_id` finished `name`.
    ///
    /// Repeats, non-target hosts and vanished campaigns yield
    /// [`LiveQueryError::NotFound`]. The campaign stays active even when this
    /// was its last pending host.
    async fn complete_for_host(
        &self,
        name: &str,
        host_id: HostId,
    ) -> LiveQueryResult<()>;

    /// Current creation-sequence mark; see [`CleanupWatermark`].
    async fn cleanup_watermark(&self) -> LiveQueryResult<CleanupWatermark>;

    /// Evict every campaign created at or before `watermark` whose id is not
    /// in `active`. Each eviction is atomic; when `cancel` fires between
    /// evictions the pass stops with [`LiveQueryError::Cancelled`].
    async fn cleanup_inactive_before(
        &self,
        cancel: &CancellationToken,
        active: &HashSet<CampaignId>,
        watermark: CleanupWatermark,
    ) -> LiveQueryResult<CleanupReport>;

    /// Evict every campaign whose id is not in `active`, ignoring campaigns
    /// started after this call began.
    async fn cleanup_inactive(
        &self,
        cancel: &CancellationToken,
        active: &HashSet<CampaignId>,
    ) -> LiveQueryResult<CleanupReport> {
        let watermark = self.cleanup_watermark().await?;
        self.cleanup_inactive_before(cancel, active, watermark).await
    }

    /// Registry record for `name`, including inactive records the backend
    /// still retains.
    async fn campaign(&self, name: &str) -> LiveQueryResult<Option<Campaign>>;

    /// Hosts that still owe a completion for an active campaign.
    async fn pending_hosts(
        &self,
        name: &str,
    ) -> LiveQueryResult<Option<BTreeSet<HostId>>>;

    /// Names of all active campaigns, sorted.
    async fn active_campaign_names(&self) -> LiveQueryResult<Vec<String>>;

    /// Cheap round trip used to verify the backend at startup.
    async fn ping(&self) -> LiveQueryResult<()>;
}

/// De-duplicate and validate a target list.
pub(crate) fn normalize_hosts(
    host_ids: &[HostId],
) -> LiveQueryResult<BTreeSet<HostId>> {
    let hosts: BTreeSet<HostId> = host_ids.iter().copied().collect();
    if hosts.is_empty() {
        return Err(LiveQueryError::InvalidInput(
            "a campaign needs at least one target host".to_string(),
        ));
    }
    Ok(hosts)
}

/// Whether a held campaign is still listed by the system of record.
pub(crate) fn is_listed(name: &str, active: &HashSet<CampaignId>) -> bool {
    CampaignId::from_name(name).is_some_and(|id| active.contains(&id))
}
