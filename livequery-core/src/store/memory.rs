use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use livequery_model::{Campaign, CampaignId, CampaignName, HostId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    CleanupReport, CleanupWatermark, LiveQueryStore, is_listed, normalize_hosts,
};
use crate::error::{LiveQueryError, LiveQueryResult};

#[derive(Debug)]
struct CampaignEntry {
    sql: Arc<str>,
    created_at: DateTime<Utc>,
    seq: u64,
    target_count: usize,
    pending: HashSet<HostId>,
}

/// Process-local store backed by sharded concurrent maps.
///
/// Lock order is always campaign shard before host shard. Host index entries
/// carry the creation sequence of the campaign that wrote them, so a stop that
/// races with a restart under the same name never unindexes the newcomer.
/// State is not shared between processes; multi-replica deployments use
/// [`super::RedisLiveQueryStore`].
#[derive(Debug, Default)]
pub struct MemoryLiveQueryStore {
    campaigns: DashMap<String, CampaignEntry>,
    hosts: DashMap<HostId, HashMap<String, u64>>,
    seq: AtomicU64,
}

impl MemoryLiveQueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn unindex(&self, host_id: HostId, name: &str, seq: u64) {
        let now_empty = match self.hosts.get_mut(&host_id) {
            Some(mut names) => {
                if names.get(name) == Some(&seq) {
                    names.remove(name);
                }
                names.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.hosts.remove_if(&host_id, |_, names| names.is_empty());
        }
    }

    /// Remove a campaign and its index entries. `max_seq` limits removal to
    /// campaigns created at or before that sequence.
    fn evict(&self, name: &str, max_seq: Option<u64>) -> Option<CampaignEntry> {
        let (name, entry) = self.campaigns.remove_if(name, |_, entry| {
            max_seq.is_none_or(|max| entry.seq <= max)
        })?;
        for host_id in &entry.pending {
            self.unindex(*host_id, &name, entry.seq);
        }
        Some(entry)
    }

    /// Cleanup pass body. `after_evict` runs once per completed eviction.
    fn sweep(
        &self,
        cancel: &CancellationToken,
        active: &HashSet<CampaignId>,
        watermark: CleanupWatermark,
        mut after_evict: impl FnMut(&str),
    ) -> LiveQueryResult<CleanupReport> {
        // Snapshot first; evicting while iterating would deadlock on the shard.
        let held: Vec<(String, u64)> = self
            .campaigns
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().seq))
            .collect();

        let mut report = CleanupReport {
            examined: held.len(),
            ..CleanupReport::default()
        };

        for (name, seq) in held {
            if is_listed(&name, active) {
                report.retained += 1;
                continue;
            }
            if seq > watermark.0 {
                report.skipped_recent += 1;
                continue;
            }
            if cancel.is_cancelled() {
                return Err(LiveQueryError::Cancelled {
                    evicted: report.evicted.len(),
                });
            }
            if self.evict(&name, Some(watermark.0)).is_some() {
                info!(campaign = %name, "evicted inactive live query campaign");
                after_evict(&name);
                report.evicted.push(name);
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl LiveQueryStore for MemoryLiveQueryStore {
    async fn start_campaign(
        &self,
        name: &CampaignName,
        sql: &str,
        host_ids: &[HostId],
    ) -> LiveQueryResult<()> {
        let hosts = normalize_hosts(host_ids)?;

        match self.campaigns.entry(name.as_str().to_string()) {
            Entry::Occupied(_) => Err(LiveQueryError::already_exists(name.as_str())),
            Entry::Vacant(slot) => {
                let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
                for host_id in &hosts {
                    self.hosts
                        .entry(*host_id)
                        .or_default()
                        .insert(name.as_str().to_string(), seq);
                }
                slot.insert(CampaignEntry {
                    sql: Arc::from(sql),
                    created_at: Utc::now(),
                    seq,
                    target_count: hosts.len(),
                    pending: hosts.into_iter().collect(),
                });
                info!(campaign = %name, seq, "live query campaign started");
                Ok(())
            }
        }
    }

    async fn stop_campaign(&self, name: &str) -> LiveQueryResult<()> {
        match self.evict(name, None) {
            Some(entry) => {
                info!(
                    campaign = name,
                    pending = entry.pending.len(),
                    "live query campaign stopped"
                );
                Ok(())
            }
            None => Err(LiveQueryError::campaign_not_found(name)),
        }
    }

    async fn queries_for_host(
        &self,
        host_id: HostId,
    ) -> LiveQueryResult<HashMap<String, String>> {
        let indexed: Vec<(String, u64)> = match self.hosts.get(&host_id) {
            Some(names) => names
                .iter()
                .map(|(name, seq)| (name.clone(), *seq))
                .collect(),
            None => return Ok(HashMap::new()),
        };

        let mut queries = HashMap::with_capacity(indexed.len());
        for (name, seq) in indexed {
            if let Some(entry) = self.campaigns.get(&name)
                && entry.seq == seq
                && entry.pending.contains(&host_id)
            {
                queries.insert(name, entry.sql.to_string());
            }
        }

        debug!(host = %host_id, count = queries.len(), "queries for host");
        Ok(queries)
    }

    async fn complete_for_host(
        &self,
        name: &str,
        host_id: HostId,
    ) -> LiveQueryResult<()> {
        let Some(mut entry) = self.campaigns.get_mut(name) else {
            return Err(LiveQueryError::delivery_not_found(name, host_id));
        };
        if !entry.pending.remove(&host_id) {
            return Err(LiveQueryError::delivery_not_found(name, host_id));
        }
        let seq = entry.seq;
        let remaining = entry.pending.len();
        self.unindex(host_id, name, seq);
        drop(entry);

        debug!(campaign = name, host = %host_id, remaining, "query completed by host");
        Ok(())
    }

    async fn cleanup_watermark(&self) -> LiveQueryResult<CleanupWatermark> {
        Ok(CleanupWatermark(self.seq.load(Ordering::SeqCst)))
    }

    async fn cleanup_inactive_before(
        &self,
        cancel: &CancellationToken,
        active: &HashSet<CampaignId>,
        watermark: CleanupWatermark,
    ) -> LiveQueryResult<CleanupReport> {
        self.sweep(cancel, active, watermark, |_| {})
    }

    async fn campaign(&self, name: &str) -> LiveQueryResult<Option<Campaign>> {
        Ok(self.campaigns.get(name).map(|entry| Campaign {
            name: name.to_string(),
            sql: entry.sql.to_string(),
            created_at: entry.created_at,
            active: true,
            target_count: entry.target_count,
            pending_count: entry.pending.len(),
        }))
    }

    async fn pending_hosts(
        &self,
        name: &str,
    ) -> LiveQueryResult<Option<BTreeSet<HostId>>> {
        Ok(self
            .campaigns
            .get(name)
            .map(|entry| entry.pending.iter().copied().collect()))
    }

    async fn active_campaign_names(&self) -> LiveQueryResult<Vec<String>> {
        let mut names: Vec<String> =
            self.campaigns.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn ping(&self) -> LiveQueryResult<()> {
        Ok(())
    }
}
