//! Redis-backed live query store
//!
//! Every mutation that touches more than one key runs as a single Lua script,
//! so the registry, the pending sets and the per-host index never disagree
//! from the point of view of another replica. Scripts build per-host key names
//! at runtime, which requires a single Redis primary rather than a cluster.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use livequery_model::{Campaign, CampaignId, CampaignName, HostId};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    CleanupReport, CleanupWatermark, LiveQueryStore, is_listed, normalize_hosts,
};
use crate::error::{LiveQueryError, LiveQueryResult};

/// Redis scripts for atomic operations
mod scripts {
    use once_cell::sync::Lazy;
    use redis::Script;

    /// KEYS: active set, sequence counter, campaign hash, pending set
    /// ARGV: prefix, name, sql, created_at, host ids...
    /// Returns the new creation sequence, or 0 when the name is active.
    pub static START: Lazy<Script> = Lazy::new(|| {
        Script::new(
            r#"
            local prefix = ARGV[1]
            local name = ARGV[2]

            if redis.call('SISMEMBER', KEYS[1], name) == 1 then
                return 0
            end

            local seq = redis.call('INCR', KEYS[2])

            -- Drop any inactive tombstone left by a previous incarnation
            redis.call('DEL', KEYS[3], KEYS[4])
            redis.call('HSET', KEYS[3],
                'sql', ARGV[3],
                'created_at', ARGV[4],
                'seq', seq,
                'active', 1,
                'targets', #ARGV - 4)

            for i = 5, #ARGV do
                redis.call('SADD', KEYS[4], ARGV[i])
                redis.call('SADD', prefix .. ':host:' .. ARGV[i], name)
            end

            redis.call('SADD', KEYS[1], name)
            return seq
            "#,
        )
    });

    /// KEYS: active set, campaign hash, pending set
    /// ARGV: prefix, name, max seq (-1 for none), retention seconds
    /// Returns 1 when evicted, 0 when not active, -1 when newer than max seq.
    pub static EVICT: Lazy<Script> = Lazy::new(|| {
        Script::new(
            r#"
            local prefix = ARGV[1]
            local name = ARGV[2]
            local max_seq = tonumber(ARGV[3])
            local retention = tonumber(ARGV[4])

            if redis.call('SISMEMBER', KEYS[1], name) == 0 then
                return 0
            end

            if max_seq >= 0 then
                local seq = tonumber(redis.call('HGET', KEYS[2], 'seq') or '0')
                if seq > max_seq then
                    return -1
                end
            end

            local hosts = redis.call('SMEMBERS', KEYS[3])
            for _, host in ipairs(hosts) do
                redis.call('SREM', prefix .. ':host:' .. host, name)
            end

            redis.call('DEL', KEYS[3])
            redis.call('SREM', KEYS[1], name)

            if retention > 0 then
                -- The pending set is gone; freeze its final size on the record
                redis.call('HSET', KEYS[2], 'active', 0, 'pending', #hosts)
                redis.call('EXPIRE', KEYS[2], retention)
            else
                redis.call('DEL', KEYS[2])
            end
            return 1
            "#,
        )
    });

    /// KEYS: pending set, host index set
    /// ARGV: name, host id
    pub static COMPLETE: Lazy<Script> = Lazy::new(|| {
        Script::new(
            r#"
            if redis.call('SREM', KEYS[1], ARGV[2]) == 0 then
                return 0
            end
            redis.call('SREM', KEYS[2], ARGV[1])
            return 1
            "#,
        )
    });

    /// KEYS: host index set
    /// ARGV: prefix, host id
    /// Returns a flat list of name, sql pairs.
    pub static LOOKUP: Lazy<Script> = Lazy::new(|| {
        Script::new(
            r#"
            local prefix = ARGV[1]
            local names = redis.call('SMEMBERS', KEYS[1])
            local out = {}

            for _, name in ipairs(names) do
                local sql = redis.call('HGET', prefix .. ':campaign:' .. name, 'sql')
                if sql and redis.call('SISMEMBER', prefix .. ':pending:' .. name, ARGV[2]) == 1 then
                    table.insert(out, name)
                    table.insert(out, sql)
                end
            end
            return out
            "#,
        )
    });
}

/// Key layout under a shared prefix.
#[derive(Debug, Clone)]
pub(crate) struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn active(&self) -> String {
        format!("{}:active", self.prefix)
    }

    pub(crate) fn seq(&self) -> String {
        format!("{}:seq", self.prefix)
    }

    pub(crate) fn campaign(&self, name: &str) -> String {
        format!("{}:campaign:{name}", self.prefix)
    }

    pub(crate) fn pending(&self, name: &str) -> String {
        format!("{}:pending:{name}", self.prefix)
    }

    pub(crate) fn host(&self, host_id: HostId) -> String {
        format!("{}:host:{host_id}", self.prefix)
    }
}

/// Tunables for [`RedisLiveQueryStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreOptions {
    /// Namespace for every key the store writes.
    pub key_prefix: String,
    /// How long a stopped campaign's registry record survives as an inactive
    /// tombstone. Zero deletes it immediately.
    pub inactive_retention: Duration,
}

impl Default for RedisStoreOptions {
    fn default() -> Self {
        Self {
            key_prefix: "livequery".to_string(),
            inactive_retention: Duration::from_secs(600),
        }
    }
}

/// Live query store shared by every server replica through Redis.
#[derive(Clone)]
pub struct RedisLiveQueryStore {
    conn: ConnectionManager,
    keys: StoreKeys,
    inactive_retention: Duration,
}

impl fmt::Debug for RedisLiveQueryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLiveQueryStore")
            .field("connection", &"ConnectionManager")
            .field("key_prefix", &self.keys.prefix())
            .field("inactive_retention", &self.inactive_retention)
            .finish()
    }
}

impl RedisLiveQueryStore {
    pub async fn connect(
        redis_url: &str,
        options: RedisStoreOptions,
    ) -> LiveQueryResult<Self> {
        info!(prefix = %options.key_prefix, "connecting live query store to Redis");

        let client = redis::Client::open(redis_url)
            .context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;

        Ok(Self::from_connection(conn, options))
    }

    pub fn from_connection(
        conn: ConnectionManager,
        options: RedisStoreOptions,
    ) -> Self {
        Self {
            conn,
            keys: StoreKeys::new(options.key_prefix),
            inactive_retention: options.inactive_retention,
        }
    }

    /// Cleanup pass body. `after_evict` runs once per completed eviction.
    async fn sweep(
        &self,
        cancel: &CancellationToken,
        active: &HashSet<CampaignId>,
        watermark: CleanupWatermark,
        mut after_evict: impl FnMut(&str) + Send,
    ) -> LiveQueryResult<CleanupReport> {
        let mut names = self.active_campaign_names().await?;
        names.sort();

        let mut report = CleanupReport {
            examined: names.len(),
            ..CleanupReport::default()
        };

        for name in names {
            if is_listed(&name, active) {
                report.retained += 1;
                continue;
            }
            if cancel.is_cancelled() {
                warn!(
                    evicted = report.evicted.len(),
                    "cleanup cancelled before finishing"
                );
                return Err(LiveQueryError::Cancelled {
                    evicted: report.evicted.len(),
                });
            }

            match self.evict(&name, Some(watermark.0)).await? {
                EvictOutcome::Evicted => {
                    info!(campaign = %name, "evicted inactive live query campaign");
                    after_evict(&name);
                    report.evicted.push(name);
                }
                EvictOutcome::TooRecent => report.skipped_recent += 1,
                // Stopped by someone else since we listed it.
                EvictOutcome::NotActive => {}
            }
        }

        Ok(report)
    }

    /// Run the eviction script. `max_seq` of `None` evicts regardless of age.
    async fn evict(
        &self,
        name: &str,
        max_seq: Option<u64>,
    ) -> LiveQueryResult<EvictOutcome> {
        let mut conn = self.conn.clone();
        let max_seq = max_seq
            .map(|seq| i64::try_from(seq).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let outcome: i64 = scripts::EVICT
            .key(self.keys.active())
            .key(self.keys.campaign(name))
            .key(self.keys.pending(name))
            .arg(self.keys.prefix())
            .arg(name)
            .arg(max_seq)
            .arg(self.inactive_retention.as_secs())
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("evict script failed for campaign {name}"))?;

        match outcome {
            1 => Ok(EvictOutcome::Evicted),
            0 => Ok(EvictOutcome::NotActive),
            -1 => Ok(EvictOutcome::TooRecent),
            other => Err(anyhow!("evict script returned unexpected {other}").into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvictOutcome {
    Evicted,
    NotActive,
    TooRecent,
}

#[async_trait]
impl LiveQueryStore for RedisLiveQueryStore {
    async fn start_campaign(
        &self,
        name: &CampaignName,
        sql: &str,
        host_ids: &[HostId],
    ) -> LiveQueryResult<()> {
        let hosts = normalize_hosts(host_ids)?;
        let mut conn = self.conn.clone();

        let mut invocation = scripts::START.prepare_invoke();
        invocation
            .key(self.keys.active())
            .key(self.keys.seq())
            .key(self.keys.campaign(name.as_str()))
            .key(self.keys.pending(name.as_str()))
            .arg(self.keys.prefix())
            .arg(name.as_str())
            .arg(sql)
            .arg(Utc::now().to_rfc3339());
        for host_id in &hosts {
            invocation.arg(host_id.get());
        }

        let seq: u64 = invocation
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("start script failed for campaign {name}"))?;

        if seq == 0 {
            return Err(LiveQueryError::already_exists(name.as_str()));
        }

        info!(campaign = %name, seq, targets = hosts.len(), "live query campaign started");
        Ok(())
    }

    async fn stop_campaign(&self, name: &str) -> LiveQueryResult<()> {
        match self.evict(name, None).await? {
            EvictOutcome::Evicted => {
                info!(campaign = name, "live query campaign stopped");
                Ok(())
            }
            _ => Err(LiveQueryError::campaign_not_found(name)),
        }
    }

    async fn queries_for_host(
        &self,
        host_id: HostId,
    ) -> LiveQueryResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();

        let flat: Vec<String> = scripts::LOOKUP
            .key(self.keys.host(host_id))
            .arg(self.keys.prefix())
            .arg(host_id.get())
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("lookup script failed for host {host_id}"))?;

        if flat.len() % 2 != 0 {
            return Err(anyhow!(
                "lookup for host {host_id} returned an odd number of fields"
            )
            .into());
        }

        let mut queries = HashMap::with_capacity(flat.len() / 2);
        let mut fields = flat.into_iter();
        while let (Some(name), Some(sql)) = (fields.next(), fields.next()) {
            queries.insert(name, sql);
        }

        debug!(host = %host_id, count = queries.len(), "queries for host");
        Ok(queries)
    }

    async fn complete_for_host(
        &self,
        name: &str,
        host_id: HostId,
    ) -> LiveQueryResult<()> {
        let mut conn = self.conn.clone();

        let removed: i64 = scripts::COMPLETE
            .key(self.keys.pending(name))
            .key(self.keys.host(host_id))
            .arg(name)
            .arg(host_id.get())
            .invoke_async(&mut conn)
            .await
            .with_context(|| {
                format!("complete script failed for campaign {name} host {host_id}")
            })?;

        if removed == 0 {
            return Err(LiveQueryError::delivery_not_found(name, host_id));
        }

        debug!(campaign = name, host = %host_id, "query completed by host");
        Ok(())
    }

    async fn cleanup_watermark(&self) -> LiveQueryResult<CleanupWatermark> {
        let mut conn = self.conn.clone();
        let seq: Option<u64> = conn
            .get(self.keys.seq())
            .await
            .context("Failed to read campaign sequence")?;
        Ok(CleanupWatermark(seq.unwrap_or(0)))
    }

    async fn cleanup_inactive_before(
        &self,
        cancel: &CancellationToken,
        active: &HashSet<CampaignId>,
        watermark: CleanupWatermark,
    ) -> LiveQueryResult<CleanupReport> {
        self.sweep(cancel, active, watermark, |_| {}).await
    }

    async fn campaign(&self, name: &str) -> LiveQueryResult<Option<Campaign>> {
        let mut conn = self.conn.clone();

        let (fields, pending): (HashMap<String, String>, usize) = redis::pipe()
            .atomic()
            .hgetall(self.keys.campaign(name))
            .scard(self.keys.pending(name))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Failed to load campaign {name}"))?;

        if fields.is_empty() {
            return Ok(None);
        }

        parse_campaign(name, &fields, Some(pending)).map(Some)
    }

    async fn pending_hosts(
        &self,
        name: &str,
    ) -> LiveQueryResult<Option<BTreeSet<HostId>>> {
        let mut conn = self.conn.clone();

        let (is_active, members): (bool, Vec<u64>) = redis::pipe()
            .atomic()
            .sismember(self.keys.active(), name)
            .smembers(self.keys.pending(name))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Failed to load pending hosts of {name}"))?;

        if !is_active {
            return Ok(None);
        }
        Ok(Some(members.into_iter().map(HostId).collect()))
    }

    async fn active_campaign_names(&self) -> LiveQueryResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = conn
            .smembers(self.keys.active())
            .await
            .context("Failed to list active campaigns")?;
        names.sort();
        Ok(names)
    }

    async fn ping(&self) -> LiveQueryResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("Redis PING failed")?;
        Ok(())
    }
}

/// `live_pending` is the size of the pending set read alongside the hash.
/// Inactive records no longer have a pending set and carry the count frozen
/// at eviction instead.
fn parse_campaign(
    name: &str,
    fields: &HashMap<String, String>,
    live_pending: Option<usize>,
) -> LiveQueryResult<Campaign> {
    let field = |key: &str| {
        fields.get(key).ok_or_else(|| {
            LiveQueryError::from(anyhow!("campaign {name} is missing field '{key}'"))
        })
    };

    let created_at = DateTime::parse_from_rfc3339(field("created_at")?)
        .with_context(|| format!("campaign {name} has an invalid created_at"))?
        .with_timezone(&Utc);
    let target_count = field("targets")?
        .parse::<usize>()
        .with_context(|| format!("campaign {name} has an invalid target count"))?;
    let active = field("active")? == "1";

    let pending_count = match (active, fields.get("pending")) {
        (false, Some(frozen)) => frozen
            .parse::<usize>()
            .with_context(|| format!("campaign {name} has an invalid pending count"))?,
        _ => live_pending.unwrap_or(0),
    };

    Ok(Campaign {
        name: name.to_string(),
        sql: field("sql")?.clone(),
        created_at,
        active,
        target_count,
        pending_count,
    })
}
