use std::collections::HashSet;
use std::fmt;

use anyhow::Context;
use async_trait::async_trait;
use livequery_model::CampaignId;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, warn};

use super::ActiveCampaignSource;
use crate::error::LiveQueryResult;

/// Campaigns whose status is anything but completed (2).
pub const DEFAULT_ACTIVE_CAMPAIGNS_QUERY: &str =
    "SELECT id FROM distributed_query_campaigns WHERE status <> 2";

/// Reads active campaign ids from the Postgres system of record.
///
/// The query must return a single `BIGINT` column.
#[derive(Clone)]
pub struct PostgresCampaignSource {
    pool: PgPool,
    query: String,
}

impl fmt::Debug for PostgresCampaignSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresCampaignSource")
            .field("pool_size", &self.pool.size())
            .field("query", &self.query)
            .finish()
    }
}

impl PostgresCampaignSource {
    pub async fn connect(
        database_url: &str,
        query: impl Into<String>,
    ) -> LiveQueryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .context("Failed to connect to the campaign database")?;
        Ok(Self::from_pool(pool, query))
    }

    pub fn from_pool(pool: PgPool, query: impl Into<String>) -> Self {
        Self {
            pool,
            query: query.into(),
        }
    }
}

#[async_trait]
impl ActiveCampaignSource for PostgresCampaignSource {
    async fn active_campaign_ids(&self) -> LiveQueryResult<HashSet<CampaignId>> {
        let rows: Vec<i64> = sqlx::query_scalar(&self.query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load active campaign ids")?;

        let mut ids = HashSet::with_capacity(rows.len());
        for raw in rows {
            match u64::try_from(raw) {
                Ok(id) => {
                    ids.insert(CampaignId(id));
                }
                Err(_) => warn!(id = raw, "ignoring negative campaign id"),
            }
        }

        debug!(count = ids.len(), "loaded active campaign snapshot");
        Ok(ids)
    }
}
