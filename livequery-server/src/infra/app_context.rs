use std::{fmt, sync::Arc};

use anyhow::Context;
use livequery_config::{Config, StoreBackend};
use livequery_core::source::PostgresCampaignSource;
use livequery_core::store::RedisLiveQueryStore;
use livequery_core::{
    ActiveCampaignSource, LiveQueryStore, MemoryLiveQueryStore, Reconciler,
};
use tracing::info;

/// Everything a replica needs, wired from configuration.
#[derive(Clone)]
pub struct AppContext {
    config: Arc<Config>,
    store: Arc<dyn LiveQueryStore>,
    source: Option<Arc<dyn ActiveCampaignSource>>,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("backend", &self.config.store.backend)
            .field("store", &self.store)
            .field("reconciler", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn LiveQueryStore>,
        source: Option<Arc<dyn ActiveCampaignSource>>,
    ) -> Self {
        Self {
            config,
            store,
            source,
        }
    }

    /// Connect the configured store and, when the reconciler is enabled, the
    /// campaign system of record.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let store = connect_pinged_store(&config).await?;

        let source: Option<Arc<dyn ActiveCampaignSource>> =
            if config.reconciler.enabled {
                let url = config.database.url.as_deref().context(
                    "reconciler enabled without a campaign database URL",
                )?;
                let source = PostgresCampaignSource::connect(
                    url,
                    config.reconciler.active_query.clone(),
                )
                .await
                .context("failed to connect to the campaign database")?;
                Some(Arc::new(source))
            } else {
                None
            };

        Ok(Self::new(Arc::new(config), store, source))
    }

    /// Connect only the store. Diagnostics read the store and never need the
    /// campaign database, so its availability must not gate them.
    pub async fn connect_store_only(config: Config) -> anyhow::Result<Self> {
        let store = connect_pinged_store(&config).await?;
        Ok(Self::new(Arc::new(config), store, None))
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    pub fn store(&self) -> Arc<dyn LiveQueryStore> {
        Arc::clone(&self.store)
    }

    /// `None` when the reconciler is disabled.
    pub fn reconciler(&self) -> Option<Reconciler> {
        self.source.as_ref().map(|source| {
            Reconciler::new(
                self.store(),
                Arc::clone(source),
                self.config.reconciler.settings(),
            )
        })
    }
}

async fn connect_pinged_store(
    config: &Config,
) -> anyhow::Result<Arc<dyn LiveQueryStore>> {
    let store = connect_store(config).await?;
    store
        .ping()
        .await
        .context("live query store did not answer ping")?;
    Ok(store)
}

pub async fn connect_store(
    config: &Config,
) -> anyhow::Result<Arc<dyn LiveQueryStore>> {
    match config.store.backend {
        StoreBackend::Redis => {
            let (url, options) = config
                .redis_store_options()
                .context("redis backend selected without a Redis URL")?;
            let store = RedisLiveQueryStore::connect(&url, options)
                .await
                .context("failed to connect live query store to Redis")?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            info!("using in-memory live query store");
            Ok(Arc::new(MemoryLiveQueryStore::new()))
        }
    }
}
