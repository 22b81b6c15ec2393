pub mod sources;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use livequery_core::ReconcilerSettings;
use livequery_core::source::DEFAULT_ACTIVE_CAMPAIGNS_QUERY;
use livequery_core::store::RedisStoreOptions;
use serde::{Deserialize, Serialize};

pub const DEFAULT_KEY_PREFIX: &str = "livequery";
pub const DEFAULT_INACTIVE_RETENTION: Duration = Duration::from_secs(600);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(300);

/// Fully resolved configuration for a store replica.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub redis: Option<RedisConfig>,
    pub database: DatabaseConfig,
    pub reconciler: ReconcilerConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Options for the Redis backend, if one is configured.
    pub fn redis_store_options(&self) -> Option<(String, RedisStoreOptions)> {
        self.redis.as_ref().map(|redis| {
            (
                redis.url.clone(),
                RedisStoreOptions {
                    key_prefix: redis.key_prefix.clone(),
                    inactive_retention: self.store.inactive_retention,
                },
            )
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreBackend::Redis => "redis",
            StoreBackend::Memory => "memory",
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// How long a stopped campaign's record is kept as an inactive
    /// tombstone. Only the Redis backend keeps tombstones.
    pub inactive_retention: Duration,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
    /// Must return a single `BIGINT` column of active campaign ids.
    pub active_query: String,
}

impl ReconcilerConfig {
    pub fn settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            interval: self.interval,
            retry_base: self.retry_base,
            retry_max: self.retry_max,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_CLEANUP_INTERVAL,
            retry_base: DEFAULT_RETRY_BASE,
            retry_max: DEFAULT_RETRY_MAX,
            active_query: DEFAULT_ACTIVE_CAMPAIGNS_QUERY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
