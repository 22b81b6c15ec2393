use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::StoreBackend;

/// Raw configuration as defined in a TOML file.
///
/// Durations are humantime strings (`"90s"`, `"10m"`).
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub store: FileStoreConfig,
    #[serde(default)]
    pub redis: FileRedisConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub reconciler: FileReconcilerConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileStoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<StoreBackend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactive_retention: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileRedisConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileReconcilerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_max: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_query: Option<String>,
}

/// Environment-derived configuration values.
///
/// Values are kept raw; parsing happens while composing so a malformed
/// variable surfaces as a load error naming the variable.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub store_backend: Option<String>,
    pub inactive_retention: Option<String>,
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
    pub database_url: Option<String>,
    pub reconciler_enabled: Option<String>,
    pub cleanup_interval: Option<String>,
    pub retry_base: Option<String>,
    pub retry_max: Option<String>,
    pub active_query: Option<String>,
}

pub const ENV_CONFIG_PATH: &str = "LIVEQUERY_CONFIG_PATH";
pub const ENV_STORE_BACKEND: &str = "LIVEQUERY_STORE_BACKEND";
pub const ENV_INACTIVE_RETENTION: &str = "LIVEQUERY_INACTIVE_RETENTION";
pub const ENV_REDIS_URL: &str = "REDIS_URL";
pub const ENV_KEY_PREFIX: &str = "LIVEQUERY_KEY_PREFIX";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_RECONCILER_ENABLED: &str = "LIVEQUERY_RECONCILER_ENABLED";
pub const ENV_CLEANUP_INTERVAL: &str = "LIVEQUERY_CLEANUP_INTERVAL";
pub const ENV_RETRY_BASE: &str = "LIVEQUERY_RETRY_BASE";
pub const ENV_RETRY_MAX: &str = "LIVEQUERY_RETRY_MAX";
pub const ENV_ACTIVE_QUERY: &str = "LIVEQUERY_ACTIVE_QUERY";

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name).filter(|value| !value.trim().is_empty())
        };

        Self {
            config_path: var(ENV_CONFIG_PATH).map(PathBuf::from),
            store_backend: var(ENV_STORE_BACKEND),
            inactive_retention: var(ENV_INACTIVE_RETENTION),
            redis_url: var(ENV_REDIS_URL),
            key_prefix: var(ENV_KEY_PREFIX),
            database_url: var(ENV_DATABASE_URL),
            reconciler_enabled: var(ENV_RECONCILER_ENABLED),
            cleanup_interval: var(ENV_CLEANUP_INTERVAL),
            retry_base: var(ENV_RETRY_BASE),
            retry_max: var(ENV_RETRY_MAX),
            active_query: var(ENV_ACTIVE_QUERY),
        }
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
