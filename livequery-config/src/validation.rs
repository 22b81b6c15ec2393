use std::time::Duration;

use thiserror::Error;
use url::Url;

use super::models::{Config, StoreBackend};

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("store backend `redis` requires REDIS_URL or redis.url")]
    MissingRedisUrl,
    #[error("invalid Redis URL: {reason}")]
    InvalidRedisUrl { reason: String },
    #[error("Redis key prefix must not be empty")]
    EmptyKeyPrefix,
    #[error(
        "reconciler is enabled but no DATABASE_URL is configured for the campaign system of record"
    )]
    MissingDatabaseUrl,
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    match config.store.backend {
        StoreBackend::Redis => {
            let redis = config
                .redis
                .as_ref()
                .ok_or(ConfigGuardRailError::MissingRedisUrl)?;
            validate_redis_url(&redis.url)?;
            if redis.key_prefix.trim().is_empty() {
                return Err(ConfigGuardRailError::EmptyKeyPrefix);
            }
        }
        StoreBackend::Memory => {
            warnings.push_with_hint(
                "In-memory live query store selected; campaigns are not shared between replicas and are lost on restart",
                "Set LIVEQUERY_STORE_BACKEND=redis with REDIS_URL for multi-replica deployments",
            );
            if config.redis.is_some() {
                warnings.push("REDIS_URL is set but ignored by the memory backend");
            }
        }
    }

    let reconciler = &config.reconciler;
    if reconciler.enabled {
        if config.database.url.is_none() {
            return Err(ConfigGuardRailError::MissingDatabaseUrl);
        }
        ensure_non_zero("LIVEQUERY_CLEANUP_INTERVAL", reconciler.interval)?;
        ensure_non_zero("LIVEQUERY_RETRY_BASE", reconciler.retry_base)?;

        if reconciler.retry_max < reconciler.retry_base {
            warnings.push_with_hint(
                format!(
                    "LIVEQUERY_RETRY_MAX ({}) is below LIVEQUERY_RETRY_BASE ({}); every retry will wait the cap",
                    humantime::format_duration(reconciler.retry_max),
                    humantime::format_duration(reconciler.retry_base),
                ),
                "Raise LIVEQUERY_RETRY_MAX or lower LIVEQUERY_RETRY_BASE",
            );
        }
    } else {
        warnings.push_with_hint(
            "Reconciler disabled; campaigns abandoned without an explicit stop stay deliverable",
            "Enable the reconciler on at least one replica",
        );
    }

    Ok(warnings)
}

fn ensure_non_zero(
    field: &'static str,
    value: Duration,
) -> Result<(), ConfigGuardRailError> {
    if value.is_zero() {
        Err(ConfigGuardRailError::ZeroDuration { field })
    } else {
        Ok(())
    }
}

fn validate_redis_url(raw: &str) -> Result<(), ConfigGuardRailError> {
    let url = Url::parse(raw).map_err(|err| ConfigGuardRailError::InvalidRedisUrl {
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "redis" | "rediss" | "redis+unix" | "unix" => Ok(()),
        other => Err(ConfigGuardRailError::InvalidRedisUrl {
            reason: format!("unsupported scheme `{other}`"),
        }),
    }
}
