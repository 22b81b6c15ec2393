pub mod error;

use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use tracing::debug;

use self::error::ConfigLoadError;
use super::models::sources::{
    self, EnvConfig, FileConfig, ENV_CLEANUP_INTERVAL, ENV_INACTIVE_RETENTION,
    ENV_RECONCILER_ENABLED, ENV_RETRY_BASE, ENV_RETRY_MAX, ENV_STORE_BACKEND,
};
use super::models::{
    Config, ConfigMetadata, DatabaseConfig, ReconcilerConfig, RedisConfig,
    StoreBackend, StoreConfig, DEFAULT_CLEANUP_INTERVAL,
    DEFAULT_INACTIVE_RETENTION, DEFAULT_KEY_PREFIX, DEFAULT_RETRY_BASE,
    DEFAULT_RETRY_MAX,
};
use super::validation::{self, ConfigWarnings};

static DEFAULT_CONFIG_LOCATIONS: LazyLock<Vec<PathBuf>> = LazyLock::new(|| {
    vec![
        PathBuf::from("livequery.toml"),
        PathBuf::from("config/livequery.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let env = EnvConfig::gather();
        let (file, config_path) = self.load_file_config(&env)?;

        compose(
            file,
            env,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        )
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        // An explicitly named file must exist; the default locations are
        // optional.
        let (path, explicit) = if let Some(path) = &self.options.config_path {
            (path.clone(), true)
        } else if let Some(path) = &env.config_path {
            (path.clone(), true)
        } else if let Some(path) =
            DEFAULT_CONFIG_LOCATIONS.iter().find(|candidate| candidate.exists())
        {
            (path.clone(), false)
        } else {
            return Ok((None, None));
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
                path: path.clone(),
                source,
            })?;
        let file: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), "loaded live query configuration file");
        Ok((Some(file), Some(path)))
    }
}

/// Layer environment over file over defaults, then apply guard rails.
pub fn compose(
    file: Option<FileConfig>,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<ConfigLoad, ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if metadata.config_path.is_none() {
        warnings.push_with_hint(
            "No livequery.toml detected; falling back to environment variables",
            "Pass --config or set LIVEQUERY_CONFIG_PATH to use a configuration file",
        );
    }

    let FileConfig {
        store: file_store,
        redis: file_redis,
        database: file_database,
        reconciler: file_reconciler,
    } = file.unwrap_or_default();

    let backend = match env.store_backend.as_deref() {
        Some(raw) => raw.parse::<StoreBackend>().map_err(|reason| {
            ConfigLoadError::InvalidValue {
                key: ENV_STORE_BACKEND,
                reason,
            }
        })?,
        None => file_store.backend.unwrap_or_default(),
    };

    let store = StoreConfig {
        backend,
        inactive_retention: resolve_duration(
            ENV_INACTIVE_RETENTION,
            env.inactive_retention,
            file_store.inactive_retention,
            DEFAULT_INACTIVE_RETENTION,
        )?,
    };

    let redis = env.redis_url.or(file_redis.url).map(|url| RedisConfig {
        url,
        key_prefix: env
            .key_prefix
            .clone()
            .or(file_redis.key_prefix.clone())
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
    });

    let database = DatabaseConfig {
        url: env
            .database_url
            .or(file_database.url)
            .filter(|url| !url.trim().is_empty()),
    };

    let enabled = match env.reconciler_enabled.as_deref() {
        Some(raw) => {
            sources::parse_bool(raw).ok_or_else(|| ConfigLoadError::InvalidValue {
                key: ENV_RECONCILER_ENABLED,
                reason: format!("expected a boolean, got `{raw}`"),
            })?
        }
        None => file_reconciler.enabled.unwrap_or(true),
    };

    let reconciler = ReconcilerConfig {
        enabled,
        interval: resolve_duration(
            ENV_CLEANUP_INTERVAL,
            env.cleanup_interval,
            file_reconciler.interval,
            DEFAULT_CLEANUP_INTERVAL,
        )?,
        retry_base: resolve_duration(
            ENV_RETRY_BASE,
            env.retry_base,
            file_reconciler.retry_base,
            DEFAULT_RETRY_BASE,
        )?,
        retry_max: resolve_duration(
            ENV_RETRY_MAX,
            env.retry_max,
            file_reconciler.retry_max,
            DEFAULT_RETRY_MAX,
        )?,
        active_query: env
            .active_query
            .or(file_reconciler.active_query)
            .unwrap_or_else(|| ReconcilerConfig::default().active_query),
    };

    let config = Config {
        store,
        redis,
        database,
        reconciler,
        metadata,
    };

    warnings.extend(validation::apply_guard_rails(&config)?);

    Ok(ConfigLoad { config, warnings })
}

fn resolve_duration(
    key: &'static str,
    env: Option<String>,
    file: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match env.or(file) {
        Some(raw) => humantime::parse_duration(raw.trim()).map_err(|source| {
            ConfigLoadError::InvalidDuration {
                key,
                value: raw,
                source,
            }
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::validation::ConfigGuardRailError;

    fn redis_env() -> EnvConfig {
        EnvConfig {
            redis_url: Some("redis://127.0.0.1:6379".into()),
            database_url: Some("postgres://fleet@db/fleet".into()),
            ..EnvConfig::default()
        }
    }

    fn with_path() -> ConfigMetadata {
        ConfigMetadata {
            config_path: Some(PathBuf::from("livequery.toml")),
            env_file_loaded: false,
        }
    }

    #[test]
    fn defaults_apply_when_nothing_else_is_set() {
        let load = compose(None, redis_env(), with_path()).unwrap();
        let config = load.config;

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.inactive_retention, DEFAULT_INACTIVE_RETENTION);
        assert_eq!(config.redis.as_ref().unwrap().key_prefix, DEFAULT_KEY_PREFIX);
        assert!(config.reconciler.enabled);
        assert_eq!(config.reconciler.interval, DEFAULT_CLEANUP_INTERVAL);
        assert!(config.reconciler.active_query.contains("distributed_query_campaigns"));
        assert!(load.warnings.is_empty(), "{:?}", load.warnings);
    }

    #[test]
    fn environment_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
                [redis]
                url = "redis://file-host/"
                key_prefix = "from-file"

                [reconciler]
                interval = "5m"
                retry_base = "2s"
            "#,
        )
        .unwrap();
        let env = EnvConfig {
            cleanup_interval: Some("90s".into()),
            ..redis_env()
        };

        let config = compose(Some(file), env, with_path()).unwrap().config;
        let redis = config.redis.unwrap();

        assert_eq!(redis.url, "redis://127.0.0.1:6379");
        assert_eq!(redis.key_prefix, "from-file");
        assert_eq!(config.reconciler.interval, Duration::from_secs(90));
        assert_eq!(config.reconciler.retry_base, Duration::from_secs(2));
    }

    #[test]
    fn redis_backend_requires_url() {
        let env = EnvConfig {
            database_url: Some("postgres://fleet@db/fleet".into()),
            ..EnvConfig::default()
        };
        let err = compose(None, env, with_path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::GuardRail(ConfigGuardRailError::MissingRedisUrl)
        ));
    }

    #[test]
    fn redis_url_scheme_is_checked() {
        let env = EnvConfig {
            redis_url: Some("http://cache:6379".into()),
            ..redis_env()
        };
        let err = compose(None, env, with_path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::GuardRail(ConfigGuardRailError::InvalidRedisUrl { .. })
        ));
    }

    #[test]
    fn enabled_reconciler_requires_database() {
        let env = EnvConfig {
            database_url: None,
            ..redis_env()
        };
        let err = compose(None, env, with_path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::GuardRail(ConfigGuardRailError::MissingDatabaseUrl)
        ));
    }

    #[test]
    fn disabled_reconciler_needs_no_database_but_warns() {
        let env = EnvConfig {
            database_url: None,
            reconciler_enabled: Some("false".into()),
            ..redis_env()
        };
        let load = compose(None, env, with_path()).unwrap();
        assert!(!load.config.reconciler.enabled);
        assert_eq!(load.warnings.items.len(), 1);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let env = EnvConfig {
            cleanup_interval: Some("0s".into()),
            ..redis_env()
        };
        let err = compose(None, env, with_path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::GuardRail(ConfigGuardRailError::ZeroDuration {
                field: "LIVEQUERY_CLEANUP_INTERVAL"
            })
        ));
    }

    #[test]
    fn malformed_duration_names_the_variable() {
        let env = EnvConfig {
            retry_max: Some("forever".into()),
            ..redis_env()
        };
        let err = compose(None, env, with_path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidDuration {
                key: ENV_RETRY_MAX,
                ..
            }
        ));
    }

    #[test]
    fn memory_backend_and_inverted_retry_window_warn() {
        let env = EnvConfig {
            store_backend: Some("memory".into()),
            redis_url: None,
            retry_base: Some("1m".into()),
            retry_max: Some("10s".into()),
            ..redis_env()
        };
        let load = compose(None, env, ConfigMetadata::default()).unwrap();

        assert_eq!(load.config.store.backend, StoreBackend::Memory);
        assert!(load.config.redis.is_none());
        let messages: Vec<_> =
            load.warnings.items.iter().map(|w| w.message.as_str()).collect();
        assert_eq!(messages.len(), 3, "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("In-memory")));
        assert!(messages.iter().any(|m| m.contains("LIVEQUERY_RETRY_MAX")));
        assert!(messages.iter().any(|m| m.contains("No livequery.toml")));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let env = EnvConfig {
            store_backend: Some("etcd".into()),
            ..redis_env()
        };
        let err = compose(None, env, with_path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidValue {
                key: ENV_STORE_BACKEND,
                ..
            }
        ));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new().with_config_path(dir.path().join("absent.toml"));
        let err = loader.load_file_config(&EnvConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn explicit_file_is_read_and_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[store]\nbackend = \"memory\"\n\n[reconciler]\nenabled = false"
        )
        .unwrap();

        let loader = ConfigLoader::new().with_config_path(file.path());
        let (parsed, path) = loader.load_file_config(&EnvConfig::default()).unwrap();

        assert_eq!(path.as_deref(), Some(file.path()));
        let parsed = parsed.unwrap();
        assert_eq!(parsed.store.backend, Some(StoreBackend::Memory));
        assert_eq!(parsed.reconciler.enabled, Some(false));
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store\nbackend = ").unwrap();

        let loader = ConfigLoader::new().with_config_path(file.path());
        let err = loader.load_file_config(&EnvConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse { .. }));
    }
}
