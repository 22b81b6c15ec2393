//! Configuration loading for live query store replicas.
//!
//! Values resolve from environment variables first, then an optional TOML
//! file, then built-in defaults. Guard rails reject configurations a replica
//! cannot run with and collect warnings for the ones it merely should not.
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoader, ConfigLoaderOptions, compose, error::ConfigLoadError,
};
pub use models::sources::{EnvConfig, FileConfig};
pub use models::{
    Config, ConfigMetadata, DatabaseConfig, ReconcilerConfig, RedisConfig,
    StoreBackend, StoreConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
