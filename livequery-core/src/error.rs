use livequery_model::{HostId, ModelError};
use thiserror::Error;

/// Errors returned by live-query store operations.
#[derive(Error, Debug)]
pub enum LiveQueryError {
    /// Start was called for a name that is already active.
    #[error("campaign already exists: {name}")]
    AlreadyExists { name: String },

    /// The campaign (or the host's pending delivery for it) is already gone.
    /// Callers treat this as benign.
    #[error("{}", not_found_message(.name, .host))]
    NotFound { name: String, host: Option<HostId> },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A cleanup pass stopped early. Every eviction it made is complete.
    #[error("operation cancelled after evicting {evicted} campaigns")]
    Cancelled { evicted: usize },

    /// Backend unavailable or holding state this crate cannot interpret.
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

fn not_found_message(name: &str, host: &Option<HostId>) -> String {
    match host {
        Some(host) => {
            format!("no pending delivery of campaign {name} for host {host}")
        }
        None => format!("campaign not found: {name}"),
    }
}

impl LiveQueryError {
    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    pub fn campaign_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            name: name.into(),
            host: None,
        }
    }

    pub fn delivery_not_found(name: impl Into<String>, host: HostId) -> Self {
        Self::NotFound {
            name: name.into(),
            host: Some(host),
        }
    }

    /// Soft errors mean the requested end state already holds.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

impl From<ModelError> for LiveQueryError {
    fn from(err: ModelError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

/// Result type for live-query store operations
pub type LiveQueryResult<T> = Result<T, LiveQueryError>;
