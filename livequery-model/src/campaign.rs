use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ModelError;
use crate::ids::CampaignId;

/// Longest name accepted by [`CampaignName::parse`], in bytes.
pub const MAX_CAMPAIGN_NAME_LEN: usize = 256;

/// Validated campaign name. Acts as the primary key of a live campaign and as
/// the query name devices echo back on completion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct CampaignName(String);

impl CampaignName {
    pub fn parse(raw: impl Into<String>) -> Result<Self, ModelError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ModelError::InvalidName(
                "campaign name cannot be empty".to_string(),
            ));
        }
        if raw.len() > MAX_CAMPAIGN_NAME_LEN {
            return Err(ModelError::InvalidName(format!(
                "campaign name exceeds {MAX_CAMPAIGN_NAME_LEN} bytes"
            )));
        }
        if raw.chars().any(char::is_control) {
            return Err(ModelError::InvalidName(
                "campaign name contains control characters".to_string(),
            ));
        }
        Ok(CampaignName(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn campaign_id(&self) -> Option<CampaignId> {
        CampaignId::from_name(&self.0)
    }
}

impl From<CampaignId> for CampaignName {
    fn from(id: CampaignId) -> Self {
        CampaignName(id.to_string())
    }
}

impl TryFrom<String> for CampaignName {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CampaignName::parse(value)
    }
}

impl From<CampaignName> for String {
    fn from(name: CampaignName) -> Self {
        name.0
    }
}

impl FromStr for CampaignName {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CampaignName::parse(s)
    }
}

impl AsRef<str> for CampaignName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CampaignName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry view of a campaign as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Campaign {
    pub name: String,
    pub sql: String,
    pub created_at: DateTime<Utc>,
    /// False once the campaign was stopped or evicted. Completion by every
    /// target never clears this flag.
    pub active: bool,
    /// Number of distinct hosts the campaign was started for.
    pub target_count: usize,
    /// Hosts that have not reported completion yet.
    pub pending_count: usize,
}

impl Campaign {
    /// Whether every target host has reported completion.
    pub fn is_answered(&self) -> bool {
        self.pending_count == 0
    }

    pub fn completed_count(&self) -> usize {
        self.target_count.saturating_sub(self.pending_count)
    }

    pub fn campaign_id(&self) -> Option<CampaignId> {
        CampaignId::from_name(&self.name)
    }
}
