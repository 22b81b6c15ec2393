use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Opaque, stable identifier of an enrolled device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct HostId(pub u64);

impl HostId {
    pub fn new(id: u64) -> Self {
        HostId(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for HostId {
    fn from(id: u64) -> Self {
        HostId(id)
    }
}

impl FromStr for HostId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(HostId)
            .map_err(|err| ModelError::InvalidId(format!("host id '{s}': {err}")))
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier the system of record assigns to a campaign.
///
/// Campaign names held by the store are the decimal rendering of this id,
/// which is how reconciliation matches the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CampaignId(pub u64);

impl CampaignId {
    pub fn new(id: u64) -> Self {
        CampaignId(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Interpret a stored campaign name as a system-of-record id.
    ///
    /// Returns `None` unless `name` is the canonical decimal rendering of a
    /// `u64`: no sign, no padding, no leading zeros.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let id = name.parse::<u64>().ok()?;
        (id.to_string() == name).then_some(CampaignId(id))
    }
}

impl From<u64> for CampaignId {
    fn from(id: u64) -> Self {
        CampaignId(id)
    }
}

impl FromStr for CampaignId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CampaignId::from_name(s.trim()).ok_or_else(|| {
            ModelError::InvalidId(format!("campaign id '{s}' is not a u64"))
        })
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
