//! Core data model definitions shared across the live-query crates.
#![allow(missing_docs)]

pub mod campaign;
pub mod error;
pub mod ids;

pub use campaign::{Campaign, CampaignName};
pub use error::{ModelError, Result as ModelResult};
pub use ids::{CampaignId, HostId};
