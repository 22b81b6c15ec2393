//! # Live Query Core
//!
//! Distribution store for ad-hoc queries broadcast to a device fleet.
//!
//! ## Overview
//!
//! An operator starts a *campaign*: a named SQL query aimed at a set of hosts.
//! Every device asks the store for its pending queries on each check-in and
//! reports completion once it has answered. The store keeps, for every
//! campaign, the set of hosts that still owe an answer, and for every host,
//! the set of campaigns it still has to run.
//!
//! - [`store`]: the [`LiveQueryStore`] trait plus the Redis and in-memory
//!   backends
//! - [`source`]: the port to the system of record that knows which campaigns
//!   are still running
//! - [`reconcile`]: the periodic sweep that evicts campaigns the system of
//!   record abandoned
//!
//! ## Feature Flags
//!
//! - `redis` (default): [`store::RedisLiveQueryStore`]
//! - `postgres` (default): [`source::PostgresCampaignSource`]
//!
//! ## Examples
//!
//! ```no_run
//! use livequery_core::{LiveQueryStore, MemoryLiveQueryStore};
//! use livequery_model::{CampaignName, HostId};
//!
//! async fn broadcast() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryLiveQueryStore::new();
//!     let name = CampaignName::parse("42")?;
//!     store
//!         .start_campaign(&name, "SELECT * FROM osquery_info", &[HostId(10), HostId(20)])
//!         .await?;
//!
//!     let pending = store.queries_for_host(HostId(10)).await?;
//!     assert_eq!(pending.len(), 1);
//!
//!     store.complete_for_host("42", HostId(10)).await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod error;
pub mod reconcile;
pub mod source;
pub mod store;

pub use error::{LiveQueryError, LiveQueryResult};
pub use livequery_model as model;
pub use reconcile::{Reconciler, ReconcilerSettings};
pub use source::{ActiveCampaignSource, StaticCampaignSource};
pub use store::{
    CleanupReport, CleanupWatermark, LiveQueryStore, MemoryLiveQueryStore,
};
