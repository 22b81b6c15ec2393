//! Read-only views over the store for operators.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use livequery_core::{LiveQueryError, LiveQueryResult, LiveQueryStore};
use livequery_model::{Campaign, HostId};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub campaigns: Vec<Campaign>,
}

/// Every active campaign, or just `name` when given. Campaigns stopped
/// between listing and reading are skipped.
pub async fn collect_status(
    store: &dyn LiveQueryStore,
    name: Option<&str>,
) -> LiveQueryResult<StatusReport> {
    let names = match name {
        Some(name) => vec![name.to_string()],
        None => {
            let mut names = store.active_campaign_names().await?;
            names.sort();
            names
        }
    };

    let mut campaigns = Vec::with_capacity(names.len());
    for name in &names {
        if let Some(campaign) = store.campaign(name).await? {
            campaigns.push(campaign);
        }
    }

    if let (Some(name), true) = (name, campaigns.is_empty()) {
        return Err(LiveQueryError::campaign_not_found(name));
    }

    Ok(StatusReport { campaigns })
}

/// Pending queries for `host`, ordered by campaign name.
pub async fn pending_for_host(
    store: &dyn LiveQueryStore,
    host: HostId,
) -> LiveQueryResult<BTreeMap<String, String>> {
    Ok(store.queries_for_host(host).await?.into_iter().collect())
}

pub fn render_status(report: &StatusReport) -> String {
    if report.campaigns.is_empty() {
        return "no active campaigns\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<20} {:<8} {:>8} {:>8}  {}",
        "CAMPAIGN", "STATE", "TARGETS", "PENDING", "CREATED"
    );
    for campaign in &report.campaigns {
        let state = match (campaign.active, campaign.is_answered()) {
            (false, _) => "stopped",
            (true, true) => "answered",
            (true, false) => "running",
        };
        let _ = writeln!(
            out,
            "{:<20} {:<8} {:>8} {:>8}  {}",
            campaign.name,
            state,
            campaign.target_count,
            campaign.pending_count,
            campaign.created_at.to_rfc3339(),
        );
    }
    out
}

pub fn render_pending(host: HostId, queries: &BTreeMap<String, String>) -> String {
    if queries.is_empty() {
        return format!("host {host} has no pending queries\n");
    }

    let mut out = String::new();
    for (name, sql) in queries {
        let _ = writeln!(out, "{name}\t{sql}");
    }
    out
}
