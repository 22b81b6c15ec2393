//! Behaviour every `LiveQueryStore` backend must share.
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use livequery_core::{LiveQueryError, LiveQueryStore};
use livequery_model::{CampaignId, CampaignName, HostId};
use tokio_util::sync::CancellationToken;

pub type SharedStore = Arc<dyn LiveQueryStore>;

pub fn name(raw: &str) -> CampaignName {
    CampaignName::parse(raw).expect("valid campaign name")
}

fn expected(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(name, sql)| (name.to_string(), sql.to_string()))
        .collect()
}

fn ids(raw: &[u64]) -> HashSet<CampaignId> {
    raw.iter().copied().map(CampaignId).collect()
}

async fn assert_gone(store: &SharedStore, campaign: &str) {
    let record = store.campaign(campaign).await.unwrap();
    assert!(
        record.as_ref().is_none_or(|c| !c.active),
        "campaign {campaign} should be inactive, got {record:?}"
    );
    assert!(store.pending_hosts(campaign).await.unwrap().is_none());
    assert!(
        !store
            .active_campaign_names()
            .await
            .unwrap()
            .contains(&campaign.to_string())
    );
}

pub async fn delivery_lifecycle_scenario(store: SharedStore) {
    store
        .start_campaign(&name("q1"), "SELECT 1", &[HostId(10), HostId(20)])
        .await
        .unwrap();

    assert_eq!(
        store.queries_for_host(HostId(10)).await.unwrap(),
        expected(&[("q1", "SELECT 1")])
    );

    store.complete_for_host("q1", HostId(10)).await.unwrap();
    assert!(store.queries_for_host(HostId(10)).await.unwrap().is_empty());
    assert_eq!(
        store.queries_for_host(HostId(20)).await.unwrap(),
        expected(&[("q1", "SELECT 1")])
    );

    store.stop_campaign("q1").await.unwrap();
    assert!(store.queries_for_host(HostId(20)).await.unwrap().is_empty());
    assert_gone(&store, "q1").await;
}

pub async fn cleanup_with_empty_snapshot_evicts_everything(store: SharedStore) {
    store
        .start_campaign(&name("q2"), "SELECT 2", &[HostId(5)])
        .await
        .unwrap();

    let report = store
        .cleanup_inactive(&CancellationToken::new(), &HashSet::new())
        .await
        .unwrap();

    assert_eq!(report.evicted, vec!["q2".to_string()]);
    assert!(store.queries_for_host(HostId(5)).await.unwrap().is_empty());
    assert_gone(&store, "q2").await;
}

pub async fn stop_unknown_campaign_is_soft_not_found(store: SharedStore) {
    store
        .start_campaign(&name("1"), "SELECT 1", &[HostId(1)])
        .await
        .unwrap();

    let err = store.stop_campaign("missing").await.unwrap_err();
    assert!(matches!(err, LiveQueryError::NotFound { .. }), "{err:?}");
    assert!(err.is_soft());

    assert_eq!(store.active_campaign_names().await.unwrap(), vec!["1"]);
    assert_eq!(
        store.queries_for_host(HostId(1)).await.unwrap(),
        expected(&[("1", "SELECT 1")])
    );
}

pub async fn stop_twice_reports_not_found(store: SharedStore) {
    store
        .start_campaign(&name("1"), "SELECT 1", &[HostId(1)])
        .await
        .unwrap();
    store.stop_campaign("1").await.unwrap();

    let err = store.stop_campaign("1").await.unwrap_err();
    assert!(err.is_soft());
}

pub async fn completion_is_idempotent_in_effect(store: SharedStore) {
    store
        .start_campaign(&name("1"), "SELECT 1", &[HostId(1), HostId(2)])
        .await
        .unwrap();

    store.complete_for_host("1", HostId(1)).await.unwrap();
    let before = (
        store.queries_for_host(HostId(1)).await.unwrap(),
        store.queries_for_host(HostId(2)).await.unwrap(),
        store.pending_hosts("1").await.unwrap(),
    );

    let err = store.complete_for_host("1", HostId(1)).await.unwrap_err();
    assert!(matches!(
        err,
        LiveQueryError::NotFound {
            host: Some(HostId(1)),
            ..
        }
    ));

    let after = (
        store.queries_for_host(HostId(1)).await.unwrap(),
        store.queries_for_host(HostId(2)).await.unwrap(),
        store.pending_hosts("1").await.unwrap(),
    );
    assert_eq!(before, after);
}

pub async fn completion_for_strangers_is_not_found(store: SharedStore) {
    store
        .start_campaign(&name("1"), "SELECT 1", &[HostId(1)])
        .await
        .unwrap();

    let not_target = store.complete_for_host("1", HostId(99)).await.unwrap_err();
    assert!(not_target.is_soft());

    let no_campaign = store.complete_for_host("2", HostId(1)).await.unwrap_err();
    assert!(no_campaign.is_soft());

    store.stop_campaign("1").await.unwrap();
    let stopped = store.complete_for_host("1", HostId(1)).await.unwrap_err();
    assert!(stopped.is_soft());
}

pub async fn stop_hides_campaign_regardless_of_progress(store: SharedStore) {
    let hosts = [HostId(1), HostId(2), HostId(3)];
    store
        .start_campaign(&name("1"), "SELECT 1", &hosts)
        .await
        .unwrap();
    store
        .start_campaign(&name("2"), "SELECT 2", &[HostId(3)])
        .await
        .unwrap();
    store.complete_for_host("1", HostId(2)).await.unwrap();

    store.stop_campaign("1").await.unwrap();

    for host in hosts {
        let queries = store.queries_for_host(host).await.unwrap();
        assert!(!queries.contains_key("1"), "host {host} still sees 1");
    }
    assert_eq!(
        store.queries_for_host(HostId(3)).await.unwrap(),
        expected(&[("2", "SELECT 2")])
    );
}

pub async fn answered_campaign_stays_active_until_stopped(store: SharedStore) {
    store
        .start_campaign(&name("1"), "SELECT 1", &[HostId(1)])
        .await
        .unwrap();
    store.complete_for_host("1", HostId(1)).await.unwrap();

    let campaign = store.campaign("1").await.unwrap().expect("record");
    assert!(campaign.active);
    assert!(campaign.is_answered());
    assert_eq!(campaign.target_count, 1);
    assert_eq!(store.pending_hosts("1").await.unwrap(), Some(BTreeSet::new()));

    // Still active, so the name cannot be reused yet.
    let err = store
        .start_campaign(&name("1"), "SELECT 2", &[HostId(2)])
        .await
        .unwrap_err();
    assert!(matches!(err, LiveQueryError::AlreadyExists { .. }));

    store.stop_campaign("1").await.unwrap();
    store
        .start_campaign(&name("1"), "SELECT 2", &[HostId(2)])
        .await
        .unwrap();
    assert!(store.queries_for_host(HostId(1)).await.unwrap().is_empty());
    assert_eq!(
        store.queries_for_host(HostId(2)).await.unwrap(),
        expected(&[("1", "SELECT 2")])
    );
}

pub async fn start_validates_targets(store: SharedStore) {
    let err = store
        .start_campaign(&name("1"), "SELECT 1", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, LiveQueryError::InvalidInput(_)));
    assert!(store.active_campaign_names().await.unwrap().is_empty());

    store
        .start_campaign(&name("2"), "SELECT 2", &[HostId(4), HostId(4), HostId(5)])
        .await
        .unwrap();
    let campaign = store.campaign("2").await.unwrap().expect("record");
    assert_eq!(campaign.target_count, 2);
    assert_eq!(campaign.pending_count, 2);
    assert_eq!(campaign.sql, "SELECT 2");
    assert_eq!(
        store.pending_hosts("2").await.unwrap(),
        Some([HostId(4), HostId(5)].into_iter().collect())
    );
}

pub async fn host_without_campaigns_gets_empty_map(store: SharedStore) {
    store
        .start_campaign(&name("1"), "SELECT 1", &[HostId(1)])
        .await
        .unwrap();
    assert!(store.queries_for_host(HostId(777)).await.unwrap().is_empty());
}

pub async fn host_sees_every_campaign_targeting_it(store: SharedStore) {
    store
        .start_campaign(&name("1"), "SELECT 1", &[HostId(1), HostId(2)])
        .await
        .unwrap();
    store
        .start_campaign(&name("2"), "SELECT 2", &[HostId(2)])
        .await
        .unwrap();

    assert_eq!(
        store.queries_for_host(HostId(2)).await.unwrap(),
        expected(&[("1", "SELECT 1"), ("2", "SELECT 2")])
    );
    assert_eq!(
        store.queries_for_host(HostId(1)).await.unwrap(),
        expected(&[("1", "SELECT 1")])
    );
}

pub async fn cleanup_evicts_exactly_the_unlisted(store: SharedStore) {
    store
        .start_campaign(&name("1"), "SELECT 1", &[HostId(1)])
        .await
        .unwrap();
    store
        .start_campaign(&name("2"), "SELECT 2", &[HostId(1), HostId(2)])
        .await
        .unwrap();
    store
        .start_campaign(&name("3"), "SELECT 3", &[HostId(2)])
        .await
        .unwrap();
    store
        .start_campaign(&name("adhoc"), "SELECT 4", &[HostId(2)])
        .await
        .unwrap();

    let report = store
        .cleanup_inactive(&CancellationToken::new(), &ids(&[2, 99]))
        .await
        .unwrap();

    let mut evicted = report.evicted.clone();
    evicted.sort();
    assert_eq!(evicted, vec!["1", "3", "adhoc"]);
    assert_eq!(report.retained, 1);
    assert_eq!(report.examined, 4);

    assert_eq!(store.active_campaign_names().await.unwrap(), vec!["2"]);
    assert_eq!(
        store.queries_for_host(HostId(1)).await.unwrap(),
        expected(&[("2", "SELECT 2")])
    );
    assert_eq!(
        store.queries_for_host(HostId(2)).await.unwrap(),
        expected(&[("2", "SELECT 2")])
    );
}

pub async fn cleanup_spares_campaigns_started_after_watermark(store: SharedStore) {
    store
        .start_campaign(&name("1"), "SELECT 1", &[HostId(1)])
        .await
        .unwrap();
    let watermark = store.cleanup_watermark().await.unwrap();
    store
        .start_campaign(&name("2"), "SELECT 2", &[HostId(1)])
        .await
        .unwrap();

    let report = store
        .cleanup_inactive_before(&CancellationToken::new(), &HashSet::new(), watermark)
        .await
        .unwrap();

    assert_eq!(report.evicted, vec!["1".to_string()]);
    assert_eq!(report.skipped_recent, 1);
    assert_eq!(
        store.queries_for_host(HostId(1)).await.unwrap(),
        expected(&[("2", "SELECT 2")])
    );
}

pub async fn cancelled_cleanup_never_half_evicts(store: SharedStore) {
    let hosts = [HostId(1), HostId(2)];
    for raw in ["1", "2", "3"] {
        store
            .start_campaign(&name(raw), "SELECT 1", &hosts)
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = store
        .cleanup_inactive(&cancel, &HashSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LiveQueryError::Cancelled { .. }));

    for raw in ["1", "2", "3"] {
        let seen: Vec<bool> = futures::future::join_all(
            hosts.iter().map(|host| store.queries_for_host(*host)),
        )
        .await
        .into_iter()
        .map(|queries| queries.unwrap().contains_key(raw))
        .collect();
        assert!(
            seen.iter().all(|v| *v) || seen.iter().all(|v| !*v),
            "campaign {raw} half evicted: {seen:?}"
        );
    }
}

pub async fn concurrent_starts_admit_exactly_one(store: SharedStore) {
    let attempts = 16;
    let handles: Vec<_> = (0..attempts)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .start_campaign(&name("7"), &format!("SELECT {i}"), &[HostId(i)])
                    .await
            })
        })
        .collect();

    let mut admitted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => admitted += 1,
            Err(LiveQueryError::AlreadyExists { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(rejected, attempts - 1);

    // The winner's targets were not overwritten by any loser.
    let campaign = store.campaign("7").await.unwrap().expect("record");
    assert_eq!(campaign.target_count, 1);
    let pending = store.pending_hosts("7").await.unwrap().expect("pending");
    let winner = *pending.iter().next().unwrap();
    assert_eq!(
        store.queries_for_host(winner).await.unwrap(),
        expected(&[("7", &format!("SELECT {}", winner.get()))])
    );
}

pub async fn concurrent_completions_drain_pending_set(store: SharedStore) {
    let hosts: Vec<HostId> = (1..=64).map(HostId).collect();
    store
        .start_campaign(&name("8"), "SELECT 8", &hosts)
        .await
        .unwrap();

    let handles: Vec<_> = hosts
        .iter()
        .copied()
        .map(|host| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.complete_for_host("8", host).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let campaign = store.campaign("8").await.unwrap().expect("record");
    assert!(campaign.is_answered());
    assert!(campaign.active);
    for host in hosts {
        assert!(store.queries_for_host(host).await.unwrap().is_empty());
    }
}

pub async fn lookups_never_observe_stopped_campaign_after_stop_returns(
    store: SharedStore,
) {
    let hosts: Vec<HostId> = (1..=32).map(HostId).collect();
    let campaign = name("11");

    for round in 0..20 {
        store
            .start_campaign(&campaign, &format!("SELECT {round}"), &hosts)
            .await
            .unwrap();

        let readers: Vec<_> = hosts
            .iter()
            .copied()
            .map(|host| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.queries_for_host(host).await })
            })
            .collect();

        store.stop_campaign("11").await.unwrap();
        for host in &hosts {
            assert!(store.queries_for_host(*host).await.unwrap().is_empty());
        }
        for reader in readers {
            reader.await.unwrap().unwrap();
        }
    }
}
