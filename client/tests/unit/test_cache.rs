//! Deployment cache tests

use std::time::Duration;

use tokio_test::{assert_pending, assert_ready, task};

use jsd_client::cache::deployment::{CacheEvent, CacheOptions, DeploymentCache};
use jsd_client::errors::ClientError;
use jsd_client::models::deployment::DeploymentStatus;

use crate::support::{created, deployment, FakeApi};

fn cache_over(api: &std::sync::Arc<FakeApi>) -> DeploymentCache {
    DeploymentCache::new(api.clone(), CacheOptions::default())
}

#[test]
fn test_superseded_response_is_dropped() {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Building, created(0)));
    api.script("d1", vec![DeploymentStatus::Building, DeploymentStatus::Ready]);
    let release_a = api.gate("d1");
    let release_b = api.gate("d1");
    let cache = cache_over(&api);

    let mut a = task::spawn(cache.get("d1"));
    assert_pending!(a.poll());

    cache.invalidate("d1");
    let mut b = task::spawn(cache.get("d1"));
    assert_pending!(b.poll());
    assert_eq!(api.calls_of("get", "d1").len(), 2);

    // B answers first, A arrives late
    release_b.send(()).unwrap();
    let newest = assert_ready!(b.poll()).unwrap();
    assert_eq!(newest.status, DeploymentStatus::Ready);

    release_a.send(()).unwrap();
    let late = assert_ready!(a.poll()).unwrap();
    assert_eq!(late.status, DeploymentStatus::Ready);

    let snapshot = cache.peek("d1").unwrap();
    assert_eq!(snapshot.deployment.unwrap().status, DeploymentStatus::Ready);
    assert!(!snapshot.stale);
}

#[test]
fn test_late_response_cannot_mark_invalidated_entry_fresh() {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Building, created(0)));
    let release = api.gate("d1");
    let cache = cache_over(&api);

    let mut pending = task::spawn(cache.get("d1"));
    assert_pending!(pending.poll());

    cache.invalidate("d1");
    release.send(()).unwrap();
    let _ = assert_ready!(pending.poll());

    let snapshot = cache.peek("d1").unwrap();
    assert!(snapshot.deployment.is_none());
    assert!(snapshot.stale);
}

#[test]
fn test_concurrent_reads_share_one_fetch() {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Queued, created(0)));
    let release = api.gate("d1");
    let cache = cache_over(&api);

    let mut first = task::spawn(cache.get("d1"));
    let mut second = task::spawn(cache.refresh("d1"));
    assert_pending!(first.poll());
    assert_pending!(second.poll());

    release.send(()).unwrap();
    let a = assert_ready!(first.poll()).unwrap();
    let b = assert_ready!(second.poll()).unwrap();

    assert_eq!(a, b);
    assert_eq!(api.calls_of("get", "d1").len(), 1);
}

#[test]
fn test_ended_subscription_discards_result() {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Building, created(0)));
    let release = api.gate("d1");
    let cache = cache_over(&api);

    let subscription = cache.subscribe("d1");
    assert_eq!(cache.peek("d1").unwrap().subscribers, 1);

    let mut pending = task::spawn(subscription.refresh());
    assert_pending!(pending.poll());

    drop(subscription);
    release.send(()).unwrap();
    assert!(assert_ready!(pending.poll()).is_ok());

    let snapshot = cache.peek("d1").unwrap();
    assert!(snapshot.deployment.is_none());
    assert_eq!(snapshot.subscribers, 0);
}

#[test]
fn test_removed_entry_ignores_late_response() {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Ready, created(0)));
    let release = api.gate("d1");
    let cache = cache_over(&api);

    let mut pending = task::spawn(cache.get("d1"));
    assert_pending!(pending.poll());

    cache.remove("d1");
    release.send(()).unwrap();
    let _ = assert_ready!(pending.poll());

    assert!(!cache.contains("d1"));
}

#[test]
fn test_superseded_failure_is_still_reported() {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Building, created(0)));
    let cache = cache_over(&api);

    let mut warm = task::spawn(cache.get("d1"));
    assert_ready!(warm.poll()).unwrap();

    let release = api.gate("d1");
    api.fail_next("get", "d1", ClientError::Network("connection reset".to_string()));
    let mut pending = task::spawn(cache.refresh("d1"));
    assert_pending!(pending.poll());

    cache.invalidate("d1");
    release.send(()).unwrap();
    let result = assert_ready!(pending.poll());
    assert_eq!(result.unwrap_err(), ClientError::Network("connection reset".to_string()));

    // the late failure is not recorded against the newer state either
    let snapshot = cache.peek("d1").unwrap();
    assert_eq!(snapshot.deployment.unwrap().status, DeploymentStatus::Building);
    assert!(snapshot.deployment_error.is_none());
    assert!(snapshot.stale);
}

#[tokio::test]
async fn test_failure_stays_with_its_id() {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Ready, created(0)));
    api.insert(deployment("d2", DeploymentStatus::Building, created(1)));
    let cache = cache_over(&api);

    cache.get("d1").await.unwrap();
    api.fail_next("get", "d2", ClientError::Network("connection reset".to_string()));

    let failed = cache.get("d2").await;
    assert_eq!(failed.unwrap_err(), ClientError::Network("connection reset".to_string()));

    let d1 = cache.peek("d1").unwrap();
    assert!(d1.deployment_error.is_none());
    assert_eq!(d1.deployment.unwrap().status, DeploymentStatus::Ready);

    let d2 = cache.peek("d2").unwrap();
    assert!(d2.deployment.is_none());
    assert!(matches!(d2.deployment_error, Some(ClientError::Network(_))));

    // the next read recovers and clears the error
    let recovered = cache.get("d2").await.unwrap();
    assert_eq!(recovered.status, DeploymentStatus::Building);
    assert!(cache.peek("d2").unwrap().deployment_error.is_none());
}

#[tokio::test]
async fn test_invalidate_keeps_value_and_refetches() {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Building, created(0)));
    api.insert(deployment("d2", DeploymentStatus::Building, created(1)));
    let cache = cache_over(&api);
    let mut events = cache.events();

    cache.get("d1").await.unwrap();
    cache.get("d2").await.unwrap();
    cache.get("d1").await.unwrap();
    assert_eq!(api.calls_of("get", "d1").len(), 1);

    cache.invalidate("d1");
    let d1 = cache.peek("d1").unwrap();
    assert!(d1.stale);
    assert_eq!(d1.deployment.unwrap().status, DeploymentStatus::Building);
    assert!(!cache.peek("d2").unwrap().stale);

    cache.get("d1").await.unwrap();
    assert_eq!(api.calls_of("get", "d1").len(), 2);
    assert_eq!(api.calls_of("get", "d2").len(), 1);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&CacheEvent::Invalidated { id: "d1".to_string() }));
}

#[tokio::test(start_paused = true)]
async fn test_entry_goes_stale_after_window() {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Ready, created(0)));
    let cache = DeploymentCache::new(
        api.clone(),
        CacheOptions {
            stale_after: Duration::from_secs(300),
            ..Default::default()
        },
    );

    cache.get("d1").await.unwrap();
    tokio::time::advance(Duration::from_secs(299)).await;
    cache.get("d1").await.unwrap();
    assert_eq!(api.calls_of("get", "d1").len(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    cache.get("d1").await.unwrap();
    assert_eq!(api.calls_of("get", "d1").len(), 2);
}

#[tokio::test]
async fn test_list_is_newest_first_with_id_tiebreak() {
    let api = FakeApi::new();
    api.insert(deployment("b", DeploymentStatus::Ready, created(5)));
    api.insert(deployment("c", DeploymentStatus::Ready, created(10)));
    api.insert(deployment("a", DeploymentStatus::Failed, created(5)));
    api.insert(deployment("z", DeploymentStatus::Queued, created(1)));
    let cache = cache_over(&api);

    for _ in 0..3 {
        let ids: Vec<String> = cache
            .refresh_list()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b", "z"]);
    }
}

#[tokio::test]
async fn test_capacity_evicts_oldest_idle_entry() {
    let api = FakeApi::new();
    for (i, id) in ["d1", "d2", "d3"].iter().enumerate() {
        api.insert(deployment(id, DeploymentStatus::Ready, created(i as u32)));
    }
    let cache = DeploymentCache::new(
        api.clone(),
        CacheOptions {
            capacity: 2,
            ..Default::default()
        },
    );

    let _watched = cache.subscribe("d1");
    cache.get("d1").await.unwrap();
    cache.get("d2").await.unwrap();
    cache.get("d3").await.unwrap();

    assert_eq!(cache.len(), 2);
    assert!(cache.contains("d1"));
    assert!(!cache.contains("d2"));
    assert!(cache.contains("d3"));
}

#[tokio::test]
async fn test_clear_forgets_everything() {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Ready, created(0)));
    let cache = cache_over(&api);

    cache.get("d1").await.unwrap();
    cache.list().await.unwrap();
    cache.clear();

    assert!(cache.is_empty());
    assert!(cache.peek_list().is_none());
}

fn short_lived_cache(api: &std::sync::Arc<FakeApi>) -> DeploymentCache {
    DeploymentCache::new(
        api.clone(),
        CacheOptions {
            idle_ttl: Duration::from_secs(60),
            ..Default::default()
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_subscription_fetch_does_not_pin_entry() {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Building, created(0)));
    api.insert(deployment("d2", DeploymentStatus::Ready, created(1)));
    let _never_answered = api.gate("d1");
    let cache = short_lived_cache(&api);

    let subscription = cache.subscribe("d1");
    let mut pending = task::spawn(subscription.refresh());
    assert_pending!(pending.poll());

    drop(pending);
    drop(subscription);
    tokio::time::advance(Duration::from_secs(61)).await;
    cache.get("d2").await.unwrap();

    assert!(!cache.contains("d1"));
    assert!(cache.contains("d2"));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_read_stops_pinning_after_idle_ttl() {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Building, created(0)));
    api.insert(deployment("d2", DeploymentStatus::Ready, created(1)));
    api.insert(deployment("d3", DeploymentStatus::Ready, created(2)));
    let _never_answered = api.gate("d1");
    let cache = short_lived_cache(&api);

    let mut pending = task::spawn(cache.get("d1"));
    assert_pending!(pending.poll());
    drop(pending);

    tokio::time::advance(Duration::from_secs(30)).await;
    cache.get("d2").await.unwrap();
    assert!(cache.contains("d1"));

    tokio::time::advance(Duration::from_secs(31)).await;
    cache.get("d3").await.unwrap();
    assert!(!cache.contains("d1"));
}
