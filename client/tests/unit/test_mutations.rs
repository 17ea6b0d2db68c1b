//! Mutation coordinator tests

use std::sync::Arc;
use std::time::Duration;

use jsd_client::cache::deployment::{CacheEvent, CacheOptions, DeploymentCache};
use jsd_client::errors::ClientError;
use jsd_client::models::deployment::DeploymentStatus;
use jsd_client::workers::mutations::{MutationCoordinator, NewDeployment};
use jsd_client::workers::poller::{Options, StatusPoller, TailEvent};

use crate::support::{created, deployment, FakeApi};

struct Fixture {
    api: Arc<FakeApi>,
    cache: DeploymentCache,
    mutations: MutationCoordinator,
}

fn fixture() -> Fixture {
    let api = FakeApi::new();
    api.insert(deployment("d1", DeploymentStatus::Ready, created(0)));
    api.insert(deployment("d2", DeploymentStatus::Building, created(1)));
    api.insert(deployment("d3", DeploymentStatus::Failed, created(2)));

    let cache = DeploymentCache::new(api.clone(), CacheOptions::default());
    let mutations = MutationCoordinator::new(api.clone(), cache.clone());
    Fixture {
        api,
        cache,
        mutations,
    }
}

async fn warm(fixture: &Fixture) {
    for id in ["d1", "d2", "d3"] {
        fixture.cache.get(id).await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_building_ends_as_cancelled() {
    let fixture = fixture();
    warm(&fixture).await;

    fixture.mutations.cancel("d2").await.unwrap();

    let d2 = fixture.cache.peek("d2").unwrap();
    assert!(d2.stale);
    assert_eq!(d2.deployment.unwrap().status, DeploymentStatus::Building);
    assert!(!fixture.cache.peek("d1").unwrap().stale);
    assert!(!fixture.cache.peek("d3").unwrap().stale);

    let observed = fixture.cache.get("d2").await.unwrap();
    assert_eq!(observed.status, DeploymentStatus::Cancelled);
    assert_eq!(fixture.api.calls_of("get", "d2").len(), 2);

    // the tail sees a terminal status: final snapshot, then nothing
    let poller = StatusPoller::new(fixture.cache.clone(), Options::default());
    let mut tail = poller.watch("d2");
    let mut ended = None;
    while let Some(event) = tail.next().await {
        if let TailEvent::Ended(status) = event {
            ended = Some(status);
            break;
        }
    }
    assert_eq!(ended, Some(DeploymentStatus::Cancelled));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(fixture.api.calls_of("logs", "d2").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_wakes_a_live_tail() {
    let fixture = fixture();
    let poller = StatusPoller::new(fixture.cache.clone(), Options::default());

    let mut tail = poller.watch("d2");
    while !matches!(tail.next().await, Some(TailEvent::Logs(_))) {}

    fixture.mutations.cancel("d2").await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = tail.next().await {
        let done = matches!(event, TailEvent::Ended(_));
        events.push(event);
        if done {
            break;
        }
    }
    assert!(matches!(
        events.as_slice(),
        [TailEvent::Status(d), TailEvent::Logs(_), TailEvent::Ended(DeploymentStatus::Cancelled)]
            if d.status == DeploymentStatus::Cancelled
    ));
    assert_eq!(fixture.api.ops_for("d2"), vec!["get", "logs", "cancel", "get", "logs"]);

    // the invalidation cut the scheduled wait short
    let cancel = &fixture.api.calls_of("cancel", "d2")[0];
    let gets = fixture.api.calls_of("get", "d2");
    assert!(gets[1].at - cancel.at < Duration::from_millis(2000));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(fixture.api.calls_of("logs", "d2").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rebuild_resumes_a_finished_tail() {
    let fixture = fixture();
    let poller = StatusPoller::new(fixture.cache.clone(), Options::default());

    let mut tail = poller.watch("d1");
    let mut first = Vec::new();
    while let Some(event) = tail.next().await {
        let done = matches!(event, TailEvent::Ended(_));
        first.push(event);
        if done {
            break;
        }
    }
    assert!(matches!(first.last(), Some(TailEvent::Ended(DeploymentStatus::Ready))));
    assert!(!fixture.cache.peek("d1").unwrap().active_poll);

    fixture.api.script(
        "d1",
        vec![DeploymentStatus::Queued, DeploymentStatus::Building, DeploymentStatus::Ready],
    );
    fixture.mutations.rebuild("d1").await.unwrap();
    assert!(poller.is_watching("d1"));

    let mut statuses = Vec::new();
    let mut lines = Vec::new();
    while let Some(event) = tail.next().await {
        match event {
            TailEvent::Status(d) => statuses.push(d.status),
            TailEvent::Logs(entries) => lines.extend(entries.into_iter().map(|e| e.content)),
            TailEvent::Ended(status) => {
                assert_eq!(status, DeploymentStatus::Ready);
                break;
            }
            other => panic!("unexpected tail event {:?}", other),
        }
    }

    assert_eq!(
        statuses,
        vec![DeploymentStatus::Queued, DeploymentStatus::Building, DeploymentStatus::Ready]
    );
    // the rebuilt deployment's log stream starts over
    assert_eq!(lines, vec!["line 1", "line 2"]);
    assert_eq!(
        fixture.api.ops_for("d1"),
        vec!["get", "logs", "rebuild", "get", "get", "logs", "get", "logs"]
    );
}

#[tokio::test]
async fn test_rebuild_invalidates_record_and_logs_only() {
    let fixture = fixture();
    warm(&fixture).await;
    fixture.cache.logs("d1").await.unwrap();

    fixture.mutations.rebuild("d1").await.unwrap();

    let d1 = fixture.cache.peek("d1").unwrap();
    assert!(d1.stale);
    assert!(d1.logs_stale);
    assert_eq!(d1.deployment.unwrap().status, DeploymentStatus::Ready);
    assert!(!fixture.cache.peek("d3").unwrap().stale);

    let observed = fixture.cache.get("d1").await.unwrap();
    assert_eq!(observed.status, DeploymentStatus::Queued);
}

#[tokio::test]
async fn test_delete_removes_entry_and_notifies_views() {
    let fixture = fixture();
    warm(&fixture).await;
    let mut events = fixture.cache.events();

    fixture.mutations.delete("d3").await.unwrap();

    assert!(!fixture.cache.contains("d3"));
    assert!(fixture.cache.contains("d1"));
    assert!(!fixture.cache.peek("d1").unwrap().stale);

    let mut removed = false;
    while let Ok(event) = events.try_recv() {
        removed |= event == CacheEvent::Removed { id: "d3".to_string() };
    }
    assert!(removed);
}

#[tokio::test]
async fn test_failed_mutation_leaves_cache_unchanged() {
    let fixture = fixture();
    warm(&fixture).await;
    fixture.api.fail_next(
        "cancel",
        "d2",
        ClientError::Api {
            status: 409,
            message: "Deployment is already finishing".to_string(),
        },
    );

    let result = fixture.mutations.cancel("d2").await;
    assert_eq!(
        result.unwrap_err(),
        ClientError::Api {
            status: 409,
            message: "Deployment is already finishing".to_string()
        }
    );

    let d2 = fixture.cache.peek("d2").unwrap();
    assert!(!d2.stale);
    assert_eq!(d2.deployment.unwrap().status, DeploymentStatus::Building);

    fixture.api.fail_next("delete", "d1", ClientError::Network("offline".to_string()));
    assert!(fixture.mutations.delete("d1").await.is_err());
    assert!(fixture.cache.contains("d1"));
}

#[tokio::test]
async fn test_mutation_rejected_by_cached_status() {
    let fixture = fixture();
    warm(&fixture).await;

    let cancel_finished = fixture.mutations.cancel("d1").await;
    assert!(matches!(cancel_finished, Err(ClientError::Validation(_))));

    let delete_running = fixture.mutations.delete("d2").await;
    assert!(matches!(delete_running, Err(ClientError::Validation(_))));

    let missing_id = fixture.mutations.rebuild("  ").await;
    assert!(matches!(missing_id, Err(ClientError::Validation(_))));

    assert!(fixture.api.calls_of("cancel", "d1").is_empty());
    assert!(fixture.api.calls_of("delete", "d2").is_empty());
}

#[tokio::test]
async fn test_uncached_status_is_left_to_backend() {
    let fixture = fixture();

    fixture.mutations.cancel("d2").await.unwrap();
    assert_eq!(fixture.api.status_of("d2"), Some(DeploymentStatus::Cancelled));
}

#[tokio::test]
async fn test_create_invalidates_list() {
    let fixture = fixture();
    assert_eq!(fixture.cache.list().await.unwrap().len(), 3);

    let id = fixture
        .mutations
        .create(NewDeployment {
            repo_url: "https://github.com/acme/shop".to_string(),
            project_name: "shop".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let created = fixture.api.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].branch, "main");

    let listed = fixture.cache.list().await.unwrap();
    assert_eq!(listed.len(), 4);
    assert_eq!(listed[0].id, id);
}

#[tokio::test]
async fn test_branches_require_repo() {
    let fixture = fixture();

    assert!(matches!(
        fixture.mutations.branches(" ").await,
        Err(ClientError::Validation(_))
    ));
    assert_eq!(
        fixture.mutations.branches("https://github.com/acme/shop").await.unwrap(),
        vec!["develop".to_string(), "main".to_string()]
    );
}
