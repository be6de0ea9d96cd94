use std::sync::Arc;
use std::time::Duration;

use nexa_clusters::cluster::ClusterStore;
use nexa_clusters::config::PaginationConfig;
use nexa_clusters::error::NexaError;
use nexa_clusters::tasks::TaskTracker;
use nexa_clusters::types::{
    Cluster, ClusterCreateSpec, ClusterType, NetworkSettings, ResourceList, Task, TaskOperation, TaskState,
};

fn cluster(id: &str) -> Cluster {
    let spec = ClusterCreateSpec {
        name: id.to_string(),
        cluster_type: ClusterType::Swarm,
        slave_count: 1,
        master_address: Some("10.0.0.10".to_string()),
        quorum_addresses: vec!["10.0.0.1".to_string()],
        container_network: None,
        network: NetworkSettings::default(),
    };
    Cluster::from_spec(id.to_string(), &spec)
}

fn tracker(config: PaginationConfig) -> TaskTracker {
    let store = Arc::new(ClusterStore::new());
    store.insert(cluster("c1"));
    store.insert(cluster("c2"));
    TaskTracker::new(config, store)
}

fn seed(tracker: &TaskTracker, n: usize) -> Vec<String> {
    (0..n)
        .map(|_| tracker.create_task("c1", "cluster", TaskOperation::ResizeCluster).id)
        .collect()
}

fn ids(page: &ResourceList<Task>) -> Vec<String> {
    page.items.iter().map(|t| t.id.clone()).collect()
}

#[test]
fn test_walk_forward_and_back() {
    let tracker = tracker(PaginationConfig::default());
    let created = seed(&tracker, 23);

    let first = tracker.list("c1", None, None).unwrap();
    assert_eq!(ids(&first), created[..10]);
    assert!(first.previous_page_link.is_none());

    let second = tracker.get_page(first.next_page_link.as_deref().unwrap()).unwrap();
    assert_eq!(ids(&second), created[10..20]);

    let third = tracker.get_page(second.next_page_link.as_deref().unwrap()).unwrap();
    assert_eq!(ids(&third), created[20..]);
    assert!(third.next_page_link.is_none());

    let back = tracker.get_page(third.previous_page_link.as_deref().unwrap()).unwrap();
    assert_eq!(ids(&back), ids(&second));
}

#[test]
fn test_tasks_created_mid_listing_are_not_shown() {
    let tracker = tracker(PaginationConfig::default());
    let created = seed(&tracker, 12);

    let first = tracker.list("c1", None, Some(5)).unwrap();
    seed(&tracker, 4);

    let mut seen = ids(&first);
    let mut link = first.next_page_link;
    while let Some(token) = link {
        let page = tracker.get_page(&token).unwrap();
        seen.extend(ids(&page));
        link = page.next_page_link;
    }
    assert_eq!(seen, created);

    // A fresh listing sees everything.
    let fresh = tracker.list("c1", None, Some(100)).unwrap();
    assert_eq!(fresh.items.len(), 16);
}

#[test]
fn test_state_filter_is_kept_across_pages() {
    let tracker = tracker(PaginationConfig::default());
    let created = seed(&tracker, 6);
    for id in created.iter().step_by(2) {
        tracker.start(id).unwrap();
        tracker.complete(id).unwrap();
    }

    let first = tracker.list("c1", Some(TaskState::Completed), Some(2)).unwrap();
    assert!(first.items.iter().all(|t| t.state == TaskState::Completed));
    let second = tracker.get_page(first.next_page_link.as_deref().unwrap()).unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].id, created[4]);

    let queued = tracker.list("c1", Some(TaskState::Queued), None).unwrap();
    assert_eq!(queued.items.len(), 3);
}

#[test]
fn test_page_size_bounds() {
    let tracker = tracker(PaginationConfig::default());
    seed(&tracker, 3);

    let err = tracker.list("c1", None, Some(0)).unwrap_err();
    assert_eq!(err.to_string(), "The page size '0' is not between '1' and '100'");
    assert!(matches!(
        tracker.list("c1", None, Some(101)),
        Err(NexaError::InvalidPageSize { requested: 101, .. })
    ));
    assert_eq!(tracker.list("c1", None, Some(100)).unwrap().items.len(), 3);
}

#[test]
fn test_unknown_entity_and_empty_listing() {
    let tracker = tracker(PaginationConfig::default());
    assert!(matches!(tracker.list("missing", None, None), Err(NexaError::NotFound(_))));

    let empty = tracker.list("c2", None, None).unwrap();
    assert!(empty.items.is_empty());
    assert!(empty.next_page_link.is_none());
    assert!(empty.previous_page_link.is_none());
}

#[test]
fn test_forged_and_expired_links() {
    let tracker = tracker(PaginationConfig {
        cursor_ttl_secs: 1,
        ..PaginationConfig::default()
    });
    seed(&tracker, 4);
    let first = tracker.list("c1", None, Some(2)).unwrap();
    let token = first.next_page_link.unwrap();

    assert!(matches!(tracker.get_page("garbage"), Err(NexaError::PageExpired(_))));
    let (id, _) = token.split_once('.').unwrap();
    assert!(matches!(
        tracker.get_page(&format!("{}.0000000000000000", id)),
        Err(NexaError::PageExpired(_))
    ));
    assert!(tracker.get_page(&token).is_ok());

    std::thread::sleep(Duration::from_millis(1100));
    assert!(matches!(tracker.get_page(&token), Err(NexaError::PageExpired(_))));
    tracker.purge_expired();
}
