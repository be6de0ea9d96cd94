use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nexa_clusters::cluster::preview_cluster;
use nexa_clusters::config::PaginationConfig;
use nexa_clusters::tasks::{EntityStore, TaskTracker};
use nexa_clusters::templates::{quorum_string, SequentialIdGenerator, TemplateRegistry, UuidGenerator};
use nexa_clusters::types::{ClusterCreateSpec, ClusterType, NetworkSettings, TaskOperation};

struct AnyEntity;

impl EntityStore for AnyEntity {
    fn contains(&self, _entity_id: &str) -> bool {
        true
    }
}

fn spec(cluster_type: ClusterType, slave_count: u32) -> ClusterCreateSpec {
    ClusterCreateSpec {
        name: "bench".to_string(),
        cluster_type,
        slave_count,
        master_address: Some("10.0.0.10".to_string()),
        quorum_addresses: (1..=5).map(|i| format!("10.0.0.{}", i)).collect(),
        container_network: Some("10.2.0.0/16".to_string()),
        network: NetworkSettings::default(),
    }
}

pub fn template_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("templates");
    let registry = TemplateRegistry::with_defaults(Arc::new(UuidGenerator));

    let addresses: Vec<String> = (1..=7).map(|i| format!("10.0.0.{}", i)).collect();
    group.bench_function("quorum_string", |b| b.iter(|| quorum_string(black_box(&addresses), 2379)));

    for cluster_type in [ClusterType::Kubernetes, ClusterType::Mesos] {
        let spec = spec(cluster_type, 50);
        group.bench_function(format!("preview_{}", cluster_type.as_str().to_lowercase()), |b| {
            b.iter(|| {
                let ids = SequentialIdGenerator::new("h");
                black_box(preview_cluster(&registry, &spec, "/scripts", &ids).unwrap())
            })
        });
    }

    group.finish();
}

fn pagination_benchmark(c: &mut Criterion) {
    let tracker = TaskTracker::new(PaginationConfig::default(), Arc::new(AnyEntity));
    for _ in 0..1_000 {
        tracker.create_task("c1", "cluster", TaskOperation::ResizeCluster);
    }

    c.bench_function("list_and_walk_tasks", |b| {
        b.iter(|| {
            let mut page = tracker.list("c1", None, Some(100)).unwrap();
            while let Some(token) = page.next_page_link.take() {
                page = tracker.get_page(&token).unwrap();
            }
            black_box(page.items.len())
        })
    });
}

criterion_group!(benches, template_benchmark, pagination_benchmark);
criterion_main!(benches);
