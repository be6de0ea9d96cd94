use dashmap::DashMap;
use tracing::debug;

use crate::error::{NexaError, Result};
use crate::tasks::EntityStore;
use crate::types::{Cluster, ClusterState};

/// In-memory cluster records. Every state change goes through a per-record
/// compare-and-set so at most one lifecycle transition owns a cluster.
#[derive(Debug, Default)]
pub struct ClusterStore {
    clusters: DashMap<String, Cluster>,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, cluster: Cluster) {
        debug!("Storing cluster {} ({})", cluster.id, cluster.name);
        self.clusters.insert(cluster.id.clone(), cluster);
    }

    pub fn get(&self, id: &str) -> Result<Cluster> {
        self.clusters
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| NexaError::NotFound(format!("cluster {}", id)))
    }

    /// Live clusters, oldest first
    pub fn list(&self) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = self
            .clusters
            .iter()
            .filter(|c| c.state != ClusterState::Deleted)
            .map(|c| c.clone())
            .collect();
        clusters.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        clusters
    }

    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Cluster) -> R) -> Result<R> {
        let mut cluster = self
            .clusters
            .get_mut(id)
            .ok_or_else(|| NexaError::NotFound(format!("cluster {}", id)))?;
        Ok(f(&mut cluster))
    }

    /// Move a cluster to `to` if its current state is one of `allowed_from`,
    /// recording `task_id` as the owner of the new state. Returns the cluster
    /// as it was before the change.
    pub fn compare_and_set_state(
        &self,
        id: &str,
        allowed_from: &[ClusterState],
        to: ClusterState,
        task_id: Option<&str>,
    ) -> Result<Cluster> {
        let mut cluster = self
            .clusters
            .get_mut(id)
            .ok_or_else(|| NexaError::NotFound(format!("cluster {}", id)))?;

        if !allowed_from.contains(&cluster.state) {
            return Err(if cluster.state.is_transitional() {
                NexaError::ConcurrentOperation(id.to_string())
            } else {
                NexaError::InvalidState(format!("cluster {} is {}", id, cluster.state))
            });
        }

        let previous = cluster.clone();
        cluster.state = to;
        cluster.active_task_id = task_id.map(str::to_string);
        if to != ClusterState::Error {
            cluster.error_reason = None;
        }
        debug!("Cluster {} {} -> {}", id, previous.state, to);
        Ok(previous)
    }

    /// End a transition, but only if `task_id` still owns the cluster. Returns
    /// false when another transition (a delete) took over in the meantime.
    pub fn finish_transition(
        &self,
        id: &str,
        task_id: &str,
        to: ClusterState,
        error_reason: Option<String>,
    ) -> Result<bool> {
        self.update(id, |cluster| {
            if cluster.active_task_id.as_deref() != Some(task_id) {
                return false;
            }
            debug!("Cluster {} {} -> {}", id, cluster.state, to);
            cluster.state = to;
            cluster.active_task_id = None;
            cluster.error_reason = error_reason;
            true
        })
    }

    /// Whether `task_id` still owns the cluster
    pub fn is_owned_by(&self, id: &str, task_id: &str) -> bool {
        self.clusters
            .get(id)
            .is_some_and(|c| c.active_task_id.as_deref() == Some(task_id))
    }
}

impl EntityStore for ClusterStore {
    fn contains(&self, entity_id: &str) -> bool {
        self.clusters.contains_key(entity_id)
    }
}
