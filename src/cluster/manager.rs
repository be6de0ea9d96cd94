use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config_builder::{ClusterConfigBuilder, FrozenClusterConfig};
use super::iaas::IaasClient;
use super::plan::{prepare_phase, Layout, PreparedNode};
use super::provisioner::{Attempted, ProvisioningPool};
use super::store::ClusterStore;
use crate::config::ServerConfig;
use crate::error::{NexaError, Result};
use crate::tasks::TaskTracker;
use crate::templates::{IdGenerator, TemplateRegistry, UuidGenerator};
use crate::types::{
    Cluster, ClusterCreateSpec, ClusterResizeSpec, ClusterState, Node, NodeRole, Task, TaskOperation, TaskState,
};

pub const ENTITY_KIND: &str = "cluster";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handle on a running lifecycle transition
struct Transition {
    task_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Everything a transition worker needs, cheap to clone into spawned tasks
#[derive(Clone)]
struct Shared {
    store: Arc<ClusterStore>,
    tracker: Arc<TaskTracker>,
    registry: Arc<TemplateRegistry>,
    pool: Arc<ProvisioningPool>,
    host_ids: Arc<dyn IdGenerator>,
    script_directory: Arc<str>,
    transitions: Arc<DashMap<String, Transition>>,
}

/// Cluster lifecycle state machine.
///
/// Create, resize and delete each open a Task, move the cluster into a
/// transitional state with a compare-and-set and hand the work to a spawned
/// worker. The worker provisions one phase of the topology at a time and every
/// node of a phase in parallel through the [`ProvisioningPool`].
pub struct ClusterManager {
    shared: Shared,
    /// Serializes admission of transitions: CAS, task creation and spawn
    admission: Mutex<()>,
}

impl ClusterManager {
    pub fn new(
        store: Arc<ClusterStore>,
        tracker: Arc<TaskTracker>,
        registry: Arc<TemplateRegistry>,
        pool: Arc<ProvisioningPool>,
        script_directory: impl Into<String>,
    ) -> Self {
        let script_directory: String = script_directory.into();
        Self {
            shared: Shared {
                store,
                tracker,
                registry,
                pool,
                host_ids: Arc::new(UuidGenerator),
                script_directory: Arc::from(script_directory),
                transitions: Arc::new(DashMap::new()),
            },
            admission: Mutex::new(()),
        }
    }

    /// Wire a manager from configuration around the given IaaS client
    pub fn from_config(config: &ServerConfig, iaas: Arc<dyn IaasClient>) -> Self {
        let store = Arc::new(ClusterStore::new());
        let tracker = Arc::new(TaskTracker::new(config.pagination, store.clone()));
        let registry = Arc::new(TemplateRegistry::with_defaults(Arc::new(UuidGenerator)));
        let pool = Arc::new(ProvisioningPool::new(iaas, &config.provisioning));
        Self::new(
            store,
            tracker,
            registry,
            pool,
            config.provisioning.script_directory.clone(),
        )
    }

    /// Replace the source of node host ids
    pub fn with_host_ids(mut self, host_ids: Arc<dyn IdGenerator>) -> Self {
        self.shared.host_ids = host_ids;
        self
    }

    pub fn store(&self) -> &Arc<ClusterStore> {
        &self.shared.store
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.shared.tracker
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.shared.registry
    }

    pub fn get_cluster(&self, id: &str) -> Result<Cluster> {
        self.shared.store.get(id)
    }

    pub fn list_clusters(&self) -> Vec<Cluster> {
        self.shared.store.list()
    }

    /// Validate the request, store the cluster in CREATING and start provisioning.
    /// Invalid requests fail here and leave no state behind.
    pub fn create_cluster(&self, spec: ClusterCreateSpec) -> Result<(Cluster, Task)> {
        spec.validate()?;
        let registry = &self.shared.registry;
        for &role in registry.topology(spec.cluster_type)? {
            registry.lookup(spec.cluster_type, role)?;
        }

        let _admission = self.admission.lock();
        let mut cluster = Cluster::from_spec(Uuid::new_v4().to_string(), &spec);
        let task = self
            .shared
            .tracker
            .create_task(&cluster.id, ENTITY_KIND, TaskOperation::CreateCluster);
        cluster.active_task_id = Some(task.id.clone());
        self.shared.store.insert(cluster.clone());
        info!(
            "Creating {} cluster {} ({}) with task {}",
            cluster.cluster_type, cluster.name, cluster.id, task.id
        );

        let cancel = CancellationToken::new();
        let shared = self.shared.clone();
        let (cluster_id, task_id) = (cluster.id.clone(), task.id.clone());
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = shared.create_nodes(&cluster_id, &task_id, &spec, &token).await;
            shared.settle(&cluster_id, &task_id, result, ClusterState::Ready);
        });
        self.register(&cluster.id, &task.id, cancel, handle);

        Ok((cluster, task))
    }

    /// Scale a READY cluster out to `spec.slave_count` slaves, adding any extra
    /// quorum members first.
    pub fn resize_cluster(&self, id: &str, spec: ClusterResizeSpec) -> Result<Task> {
        let _admission = self.admission.lock();
        let cluster = self.shared.store.get(id)?;
        match cluster.state {
            ClusterState::Ready => spec.validate_against(&cluster)?,
            state if state.is_transitional() => return Err(NexaError::ConcurrentOperation(id.to_string())),
            state => return Err(NexaError::InvalidState(format!("cluster {} is {}", id, state))),
        }

        self.shared
            .store
            .compare_and_set_state(id, &[ClusterState::Ready], ClusterState::Resizing, None)?;
        let task = self.open_task(id, TaskOperation::ResizeCluster)?;
        info!(
            "Resizing cluster {} from {} to {} slaves with task {}",
            id, cluster.slave_count, spec.slave_count, task.id
        );

        let cancel = CancellationToken::new();
        let shared = self.shared.clone();
        let (cluster_id, task_id) = (id.to_string(), task.id.clone());
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = shared.resize_nodes(&cluster_id, &task_id, &spec, &token).await;
            shared.settle(&cluster_id, &task_id, result, ClusterState::Ready);
        });
        self.register(id, &task.id, cancel, handle);

        Ok(task)
    }

    /// Delete every VM of the cluster. A create or resize still running is
    /// cancelled first and its task ends in ERROR "cancelled".
    pub fn delete_cluster(&self, id: &str) -> Result<Task> {
        let _admission = self.admission.lock();
        let cluster = self.shared.store.get(id)?;
        match cluster.state {
            ClusterState::Deleted => {
                return Err(NexaError::InvalidState(format!("cluster {} is already deleted", id)))
            }
            ClusterState::Deleting => return Err(NexaError::ConcurrentOperation(id.to_string())),
            _ => {}
        }

        self.shared.store.compare_and_set_state(
            id,
            &[
                ClusterState::Ready,
                ClusterState::Error,
                ClusterState::Creating,
                ClusterState::Resizing,
            ],
            ClusterState::Deleting,
            None,
        )?;

        let mut superseded = None;
        if let Some((_, running)) = self.shared.transitions.remove(id) {
            if cluster.state.is_transitional() {
                info!("Cancelling task {} of cluster {} for delete", running.task_id, id);
                running.cancel.cancel();
            }
            superseded = Some(running.handle);
        }
        if let Some(active) = cluster.active_task_id.as_deref() {
            log_tracker(self.shared.tracker.cancel(active), active);
        }

        let task = self.open_task(id, TaskOperation::DeleteCluster)?;
        info!("Deleting cluster {} with task {}", id, task.id);

        let cancel = CancellationToken::new();
        let shared = self.shared.clone();
        let (cluster_id, task_id) = (id.to_string(), task.id.clone());
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = shared.delete_nodes(&cluster_id, &task_id, superseded, &token).await;
            shared.settle(&cluster_id, &task_id, result, ClusterState::Deleted);
        });
        self.register(id, &task.id, cancel, handle);

        Ok(task)
    }

    /// Poll until the task reaches COMPLETED or ERROR
    pub async fn wait_for_task(&self, task_id: &str, timeout: Duration) -> Result<Task> {
        let deadline = Instant::now() + timeout;
        loop {
            let task = self.shared.tracker.get_task(task_id)?;
            if task.state.is_terminal() {
                return Ok(task);
            }
            if Instant::now() >= deadline {
                return Err(NexaError::Timeout(format!(
                    "task {} is still {} after {:?}",
                    task_id, task.state, timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn open_task(&self, cluster_id: &str, operation: TaskOperation) -> Result<Task> {
        let task = self.shared.tracker.create_task(cluster_id, ENTITY_KIND, operation);
        self.shared
            .store
            .update(cluster_id, |c| c.active_task_id = Some(task.id.clone()))?;
        Ok(task)
    }

    fn register(&self, cluster_id: &str, task_id: &str, cancel: CancellationToken, handle: JoinHandle<()>) {
        self.shared.transitions.insert(
            cluster_id.to_string(),
            Transition {
                task_id: task_id.to_string(),
                cancel,
                handle,
            },
        );
    }
}

impl Shared {
    async fn create_nodes(
        &self,
        cluster_id: &str,
        task_id: &str,
        spec: &ClusterCreateSpec,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.tracker.start(task_id)?;
        let cluster = self.store.get(cluster_id)?;
        let config = ClusterConfigBuilder::new(&cluster)
            .joining_quorum(spec.quorum_addresses.clone())
            .master_address(spec.master_address.clone())
            .freeze()?;
        let layout = Layout::create(spec.slave_count);

        let phases = self.registry.topology(cluster.cluster_type)?.to_vec();
        for role in phases {
            self.run_phase(cluster_id, task_id, &config, &layout, role, cancel).await?;
        }
        Ok(())
    }

    async fn resize_nodes(
        &self,
        cluster_id: &str,
        task_id: &str,
        spec: &ClusterResizeSpec,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.tracker.start(task_id)?;
        let cluster = self.store.get(cluster_id)?;
        // New slaves are templated with the quorum as of now, without the joining members.
        let config = ClusterConfigBuilder::new(&cluster)
            .joining_quorum(spec.additional_quorum_addresses.clone())
            .freeze()?;
        let layout = Layout::resize(&cluster, spec.slave_count);

        let quorum_role = self.registry.quorum_role(cluster.cluster_type)?;
        self.run_phase(cluster_id, task_id, &config, &layout, quorum_role, cancel)
            .await?;
        self.run_phase(cluster_id, task_id, &config, &layout, NodeRole::Slave, cancel)
            .await
    }

    async fn delete_nodes(
        &self,
        cluster_id: &str,
        task_id: &str,
        superseded: Option<JoinHandle<()>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.tracker.start(task_id)?;
        if let Some(handle) = superseded {
            // The cancelled worker may still be recording nodes it created.
            if let Err(e) = handle.await {
                warn!("Superseded transition of cluster {} ended abnormally: {}", cluster_id, e);
            }
        }

        let nodes: Vec<Node> = self
            .store
            .get(cluster_id)?
            .nodes
            .into_iter()
            .filter(|n| n.vm_id.is_some())
            .collect();
        debug!("Deleting {} VMs of cluster {}", nodes.len(), cluster_id);

        let mut workers = JoinSet::new();
        for node in nodes {
            let sequence = self.tracker.append_step(task_id, &format!("delete {}", node.vm_name))?;
            let shared = self.clone();
            let (cluster_id, task_id, cancel) = (cluster_id.to_string(), task_id.to_string(), cancel.clone());
            workers.spawn(async move { shared.delete_node(&cluster_id, &task_id, sequence, node, &cancel).await });
        }
        join_all(workers).await
    }

    /// Provision every node of one phase and wait for all of them.
    async fn run_phase(
        &self,
        cluster_id: &str,
        task_id: &str,
        config: &Arc<FrozenClusterConfig>,
        layout: &Layout,
        role: NodeRole,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let plans = layout.plans(role, config);
        if plans.is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(NexaError::Cancelled(format!("cluster {}", cluster_id)));
        }

        // Template errors are not retryable and abort the transition before any VM is requested.
        let template = self.registry.lookup(config.cluster_type, role)?;
        let mut taken: HashSet<String> = self
            .store
            .get(cluster_id)?
            .nodes
            .into_iter()
            .map(|n| n.host_id)
            .collect();
        let prepared = prepare_phase(
            template.as_ref(),
            config,
            &self.script_directory,
            plans,
            self.host_ids.as_ref(),
            &mut taken,
        )?;
        info!("Provisioning {} {} node(s) for cluster {}", prepared.len(), role, cluster_id);

        let mut workers = JoinSet::new();
        for node in prepared {
            let sequence = self.tracker.append_step(task_id, &format!("provision {}", node.vm.name))?;
            let shared = self.clone();
            let (cluster_id, task_id, cancel) = (cluster_id.to_string(), task_id.to_string(), cancel.clone());
            workers.spawn(async move { shared.provision_node(&cluster_id, &task_id, sequence, node, &cancel).await });
        }
        let joined = join_all(workers).await;

        // Members that came up join the quorum in index order, even when a sibling failed.
        if role.is_quorum_member() {
            self.store.update(cluster_id, |c| -> Result<()> {
                for address in &config.joining_quorum {
                    let up = c
                        .nodes_with_role(role)
                        .any(|n| n.ip_address.as_deref() == Some(address.as_str()));
                    if up && !c.quorum.contains(address) {
                        c.append_quorum_member(address)?;
                    }
                }
                Ok(())
            })??;
        }
        joined
    }

    async fn provision_node(
        &self,
        cluster_id: &str,
        task_id: &str,
        sequence: u32,
        node: PreparedNode,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Attempted { result, attempts } = self.pool.create_vm(&node.vm, &node.artifacts, cancel).await;
        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to provision {} for cluster {}: {}", node.vm.name, cluster_id, e);
                log_tracker(
                    self.tracker
                        .update_step(task_id, sequence, TaskState::Error, attempts, Some(e.to_string())),
                    task_id,
                );
                return Err(e);
            }
        };

        let role = node.vm.role;
        let record = Node {
            id: Uuid::new_v4().to_string(),
            role,
            host_id: node.vm.host_id,
            vm_name: node.vm.name,
            vm_id: Some(handle.vm_id.clone()),
            ip_address: Some(handle.ip_address.clone()),
            artifacts: Some(node.artifacts),
        };
        self.store.update(cluster_id, |c| -> Result<()> {
            if role == NodeRole::Master {
                c.fix_master_address(&handle.ip_address)?;
            }
            if role == NodeRole::Slave {
                c.slave_count += 1;
            }
            c.nodes.push(record);
            Ok(())
        })??;

        log_tracker(
            self.tracker.update_step(
                task_id,
                sequence,
                TaskState::Completed,
                attempts,
                Some(format!("vm {} at {}", handle.vm_id, handle.ip_address)),
            ),
            task_id,
        );
        Ok(())
    }

    async fn delete_node(
        &self,
        cluster_id: &str,
        task_id: &str,
        sequence: u32,
        node: Node,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let vm_id = node.vm_id.clone().unwrap_or_default();
        let Attempted { result, attempts } = self.pool.delete_vm(&vm_id, cancel).await;
        if let Err(e) = result {
            error!("Failed to delete {} of cluster {}: {}", node.vm_name, cluster_id, e);
            log_tracker(
                self.tracker
                    .update_step(task_id, sequence, TaskState::Error, attempts, Some(e.to_string())),
                task_id,
            );
            return Err(e);
        }

        self.store.update(cluster_id, |c| {
            c.nodes.retain(|n| n.id != node.id);
            if node.role == NodeRole::Slave {
                c.slave_count = c.slave_count.saturating_sub(1);
            }
        })?;
        log_tracker(
            self.tracker
                .update_step(task_id, sequence, TaskState::Completed, attempts, None),
            task_id,
        );
        Ok(())
    }

    /// Record the outcome of a transition on the cluster and its task.
    fn settle(&self, cluster_id: &str, task_id: &str, result: Result<()>, success: ClusterState) {
        match result {
            Ok(()) => match self.store.finish_transition(cluster_id, task_id, success, None) {
                Ok(true) => {
                    info!("Cluster {} is {}", cluster_id, success);
                    log_tracker(self.tracker.complete(task_id), task_id);
                }
                Ok(false) => {
                    info!("Task {} of cluster {} was superseded", task_id, cluster_id);
                    log_tracker(self.tracker.cancel(task_id), task_id);
                }
                Err(e) => error!("Failed to settle cluster {}: {}", cluster_id, e),
            },
            Err(NexaError::Cancelled(_)) => {
                debug!("Task {} of cluster {} stopped after cancellation", task_id, cluster_id);
                log_tracker(self.tracker.cancel(task_id), task_id);
            }
            Err(e) => match self
                .store
                .finish_transition(cluster_id, task_id, ClusterState::Error, Some(e.to_string()))
            {
                Ok(true) => {
                    error!("Task {} of cluster {} failed: {}", task_id, cluster_id, e);
                    log_tracker(self.tracker.fail(task_id, e.to_string()), task_id);
                }
                Ok(false) => {
                    debug!("Task {} of cluster {} stopped after being superseded: {}", task_id, cluster_id, e);
                    log_tracker(self.tracker.cancel(task_id), task_id);
                }
                Err(store_err) => error!("Failed to settle cluster {}: {}", cluster_id, store_err),
            },
        }
        self.transitions.remove_if(cluster_id, |_, t| t.task_id == task_id);
    }
}

/// Join every worker of a phase. The first failure is reported once all
/// siblings have finished; nodes that did come up are kept.
async fn join_all(mut workers: JoinSet<Result<()>>) -> Result<()> {
    let mut first_error = None;
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined.map_err(NexaError::from).and_then(|r| r) {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Tracker updates after a task was forced terminal are expected and dropped.
fn log_tracker(result: Result<()>, task_id: &str) {
    if let Err(e) = result {
        debug!("Ignoring update of task {}: {}", task_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::iaas::InMemoryIaas;
    use crate::cluster::provisioner::RetryPolicy;
    use crate::config::PaginationConfig;
    use crate::templates::SequentialIdGenerator;
    use crate::types::{ClusterType, NetworkSettings};

    const WAIT: Duration = Duration::from_secs(5);

    fn manager(iaas: Arc<InMemoryIaas>) -> ClusterManager {
        let store = Arc::new(ClusterStore::new());
        let tracker = Arc::new(TaskTracker::new(PaginationConfig::default(), store.clone()));
        let registry = Arc::new(TemplateRegistry::with_defaults(Arc::new(UuidGenerator)));
        let policy = RetryPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(1),
        };
        let pool = Arc::new(ProvisioningPool::with_policy(iaas, 4, policy));
        ClusterManager::new(store, tracker, registry, pool, "/scripts")
            .with_host_ids(Arc::new(SequentialIdGenerator::new("h")))
    }

    fn mesos() -> ClusterCreateSpec {
        ClusterCreateSpec {
            name: "mesos".to_string(),
            cluster_type: ClusterType::Mesos,
            slave_count: 2,
            master_address: Some("10.0.0.10".to_string()),
            quorum_addresses: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            container_network: None,
            network: NetworkSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_create_provisions_every_phase() {
        let iaas = Arc::new(InMemoryIaas::new());
        let manager = manager(iaas.clone());
        let (cluster, task) = manager.create_cluster(mesos()).unwrap();
        assert_eq!(cluster.state, ClusterState::Creating);

        let task = manager.wait_for_task(&task.id, WAIT).await.unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.steps.len(), 6);

        let cluster = manager.get_cluster(&cluster.id).unwrap();
        assert_eq!(cluster.state, ClusterState::Ready);
        assert_eq!(cluster.quorum, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(cluster.master_address.as_deref(), Some("10.0.0.10"));
        assert_eq!(cluster.slave_count, 2);
        assert_eq!(cluster.nodes_with_role(NodeRole::Marathon).count(), 1);
        assert_eq!(iaas.vm_count(), 6);
    }

    #[tokio::test]
    async fn test_invalid_create_leaves_no_state() {
        let manager = manager(Arc::new(InMemoryIaas::new()));
        let mut spec = mesos();
        spec.quorum_addresses.clear();
        assert!(matches!(manager.create_cluster(spec), Err(NexaError::InvalidArgument(_))));
        assert!(manager.list_clusters().is_empty());
    }

    #[tokio::test]
    async fn test_second_transition_is_rejected() {
        let iaas = Arc::new(InMemoryIaas::new());
        iaas.set_delay(Duration::from_millis(50));
        let manager = manager(iaas);
        let (cluster, task) = manager.create_cluster(mesos()).unwrap();

        let err = manager
            .resize_cluster(
                &cluster.id,
                ClusterResizeSpec {
                    slave_count: 3,
                    additional_quorum_addresses: Vec::new(),
                },
            )
            .unwrap_err();
        assert_eq!(err, NexaError::ConcurrentOperation(cluster.id.clone()));
        manager.wait_for_task(&task.id, WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_phase_moves_cluster_to_error() {
        let iaas = Arc::new(InMemoryIaas::new());
        iaas.fail_role(NodeRole::Marathon);
        let manager = manager(iaas.clone());
        let (cluster, task) = manager.create_cluster(mesos()).unwrap();

        let task = manager.wait_for_task(&task.id, WAIT).await.unwrap();
        assert_eq!(task.state, TaskState::Error);
        let failed = task.steps.iter().find(|s| s.state == TaskState::Error).unwrap();
        assert_eq!(failed.attempts, 3);

        let cluster = manager.get_cluster(&cluster.id).unwrap();
        assert_eq!(cluster.state, ClusterState::Error);
        assert!(cluster.error_reason.is_some());
        // Slaves come after marathon and were never requested.
        assert_eq!(cluster.slave_count, 0);
        assert_eq!(iaas.vm_count(), 3);
    }
}
