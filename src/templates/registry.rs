use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{
    EtcdTemplate, IdGenerator, KubernetesMasterTemplate, KubernetesSlaveTemplate, MesosMarathonTemplate,
    MesosMasterTemplate, MesosSlaveTemplate, MesosZookeeperTemplate, NodeTemplate, SwarmMasterTemplate,
    SwarmSlaveTemplate,
};
use crate::error::{NexaError, Result};
use crate::types::{ClusterType, NodeRole};

/// Registry of node templates keyed by (cluster type, role), plus the ordered
/// provisioning phases of each cluster type.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<(ClusterType, NodeRole), Arc<dyn NodeTemplate>>,
    topologies: HashMap<ClusterType, Vec<NodeRole>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in template and topology
    pub fn with_defaults(ids: Arc<dyn IdGenerator>) -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(EtcdTemplate::new(ClusterType::Kubernetes, ids.clone())));
        registry.register(Arc::new(KubernetesMasterTemplate::new(ids.clone())));
        registry.register(Arc::new(KubernetesSlaveTemplate::new(ids.clone())));
        registry.register_topology(
            ClusterType::Kubernetes,
            vec![NodeRole::Etcd, NodeRole::Master, NodeRole::Slave],
        );

        registry.register(Arc::new(MesosZookeeperTemplate::new(ids.clone())));
        registry.register(Arc::new(MesosMasterTemplate::new(ids.clone())));
        registry.register(Arc::new(MesosMarathonTemplate::new(ids.clone())));
        registry.register(Arc::new(MesosSlaveTemplate::new(ids.clone())));
        registry.register_topology(
            ClusterType::Mesos,
            vec![NodeRole::Zookeeper, NodeRole::Master, NodeRole::Marathon, NodeRole::Slave],
        );

        registry.register(Arc::new(EtcdTemplate::new(ClusterType::Swarm, ids.clone())));
        registry.register(Arc::new(SwarmMasterTemplate::new(ids.clone())));
        registry.register(Arc::new(SwarmSlaveTemplate::new(ids)));
        registry.register_topology(
            ClusterType::Swarm,
            vec![NodeRole::Etcd, NodeRole::Master, NodeRole::Slave],
        );

        registry
    }

    /// Register a template, replacing any previous one for the same key
    pub fn register(&mut self, template: Arc<dyn NodeTemplate>) {
        let key = (template.cluster_type(), template.role());
        debug!("Registering template for {} {}", key.0, key.1);
        self.templates.insert(key, template);
    }

    /// Set the provisioning phases of a cluster type. Phases run in order with a
    /// barrier between them; the first phase holds the quorum members.
    pub fn register_topology(&mut self, cluster_type: ClusterType, phases: Vec<NodeRole>) {
        self.topologies.insert(cluster_type, phases);
    }

    pub fn lookup(&self, cluster_type: ClusterType, role: NodeRole) -> Result<Arc<dyn NodeTemplate>> {
        if let Some(template) = self.templates.get(&(cluster_type, role)) {
            return Ok(template.clone());
        }
        if self.supports(cluster_type) {
            Err(NexaError::UnsupportedRole {
                cluster_type: cluster_type.to_string(),
                role: role.to_string(),
            })
        } else {
            Err(NexaError::UnsupportedClusterType(cluster_type.to_string()))
        }
    }

    pub fn topology(&self, cluster_type: ClusterType) -> Result<&[NodeRole]> {
        self.topologies
            .get(&cluster_type)
            .map(Vec::as_slice)
            .ok_or_else(|| NexaError::UnsupportedClusterType(cluster_type.to_string()))
    }

    /// Role whose members form the quorum of a cluster type
    pub fn quorum_role(&self, cluster_type: ClusterType) -> Result<NodeRole> {
        self.topology(cluster_type)?
            .iter()
            .copied()
            .find(NodeRole::is_quorum_member)
            .ok_or_else(|| NexaError::UnsupportedClusterType(cluster_type.to_string()))
    }

    pub fn supports(&self, cluster_type: ClusterType) -> bool {
        self.templates.keys().any(|(t, _)| *t == cluster_type)
    }
}
