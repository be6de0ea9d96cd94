//! Turns a frozen cluster config into the concrete nodes of each phase and
//! renders their bootstrap artifacts.

use std::collections::HashSet;
use std::ops::Range;

use serde::Serialize;

use super::config_builder::{ClusterConfigBuilder, FrozenClusterConfig};
use super::iaas::VmSpec;
use crate::error::{NexaError, Result};
use crate::templates::{
    IdGenerator, NodeArtifacts, NodeProperties, NodeTemplate, TemplateRegistry, HOST_ID_PROPERTY,
    IP_ADDRESS_PROPERTY, NODE_INDEX_PROPERTY,
};
use crate::types::{Cluster, ClusterCreateSpec, NodeRole};

const HOST_ID_ATTEMPTS: usize = 16;

/// One node to create in a phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePlan {
    pub role: NodeRole,
    /// Position among the cluster's nodes of this role
    pub index: usize,
    pub static_ip: Option<String>,
}

/// A planned node with its rendered artifacts, ready for the IaaS
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedNode {
    pub vm: VmSpec,
    pub index: usize,
    pub artifacts: NodeArtifacts,
}

/// Which nodes a transition adds
#[derive(Debug, Clone)]
pub struct Layout {
    quorum_offset: usize,
    slaves: Range<usize>,
    singletons: bool,
}

impl Layout {
    /// Every role of a new cluster
    pub fn create(slave_count: u32) -> Self {
        Self {
            quorum_offset: 0,
            slaves: 0..slave_count as usize,
            singletons: true,
        }
    }

    /// Joining quorum members and the extra slaves of a scale-out
    pub fn resize(cluster: &Cluster, slave_count: u32) -> Self {
        Self {
            quorum_offset: cluster.quorum.len(),
            slaves: cluster.slave_count as usize..slave_count as usize,
            singletons: false,
        }
    }

    pub fn plans(&self, role: NodeRole, config: &FrozenClusterConfig) -> Vec<NodePlan> {
        match role {
            NodeRole::Etcd | NodeRole::Zookeeper => config
                .joining_quorum
                .iter()
                .enumerate()
                .map(|(i, address)| NodePlan {
                    role,
                    index: self.quorum_offset + i,
                    static_ip: Some(address.clone()),
                })
                .collect(),
            NodeRole::Master if self.singletons => vec![NodePlan {
                role,
                index: 0,
                static_ip: config.master_address.clone(),
            }],
            NodeRole::Marathon if self.singletons => vec![NodePlan {
                role,
                index: 0,
                static_ip: None,
            }],
            NodeRole::Slave => self
                .slaves
                .clone()
                .map(|index| NodePlan {
                    role,
                    index,
                    static_ip: None,
                })
                .collect(),
            NodeRole::Master | NodeRole::Marathon => Vec::new(),
        }
    }
}

/// Render artifacts for every node of a phase. Host ids in `taken` are never
/// reused, and newly allocated ones are added to it.
pub fn prepare_phase(
    template: &dyn NodeTemplate,
    config: &FrozenClusterConfig,
    script_directory: &str,
    plans: Vec<NodePlan>,
    host_ids: &dyn IdGenerator,
    taken: &mut HashSet<String>,
) -> Result<Vec<PreparedNode>> {
    let properties = template.cluster_properties(config)?;

    plans
        .into_iter()
        .map(|plan| {
            let host_id = allocate_host_id(host_ids, taken)?;
            let mut node = NodeProperties::new();
            node.insert(HOST_ID_PROPERTY.to_string(), host_id.clone());
            node.insert(NODE_INDEX_PROPERTY.to_string(), plan.index.to_string());
            if let Some(ip) = &plan.static_ip {
                node.insert(IP_ADDRESS_PROPERTY.to_string(), ip.clone());
            }

            let merged = properties.with_node(&node);
            let artifacts = NodeArtifacts {
                user_data: template.create_user_data_template(Some(script_directory), Some(&merged))?,
                meta_data: template.create_meta_data_template(Some(script_directory), Some(&merged))?,
            };

            Ok(PreparedNode {
                vm: VmSpec {
                    name: template.vm_name(&node)?,
                    role: plan.role,
                    host_id,
                    static_ip: plan.static_ip,
                },
                index: plan.index,
                artifacts,
            })
        })
        .collect()
}

/// Render every node a create request would provision, without provisioning.
pub fn preview_cluster(
    registry: &TemplateRegistry,
    spec: &ClusterCreateSpec,
    script_directory: &str,
    host_ids: &dyn IdGenerator,
) -> Result<Vec<PreparedNode>> {
    spec.validate()?;
    let cluster = Cluster::from_spec("preview".to_string(), spec);
    let config = ClusterConfigBuilder::new(&cluster)
        .joining_quorum(spec.quorum_addresses.clone())
        .master_address(spec.master_address.clone())
        .freeze()?;
    let layout = Layout::create(spec.slave_count);

    let mut taken = HashSet::new();
    let mut nodes = Vec::new();
    for &role in registry.topology(spec.cluster_type)? {
        let template = registry.lookup(spec.cluster_type, role)?;
        let plans = layout.plans(role, &config);
        nodes.extend(prepare_phase(
            template.as_ref(),
            &config,
            script_directory,
            plans,
            host_ids,
            &mut taken,
        )?);
    }
    Ok(nodes)
}

fn allocate_host_id(host_ids: &dyn IdGenerator, taken: &mut HashSet<String>) -> Result<String> {
    for _ in 0..HOST_ID_ATTEMPTS {
        let id = host_ids.next_id();
        if taken.insert(id.clone()) {
            return Ok(id);
        }
    }
    Err(NexaError::internal("id generator keeps returning host ids already in use"))
}
