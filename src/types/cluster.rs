//! Cluster Management Types
//!
//! Core types for cluster lifecycle management:
//! - Cluster types, node roles and lifecycle states
//! - Cluster and node records
//! - Create and resize requests

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{NexaError, Result};
use crate::templates::NodeArtifacts;

/// Supported cluster topologies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterType {
    Kubernetes,
    Mesos,
    Swarm,
}

impl ClusterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::Kubernetes => "KUBERNETES",
            ClusterType::Mesos => "MESOS",
            ClusterType::Swarm => "SWARM",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterType {
    type Err = NexaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "KUBERNETES" => Ok(ClusterType::Kubernetes),
            "MESOS" => Ok(ClusterType::Mesos),
            "SWARM" => Ok(ClusterType::Swarm),
            _ => Err(NexaError::UnsupportedClusterType(s.to_string())),
        }
    }
}

/// Functional position of a VM within a cluster topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeRole {
    Etcd,
    Zookeeper,
    Master,
    Marathon,
    Slave,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Etcd => "ETCD",
            NodeRole::Zookeeper => "ZOOKEEPER",
            NodeRole::Master => "MASTER",
            NodeRole::Marathon => "MARATHON",
            NodeRole::Slave => "SLAVE",
        }
    }

    /// Coordination members whose addresses form the cluster quorum
    pub fn is_quorum_member(&self) -> bool {
        matches!(self, NodeRole::Etcd | NodeRole::Zookeeper)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = NexaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ETCD" => Ok(NodeRole::Etcd),
            "ZOOKEEPER" => Ok(NodeRole::Zookeeper),
            "MASTER" => Ok(NodeRole::Master),
            "MARATHON" => Ok(NodeRole::Marathon),
            "SLAVE" => Ok(NodeRole::Slave),
            other => Err(NexaError::invalid_argument(format!("unknown node role '{}'", other))),
        }
    }
}

/// Cluster lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    Creating,
    Ready,
    Resizing,
    Deleting,
    Error,
    Deleted,
}

impl ClusterState {
    /// A lifecycle transition owns the cluster while it is in one of these states
    pub fn is_transitional(&self) -> bool {
        matches!(self, ClusterState::Creating | ClusterState::Resizing | ClusterState::Deleting)
    }

    pub fn is_terminal(&self) -> bool {
        *self == ClusterState::Deleted
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterState::Creating => "CREATING",
            ClusterState::Ready => "READY",
            ClusterState::Resizing => "RESIZING",
            ClusterState::Deleting => "DELETING",
            ClusterState::Error => "ERROR",
            ClusterState::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Optional network settings handed to node templates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default)]
    pub dns: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub netmask: Option<String>,
}

/// A provisioned (or provisioning) VM in a cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub role: NodeRole,
    /// Unique within the owning cluster
    pub host_id: String,
    pub vm_name: String,
    pub vm_id: Option<String>,
    pub ip_address: Option<String>,
    /// Bootstrap artifacts generated for this node, never regenerated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<NodeArtifacts>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub cluster_type: ClusterType,
    pub state: ClusterState,
    pub master_address: Option<String>,
    pub container_network: Option<String>,
    /// Quorum member addresses in provisioning order. Append-only.
    pub quorum: Vec<String>,
    pub slave_count: u32,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub nodes: Vec<Node>,
    pub active_task_id: Option<String>,
    pub error_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Cluster {
    /// Build the CREATING record for a validated create request.
    pub fn from_spec(id: String, spec: &ClusterCreateSpec) -> Self {
        Self {
            id,
            name: spec.name.clone(),
            cluster_type: spec.cluster_type,
            state: ClusterState::Creating,
            master_address: None,
            container_network: spec.container_network.clone(),
            quorum: Vec::new(),
            slave_count: 0,
            network: spec.network.clone(),
            nodes: Vec::new(),
            active_task_id: None,
            error_reason: None,
            created_at: Utc::now(),
        }
    }

    /// Record the first master's address. Once set it never changes.
    pub fn fix_master_address(&mut self, address: &str) -> Result<()> {
        match &self.master_address {
            None => {
                self.master_address = Some(address.to_string());
                Ok(())
            }
            Some(existing) if existing == address => Ok(()),
            Some(existing) => Err(NexaError::invalid_argument(format!(
                "master address of cluster {} is already fixed to {}",
                self.id, existing
            ))),
        }
    }

    /// Append a quorum member. Existing members are never reordered.
    pub fn append_quorum_member(&mut self, address: &str) -> Result<()> {
        if self.quorum.iter().any(|a| a == address) {
            return Err(NexaError::invalid_argument(format!(
                "address {} is already a quorum member of cluster {}",
                address, self.id
            )));
        }
        self.quorum.push(address.to_string());
        Ok(())
    }

    pub fn nodes_with_role(&self, role: NodeRole) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.role == role)
    }

    pub fn has_host(&self, host_id: &str) -> bool {
        self.nodes.iter().any(|n| n.host_id == host_id)
    }
}

/// Request to create a cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCreateSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub cluster_type: ClusterType,
    pub slave_count: u32,
    pub master_address: Option<String>,
    /// Static addresses of the etcd or zookeeper members, in provisioning order
    #[serde(default)]
    pub quorum_addresses: Vec<String>,
    pub container_network: Option<String>,
    #[serde(default)]
    pub network: NetworkSettings,
}

impl ClusterCreateSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(NexaError::validation("cluster name is required"));
        }
        if self.slave_count == 0 {
            return Err(NexaError::invalid_argument("slave count must be at least 1"));
        }
        if self.quorum_addresses.is_empty() {
            return Err(NexaError::invalid_argument("at least one quorum address is required"));
        }
        ensure_distinct(&self.quorum_addresses)?;
        if self.master_address.is_none() {
            return Err(NexaError::validation("master address is required"));
        }
        if self.cluster_type == ClusterType::Kubernetes && self.container_network.is_none() {
            return Err(NexaError::validation(
                "container network is required for KUBERNETES clusters",
            ));
        }
        Ok(())
    }
}

/// Request to scale a READY cluster out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResizeSpec {
    /// New total number of slave nodes
    pub slave_count: u32,
    /// Quorum members to append, in provisioning order
    #[serde(default)]
    pub additional_quorum_addresses: Vec<String>,
}

impl ClusterResizeSpec {
    pub fn validate_against(&self, cluster: &Cluster) -> Result<()> {
        if self.slave_count <= cluster.slave_count {
            return Err(NexaError::invalid_argument(format!(
                "new slave count {} must be greater than current count {}",
                self.slave_count, cluster.slave_count
            )));
        }
        ensure_distinct(&self.additional_quorum_addresses)?;
        if let Some(dup) = self
            .additional_quorum_addresses
            .iter()
            .find(|a| cluster.quorum.contains(a))
        {
            return Err(NexaError::invalid_argument(format!(
                "address {} is already a quorum member",
                dup
            )));
        }
        Ok(())
    }
}

fn ensure_distinct(addresses: &[String]) -> Result<()> {
    for (i, a) in addresses.iter().enumerate() {
        if addresses[..i].contains(a) {
            return Err(NexaError::invalid_argument(format!("duplicate quorum address {}", a)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ClusterCreateSpec {
        ClusterCreateSpec {
            name: "k8s".to_string(),
            cluster_type: ClusterType::Kubernetes,
            slave_count: 2,
            master_address: Some("10.0.0.10".to_string()),
            quorum_addresses: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            container_network: Some("10.2.0.0/16".to_string()),
            network: NetworkSettings::default(),
        }
    }

    #[test]
    fn test_create_spec_validation() {
        assert!(spec().validate().is_ok());

        let mut s = spec();
        s.quorum_addresses.clear();
        assert!(matches!(s.validate(), Err(NexaError::InvalidArgument(_))));

        let mut s = spec();
        s.container_network = None;
        assert!(matches!(s.validate(), Err(NexaError::Validation(_))));

        let mut s = spec();
        s.cluster_type = ClusterType::Mesos;
        s.container_network = None;
        assert!(s.validate().is_ok());

        let mut s = spec();
        s.quorum_addresses.push("10.0.0.1".to_string());
        assert!(matches!(s.validate(), Err(NexaError::InvalidArgument(_))));
    }

    #[test]
    fn test_master_address_is_fixed_once() {
        let mut cluster = Cluster::from_spec("c1".into(), &spec());
        cluster.fix_master_address("10.0.0.10").unwrap();
        cluster.fix_master_address("10.0.0.10").unwrap();
        assert!(cluster.fix_master_address("10.0.0.11").is_err());
        assert_eq!(cluster.master_address.as_deref(), Some("10.0.0.10"));
    }

    #[test]
    fn test_quorum_is_append_only() {
        let mut cluster = Cluster::from_spec("c1".into(), &spec());
        cluster.append_quorum_member("10.0.0.1").unwrap();
        cluster.append_quorum_member("10.0.0.2").unwrap();
        assert!(cluster.append_quorum_member("10.0.0.1").is_err());
        assert_eq!(cluster.quorum, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("kubernetes".parse::<ClusterType>().unwrap(), ClusterType::Kubernetes);
        assert!(matches!(
            "nomad".parse::<ClusterType>(),
            Err(NexaError::UnsupportedClusterType(_))
        ));
        assert_eq!("Slave".parse::<NodeRole>().unwrap(), NodeRole::Slave);
        assert!(ClusterState::Resizing.is_transitional());
        assert!(!ClusterState::Error.is_transitional());
    }
}
