//! Node Template Engine
//!
//! Turns the frozen cluster-wide property set into per-node bootstrap
//! artifacts (cloud-init user-data and meta-data file templates):
//! - `NodeTemplate`: per (cluster type, role) artifact generator
//! - `TemplateRegistry`: lookup of templates and provisioning topologies
//! - `IdGenerator`: injected source of unique instance ids

mod etcd;
pub mod kubernetes;
pub mod mesos;
pub mod registry;
pub mod swarm;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::FrozenClusterConfig;
use crate::error::{NexaError, Result};
use crate::types::{ClusterType, NetworkSettings, NodeRole};

pub use etcd::EtcdTemplate;
pub use kubernetes::{KubernetesMasterTemplate, KubernetesSlaveTemplate};
pub use mesos::{MesosMarathonTemplate, MesosMasterTemplate, MesosSlaveTemplate, MesosZookeeperTemplate};
pub use registry::TemplateRegistry;
pub use swarm::{SwarmMasterTemplate, SwarmSlaveTemplate};

/// Node-level property keys
pub const HOST_ID_PROPERTY: &str = "hostId";
pub const NODE_INDEX_PROPERTY: &str = "nodeIndex";
pub const IP_ADDRESS_PROPERTY: &str = "ipAddress";

/// Cluster-level property keys
pub const ETCD_QUORUM_PROPERTY: &str = "etcdQuorum";
pub const ETCD_PARAMETERS_PROPERTY: &str = "etcdParameters";
pub const ZOOKEEPER_QUORUM_PROPERTY: &str = "zookeeperQuorum";
pub const ZOOKEEPER_PARAMETERS_PROPERTY: &str = "zookeeperParameters";
pub const QUORUM_STATE_PROPERTY: &str = "quorumState";
pub const CONTAINER_NETWORK_PROPERTY: &str = "containerNetwork";
pub const MASTER_ADDRESS_PROPERTY: &str = "masterAddress";
pub const DNS_PROPERTY: &str = "dns";
pub const GATEWAY_PROPERTY: &str = "gateway";
pub const NETMASK_PROPERTY: &str = "netmask";

pub const META_DATA_TEMPLATE: &str = "meta-data.template";
pub const INSTANCE_ID_PLACEHOLDER: &str = "$INSTANCE_ID";
pub const LOCAL_HOSTNAME_PLACEHOLDER: &str = "$LOCAL_HOSTNAME";

/// Per-node properties such as the host id
pub type NodeProperties = BTreeMap<String, String>;

/// Immutable property set handed to every template call of a transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterProperties(BTreeMap<String, String>);

impl ClusterProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| NexaError::missing_property(key))
    }

    /// Copy of this set with node-level keys layered on top.
    pub fn with_node(&self, node: &NodeProperties) -> Self {
        let mut merged = self.0.clone();
        merged.extend(node.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    fn insert_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(v) = value {
            self.insert(key, v);
        }
    }
}

/// A file path plus the placeholder substitutions the cloud-init renderer applies to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTemplate {
    pub file_path: String,
    pub parameters: BTreeMap<String, String>,
}

/// User-data and meta-data generated for one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeArtifacts {
    pub user_data: FileTemplate,
    pub meta_data: FileTemplate,
}

/// Source of unique identifiers for instance ids and host ids
pub trait IdGenerator: Send + Sync + fmt::Debug {
    fn next_id(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic generator: `<prefix>1`, `<prefix>2`, ...
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}{}", self.prefix, n)
    }
}

/// Per (cluster type, role) bootstrap artifact generator.
///
/// Implementations hold no state besides the injected id generator; every
/// input arrives through `ClusterProperties`.
pub trait NodeTemplate: Send + Sync + fmt::Debug {
    fn cluster_type(&self) -> ClusterType;

    fn role(&self) -> NodeRole;

    /// Fixed prefix of VM names, instance ids and hostnames
    fn vm_name_prefix(&self) -> &'static str;

    /// Role-specific cloud-config file under the script directory
    fn user_data_file(&self) -> &'static str;

    fn id_generator(&self) -> &dyn IdGenerator;

    /// Derive this role's property set from the frozen cluster config.
    fn cluster_properties(&self, config: &FrozenClusterConfig) -> Result<ClusterProperties>;

    /// Placeholder substitutions for the user-data file.
    fn user_data_parameters(&self, properties: &ClusterProperties) -> Result<BTreeMap<String, String>>;

    fn vm_name(&self, node_properties: &NodeProperties) -> Result<String> {
        let host_id = node_properties
            .get(HOST_ID_PROPERTY)
            .ok_or_else(|| NexaError::missing_property(HOST_ID_PROPERTY))?;
        Ok(format!("{}-{}", self.vm_name_prefix(), host_id))
    }

    fn create_user_data_template(
        &self,
        script_directory: Option<&str>,
        properties: Option<&ClusterProperties>,
    ) -> Result<FileTemplate> {
        let (script_directory, properties) = require_inputs(script_directory, properties)?;
        Ok(FileTemplate {
            file_path: script_path(script_directory, self.user_data_file()),
            parameters: self.user_data_parameters(properties)?,
        })
    }

    fn create_meta_data_template(
        &self,
        script_directory: Option<&str>,
        properties: Option<&ClusterProperties>,
    ) -> Result<FileTemplate> {
        let (script_directory, properties) = require_inputs(script_directory, properties)?;
        let ids = self.id_generator();
        let instance_id = format!("{}-{}", self.vm_name_prefix(), ids.next_id());
        // Nodes with a host id are named after their VM.
        let hostname = match properties.get(HOST_ID_PROPERTY) {
            Some(host_id) => format!("{}-{}", self.vm_name_prefix(), host_id),
            None => format!("{}-{}", self.vm_name_prefix(), ids.next_id()),
        };
        let mut parameters = BTreeMap::new();
        parameters.insert(INSTANCE_ID_PLACEHOLDER.to_string(), instance_id);
        parameters.insert(LOCAL_HOSTNAME_PLACEHOLDER.to_string(), hostname);
        Ok(FileTemplate {
            file_path: script_path(script_directory, META_DATA_TEMPLATE),
            parameters,
        })
    }
}

fn require_inputs<'a>(
    script_directory: Option<&'a str>,
    properties: Option<&'a ClusterProperties>,
) -> Result<(&'a str, &'a ClusterProperties)> {
    let script_directory =
        script_directory.ok_or_else(|| NexaError::validation("script directory is required"))?;
    let properties =
        properties.ok_or_else(|| NexaError::validation("cluster properties are required"))?;
    Ok((script_directory, properties))
}

fn script_path(script_directory: &str, file: &str) -> String {
    Path::new(script_directory).join(file).to_string_lossy().into_owned()
}

/// Comma-joined `ip:port` list, input order preserved.
pub fn quorum_string(addresses: &[String], port: u16) -> String {
    addresses
        .iter()
        .map(|a| format!("{}:{}", a, port))
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn require_addresses(addresses: &[String], what: &str) -> Result<()> {
    if addresses.is_empty() {
        return Err(NexaError::invalid_argument(format!("{} addresses must not be empty", what)));
    }
    Ok(())
}

pub(crate) fn require_arg<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value.ok_or_else(|| NexaError::validation(format!("{} is required", name)))
}

/// Network placeholders shared by templates of statically addressed nodes.
pub(crate) fn network_parameters(properties: &ClusterProperties, out: &mut BTreeMap<String, String>) {
    for (placeholder, key) in [("$DNS", DNS_PROPERTY), ("$GATEWAY", GATEWAY_PROPERTY), ("$NETMASK", NETMASK_PROPERTY)] {
        out.insert(placeholder.to_string(), properties.get(key).unwrap_or_default().to_string());
    }
}

pub(crate) fn network_properties(properties: &mut ClusterProperties, network: &NetworkSettings) {
    properties.insert_opt(DNS_PROPERTY, network.dns.as_deref());
    properties.insert_opt(GATEWAY_PROPERTY, network.gateway.as_deref());
    properties.insert_opt(NETMASK_PROPERTY, network.netmask.as_deref());
}
