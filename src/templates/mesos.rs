//! Mesos topology: zookeeper quorum, one master, one marathon scheduler and slaves.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    network_parameters, network_properties, quorum_string, require_addresses, require_arg,
    ClusterProperties, IdGenerator, NodeTemplate, IP_ADDRESS_PROPERTY, MASTER_ADDRESS_PROPERTY,
    NODE_INDEX_PROPERTY, ZOOKEEPER_PARAMETERS_PROPERTY, ZOOKEEPER_QUORUM_PROPERTY,
};
use crate::cluster::FrozenClusterConfig;
use crate::error::{NexaError, Result};
use crate::types::{ClusterType, NetworkSettings, NodeRole};

pub const ZOOKEEPER_PORT: u16 = 2181;
pub const ZOOKEEPER_PEER_PORT: u16 = 2888;
pub const ZOOKEEPER_ELECTION_PORT: u16 = 3888;
pub const MASTER_PORT: u16 = 5050;
pub const MARATHON_PORT: u16 = 8080;

fn zookeeper_quorum(addresses: &[String]) -> Result<ClusterProperties> {
    require_addresses(addresses, "zookeeper")?;
    let mut properties = ClusterProperties::new();
    properties.insert(ZOOKEEPER_QUORUM_PROPERTY, quorum_string(addresses, ZOOKEEPER_PORT));
    Ok(properties)
}

fn zk_quorum_parameter(properties: &ClusterProperties, parameters: &mut BTreeMap<String, String>) -> Result<()> {
    parameters.insert(
        "$ZK_QUORUM".to_string(),
        properties.require(ZOOKEEPER_QUORUM_PROPERTY)?.to_string(),
    );
    Ok(())
}

#[derive(Debug, Clone)]
pub struct MesosZookeeperTemplate {
    ids: Arc<dyn IdGenerator>,
}

impl MesosZookeeperTemplate {
    pub const VM_NAME_PREFIX: &'static str = "zookeeper";

    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    pub fn create_properties(zookeeper_addresses: &[String], network: &NetworkSettings) -> Result<ClusterProperties> {
        require_addresses(zookeeper_addresses, "zookeeper")?;
        let servers = zookeeper_addresses
            .iter()
            .enumerate()
            .map(|(i, a)| format!("server.{}={}:{}:{}", i + 1, a, ZOOKEEPER_PEER_PORT, ZOOKEEPER_ELECTION_PORT))
            .collect::<Vec<_>>()
            .join(",");

        let mut properties = ClusterProperties::new();
        properties.insert(ZOOKEEPER_PARAMETERS_PROPERTY, servers);
        network_properties(&mut properties, network);
        Ok(properties)
    }
}

impl NodeTemplate for MesosZookeeperTemplate {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Mesos
    }

    fn role(&self) -> NodeRole {
        NodeRole::Zookeeper
    }

    fn vm_name_prefix(&self) -> &'static str {
        Self::VM_NAME_PREFIX
    }

    fn user_data_file(&self) -> &'static str {
        "mesos-zookeeper-user-data.template"
    }

    fn id_generator(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    fn cluster_properties(&self, config: &FrozenClusterConfig) -> Result<ClusterProperties> {
        Self::create_properties(&config.all_quorum_members(), &config.network)
    }

    fn user_data_parameters(&self, properties: &ClusterProperties) -> Result<BTreeMap<String, String>> {
        let index: usize = properties
            .require(NODE_INDEX_PROPERTY)?
            .parse()
            .map_err(|_| NexaError::invalid_argument("node index must be a non-negative integer"))?;

        let mut parameters = BTreeMap::new();
        // Zookeeper server ids start at 1.
        parameters.insert("$ZK_ID".to_string(), (index + 1).to_string());
        parameters.insert("$ADDRESS".to_string(), properties.require(IP_ADDRESS_PROPERTY)?.to_string());
        parameters.insert("$ZK_PORT".to_string(), ZOOKEEPER_PORT.to_string());
        parameters.insert(
            "$ZK_PARAMETERS".to_string(),
            properties.require(ZOOKEEPER_PARAMETERS_PROPERTY)?.to_string(),
        );
        network_parameters(properties, &mut parameters);
        Ok(parameters)
    }
}

#[derive(Debug, Clone)]
pub struct MesosMasterTemplate {
    ids: Arc<dyn IdGenerator>,
}

impl MesosMasterTemplate {
    pub const VM_NAME_PREFIX: &'static str = "master";

    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    pub fn create_properties(
        zookeeper_addresses: &[String],
        master_address: Option<&str>,
        network: &NetworkSettings,
    ) -> Result<ClusterProperties> {
        let mut properties = zookeeper_quorum(zookeeper_addresses)?;
        properties.insert(MASTER_ADDRESS_PROPERTY, require_arg(master_address, "master address")?);
        network_properties(&mut properties, network);
        Ok(properties)
    }
}

impl NodeTemplate for MesosMasterTemplate {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Mesos
    }

    fn role(&self) -> NodeRole {
        NodeRole::Master
    }

    fn vm_name_prefix(&self) -> &'static str {
        Self::VM_NAME_PREFIX
    }

    fn user_data_file(&self) -> &'static str {
        "mesos-master-user-data.template"
    }

    fn id_generator(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    fn cluster_properties(&self, config: &FrozenClusterConfig) -> Result<ClusterProperties> {
        Self::create_properties(&config.quorum, config.master_address.as_deref(), &config.network)
    }

    fn user_data_parameters(&self, properties: &ClusterProperties) -> Result<BTreeMap<String, String>> {
        let mut parameters = BTreeMap::new();
        zk_quorum_parameter(properties, &mut parameters)?;
        parameters.insert("$MESOS_PORT".to_string(), MASTER_PORT.to_string());
        parameters.insert("$ADDRESS".to_string(), properties.require(MASTER_ADDRESS_PROPERTY)?.to_string());
        network_parameters(properties, &mut parameters);
        Ok(parameters)
    }
}

#[derive(Debug, Clone)]
pub struct MesosMarathonTemplate {
    ids: Arc<dyn IdGenerator>,
}

impl MesosMarathonTemplate {
    pub const VM_NAME_PREFIX: &'static str = "marathon";

    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    pub fn create_properties(zookeeper_addresses: &[String]) -> Result<ClusterProperties> {
        zookeeper_quorum(zookeeper_addresses)
    }
}

impl NodeTemplate for MesosMarathonTemplate {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Mesos
    }

    fn role(&self) -> NodeRole {
        NodeRole::Marathon
    }

    fn vm_name_prefix(&self) -> &'static str {
        Self::VM_NAME_PREFIX
    }

    fn user_data_file(&self) -> &'static str {
        "mesos-marathon-user-data.template"
    }

    fn id_generator(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    fn cluster_properties(&self, config: &FrozenClusterConfig) -> Result<ClusterProperties> {
        Self::create_properties(&config.quorum)
    }

    fn user_data_parameters(&self, properties: &ClusterProperties) -> Result<BTreeMap<String, String>> {
        let mut parameters = BTreeMap::new();
        zk_quorum_parameter(properties, &mut parameters)?;
        parameters.insert("$MARATHON_PORT".to_string(), MARATHON_PORT.to_string());
        Ok(parameters)
    }
}

#[derive(Debug, Clone)]
pub struct MesosSlaveTemplate {
    ids: Arc<dyn IdGenerator>,
}

impl MesosSlaveTemplate {
    pub const VM_NAME_PREFIX: &'static str = "slave";

    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    pub fn create_properties(zookeeper_addresses: &[String]) -> Result<ClusterProperties> {
        zookeeper_quorum(zookeeper_addresses)
    }
}

impl NodeTemplate for MesosSlaveTemplate {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Mesos
    }

    fn role(&self) -> NodeRole {
        NodeRole::Slave
    }

    fn vm_name_prefix(&self) -> &'static str {
        Self::VM_NAME_PREFIX
    }

    fn user_data_file(&self) -> &'static str {
        "mesos-slave-user-data.template"
    }

    fn id_generator(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    fn cluster_properties(&self, config: &FrozenClusterConfig) -> Result<ClusterProperties> {
        Self::create_properties(&config.quorum)
    }

    fn user_data_parameters(&self, properties: &ClusterProperties) -> Result<BTreeMap<String, String>> {
        let mut parameters = BTreeMap::new();
        zk_quorum_parameter(properties, &mut parameters)?;
        parameters.insert("$MESOS_PORT".to_string(), MASTER_PORT.to_string());
        Ok(parameters)
    }
}
