//! Swarm master and slave templates. Etcd members use [`super::EtcdTemplate`].

use std::collections::BTreeMap;
use std::sync::Arc;

use super::etcd::ETCD_PORT;
use super::{
    network_parameters, network_properties, quorum_string, require_addresses, require_arg,
    ClusterProperties, IdGenerator, NodeTemplate, ETCD_QUORUM_PROPERTY, MASTER_ADDRESS_PROPERTY,
};
use crate::cluster::FrozenClusterConfig;
use crate::error::Result;
use crate::types::{ClusterType, NetworkSettings, NodeRole};

/// Swarm manager port
pub const MASTER_PORT: u16 = 8333;

fn swarm_properties(etcd_addresses: &[String], master_address: Option<&str>) -> Result<ClusterProperties> {
    require_addresses(etcd_addresses, "etcd")?;
    let master_address = require_arg(master_address, "master address")?;

    let mut properties = ClusterProperties::new();
    properties.insert(ETCD_QUORUM_PROPERTY, quorum_string(etcd_addresses, ETCD_PORT));
    properties.insert(MASTER_ADDRESS_PROPERTY, master_address);
    Ok(properties)
}

#[derive(Debug, Clone)]
pub struct SwarmMasterTemplate {
    ids: Arc<dyn IdGenerator>,
}

impl SwarmMasterTemplate {
    pub const VM_NAME_PREFIX: &'static str = "master";

    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    pub fn create_properties(
        etcd_addresses: &[String],
        master_address: Option<&str>,
        network: &NetworkSettings,
    ) -> Result<ClusterProperties> {
        let mut properties = swarm_properties(etcd_addresses, master_address)?;
        network_properties(&mut properties, network);
        Ok(properties)
    }
}

impl NodeTemplate for SwarmMasterTemplate {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Swarm
    }

    fn role(&self) -> NodeRole {
        NodeRole::Master
    }

    fn vm_name_prefix(&self) -> &'static str {
        Self::VM_NAME_PREFIX
    }

    fn user_data_file(&self) -> &'static str {
        "swarm-master-user-data.template"
    }

    fn id_generator(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    fn cluster_properties(&self, config: &FrozenClusterConfig) -> Result<ClusterProperties> {
        Self::create_properties(&config.quorum, config.master_address.as_deref(), &config.network)
    }

    fn user_data_parameters(&self, properties: &ClusterProperties) -> Result<BTreeMap<String, String>> {
        let mut parameters = BTreeMap::new();
        parameters.insert("$ETCD_QUORUM".to_string(), properties.require(ETCD_QUORUM_PROPERTY)?.to_string());
        parameters.insert("$SWARM_PORT".to_string(), MASTER_PORT.to_string());
        parameters.insert("$ADDRESS".to_string(), properties.require(MASTER_ADDRESS_PROPERTY)?.to_string());
        network_parameters(properties, &mut parameters);
        Ok(parameters)
    }
}

#[derive(Debug, Clone)]
pub struct SwarmSlaveTemplate {
    ids: Arc<dyn IdGenerator>,
}

impl SwarmSlaveTemplate {
    pub const VM_NAME_PREFIX: &'static str = "slave";

    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    pub fn create_properties(etcd_addresses: &[String], master_address: Option<&str>) -> Result<ClusterProperties> {
        swarm_properties(etcd_addresses, master_address)
    }
}

impl NodeTemplate for SwarmSlaveTemplate {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Swarm
    }

    fn role(&self) -> NodeRole {
        NodeRole::Slave
    }

    fn vm_name_prefix(&self) -> &'static str {
        Self::VM_NAME_PREFIX
    }

    fn user_data_file(&self) -> &'static str {
        "swarm-slave-user-data.template"
    }

    fn id_generator(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    fn cluster_properties(&self, config: &FrozenClusterConfig) -> Result<ClusterProperties> {
        Self::create_properties(&config.quorum, config.master_address.as_deref())
    }

    fn user_data_parameters(&self, properties: &ClusterProperties) -> Result<BTreeMap<String, String>> {
        let mut parameters = BTreeMap::new();
        parameters.insert("$ETCD_QUORUM".to_string(), properties.require(ETCD_QUORUM_PROPERTY)?.to_string());
        parameters.insert(
            "$MASTER_ADDRESS".to_string(),
            properties.require(MASTER_ADDRESS_PROPERTY)?.to_string(),
        );
        parameters.insert("$SWARM_PORT".to_string(), MASTER_PORT.to_string());
        Ok(parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NexaError;
    use crate::templates::UuidGenerator;

    #[test]
    fn test_slave_user_data() {
        let template = SwarmSlaveTemplate::new(Arc::new(UuidGenerator));
        let addrs = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let properties = SwarmSlaveTemplate::create_properties(&addrs, Some("10.0.0.9")).unwrap();
        let user_data = template.create_user_data_template(Some("/scripts"), Some(&properties)).unwrap();

        assert_eq!(user_data.file_path, "/scripts/swarm-slave-user-data.template");
        assert_eq!(user_data.parameters["$ETCD_QUORUM"], "10.0.0.1:2379,10.0.0.2:2379");
        assert_eq!(user_data.parameters["$MASTER_ADDRESS"], "10.0.0.9");
        assert_eq!(user_data.parameters["$SWARM_PORT"], "8333");
    }

    #[test]
    fn test_master_requires_address() {
        let addrs = vec!["10.0.0.1".to_string()];
        assert!(matches!(
            SwarmMasterTemplate::create_properties(&addrs, None, &NetworkSettings::default()),
            Err(NexaError::Validation(_))
        ));
    }
}
