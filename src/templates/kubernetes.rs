//! Kubernetes master and slave templates. Etcd members use [`super::EtcdTemplate`].

use std::collections::BTreeMap;
use std::sync::Arc;

use super::etcd::ETCD_PORT;
use super::{
    network_parameters, network_properties, quorum_string, require_addresses, require_arg,
    ClusterProperties, IdGenerator, NodeTemplate, CONTAINER_NETWORK_PROPERTY, ETCD_QUORUM_PROPERTY,
    MASTER_ADDRESS_PROPERTY,
};
use crate::cluster::FrozenClusterConfig;
use crate::error::Result;
use crate::types::{ClusterType, NetworkSettings, NodeRole};

/// Kubernetes API server port
pub const API_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct KubernetesMasterTemplate {
    ids: Arc<dyn IdGenerator>,
}

impl KubernetesMasterTemplate {
    pub const VM_NAME_PREFIX: &'static str = "master";

    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    pub fn create_properties(
        etcd_addresses: &[String],
        container_network: Option<&str>,
        master_address: Option<&str>,
        network: &NetworkSettings,
    ) -> Result<ClusterProperties> {
        let mut properties =
            KubernetesSlaveTemplate::create_properties(etcd_addresses, container_network, master_address)?;
        network_properties(&mut properties, network);
        Ok(properties)
    }
}

impl NodeTemplate for KubernetesMasterTemplate {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Kubernetes
    }

    fn role(&self) -> NodeRole {
        NodeRole::Master
    }

    fn vm_name_prefix(&self) -> &'static str {
        Self::VM_NAME_PREFIX
    }

    fn user_data_file(&self) -> &'static str {
        "kubernetes-master-user-data.template"
    }

    fn id_generator(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    fn cluster_properties(&self, config: &FrozenClusterConfig) -> Result<ClusterProperties> {
        Self::create_properties(
            &config.quorum,
            config.container_network.as_deref(),
            config.master_address.as_deref(),
            &config.network,
        )
    }

    fn user_data_parameters(&self, properties: &ClusterProperties) -> Result<BTreeMap<String, String>> {
        let mut parameters = BTreeMap::new();
        parameters.insert("$ETCD_QUORUM".to_string(), properties.require(ETCD_QUORUM_PROPERTY)?.to_string());
        parameters.insert(
            "$CONTAINER_NETWORK".to_string(),
            properties.require(CONTAINER_NETWORK_PROPERTY)?.to_string(),
        );
        parameters.insert("$KUBERNETES_PORT".to_string(), API_PORT.to_string());
        parameters.insert("$ADDRESS".to_string(), properties.require(MASTER_ADDRESS_PROPERTY)?.to_string());
        network_parameters(properties, &mut parameters);
        Ok(parameters)
    }
}

#[derive(Debug, Clone)]
pub struct KubernetesSlaveTemplate {
    ids: Arc<dyn IdGenerator>,
}

impl KubernetesSlaveTemplate {
    pub const VM_NAME_PREFIX: &'static str = "slave";

    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    /// Fails with `InvalidArgument` on an empty address list before looking at
    /// the other arguments, and with `Validation` when either of them is absent.
    pub fn create_properties(
        etcd_addresses: &[String],
        container_network: Option<&str>,
        master_address: Option<&str>,
    ) -> Result<ClusterProperties> {
        require_addresses(etcd_addresses, "etcd")?;
        let container_network = require_arg(container_network, "container network")?;
        let master_address = require_arg(master_address, "master address")?;

        let mut properties = ClusterProperties::new();
        properties.insert(ETCD_QUORUM_PROPERTY, quorum_string(etcd_addresses, ETCD_PORT));
        properties.insert(CONTAINER_NETWORK_PROPERTY, container_network);
        properties.insert(MASTER_ADDRESS_PROPERTY, master_address);
        Ok(properties)
    }
}

impl NodeTemplate for KubernetesSlaveTemplate {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Kubernetes
    }

    fn role(&self) -> NodeRole {
        NodeRole::Slave
    }

    fn vm_name_prefix(&self) -> &'static str {
        Self::VM_NAME_PREFIX
    }

    fn user_data_file(&self) -> &'static str {
        "kubernetes-slave-user-data.template"
    }

    fn id_generator(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    fn cluster_properties(&self, config: &FrozenClusterConfig) -> Result<ClusterProperties> {
        Self::create_properties(
            &config.quorum,
            config.container_network.as_deref(),
            config.master_address.as_deref(),
        )
    }

    fn user_data_parameters(&self, properties: &ClusterProperties) -> Result<BTreeMap<String, String>> {
        let mut parameters = BTreeMap::new();
        parameters.insert("$ETCD_QUORUM".to_string(), properties.require(ETCD_QUORUM_PROPERTY)?.to_string());
        parameters.insert(
            "$CONTAINER_NETWORK".to_string(),
            properties.require(CONTAINER_NETWORK_PROPERTY)?.to_string(),
        );
        parameters.insert("$KUBERNETES_PORT".to_string(), API_PORT.to_string());
        parameters.insert(
            "$MASTER_ADDRESS".to_string(),
            properties.require(MASTER_ADDRESS_PROPERTY)?.to_string(),
        );
        Ok(parameters)
    }
}
