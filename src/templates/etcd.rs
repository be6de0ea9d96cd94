use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    network_parameters, network_properties, require_addresses, ClusterProperties, IdGenerator,
    NodeTemplate, ETCD_PARAMETERS_PROPERTY, IP_ADDRESS_PROPERTY, NODE_INDEX_PROPERTY,
    QUORUM_STATE_PROPERTY,
};
use crate::cluster::FrozenClusterConfig;
use crate::error::{NexaError, Result};
use crate::types::{ClusterType, NetworkSettings, NodeRole};

pub const ETCD_PORT: u16 = 2379;
pub const ETCD_PEER_PORT: u16 = 2380;

/// Etcd quorum member, shared by every cluster type that coordinates through etcd
#[derive(Debug, Clone)]
pub struct EtcdTemplate {
    cluster_type: ClusterType,
    ids: Arc<dyn IdGenerator>,
}

impl EtcdTemplate {
    pub const VM_NAME_PREFIX: &'static str = "etcd";

    pub fn new(cluster_type: ClusterType, ids: Arc<dyn IdGenerator>) -> Self {
        Self { cluster_type, ids }
    }

    /// `etcd_addresses` is the full member list, existing members first.
    /// `quorum_state` is `new` when bootstrapping and `existing` when joining.
    pub fn create_properties(
        etcd_addresses: &[String],
        quorum_state: &str,
        network: &NetworkSettings,
    ) -> Result<ClusterProperties> {
        require_addresses(etcd_addresses, "etcd")?;
        let initial_cluster = etcd_addresses
            .iter()
            .enumerate()
            .map(|(i, a)| format!("etcd{}=http://{}:{}", i, a, ETCD_PEER_PORT))
            .collect::<Vec<_>>()
            .join(",");

        let mut properties = ClusterProperties::new();
        properties.insert(ETCD_PARAMETERS_PROPERTY, initial_cluster);
        properties.insert(QUORUM_STATE_PROPERTY, quorum_state);
        network_properties(&mut properties, network);
        Ok(properties)
    }
}

impl NodeTemplate for EtcdTemplate {
    fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    fn role(&self) -> NodeRole {
        NodeRole::Etcd
    }

    fn vm_name_prefix(&self) -> &'static str {
        Self::VM_NAME_PREFIX
    }

    fn user_data_file(&self) -> &'static str {
        match self.cluster_type {
            ClusterType::Swarm => "swarm-etcd-user-data.template",
            _ => "kubernetes-etcd-user-data.template",
        }
    }

    fn id_generator(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    fn cluster_properties(&self, config: &FrozenClusterConfig) -> Result<ClusterProperties> {
        Self::create_properties(&config.all_quorum_members(), config.quorum_state(), &config.network)
    }

    fn user_data_parameters(&self, properties: &ClusterProperties) -> Result<BTreeMap<String, String>> {
        let index: usize = properties
            .require(NODE_INDEX_PROPERTY)?
            .parse()
            .map_err(|_| NexaError::invalid_argument("node index must be a non-negative integer"))?;

        let mut parameters = BTreeMap::new();
        parameters.insert("$ETCD_ID".to_string(), format!("etcd{}", index));
        parameters.insert("$ADDRESS".to_string(), properties.require(IP_ADDRESS_PROPERTY)?.to_string());
        parameters.insert("$ETCD_PORT".to_string(), ETCD_PORT.to_string());
        parameters.insert("$ETCD_PEER_PORT".to_string(), ETCD_PEER_PORT.to_string());
        parameters.insert(
            "$ETCD_PARAMETERS".to_string(),
            properties.require(ETCD_PARAMETERS_PROPERTY)?.to_string(),
        );
        parameters.insert(
            "$ETCD_CLUSTER_STATE".to_string(),
            properties.require(QUORUM_STATE_PROPERTY)?.to_string(),
        );
        network_parameters(properties, &mut parameters);
        Ok(parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{NodeProperties, UuidGenerator, HOST_ID_PROPERTY};

    fn addresses() -> Vec<String> {
        vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
    }

    #[test]
    fn test_user_data_for_member() {
        let template = EtcdTemplate::new(ClusterType::Kubernetes, Arc::new(UuidGenerator));
        let network = NetworkSettings {
            dns: Some("8.8.8.8".to_string()),
            ..Default::default()
        };
        let properties = EtcdTemplate::create_properties(&addresses(), "new", &network).unwrap();

        let mut node = NodeProperties::new();
        node.insert(HOST_ID_PROPERTY.to_string(), "h1".to_string());
        node.insert(NODE_INDEX_PROPERTY.to_string(), "1".to_string());
        node.insert(IP_ADDRESS_PROPERTY.to_string(), "10.0.0.2".to_string());

        let user_data = template
            .create_user_data_template(Some("scripts"), Some(&properties.with_node(&node)))
            .unwrap();
        assert!(user_data.file_path.ends_with("kubernetes-etcd-user-data.template"));
        assert_eq!(user_data.parameters["$ETCD_ID"], "etcd1");
        assert_eq!(user_data.parameters["$ADDRESS"], "10.0.0.2");
        assert_eq!(
            user_data.parameters["$ETCD_PARAMETERS"],
            "etcd0=http://10.0.0.1:2380,etcd1=http://10.0.0.2:2380"
        );
        assert_eq!(user_data.parameters["$ETCD_CLUSTER_STATE"], "new");
        assert_eq!(user_data.parameters["$DNS"], "8.8.8.8");
        assert_eq!(user_data.parameters["$GATEWAY"], "");
    }

    #[test]
    fn test_member_without_index_is_rejected() {
        let template = EtcdTemplate::new(ClusterType::Swarm, Arc::new(UuidGenerator));
        let properties =
            EtcdTemplate::create_properties(&addresses(), "new", &NetworkSettings::default()).unwrap();
        let err = template
            .create_user_data_template(Some("scripts"), Some(&properties))
            .unwrap_err();
        assert_eq!(err, NexaError::MissingProperty(NODE_INDEX_PROPERTY.to_string()));
    }

    #[test]
    fn test_empty_member_list() {
        assert!(matches!(
            EtcdTemplate::create_properties(&[], "new", &NetworkSettings::default()),
            Err(NexaError::InvalidArgument(_))
        ));
    }
}
