use std::sync::Arc;

use nexa_clusters::cluster::{preview_cluster, ClusterConfigBuilder};
use nexa_clusters::error::NexaError;
use nexa_clusters::templates::{
    quorum_string, KubernetesSlaveTemplate, NodeProperties, NodeTemplate, SequentialIdGenerator, TemplateRegistry,
    HOST_ID_PROPERTY, INSTANCE_ID_PLACEHOLDER, LOCAL_HOSTNAME_PLACEHOLDER,
};
use nexa_clusters::types::{Cluster, ClusterCreateSpec, ClusterType, NetworkSettings, NodeRole};
use proptest::prelude::*;

fn etcd_addresses() -> Vec<String> {
    vec!["10.0.0.1".to_string(), "10.0.0.2".to_string(), "10.0.0.3".to_string()]
}

fn kubernetes_spec() -> ClusterCreateSpec {
    ClusterCreateSpec {
        name: "k8s".to_string(),
        cluster_type: ClusterType::Kubernetes,
        slave_count: 2,
        master_address: Some("10.0.0.10".to_string()),
        quorum_addresses: etcd_addresses(),
        container_network: Some("10.2.0.0/16".to_string()),
        network: NetworkSettings::default(),
    }
}

#[test]
fn test_kubernetes_slave_user_data() {
    let template = KubernetesSlaveTemplate::new(Arc::new(SequentialIdGenerator::new("i")));
    let properties =
        KubernetesSlaveTemplate::create_properties(&etcd_addresses(), Some("10.2.0.0/16"), Some("10.0.0.10")).unwrap();

    let user_data = template
        .create_user_data_template(Some("/etc/scripts"), Some(&properties))
        .unwrap();
    assert_eq!(user_data.file_path, "/etc/scripts/kubernetes-slave-user-data.template");
    assert_eq!(
        user_data.parameters["$ETCD_QUORUM"],
        "10.0.0.1:2379,10.0.0.2:2379,10.0.0.3:2379"
    );
    assert_eq!(user_data.parameters["$CONTAINER_NETWORK"], "10.2.0.0/16");
    assert_eq!(user_data.parameters["$KUBERNETES_PORT"], "8080");
    assert_eq!(user_data.parameters["$MASTER_ADDRESS"], "10.0.0.10");
}

#[test]
fn test_kubernetes_slave_argument_errors() {
    assert!(matches!(
        KubernetesSlaveTemplate::create_properties(&[], Some("10.2.0.0/16"), Some("10.0.0.10")),
        Err(NexaError::InvalidArgument(_))
    ));
    // An empty address list is reported before the missing arguments.
    assert!(matches!(
        KubernetesSlaveTemplate::create_properties(&[], None, None),
        Err(NexaError::InvalidArgument(_))
    ));
    assert!(matches!(
        KubernetesSlaveTemplate::create_properties(&etcd_addresses(), None, Some("10.0.0.10")),
        Err(NexaError::Validation(_))
    ));
    assert!(matches!(
        KubernetesSlaveTemplate::create_properties(&etcd_addresses(), Some("10.2.0.0/16"), None),
        Err(NexaError::Validation(_))
    ));
}

#[test]
fn test_missing_template_inputs() {
    let template = KubernetesSlaveTemplate::new(Arc::new(SequentialIdGenerator::new("i")));
    let properties =
        KubernetesSlaveTemplate::create_properties(&etcd_addresses(), Some("10.2.0.0/16"), Some("10.0.0.10")).unwrap();

    assert!(matches!(
        template.create_user_data_template(None, Some(&properties)),
        Err(NexaError::Validation(_))
    ));
    assert!(matches!(
        template.create_meta_data_template(Some("/etc/scripts"), None),
        Err(NexaError::Validation(_))
    ));
}

#[test]
fn test_meta_data_uses_fresh_instance_ids() {
    let template = KubernetesSlaveTemplate::new(Arc::new(SequentialIdGenerator::new("i")));
    let properties =
        KubernetesSlaveTemplate::create_properties(&etcd_addresses(), Some("10.2.0.0/16"), Some("10.0.0.10")).unwrap();

    let first = template
        .create_meta_data_template(Some("/etc/scripts"), Some(&properties))
        .unwrap();
    let second = template
        .create_meta_data_template(Some("/etc/scripts"), Some(&properties))
        .unwrap();
    assert_eq!(first.file_path, "/etc/scripts/meta-data.template");
    assert!(first.parameters[INSTANCE_ID_PLACEHOLDER].starts_with("slave-"));
    assert_ne!(
        first.parameters[INSTANCE_ID_PLACEHOLDER],
        second.parameters[INSTANCE_ID_PLACEHOLDER]
    );

    let mut node = NodeProperties::new();
    node.insert(HOST_ID_PROPERTY.to_string(), "h7".to_string());
    let named = template
        .create_meta_data_template(Some("/etc/scripts"), Some(&properties.with_node(&node)))
        .unwrap();
    assert_eq!(named.parameters[LOCAL_HOSTNAME_PLACEHOLDER], "slave-h7");
    assert_eq!(template.vm_name(&node).unwrap(), "slave-h7");
}

#[test]
fn test_joining_etcd_member_sees_existing_quorum() {
    let registry = TemplateRegistry::with_defaults(Arc::new(SequentialIdGenerator::new("i")));
    let mut cluster = Cluster::from_spec("c1".to_string(), &kubernetes_spec());
    for address in etcd_addresses() {
        cluster.append_quorum_member(&address).unwrap();
    }

    let config = ClusterConfigBuilder::new(&cluster)
        .joining_quorum(vec!["10.0.0.4".to_string()])
        .freeze()
        .unwrap();
    let etcd = registry.lookup(ClusterType::Kubernetes, NodeRole::Etcd).unwrap();
    let properties = etcd.cluster_properties(&config).unwrap();
    assert_eq!(properties.get("quorumState"), Some("existing"));
    assert!(properties.get("etcdParameters").unwrap().ends_with("etcd3=http://10.0.0.4:2380"));

    // Slaves keep the quorum frozen at transition start.
    let slave = registry.lookup(ClusterType::Kubernetes, NodeRole::Slave).unwrap();
    let properties = slave.cluster_properties(&config).unwrap();
    assert_eq!(
        properties.get("etcdQuorum"),
        Some("10.0.0.1:2379,10.0.0.2:2379,10.0.0.3:2379")
    );
}

#[test]
fn test_preview_every_cluster_type() {
    let registry = TemplateRegistry::with_defaults(Arc::new(SequentialIdGenerator::new("i")));

    let nodes = preview_cluster(&registry, &kubernetes_spec(), "/s", &SequentialIdGenerator::new("h")).unwrap();
    assert_eq!(nodes.len(), 6);

    let mut mesos = kubernetes_spec();
    mesos.cluster_type = ClusterType::Mesos;
    let nodes = preview_cluster(&registry, &mesos, "/s", &SequentialIdGenerator::new("h")).unwrap();
    assert_eq!(nodes.len(), 7);
    assert_eq!(nodes.iter().filter(|n| n.vm.role == NodeRole::Marathon).count(), 1);

    let mut swarm = kubernetes_spec();
    swarm.cluster_type = ClusterType::Swarm;
    let nodes = preview_cluster(&registry, &swarm, "/s", &SequentialIdGenerator::new("h")).unwrap();
    assert_eq!(nodes[0].artifacts.user_data.file_path, "/s/swarm-etcd-user-data.template");
}

proptest! {
    #[test]
    fn quorum_string_keeps_members_in_order(
        octets in proptest::collection::vec(1u8..=254, 1..8),
        port in 1u16..=65535,
    ) {
        let addresses: Vec<String> = octets.iter().map(|o| format!("10.0.0.{}", o)).collect();
        let joined = quorum_string(&addresses, port);
        let parts: Vec<&str> = joined.split(',').collect();

        prop_assert_eq!(parts.len(), addresses.len());
        for (part, address) in parts.iter().zip(&addresses) {
            prop_assert_eq!(*part, format!("{}:{}", address, port));
        }
    }
}
