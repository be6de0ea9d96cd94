use std::sync::Arc;

use tracing::debug;

use crate::error::{NexaError, Result};
use crate::types::{Cluster, ClusterType, NetworkSettings};

/// Cluster-wide inputs of one lifecycle transition. Computed once before any
/// template runs and shared read-only by every worker of the transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrozenClusterConfig {
    pub cluster_id: String,
    pub cluster_type: ClusterType,
    /// Quorum as of transition start. On create this is the bootstrap member list.
    pub quorum: Vec<String>,
    /// Members provisioned by this transition, in provisioning order
    pub joining_quorum: Vec<String>,
    pub container_network: Option<String>,
    pub master_address: Option<String>,
    pub network: NetworkSettings,
    bootstrap: bool,
}

impl FrozenClusterConfig {
    /// Existing members followed by joining ones, without repeats
    pub fn all_quorum_members(&self) -> Vec<String> {
        let mut members = self.quorum.clone();
        for address in &self.joining_quorum {
            if !members.contains(address) {
                members.push(address.clone());
            }
        }
        members
    }

    /// `new` while bootstrapping the quorum, `existing` when members join a live one
    pub fn quorum_state(&self) -> &'static str {
        if self.bootstrap {
            "new"
        } else {
            "existing"
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        self.bootstrap
    }
}

pub struct ClusterConfigBuilder<'a> {
    cluster: &'a Cluster,
    joining_quorum: Vec<String>,
    master_address: Option<String>,
}

impl<'a> ClusterConfigBuilder<'a> {
    pub fn new(cluster: &'a Cluster) -> Self {
        Self {
            cluster,
            joining_quorum: Vec::new(),
            master_address: None,
        }
    }

    pub fn joining_quorum(mut self, addresses: Vec<String>) -> Self {
        self.joining_quorum = addresses;
        self
    }

    /// Master address to use while the cluster has none fixed yet
    pub fn master_address(mut self, address: Option<String>) -> Self {
        self.master_address = address;
        self
    }

    pub fn freeze(self) -> Result<Arc<FrozenClusterConfig>> {
        let cluster = self.cluster;
        let bootstrap = cluster.quorum.is_empty();
        let quorum = if bootstrap {
            self.joining_quorum.clone()
        } else {
            cluster.quorum.clone()
        };
        if quorum.is_empty() {
            return Err(NexaError::invalid_argument(format!(
                "cluster {} has no quorum members",
                cluster.id
            )));
        }

        let master_address = match (&cluster.master_address, self.master_address) {
            (Some(fixed), Some(requested)) if *fixed != requested => {
                return Err(NexaError::invalid_argument(format!(
                    "master address of cluster {} is already fixed to {}",
                    cluster.id, fixed
                )));
            }
            (Some(fixed), _) => Some(fixed.clone()),
            (None, requested) => requested,
        };

        debug!(
            "Froze config for cluster {}: {} quorum members, {} joining",
            cluster.id,
            quorum.len(),
            self.joining_quorum.len()
        );

        Ok(Arc::new(FrozenClusterConfig {
            cluster_id: cluster.id.clone(),
            cluster_type: cluster.cluster_type,
            quorum,
            joining_quorum: self.joining_quorum,
            container_network: cluster.container_network.clone(),
            master_address,
            network: cluster.network.clone(),
            bootstrap,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClusterCreateSpec;

    fn cluster() -> Cluster {
        let spec = ClusterCreateSpec {
            name: "swarm".to_string(),
            cluster_type: ClusterType::Swarm,
            slave_count: 1,
            master_address: Some("10.0.0.10".to_string()),
            quorum_addresses: vec!["10.0.0.1".to_string()],
            container_network: None,
            network: NetworkSettings::default(),
        };
        Cluster::from_spec("c1".to_string(), &spec)
    }

    #[test]
    fn test_bootstrap_config() {
        let c = cluster();
        let config = ClusterConfigBuilder::new(&c)
            .joining_quorum(vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()])
            .master_address(Some("10.0.0.10".to_string()))
            .freeze()
            .unwrap();
        assert_eq!(config.quorum, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(config.all_quorum_members(), vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(config.quorum_state(), "new");
        assert_eq!(config.master_address.as_deref(), Some("10.0.0.10"));
    }

    #[test]
    fn test_joining_members_kept_separate() {
        let mut c = cluster();
        c.append_quorum_member("10.0.0.1").unwrap();
        c.fix_master_address("10.0.0.10").unwrap();
        let config = ClusterConfigBuilder::new(&c)
            .joining_quorum(vec!["10.0.0.2".to_string()])
            .freeze()
            .unwrap();
        assert_eq!(config.quorum, vec!["10.0.0.1"]);
        assert_eq!(config.all_quorum_members(), vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(config.quorum_state(), "existing");
        assert_eq!(config.master_address.as_deref(), Some("10.0.0.10"));
    }

    #[test]
    fn test_rejects_empty_quorum_and_master_change() {
        let c = cluster();
        assert!(matches!(
            ClusterConfigBuilder::new(&c).freeze(),
            Err(NexaError::InvalidArgument(_))
        ));

        let mut c = cluster();
        c.append_quorum_member("10.0.0.1").unwrap();
        c.fix_master_address("10.0.0.10").unwrap();
        assert!(ClusterConfigBuilder::new(&c)
            .master_address(Some("10.0.0.99".to_string()))
            .freeze()
            .is_err());
    }
}
