//! Cluster Lifecycle Management
//!
//! This module drives VM-backed clusters through their lifecycle:
//! - `ClusterManager`: the create / resize / delete state machine
//! - `ClusterConfigBuilder`: per-transition frozen property set
//! - `ProvisioningPool`: bounded, retried IaaS calls
//! - `ClusterStore`: cluster records with compare-and-set state changes

pub mod config_builder;
pub mod iaas;
pub mod manager;
pub mod plan;
pub mod provisioner;
pub mod store;

pub use config_builder::{ClusterConfigBuilder, FrozenClusterConfig};
pub use iaas::{IaasClient, InMemoryIaas, VmHandle, VmRecord, VmSpec};
pub use manager::{ClusterManager, ENTITY_KIND};
pub use plan::{preview_cluster, PreparedNode};
pub use provisioner::{Attempted, ProvisioningPool, RetryPolicy};
pub use store::ClusterStore;
