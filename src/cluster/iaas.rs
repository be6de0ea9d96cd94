//! Infrastructure collaborator that creates and deletes VMs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{NexaError, Result};
use crate::templates::FileTemplate;
use crate::types::NodeRole;

/// What to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSpec {
    pub name: String,
    pub role: NodeRole,
    pub host_id: String,
    /// Address the VM must come up with. Quorum members and masters are
    /// statically addressed, everything else gets an address from the IaaS.
    pub static_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmHandle {
    pub vm_id: String,
    pub ip_address: String,
}

#[async_trait]
pub trait IaasClient: Send + Sync {
    async fn create_vm(&self, vm: &VmSpec, user_data: &FileTemplate, meta_data: &FileTemplate) -> Result<VmHandle>;

    async fn delete_vm(&self, vm_id: &str) -> Result<()>;
}

/// A VM held by [`InMemoryIaas`]
#[derive(Debug, Clone)]
pub struct VmRecord {
    pub handle: VmHandle,
    pub spec: VmSpec,
    pub user_data: FileTemplate,
    pub meta_data: FileTemplate,
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_creates: u32,
    fail_next_deletes: u32,
    failing_roles: HashSet<NodeRole>,
    failing_vms: HashSet<String>,
    capacity: Option<usize>,
    delay: Option<Duration>,
}

/// IaaS backed by a map, with fault injection for exercising retries,
/// timeouts and partial failures.
#[derive(Debug, Default)]
pub struct InMemoryIaas {
    vms: DashMap<String, VmRecord>,
    faults: Mutex<Faults>,
    next_ip: AtomicU32,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl InMemoryIaas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` create calls with a retryable error
    pub fn fail_next_creates(&self, n: u32) {
        self.faults.lock().fail_next_creates = n;
    }

    pub fn fail_next_deletes(&self, n: u32) {
        self.faults.lock().fail_next_deletes = n;
    }

    /// Fail every create for this role
    pub fn fail_role(&self, role: NodeRole) {
        self.faults.lock().failing_roles.insert(role);
    }

    /// Fail every create of the VM with this name
    pub fn fail_vm(&self, name: impl Into<String>) {
        self.faults.lock().failing_vms.insert(name.into());
    }

    /// Refuse creates once this many VMs exist
    pub fn set_capacity(&self, max_vms: usize) {
        self.faults.lock().capacity = Some(max_vms);
    }

    /// Delay every call by `delay`
    pub fn set_delay(&self, delay: Duration) {
        self.faults.lock().delay = Some(delay);
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }

    pub fn vms(&self) -> Vec<VmRecord> {
        self.vms.iter().map(|v| v.clone()).collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<VmRecord> {
        self.vms.iter().find(|v| v.spec.name == name).map(|v| v.clone())
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn delay(&self) -> Option<Duration> {
        self.faults.lock().delay
    }

    fn check_create(&self, vm: &VmSpec) -> Result<()> {
        let mut faults = self.faults.lock();
        if faults.fail_next_creates > 0 {
            faults.fail_next_creates -= 1;
            return Err(NexaError::provisioning(format!("injected failure creating {}", vm.name)));
        }
        if faults.failing_roles.contains(&vm.role) || faults.failing_vms.contains(&vm.name) {
            return Err(NexaError::provisioning(format!("cannot create {}", vm.name)));
        }
        if faults.capacity.is_some_and(|max| self.vms.len() >= max) {
            return Err(NexaError::provisioning("capacity exhausted"));
        }
        Ok(())
    }

    fn allocate_ip(&self) -> String {
        let n = self.next_ip.fetch_add(1, Ordering::SeqCst) + 1;
        format!("192.168.{}.{}", n / 250, n % 250 + 1)
    }
}

#[async_trait]
impl IaasClient for InMemoryIaas {
    async fn create_vm(&self, vm: &VmSpec, user_data: &FileTemplate, meta_data: &FileTemplate) -> Result<VmHandle> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        self.check_create(vm)?;

        let handle = VmHandle {
            vm_id: Uuid::new_v4().to_string(),
            ip_address: vm.static_ip.clone().unwrap_or_else(|| self.allocate_ip()),
        };
        debug!("Created VM {} ({}) at {}", vm.name, handle.vm_id, handle.ip_address);
        self.vms.insert(
            handle.vm_id.clone(),
            VmRecord {
                handle: handle.clone(),
                spec: vm.clone(),
                user_data: user_data.clone(),
                meta_data: meta_data.clone(),
            },
        );
        Ok(handle)
    }

    async fn delete_vm(&self, vm_id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        {
            let mut faults = self.faults.lock();
            if faults.fail_next_deletes > 0 {
                faults.fail_next_deletes -= 1;
                return Err(NexaError::provisioning(format!("injected failure deleting {}", vm_id)));
            }
        }
        // Deleting an unknown VM is a no-op so retried deletes stay idempotent.
        if self.vms.remove(vm_id).is_some() {
            debug!("Deleted VM {}", vm_id);
        }
        Ok(())
    }
}
