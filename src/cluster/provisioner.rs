use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::iaas::{IaasClient, VmHandle, VmSpec};
use crate::config::ProvisioningConfig;
use crate::error::{NexaError, Result};
use crate::templates::NodeArtifacts;

/// Retry settings for IaaS calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ProvisioningConfig::default())
    }
}

impl From<&ProvisioningConfig> for RetryPolicy {
    fn from(config: &ProvisioningConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
            attempt_timeout: config.attempt_timeout(),
        }
    }
}

/// Outcome of a retried call plus how many attempts it took
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Bounded pool of IaaS calls. At most `worker_count` calls are in flight at
/// once across every transition using the pool; each attempt runs under a
/// timeout and retryable failures are tried again after `retry_delay`.
pub struct ProvisioningPool {
    iaas: Arc<dyn IaasClient>,
    permits: Arc<Semaphore>,
    worker_count: usize,
    policy: RetryPolicy,
}

impl ProvisioningPool {
    pub fn new(iaas: Arc<dyn IaasClient>, config: &ProvisioningConfig) -> Self {
        Self::with_policy(iaas, config.worker_count, RetryPolicy::from(config))
    }

    pub fn with_policy(iaas: Arc<dyn IaasClient>, worker_count: usize, policy: RetryPolicy) -> Self {
        let worker_count = worker_count.max(1);
        Self {
            iaas,
            permits: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            policy,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn create_vm(
        &self,
        vm: &VmSpec,
        artifacts: &NodeArtifacts,
        cancel: &CancellationToken,
    ) -> Attempted<VmHandle> {
        let what = format!("create {}", vm.name);
        self.run(&what, cancel, || {
            self.iaas.create_vm(vm, &artifacts.user_data, &artifacts.meta_data)
        })
        .await
    }

    pub async fn delete_vm(&self, vm_id: &str, cancel: &CancellationToken) -> Attempted<()> {
        let what = format!("delete {}", vm_id);
        self.run(&what, cancel, || self.iaas.delete_vm(vm_id)).await
    }

    async fn run<T, F, Fut>(&self, what: &str, cancel: &CancellationToken, mut call: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Attempted {
                        result: Err(NexaError::Cancelled(what.to_string())),
                        attempts,
                    };
                }
                permit = self.permits.acquire() => permit,
            };
            let Ok(_permit) = permit else {
                return Attempted {
                    result: Err(NexaError::internal("provisioning pool is closed")),
                    attempts,
                };
            };

            attempts += 1;
            // Once sent to the IaaS an attempt runs to completion, bounded by the
            // attempt timeout, so a VM it creates is always reported back.
            let outcome = self.attempt(what, call()).await;

            match outcome {
                Ok(value) => {
                    debug!("{} succeeded after {} attempt(s)", what, attempts);
                    return Attempted { result: Ok(value), attempts };
                }
                Err(e) if e.is_retryable() && attempts < self.policy.max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        what, attempts, self.policy.max_attempts, e
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Attempted {
                                result: Err(NexaError::Cancelled(what.to_string())),
                                attempts,
                            };
                        }
                        _ = tokio::time::sleep(self.policy.retry_delay) => {}
                    }
                }
                Err(e) => return Attempted { result: Err(e), attempts },
            }
        }
    }

    async fn attempt<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.policy.attempt_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(NexaError::Timeout(format!(
                "{} did not finish within {:?}",
                what, self.policy.attempt_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::iaas::InMemoryIaas;
    use crate::templates::FileTemplate;
    use crate::types::NodeRole;
    use std::collections::BTreeMap;
    use std::time::Instant;

    fn policy(timeout_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(5),
            attempt_timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn artifacts() -> NodeArtifacts {
        let file = FileTemplate {
            file_path: "scripts/x".to_string(),
            parameters: BTreeMap::new(),
        };
        NodeArtifacts {
            user_data: file.clone(),
            meta_data: file,
        }
    }

    fn slave(name: &str) -> VmSpec {
        VmSpec {
            name: name.to_string(),
            role: NodeRole::Slave,
            host_id: name.to_string(),
            static_ip: None,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let iaas = Arc::new(InMemoryIaas::new());
        iaas.fail_next_creates(2);
        let pool = ProvisioningPool::with_policy(iaas.clone(), 2, policy(1000));

        let outcome = pool.create_vm(&slave("slave-1"), &artifacts(), &CancellationToken::new()).await;
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(iaas.vm_count(), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let iaas = Arc::new(InMemoryIaas::new());
        iaas.fail_role(NodeRole::Slave);
        let pool = ProvisioningPool::with_policy(iaas.clone(), 2, policy(1000));

        let outcome = pool.create_vm(&slave("slave-1"), &artifacts(), &CancellationToken::new()).await;
        assert!(matches!(outcome.result, Err(NexaError::Provisioning(_))));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(iaas.create_calls(), 3);
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let iaas = Arc::new(InMemoryIaas::new());
        iaas.set_delay(Duration::from_millis(200));
        let pool = ProvisioningPool::with_policy(iaas, 1, policy(20));

        let outcome = pool.create_vm(&slave("slave-1"), &artifacts(), &CancellationToken::new()).await;
        assert!(matches!(outcome.result, Err(NexaError::Timeout(_))));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retries() {
        let iaas = Arc::new(InMemoryIaas::new());
        iaas.set_delay(Duration::from_millis(200));
        let pool = ProvisioningPool::with_policy(iaas, 1, policy(1000));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = pool.create_vm(&slave("slave-1"), &artifacts(), &cancel).await;
        assert!(matches!(outcome.result, Err(NexaError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_cancel_lets_inflight_create_finish() {
        let iaas = Arc::new(InMemoryIaas::new());
        iaas.set_delay(Duration::from_millis(100));
        let pool = Arc::new(ProvisioningPool::with_policy(iaas.clone(), 1, policy(1000)));
        let cancel = CancellationToken::new();

        let call = {
            let (pool, cancel) = (pool.clone(), cancel.clone());
            tokio::spawn(async move { pool.create_vm(&slave("slave-1"), &artifacts(), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let outcome = call.await.unwrap();
        let handle = outcome.result.unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(iaas.vm_count(), 1);
        assert!(iaas.vms().iter().any(|vm| vm.handle.vm_id == handle.vm_id));

        // Nothing further is sent once cancelled.
        let outcome = pool.create_vm(&slave("slave-2"), &artifacts(), &cancel).await;
        assert!(matches!(outcome.result, Err(NexaError::Cancelled(_))));
        assert_eq!(outcome.attempts, 0);
        assert_eq!(iaas.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let iaas = Arc::new(InMemoryIaas::new());
        iaas.set_delay(Duration::from_millis(40));
        let pool = Arc::new(ProvisioningPool::with_policy(iaas.clone(), 2, policy(1000)));

        let started = Instant::now();
        let calls = (0..4).map(|i| {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.create_vm(&slave(&format!("slave-{}", i)), &artifacts(), &CancellationToken::new())
                    .await
                    .result
            })
        });
        for result in futures::future::join_all(calls).await {
            assert!(result.unwrap().is_ok());
        }
        // Four 40ms calls through two permits take at least two rounds.
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(iaas.vm_count(), 4);
    }
}
