// # Memory Compute Service
//
// In-memory implementation of ComputeService.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::{Instance, InstanceFilter};
use crate::traits::ComputeService;

/// In-memory compute platform keyed by instance id
#[derive(Debug, Clone, Default)]
pub struct MemoryComputeService {
    inner: Arc<RwLock<BTreeMap<String, Instance>>>,
}

impl MemoryComputeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an instance
    pub async fn add_instance(&self, instance: Instance) {
        self.inner
            .write()
            .await
            .insert(instance.id.clone(), instance);
    }

    /// Remove an instance, as the platform does once deletion completes
    pub async fn remove_instance(&self, instance_id: &str) -> Option<Instance> {
        self.inner.write().await.remove(instance_id)
    }

    /// Current state of an instance
    pub async fn instance(&self, instance_id: &str) -> Option<Instance> {
        self.inner.read().await.get(instance_id).cloned()
    }
}

#[async_trait]
impl ComputeService for MemoryComputeService {
    async fn get_instance(&self, instance_id: &str) -> Result<Instance, Error> {
        self.instance(instance_id)
            .await
            .ok_or_else(|| Error::not_found(format!("instance {}", instance_id)))
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    async fn set_instance_metadata(
        &self,
        instance_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let instance = guard
            .get_mut(instance_id)
            .ok_or_else(|| Error::not_found(format!("instance {}", instance_id)))?;
        instance.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn service_name(&self) -> &'static str {
        "memory"
    }
}
