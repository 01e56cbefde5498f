// # Compute Service Trait
//
// Defines the interface to the compute platform.
//
// ## Implementations
//
// - Nova REST API: `dnsink-openstack` crate
// - In-memory: `dnsink_core::memory::MemoryComputeService`

use async_trait::async_trait;

use crate::model::{Instance, InstanceFilter};

/// Trait for compute platform implementations
#[async_trait]
pub trait ComputeService: Send + Sync {
    /// Fetch one instance by id
    ///
    /// # Returns
    ///
    /// - `Err(Error::NotFound)`: No such instance
    async fn get_instance(&self, instance_id: &str) -> Result<Instance, crate::Error>;

    /// List instances matching the filter
    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, crate::Error>;

    /// Set one metadata item on an instance
    async fn set_instance_metadata(
        &self,
        instance_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), crate::Error>;

    /// Service name (for logging/debugging)
    fn service_name(&self) -> &'static str;
}
