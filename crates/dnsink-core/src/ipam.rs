//! IPAM sync adapter
//!
//! Assignment state lives in the description of the address object. IPv4
//! objects belong to an externally provisioned pool and are only ever marked
//! unassigned. IPv6 objects are per-instance, created on demand and deleted
//! on unassignment.
//!
//! The configured prefix only scopes IPv4 lookups; IPv6 objects are looked up
//! by address alone.

use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::hostname::metadata_hostname;
use crate::model::{AddressObject, AddressUpdate, IpVersion};
use crate::outcome::StepOutcome;
use crate::traits::IpamBackend;

/// Description of an IPv4 pool member that is not assigned to anyone
pub const UNASSIGNED_DESCRIPTION: &str = "Floating IP";

/// Assignment policy on top of an [`IpamBackend`]
#[derive(Clone)]
pub struct IpamSync {
    backend: Arc<dyn IpamBackend>,
    prefix_id: Option<String>,
}

impl IpamSync {
    pub fn new(backend: Arc<dyn IpamBackend>, prefix_id: Option<String>) -> Self {
        Self { backend, prefix_id }
    }

    /// Description written on assignment
    pub fn assigned_description(project: &str, hostname: &str) -> String {
        format!("{} ({})", project, metadata_hostname(hostname))
    }

    /// Find the object for an address, creating it for IPv6
    ///
    /// # Returns
    ///
    /// - `Err(Error::NotFound)`: IPv4 address missing from the configured prefix
    pub async fn resolve(&self, address: IpAddr) -> Result<AddressObject> {
        if let Some(object) = self.find(address).await? {
            return Ok(object);
        }

        match IpVersion::of(address) {
            IpVersion::V6 => {
                let object = self.backend.create_address(address).await?;
                info!("Created IPAM object {} for {}", object.id, address);
                Ok(object)
            }
            IpVersion::V4 => Err(Error::not_found(format!(
                "{} is not provisioned in {} prefix {}",
                address,
                self.backend.backend_name(),
                self.prefix_id.as_deref().unwrap_or("(any)")
            ))),
        }
    }

    /// Mark an object as assigned to `hostname` in `project`
    pub async fn assign(
        &self,
        object: &AddressObject,
        hostname: &str,
        project: &str,
    ) -> Result<StepOutcome> {
        let description = Self::assigned_description(project, hostname);
        self.describe(object, description).await
    }

    /// Release an object: IPv4 is reset to the pool sentinel, IPv6 is deleted
    pub async fn unassign(&self, object: &AddressObject) -> Result<StepOutcome> {
        match IpVersion::of(object.address) {
            IpVersion::V4 => {
                self.describe(object, UNASSIGNED_DESCRIPTION.to_string())
                    .await
            }
            IpVersion::V6 => {
                self.backend.delete_address(object).await?;
                info!("Deleted IPAM object {} for {}", object.id, object.address);
                Ok(StepOutcome::Applied)
            }
        }
    }

    /// Resolve then release; an address the backend does not know is unchanged
    pub async fn release(&self, address: IpAddr) -> Result<StepOutcome> {
        match self.find(address).await? {
            Some(object) => self.unassign(&object).await,
            None => {
                debug!("No IPAM object for {}, nothing to release", address);
                Ok(StepOutcome::Unchanged)
            }
        }
    }

    async fn find(&self, address: IpAddr) -> Result<Option<AddressObject>> {
        let prefix = match IpVersion::of(address) {
            IpVersion::V4 => self.prefix_id.as_deref(),
            IpVersion::V6 => None,
        };
        self.backend.find_address(address, prefix).await
    }

    async fn describe(&self, object: &AddressObject, description: String) -> Result<StepOutcome> {
        if object.description == description {
            return Ok(StepOutcome::Unchanged);
        }
        let update = AddressUpdate {
            description: Some(description),
        };
        let stored = self.backend.update_address(object, &update).await?;
        info!("IPAM {} description set to {:?}", stored.address, stored.description);
        Ok(StepOutcome::Applied)
    }
}
