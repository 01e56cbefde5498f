// # IPAM Backend Trait
//
// Defines the interface to the IP address management system.
//
// ## Implementations
//
// - NetBox REST API: `dnsink-netbox` crate
// - In-memory: `dnsink_core::memory::MemoryIpam`
//
// Assignment policy (what to write, when to delete) lives in
// `dnsink_core::ipam::IpamSync`; backends only move objects.

use async_trait::async_trait;
use std::net::IpAddr;

use crate::model::{AddressObject, AddressUpdate};

/// Trait for IPAM backend implementations
///
/// Backends must keep at most one address object per address.
#[async_trait]
pub trait IpamBackend: Send + Sync {
    /// Look up the object for an address, optionally restricted to a prefix
    async fn find_address(
        &self,
        address: IpAddr,
        prefix_id: Option<&str>,
    ) -> Result<Option<AddressObject>, crate::Error>;

    /// Create an object for an address
    async fn create_address(&self, address: IpAddr) -> Result<AddressObject, crate::Error>;

    /// Change fields of an object, returning the stored result
    async fn update_address(
        &self,
        object: &AddressObject,
        update: &AddressUpdate,
    ) -> Result<AddressObject, crate::Error>;

    /// Delete an object
    async fn delete_address(&self, object: &AddressObject) -> Result<(), crate::Error>;

    /// Backend name (for logging/debugging)
    fn backend_name(&self) -> &'static str;
}
