// # Memory IPAM
//
// In-memory implementation of IpamBackend, one object per address.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::{AddressObject, AddressUpdate};
use crate::traits::IpamBackend;

#[derive(Debug, Default)]
struct IpamState {
    objects: HashMap<IpAddr, AddressObject>,
    next_id: u64,
}

/// In-memory IPAM backend
#[derive(Debug, Clone, Default)]
pub struct MemoryIpam {
    inner: Arc<RwLock<IpamState>>,
}

impl MemoryIpam {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-provision a pool member, as an operator would for IPv4
    pub async fn provision(&self, address: IpAddr, prefix_id: &str, description: &str) -> AddressObject {
        let mut guard = self.inner.write().await;
        guard.next_id += 1;
        let object = AddressObject {
            id: guard.next_id.to_string(),
            address,
            prefix_id: Some(prefix_id.to_string()),
            description: description.to_string(),
        };
        guard.objects.insert(address, object.clone());
        object
    }

    /// Current object for an address
    pub async fn get(&self, address: IpAddr) -> Option<AddressObject> {
        self.inner.read().await.objects.get(&address).cloned()
    }

    /// Number of address objects
    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    /// Check if no address object exists
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.objects.is_empty()
    }
}

#[async_trait]
impl IpamBackend for MemoryIpam {
    async fn find_address(
        &self,
        address: IpAddr,
        prefix_id: Option<&str>,
    ) -> Result<Option<AddressObject>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .objects
            .get(&address)
            .filter(|o| prefix_id.is_none_or(|p| o.prefix_id.as_deref() == Some(p)))
            .cloned())
    }

    async fn create_address(&self, address: IpAddr) -> Result<AddressObject, Error> {
        let mut guard = self.inner.write().await;
        if guard.objects.contains_key(&address) {
            return Err(Error::conflict(format!("{} already exists", address)));
        }
        guard.next_id += 1;
        let object = AddressObject {
            id: guard.next_id.to_string(),
            address,
            prefix_id: None,
            description: String::new(),
        };
        guard.objects.insert(address, object.clone());
        Ok(object)
    }

    async fn update_address(
        &self,
        object: &AddressObject,
        update: &AddressUpdate,
    ) -> Result<AddressObject, Error> {
        let mut guard = self.inner.write().await;
        let stored = guard
            .objects
            .get_mut(&object.address)
            .filter(|o| o.id == object.id)
            .ok_or_else(|| Error::not_found(format!("IPAM object {}", object.id)))?;
        if let Some(ref description) = update.description {
            stored.description = description.clone();
        }
        Ok(stored.clone())
    }

    async fn delete_address(&self, object: &AddressObject) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let known = guard
            .objects
            .get(&object.address)
            .is_some_and(|stored| stored.id == object.id);
        if !known {
            return Err(Error::not_found(format!("IPAM object {}", object.id)));
        }
        guard.objects.remove(&object.address);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
