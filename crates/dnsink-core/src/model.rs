//! Backend data model
//!
//! Plain data exchanged with the DNS service, the compute platform and the
//! IPAM system. None of it is owned or cached by the reconciler.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

/// A DNS namespace the reconciler may write into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    /// Owning tenant, when the DNS service reports it
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl Zone {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tenant_id: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// DNS record type handled by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Ptr,
}

impl RecordType {
    /// Forward record type for an address
    pub fn forward_for(address: IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::Aaaa,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Ptr => "PTR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "A" => Some(RecordType::A),
            "AAAA" => Some(RecordType::Aaaa),
            "PTR" => Some(RecordType::Ptr),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group of records sharing `(zone_id, name, type)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recordset {
    pub id: String,
    pub zone_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
}

/// Ownership tag of a reconciler-managed record
///
/// This is the only handle used for later deletion, so it must identify the
/// creating plugin and resource exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedIdentity {
    pub plugin_name: String,
    pub plugin_type: String,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

impl ManagedIdentity {
    /// Plugin type shared by every notification handler
    pub const PLUGIN_TYPE: &'static str = "handler";

    /// Resource type of instance-owned records
    pub const RESOURCE_INSTANCE: &'static str = "instance";

    /// Identity of a record owned by an instance-scoped resource
    pub fn instance(plugin_name: &str, resource_id: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            plugin_type: Self::PLUGIN_TYPE.to_string(),
            resource_type: Self::RESOURCE_INSTANCE.to_string(),
            resource_id: resource_id.into(),
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }
}

/// Qualifier linking a floating-address record to the instance it points at
pub fn instance_extra(instance_id: &str) -> String {
    format!("instance:{}", instance_id)
}

/// Qualifier telling apart the records of one instance's fixed addresses
pub fn address_extra(address: IpAddr) -> String {
    format!("address:{}", address)
}

/// A record as stored by the DNS service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub zone_id: String,
    pub recordset_id: String,
    pub data: String,
    /// `None` for records created by other actors
    #[serde(default)]
    pub managed: Option<ManagedIdentity>,
}

impl Record {
    pub fn is_managed(&self) -> bool {
        self.managed.is_some()
    }
}

/// Record to be created inside a recordset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub data: String,
    pub managed: ManagedIdentity,
}

/// Filter for zone lookups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneCriteria {
    pub tenant_id: Option<String>,
    pub name: Option<String>,
}

impl ZoneCriteria {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn owned_by(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            name: None,
        }
    }

    pub fn matches(&self, zone: &Zone) -> bool {
        if let Some(ref tenant_id) = self.tenant_id {
            if zone.tenant_id.as_deref() != Some(tenant_id.as_str()) {
                return false;
            }
        }
        if let Some(ref name) = self.name {
            if !crate::reverse::zone_names_equal(&zone.name, name) {
                return false;
            }
        }
        true
    }
}

/// Filter for record lookups; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordCriteria {
    pub zone_id: Option<String>,
    pub recordset_id: Option<String>,
    pub plugin_name: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub extra: Option<String>,
}

impl RecordCriteria {
    /// Records of one owning resource, as created by one plugin
    pub fn owned_by(plugin_name: &str, resource_id: &str) -> Self {
        Self {
            plugin_name: Some(plugin_name.to_string()),
            resource_type: Some(ManagedIdentity::RESOURCE_INSTANCE.to_string()),
            resource_id: Some(resource_id.to_string()),
            ..Self::default()
        }
    }

    /// Records of one plugin carrying a given extra qualifier
    pub fn with_extra(plugin_name: &str, extra: impl Into<String>) -> Self {
        Self {
            plugin_name: Some(plugin_name.to_string()),
            resource_type: Some(ManagedIdentity::RESOURCE_INSTANCE.to_string()),
            extra: Some(extra.into()),
            ..Self::default()
        }
    }

    pub fn in_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.zone_id = Some(zone_id.into());
        self
    }

    pub fn in_recordset(mut self, recordset_id: impl Into<String>) -> Self {
        self.recordset_id = Some(recordset_id.into());
        self
    }

    /// Whether any managed-identity field is constrained
    fn constrains_identity(&self) -> bool {
        self.plugin_name.is_some()
            || self.resource_type.is_some()
            || self.resource_id.is_some()
            || self.extra.is_some()
    }

    pub fn matches(&self, record: &Record) -> bool {
        if self.zone_id.as_deref().is_some_and(|z| z != record.zone_id) {
            return false;
        }
        if self
            .recordset_id
            .as_deref()
            .is_some_and(|rs| rs != record.recordset_id)
        {
            return false;
        }
        if !self.constrains_identity() {
            return true;
        }
        let Some(ref managed) = record.managed else {
            return false;
        };
        self.plugin_name
            .as_deref()
            .is_none_or(|p| p == managed.plugin_name)
            && self
                .resource_type
                .as_deref()
                .is_none_or(|t| t == managed.resource_type)
            && self
                .resource_id
                .as_deref()
                .is_none_or(|id| id == managed.resource_id)
            && self
                .extra
                .as_deref()
                .is_none_or(|e| managed.extra.as_deref() == Some(e))
    }
}

/// An address attached to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAddress {
    pub addr: IpAddr,
    pub version: u8,
}

/// A compute instance as reported by the compute platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Platform-internal name, e.g. `instance-0000002a`
    #[serde(default)]
    pub internal_name: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub addresses: Vec<InstanceAddress>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Instance {
    pub fn new(id: impl Into<String>, internal_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            internal_name: Some(internal_name.into()),
            tenant_id: None,
            status: Some("ACTIVE".to_string()),
            addresses: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_address(mut self, addr: IpAddr) -> Self {
        let version = match addr {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        };
        self.addresses.push(InstanceAddress { addr, version });
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// Filter for instance listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    pub ip: Option<IpAddr>,
    pub status: Option<String>,
    pub tenant_id: Option<String>,
    pub all_tenants: bool,
}

impl InstanceFilter {
    /// Active instances of any tenant holding the given fixed address
    pub fn active_with_ip(ip: IpAddr, tenant_id: Option<String>) -> Self {
        Self {
            ip: Some(ip),
            status: Some("ACTIVE".to_string()),
            tenant_id,
            all_tenants: true,
        }
    }

    pub fn matches(&self, instance: &Instance) -> bool {
        if let Some(ip) = self.ip {
            if !instance.addresses.iter().any(|a| a.addr == ip) {
                return false;
            }
        }
        if let Some(ref status) = self.status {
            if instance.status.as_deref() != Some(status.as_str()) {
                return false;
            }
        }
        if let Some(ref tenant_id) = self.tenant_id {
            if instance.tenant_id.as_deref() != Some(tenant_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// IP version of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn of(address: IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    /// Parse the numeric version carried by notifications
    pub fn from_number(version: u8) -> Option<Self> {
        match version {
            4 => Some(IpVersion::V4),
            6 => Some(IpVersion::V6),
            _ => None,
        }
    }
}

/// IPAM address object; `description` doubles as the assignment state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressObject {
    /// Backend handle of the object
    pub id: String,
    pub address: IpAddr,
    #[serde(default)]
    pub prefix_id: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Fields changed on an IPAM address object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
