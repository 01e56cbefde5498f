//! Notification envelope and typed event payloads
//!
//! A [`Notification`] is what the transport delivers. Before any handler sees
//! it, the payload is validated into one [`SinkEvent`] variant per accepted
//! event type; a payload that does not fit is rejected as malformed and no
//! mutation is attempted for it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;

use crate::error::{Error, Result};
use crate::model::IpVersion;

pub const INSTANCE_CREATE_END: &str = "compute.instance.create.end";
pub const INSTANCE_DELETE_START: &str = "compute.instance.delete.start";
pub const FLOATINGIP_UPDATE_END: &str = "floatingip.update.end";
pub const FLOATINGIP_DELETE_PREFIX: &str = "floatingip.delete";

/// Request context attached to a notification by the emitting service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContext {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl NotificationContext {
    pub fn for_project(project_name: impl Into<String>) -> Self {
        Self {
            project_name: Some(project_name.into()),
            ..Self::default()
        }
    }
}

/// A decoded notification as delivered by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub exchange: String,
    #[serde(default)]
    pub topic: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub context: NotificationContext,
    #[serde(default)]
    pub message_id: Option<String>,
}

impl Notification {
    pub fn new(exchange: impl Into<String>, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            exchange: exchange.into(),
            topic: "notifications".to_string(),
            event_type: event_type.into(),
            payload,
            context: NotificationContext::default(),
            message_id: None,
        }
    }

    pub fn with_context(mut self, context: NotificationContext) -> Self {
        self.context = context;
        self
    }
}

/// One fixed address of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIp {
    pub address: IpAddr,
    pub version: u8,
}

impl FixedIp {
    pub fn ip_version(&self) -> Option<IpVersion> {
        IpVersion::from_number(self.version)
    }
}

/// Validated payload, one variant per accepted event type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Instance finished booting with the given fixed addresses
    InstanceCreated {
        instance_id: String,
        fixed_ips: Vec<FixedIp>,
    },

    /// Instance is about to be deleted; the payload carries no addresses
    InstanceDeleted { instance_id: String },

    /// Floating IP attached (fixed address set) or detached (fixed address empty)
    FloatingIpUpdated {
        floatingip_id: String,
        floating_ip_address: IpAddr,
        fixed_ip_address: Option<IpAddr>,
        tenant_id: Option<String>,
    },

    /// Floating IP released; `.start` events only carry the id
    FloatingIpDeleted {
        floatingip_id: String,
        floating_ip_address: Option<IpAddr>,
    },
}

#[derive(Deserialize)]
struct InstanceCreatePayload {
    instance_id: String,
    #[serde(default)]
    fixed_ips: Vec<FixedIp>,
}

#[derive(Deserialize)]
struct InstanceDeletePayload {
    instance_id: String,
}

#[derive(Deserialize)]
struct FloatingIpBody {
    id: String,
    floating_ip_address: IpAddr,
    #[serde(default, deserialize_with = "empty_ip_as_none")]
    fixed_ip_address: Option<IpAddr>,
    #[serde(default)]
    tenant_id: Option<String>,
}

#[derive(Deserialize)]
struct FloatingIpUpdatePayload {
    floatingip: FloatingIpBody,
}

#[derive(Deserialize)]
struct FloatingIpDeletePayload {
    #[serde(default)]
    floatingip_id: Option<String>,
    #[serde(default)]
    floatingip: Option<FloatingIpBody>,
}

/// Neutron reports a detached floating IP with `null` or `""`
fn empty_ip_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<IpAddr>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn decode<T: serde::de::DeserializeOwned>(event_type: &str, payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| Error::malformed(format!("{}: {}", event_type, e)))
}

impl SinkEvent {
    /// Validate a raw payload for the given event type
    ///
    /// # Returns
    ///
    /// - `Ok(SinkEvent)`: The typed payload
    /// - `Err(Error::MalformedPayload)`: Unknown event type or missing/mistyped field
    pub fn parse(event_type: &str, payload: &Value) -> Result<Self> {
        match event_type {
            INSTANCE_CREATE_END => {
                let p: InstanceCreatePayload = decode(event_type, payload)?;
                require_non_empty("instance_id", &p.instance_id)?;
                Ok(SinkEvent::InstanceCreated {
                    instance_id: p.instance_id,
                    fixed_ips: p.fixed_ips,
                })
            }
            INSTANCE_DELETE_START => {
                let p: InstanceDeletePayload = decode(event_type, payload)?;
                require_non_empty("instance_id", &p.instance_id)?;
                Ok(SinkEvent::InstanceDeleted {
                    instance_id: p.instance_id,
                })
            }
            FLOATINGIP_UPDATE_END => {
                let p: FloatingIpUpdatePayload = decode(event_type, payload)?;
                require_non_empty("floatingip.id", &p.floatingip.id)?;
                Ok(SinkEvent::FloatingIpUpdated {
                    floatingip_id: p.floatingip.id,
                    floating_ip_address: p.floatingip.floating_ip_address,
                    fixed_ip_address: p.floatingip.fixed_ip_address,
                    tenant_id: p.floatingip.tenant_id,
                })
            }
            t if t.starts_with(FLOATINGIP_DELETE_PREFIX) => {
                let p: FloatingIpDeletePayload = decode(event_type, payload)?;
                let address = p.floatingip.as_ref().map(|f| f.floating_ip_address);
                let id = p
                    .floatingip_id
                    .or_else(|| p.floatingip.map(|f| f.id))
                    .ok_or_else(|| Error::malformed(format!("{}: missing floatingip_id", t)))?;
                require_non_empty("floatingip_id", &id)?;
                Ok(SinkEvent::FloatingIpDeleted {
                    floatingip_id: id,
                    floating_ip_address: address,
                })
            }
            other => Err(Error::malformed(format!("unsupported event type: {}", other))),
        }
    }

    /// Short name used in logs and outcome records
    pub fn kind(&self) -> &'static str {
        match self {
            SinkEvent::InstanceCreated { .. } => "instance-created",
            SinkEvent::InstanceDeleted { .. } => "instance-deleted",
            SinkEvent::FloatingIpUpdated { .. } => "floatingip-updated",
            SinkEvent::FloatingIpDeleted { .. } => "floatingip-deleted",
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::malformed(format!("{} is empty", field)));
    }
    Ok(())
}
