//! Configuration types for the reconciler
//!
//! Every handler receives its configuration at construction; nothing is read
//! from process-global state while an event is being reconciled.

use serde::{Deserialize, Serialize};

/// Main reconciler configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Fixed-address (instance create/delete) handler
    #[serde(default)]
    pub fixed: FixedHandlerConfig,

    /// Floating-address (floating IP update/delete) handler
    #[serde(default)]
    pub floating: FloatingHandlerConfig,

    /// Engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl SinkConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self.fixed.enabled && !self.floating.enabled {
            return Err(crate::Error::config("No handler enabled"));
        }
        if self.fixed.enabled {
            self.fixed.validate()?;
        }
        if self.floating.enabled {
            self.floating.validate()?;
        }
        self.engine.validate()?;
        Ok(())
    }
}

/// Settings for the fixed-address handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedHandlerConfig {
    /// Whether the handler is registered at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Exchange the handler listens on
    #[serde(default = "default_compute_exchange")]
    pub control_exchange: String,

    /// Topics the handler listens on
    #[serde(default = "default_topics")]
    pub notification_topics: Vec<String>,

    /// Forward zone receiving AAAA records
    #[serde(default)]
    pub zone_id: String,

    /// Reverse zone receiving PTR records; resolved per address when unset
    #[serde(default)]
    pub reverse_zone_id: Option<String>,

    /// Tenant owning the candidate reverse zones (all zones when unset)
    #[serde(default)]
    pub zone_owner_tenant_id: Option<String>,

    /// IPAM prefix the addresses belong to
    #[serde(default)]
    pub ipam_prefix_id: Option<String>,
}

impl FixedHandlerConfig {
    pub fn new(zone_id: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_common(&self.control_exchange, &self.notification_topics, &self.zone_id, "fixed")
    }
}

impl Default for FixedHandlerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            control_exchange: default_compute_exchange(),
            notification_topics: default_topics(),
            zone_id: String::new(),
            reverse_zone_id: None,
            zone_owner_tenant_id: None,
            ipam_prefix_id: None,
        }
    }
}

/// Settings for the floating-address handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatingHandlerConfig {
    /// Whether the handler is registered at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Exchange the handler listens on
    #[serde(default = "default_network_exchange")]
    pub control_exchange: String,

    /// Topics the handler listens on
    #[serde(default = "default_topics")]
    pub notification_topics: Vec<String>,

    /// Forward zone receiving A records
    #[serde(default)]
    pub zone_id: String,

    /// Tenant owning the candidate reverse zones (all zones when unset)
    #[serde(default)]
    pub zone_owner_tenant_id: Option<String>,

    /// IPAM prefix of the floating address pool
    #[serde(default)]
    pub ipam_prefix_id: Option<String>,
}

impl FloatingHandlerConfig {
    pub fn new(zone_id: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_common(
            &self.control_exchange,
            &self.notification_topics,
            &self.zone_id,
            "floating",
        )
    }
}

impl Default for FloatingHandlerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            control_exchange: default_network_exchange(),
            notification_topics: default_topics(),
            zone_id: String::new(),
            zone_owner_tenant_id: None,
            ipam_prefix_id: None,
        }
    }
}

fn validate_common(
    exchange: &str,
    topics: &[String],
    zone_id: &str,
    handler: &str,
) -> Result<(), crate::Error> {
    if exchange.is_empty() {
        return Err(crate::Error::config(format!(
            "{} handler control exchange cannot be empty",
            handler
        )));
    }
    if topics.is_empty() || topics.iter().any(|t| t.is_empty()) {
        return Err(crate::Error::config(format!(
            "{} handler needs at least one non-empty notification topic",
            handler
        )));
    }
    if zone_id.is_empty() {
        return Err(crate::Error::config(format!(
            "{} handler zone id is required",
            handler
        )));
    }
    Ok(())
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the engine event channel
    ///
    /// When full, new engine events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_compute_exchange() -> String {
    "nova".to_string()
}

fn default_network_exchange() -> String {
    "neutron".to_string()
}

fn default_topics() -> Vec<String> {
    vec!["notifications".to_string()]
}

fn default_event_channel_capacity() -> usize {
    1000
}
