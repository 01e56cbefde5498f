// # dnsink-core
//
// Core library for the notification-driven DNS/IPAM reconciler.
//
// ## Architecture Overview
//
// One notification in, one converged set of DNS and IPAM records out:
// - **NotificationSource**: Trait for receiving decoded platform notifications
// - **DnsService**: Trait over the zone-management service (zones, recordsets, records)
// - **ComputeService**: Trait over the compute platform (instance lookups, metadata)
// - **IpamBackend**: Trait over the IP address management system
// - **NotificationHandler**: Reconciler for one event family (fixed or floating addresses)
// - **HandlerRegistry**: Maps (exchange, event type) to the handlers that accept it
// - **SinkEngine**: Pulls notifications from the source and drives the registry
//
// ## Design Principles
//
// 1. **Stateless per event**: every event re-derives its target state from the backends
// 2. **Find before create**: redelivered events reconverge instead of duplicating records
// 3. **Step isolation**: one failed backend call never prevents an independent step
// 4. **Library-First**: backends are trait objects, HTTP lives in adapter crates

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod handler;
pub mod hostname;
pub mod ipam;
pub mod memory;
pub mod model;
pub mod outcome;
pub mod recordset;
pub mod registry;
pub mod reverse;
pub mod traits;

// Re-export core types for convenience
pub use config::{EngineConfig, FixedHandlerConfig, FloatingHandlerConfig, SinkConfig};
pub use engine::{EngineEvent, SinkEngine};
pub use error::{Error, Result};
pub use event::{Notification, NotificationContext, SinkEvent};
pub use handler::{Backends, FixedAddressHandler, FloatingAddressHandler, NotificationHandler};
pub use ipam::IpamSync;
pub use memory::{MemoryComputeService, MemoryDnsService, MemoryIpam};
pub use outcome::{EventOutcome, Step, StepOutcome, StepReport};
pub use registry::{Dispatch, EventTypeMatcher, HandlerRegistry};
pub use traits::{ComputeService, DnsService, IpamBackend, NotificationSource};
