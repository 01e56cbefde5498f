//! Core traits for the reconciler
//!
//! This module defines the abstract interfaces that all backends must follow.
//!
//! - [`NotificationSource`]: Deliver decoded platform notifications
//! - [`DnsService`]: Zones, recordsets and records of the zone-management service
//! - [`ComputeService`]: Instance lookups and metadata on the compute platform
//! - [`IpamBackend`]: Address objects of the IP address management system

pub mod compute;
pub mod dns_service;
pub mod ipam_backend;
pub mod notification_source;

pub use compute::ComputeService;
pub use dns_service::DnsService;
pub use ipam_backend::IpamBackend;
pub use notification_source::NotificationSource;
