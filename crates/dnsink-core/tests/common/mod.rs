//! Test doubles and common utilities for reconciliation contract tests
//!
//! The doubles wrap the in-memory backends so contract tests observe real
//! uniqueness behavior while counting calls or injecting failures.

#![allow(dead_code)]

use async_trait::async_trait;
use dnsink_core::error::{Error, Result};
use dnsink_core::model::{
    AddressObject, AddressUpdate, Instance, NewRecord, Record, RecordCriteria, RecordType,
    Recordset, Zone, ZoneCriteria,
};
use dnsink_core::{
    Backends, DnsService, FixedHandlerConfig, FloatingHandlerConfig, HandlerRegistry, IpamBackend,
    MemoryComputeService, MemoryDnsService, MemoryIpam, Notification, NotificationContext,
    NotificationSource, SinkConfig,
};
use serde_json::json;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_stream::Stream;

pub const FORWARD_ZONE: &str = "zone-fwd";
pub const REVERSE_V4_ZONE: &str = "zone-rev4";
pub const REVERSE_V6_ZONE: &str = "zone-rev6";
pub const FLOATING_POOL: &str = "prefix-floating";

/// A NotificationSource that yields notifications sent by the test
pub struct ControlledSource {
    /// Receiver for the engine's watch stream
    engine_rx: Arc<std::sync::Mutex<Option<mpsc::UnboundedReceiver<Notification>>>>,
    /// Call counter for watch()
    watch_call_count: Arc<AtomicUsize>,
}

impl ControlledSource {
    /// Create a new controlled source and the sender feeding it
    pub fn new() -> (Self, mpsc::UnboundedSender<Notification>) {
        let (test_tx, engine_rx) = mpsc::unbounded_channel();
        let source = Self {
            engine_rx: Arc::new(std::sync::Mutex::new(Some(engine_rx))),
            watch_call_count: Arc::new(AtomicUsize::new(0)),
        };
        (source, test_tx)
    }

    /// Get the number of times watch() was called
    pub fn watch_call_count(&self) -> usize {
        self.watch_call_count.load(Ordering::SeqCst)
    }
}

impl NotificationSource for ControlledSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = Notification> + Send + 'static>> {
        self.watch_call_count.fetch_add(1, Ordering::SeqCst);

        let rx = self
            .engine_rx
            .lock()
            .unwrap()
            .take()
            .expect("watch() can only be called once");
        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }

    fn source_name(&self) -> &'static str {
        "controlled"
    }
}

/// DnsService wrapper counting creates and optionally hiding recordsets once
///
/// With `hide_next_lookup` set, the next `find_recordset` reports nothing even
/// when the recordset exists, which is what a worker losing a create race sees.
pub struct CountingDns {
    inner: MemoryDnsService,
    create_recordset_calls: Arc<AtomicUsize>,
    create_record_calls: Arc<AtomicUsize>,
    hide_next_lookup: Arc<AtomicBool>,
    fail_zone_listing: Arc<AtomicBool>,
}

impl CountingDns {
    pub fn new(inner: MemoryDnsService) -> Self {
        Self {
            inner,
            create_recordset_calls: Arc::new(AtomicUsize::new(0)),
            create_record_calls: Arc::new(AtomicUsize::new(0)),
            hide_next_lookup: Arc::new(AtomicBool::new(false)),
            fail_zone_listing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn create_recordset_calls(&self) -> usize {
        self.create_recordset_calls.load(Ordering::SeqCst)
    }

    pub fn create_record_calls(&self) -> usize {
        self.create_record_calls.load(Ordering::SeqCst)
    }

    pub fn hide_next_lookup(&self) {
        self.hide_next_lookup.store(true, Ordering::SeqCst);
    }

    pub fn fail_zone_listing(&self) {
        self.fail_zone_listing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DnsService for CountingDns {
    async fn find_zones(&self, criteria: &ZoneCriteria) -> Result<Vec<Zone>> {
        if self.fail_zone_listing.load(Ordering::SeqCst) {
            return Err(Error::dns("zone listing unavailable"));
        }
        self.inner.find_zones(criteria).await
    }

    async fn get_zone(&self, zone_id: &str) -> Result<Zone> {
        self.inner.get_zone(zone_id).await
    }

    async fn find_recordset(
        &self,
        zone_id: &str,
        name: &str,
        record_type: RecordType,
    ) -> Result<Option<Recordset>> {
        if self.hide_next_lookup.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_recordset(zone_id, name, record_type).await
    }

    async fn create_recordset(
        &self,
        zone_id: &str,
        name: &str,
        record_type: RecordType,
        record: &NewRecord,
    ) -> Result<(Recordset, Record)> {
        self.create_recordset_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .create_recordset(zone_id, name, record_type, record)
            .await
    }

    async fn create_record(
        &self,
        zone_id: &str,
        recordset_id: &str,
        record: &NewRecord,
    ) -> Result<Record> {
        self.create_record_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.create_record(zone_id, recordset_id, record).await
    }

    async fn find_records(&self, criteria: &RecordCriteria) -> Result<Vec<Record>> {
        self.inner.find_records(criteria).await
    }

    async fn delete_record(&self, zone_id: &str, recordset_id: &str, record_id: &str) -> Result<()> {
        self.inner.delete_record(zone_id, recordset_id, record_id).await
    }

    async fn delete_recordset(&self, zone_id: &str, recordset_id: &str) -> Result<()> {
        self.inner.delete_recordset(zone_id, recordset_id).await
    }

    fn service_name(&self) -> &'static str {
        "counting"
    }
}

/// IpamBackend whose every call fails, counting the attempts
pub struct FailingIpam {
    call_count: Arc<AtomicUsize>,
}

impl FailingIpam {
    pub fn new() -> Self {
        Self {
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Err(Error::backend("failing-ipam", "HTTP 503"))
    }
}

#[async_trait]
impl IpamBackend for FailingIpam {
    async fn find_address(&self, _address: IpAddr, _prefix_id: Option<&str>) -> Result<Option<AddressObject>> {
        self.fail()
    }

    async fn create_address(&self, _address: IpAddr) -> Result<AddressObject> {
        self.fail()
    }

    async fn update_address(&self, _object: &AddressObject, _update: &AddressUpdate) -> Result<AddressObject> {
        self.fail()
    }

    async fn delete_address(&self, _object: &AddressObject) -> Result<()> {
        self.fail()
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// In-memory deployment: forward zone, v4 and v6 reverse zones, one instance
pub struct World {
    pub dns: MemoryDnsService,
    pub compute: MemoryComputeService,
    pub ipam: MemoryIpam,
}

impl World {
    /// Instance `vm-1` (`instance-vm1`) holding 10.0.0.5 and 2001:db8::5,
    /// floating pool member 198.51.100.7 provisioned in IPAM
    pub async fn new() -> Self {
        let dns = MemoryDnsService::new();
        dns.add_zone(Zone::new(FORWARD_ZONE, "example.org.").with_tenant("admin"))
            .await;
        dns.add_zone(Zone::new(REVERSE_V4_ZONE, "100.51.198.in-addr.arpa.").with_tenant("admin"))
            .await;
        // 2001:db8::/64
        dns.add_zone(Zone::new(REVERSE_V6_ZONE, "0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa.").with_tenant("admin"))
            .await;

        let compute = MemoryComputeService::new();
        compute
            .add_instance(
                Instance::new("vm-1", "instance-vm1")
                    .with_address("10.0.0.5".parse().unwrap())
                    .with_address("2001:db8::5".parse().unwrap())
                    .with_tenant("tenant-1"),
            )
            .await;

        let ipam = MemoryIpam::new();
        ipam.provision("198.51.100.7".parse().unwrap(), FLOATING_POOL, "Floating IP")
            .await;

        Self { dns, compute, ipam }
    }

    pub fn config() -> SinkConfig {
        let mut fixed = FixedHandlerConfig::new(FORWARD_ZONE);
        fixed.zone_owner_tenant_id = Some("admin".to_string());
        let mut floating = FloatingHandlerConfig::new(FORWARD_ZONE);
        floating.zone_owner_tenant_id = Some("admin".to_string());
        floating.ipam_prefix_id = Some(FLOATING_POOL.to_string());
        SinkConfig {
            fixed,
            floating,
            ..SinkConfig::default()
        }
    }

    /// Backends over the world's in-memory services
    pub fn backends(&self) -> Backends {
        Backends::new(Arc::new(self.dns.clone()), Arc::new(self.compute.clone()))
            .with_ipam(Arc::new(self.ipam.clone()))
    }

    /// Registry of both handlers over the given backends
    pub fn registry_with(backends: Backends) -> HandlerRegistry {
        HandlerRegistry::from_config(&Self::config(), backends)
    }

    pub fn registry(&self) -> HandlerRegistry {
        Self::registry_with(self.backends())
    }
}

pub fn context() -> NotificationContext {
    NotificationContext::for_project("demo")
}

pub fn instance_created(instance_id: &str) -> Notification {
    Notification::new(
        "nova",
        "compute.instance.create.end",
        json!({
            "instance_id": instance_id,
            "fixed_ips": [
                { "address": "10.0.0.5", "version": 4 },
                { "address": "2001:db8::5", "version": 6 }
            ]
        }),
    )
    .with_context(context())
}

pub fn instance_deleted(instance_id: &str) -> Notification {
    Notification::new(
        "nova",
        "compute.instance.delete.start",
        json!({ "instance_id": instance_id }),
    )
    .with_context(context())
}

pub fn floating_updated(floatingip_id: &str, floating: &str, fixed: Option<&str>) -> Notification {
    Notification::new(
        "neutron",
        "floatingip.update.end",
        json!({
            "floatingip": {
                "id": floatingip_id,
                "floating_ip_address": floating,
                "fixed_ip_address": fixed,
                "tenant_id": "tenant-1"
            }
        }),
    )
    .with_context(context())
}

pub fn floating_delete_started(floatingip_id: &str) -> Notification {
    Notification::new(
        "neutron",
        "floatingip.delete.start",
        json!({ "floatingip_id": floatingip_id }),
    )
    .with_context(context())
}

pub fn floating_deleted(floatingip_id: &str, floating: &str) -> Notification {
    Notification::new(
        "neutron",
        "floatingip.delete.end",
        json!({
            "floatingip": {
                "id": floatingip_id,
                "floating_ip_address": floating,
                "fixed_ip_address": null,
                "tenant_id": "tenant-1"
            }
        }),
    )
    .with_context(context())
}
