//! Event reconcilers
//!
//! One handler per event family. A handler turns one validated
//! [`SinkEvent`] into the DNS and IPAM mutations it implies and records the
//! result of every step in an [`EventOutcome`]. Steps never propagate
//! errors to each other: only a missing precondition (no instance, no zone,
//! no hostname) skips the steps that depend on it.
//!
//! - [`FixedAddressHandler`]: instance create/delete, AAAA + PTR per fixed IPv6 address
//! - [`FloatingAddressHandler`]: floating IP attach/detach/delete, A + PTR for the floating address

pub mod fixed;
pub mod floating;

pub use fixed::FixedAddressHandler;
pub use floating::FloatingAddressHandler;

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::event::{NotificationContext, SinkEvent};
use crate::ipam::IpamSync;
use crate::model::{ManagedIdentity, RecordCriteria, RecordType, Zone, ZoneCriteria};
use crate::outcome::{EventOutcome, Step, StepOutcome};
use crate::recordset::{self, deletion_outcome};
use crate::registry::EventTypeMatcher;
use crate::reverse::{resolve_reverse_zone, reverse_pointer, zone_encloses};
use crate::traits::{ComputeService, DnsService, IpamBackend};

/// Reconciler for one event family
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Plugin name, also written into the managed identity of every record
    fn name(&self) -> &'static str;

    /// Exchange the handler listens on
    fn exchange(&self) -> &str;

    /// Topics the handler listens on
    fn topics(&self) -> &[String];

    /// Event types the handler accepts
    fn event_types(&self) -> &[EventTypeMatcher];

    /// Reconcile one event
    ///
    /// Never fails: every backend error is folded into the outcome.
    async fn process(
        &self,
        event_type: &str,
        event: &SinkEvent,
        context: &NotificationContext,
    ) -> EventOutcome;
}

/// Backends shared by all handlers
#[derive(Clone)]
pub struct Backends {
    pub dns: Arc<dyn DnsService>,
    pub compute: Arc<dyn ComputeService>,
    /// IPAM sync is skipped entirely when unset
    pub ipam: Option<Arc<dyn IpamBackend>>,
}

impl Backends {
    pub fn new(dns: Arc<dyn DnsService>, compute: Arc<dyn ComputeService>) -> Self {
        Self {
            dns,
            compute,
            ipam: None,
        }
    }

    pub fn with_ipam(mut self, ipam: Arc<dyn IpamBackend>) -> Self {
        self.ipam = Some(ipam);
        self
    }

    pub(crate) fn ipam_sync(&self, prefix_id: Option<String>) -> Option<IpamSync> {
        self.ipam
            .as_ref()
            .map(|backend| IpamSync::new(backend.clone(), prefix_id))
    }
}

/// Candidate reverse zones, loaded at most once per event
pub(crate) struct ReverseZones {
    zones: Option<Vec<Zone>>,
    /// The operator named the zone; any address inside it is accepted
    configured: bool,
}

impl ReverseZones {
    /// Load the candidates: the configured zone, or every zone of the owner tenant
    ///
    /// A failed load is recorded and leaves the set unavailable, which skips
    /// every PTR step of the event.
    pub(crate) async fn load(
        dns: &dyn DnsService,
        configured: Option<&str>,
        owner_tenant: Option<&str>,
        outcome: &mut EventOutcome,
    ) -> Self {
        let loaded = match configured {
            Some(zone_id) => dns.get_zone(zone_id).await.map(|z| vec![z]),
            None => {
                let criteria = owner_tenant.map(ZoneCriteria::owned_by).unwrap_or_default();
                dns.find_zones(&criteria).await
            }
        };
        let configured = configured.is_some();
        match loaded {
            Ok(zones) => Self {
                zones: Some(zones),
                configured,
            },
            Err(e) => {
                outcome.record(Step::LookupZone, "reverse zones", StepOutcome::failed(&e));
                Self {
                    zones: None,
                    configured,
                }
            }
        }
    }

    /// Zone delegated for the address, or the reason there is none
    pub(crate) fn resolve(&self, address: IpAddr) -> std::result::Result<&Zone, StepOutcome> {
        let zones = self
            .zones
            .as_deref()
            .ok_or_else(|| StepOutcome::skipped("reverse zones unavailable"))?;
        let found = if self.configured {
            let pointer = reverse_pointer(address);
            zones.iter().find(|z| zone_encloses(&z.name, &pointer))
        } else {
            resolve_reverse_zone(address, zones)
        };
        found.ok_or_else(|| {
            warn!("No reverse zone delegated for {}", address);
            StepOutcome::skipped(format!("no reverse zone for {}", address))
        })
    }
}

/// Upsert the PTR record of `address` pointing at `hostname`
pub(crate) async fn upsert_reverse(
    dns: &dyn DnsService,
    reverse: &ReverseZones,
    address: IpAddr,
    hostname: &str,
    identity: &ManagedIdentity,
    outcome: &mut EventOutcome,
) {
    let zone = match reverse.resolve(address) {
        Ok(zone) => zone,
        Err(skipped) => {
            outcome.record(Step::UpsertReverse, address.to_string(), skipped);
            return;
        }
    };
    let result = recordset::upsert(
        dns,
        &zone.id,
        &reverse_pointer(address),
        RecordType::Ptr,
        hostname,
        identity,
    )
    .await
    .map(|u| u.outcome);
    outcome.record_result(Step::UpsertReverse, address.to_string(), &result);
}

/// Delete managed records matching `criteria` and record the step
pub(crate) async fn delete_step(
    dns: &dyn DnsService,
    step: Step,
    target: impl Into<String>,
    criteria: &RecordCriteria,
    outcome: &mut EventOutcome,
) {
    let result = recordset::delete_managed(dns, criteria)
        .await
        .map(deletion_outcome);
    outcome.record_result(step, target, &result);
}

/// Project recorded in IPAM descriptions
///
/// The notification context wins; the fallback is the owning tenant.
pub(crate) fn project_label(context: &NotificationContext, fallback: Option<&str>) -> Option<String> {
    context
        .project_name
        .clone()
        .or_else(|| context.project_id.clone())
        .or_else(|| fallback.map(str::to_string))
}

/// Resolve an IPAM object and assign it; both halves land in one step
pub(crate) async fn assign_address(
    ipam: &IpamSync,
    address: IpAddr,
    hostname: &str,
    project: &str,
) -> Result<StepOutcome> {
    let object = ipam.resolve(address).await?;
    ipam.assign(&object, hostname, project).await
}
