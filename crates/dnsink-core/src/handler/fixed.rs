// # Fixed-Address Handler
//
// Reconciles instance lifecycle events.
//
// ## create
//
// For every fixed IPv6 address of the instance: AAAA in the forward zone,
// PTR in the delegated reverse zone, IPAM object assigned. Then the instance
// is tagged with its hostname. IPv4 fixed addresses are private and get no
// records.
//
// Records are owned by the instance and qualified with `address:{ip}`, so
// every fixed address keeps its own AAAA record under the shared hostname.
//
// ## delete
//
// Records owned by the instance are removed from every zone, floating-IP
// recordsets pointing at the instance are removed with them, and the IPAM
// objects of its IPv6 addresses are released.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    Backends, NotificationHandler, ReverseZones, assign_address, delete_step, project_label,
    upsert_reverse,
};
use crate::config::FixedHandlerConfig;
use crate::event::{FixedIp, INSTANCE_CREATE_END, INSTANCE_DELETE_START, NotificationContext, SinkEvent};
use crate::hostname::{derive_hostname, fqdn, metadata_hostname};
use crate::ipam::IpamSync;
use crate::model::{
    Instance, IpVersion, ManagedIdentity, RecordCriteria, RecordType, address_extra, instance_extra,
};
use crate::outcome::{EventOutcome, Step, StepOutcome};
use crate::recordset::{self, deletion_outcome};
use crate::registry::EventTypeMatcher;

/// Plugin name of records created for fixed addresses
pub const PLUGIN_NAME: &str = "nova_fixed";

/// Metadata key holding the instance hostname
pub const DNS_METADATA_KEY: &str = "dns";

/// Reconciler for instance create/delete
pub struct FixedAddressHandler {
    config: FixedHandlerConfig,
    backends: Backends,
    ipam: Option<IpamSync>,
    event_types: Vec<EventTypeMatcher>,
}

impl FixedAddressHandler {
    pub fn new(config: FixedHandlerConfig, backends: Backends) -> Self {
        let ipam = backends.ipam_sync(config.ipam_prefix_id.clone());
        Self {
            config,
            backends,
            ipam,
            event_types: vec![
                EventTypeMatcher::exact(INSTANCE_CREATE_END),
                EventTypeMatcher::exact(INSTANCE_DELETE_START),
            ],
        }
    }

    async fn on_create(
        &self,
        instance_id: &str,
        fixed_ips: &[FixedIp],
        context: &NotificationContext,
        outcome: &mut EventOutcome,
    ) {
        let dns = self.backends.dns.as_ref();

        let addresses: Vec<_> = fixed_ips
            .iter()
            .filter(|ip| match ip.ip_version() {
                Some(IpVersion::V6) => true,
                _ => {
                    debug!("Skipping fixed address {} of {}", ip.address, instance_id);
                    false
                }
            })
            .map(|ip| ip.address)
            .collect();
        if addresses.is_empty() {
            debug!("Instance {} has no fixed IPv6 address", instance_id);
            return;
        }

        let zone = match dns.get_zone(&self.config.zone_id).await {
            Ok(zone) => Some(zone),
            Err(e) => {
                outcome.record(Step::LookupZone, &self.config.zone_id, StepOutcome::failed(&e));
                None
            }
        };

        let instance = match self.backends.compute.get_instance(instance_id).await {
            Ok(instance) => Some(instance),
            Err(e) => {
                outcome.record(Step::ResolveInstance, instance_id, StepOutcome::failed(&e));
                None
            }
        };

        let hostname = match (&zone, &instance) {
            (Some(zone), Some(instance)) => match derive_hostname(instance, &zone.name) {
                Ok(hostname) => Some(fqdn(&hostname)),
                Err(e) => {
                    outcome.record(Step::DeriveHostname, instance_id, StepOutcome::skipped(e.to_string()));
                    None
                }
            },
            _ => None,
        };

        let Some(hostname) = hostname else {
            for address in &addresses {
                outcome.record(Step::UpsertForward, address.to_string(), StepOutcome::skipped("no hostname"));
                if self.ipam.is_some() {
                    outcome.record(Step::IpamAssign, address.to_string(), StepOutcome::skipped("no hostname"));
                }
            }
            return;
        };

        let reverse = ReverseZones::load(
            dns,
            self.config.reverse_zone_id.as_deref(),
            self.config.zone_owner_tenant_id.as_deref(),
            outcome,
        )
        .await;

        let project = project_label(
            context,
            instance.as_ref().and_then(|i| i.tenant_id.as_deref()),
        );

        let mut forward_written = false;
        for address in addresses {
            let identity =
                ManagedIdentity::instance(PLUGIN_NAME, instance_id).with_extra(address_extra(address));
            let result = recordset::upsert(
                dns,
                &self.config.zone_id,
                &hostname,
                RecordType::forward_for(address),
                &address.to_string(),
                &identity,
            )
            .await
            .map(|u| u.outcome);
            forward_written |= result.is_ok();
            outcome.record_result(Step::UpsertForward, address.to_string(), &result);

            upsert_reverse(dns, &reverse, address, &hostname, &identity, outcome).await;

            if let Some(ref ipam) = self.ipam {
                match project {
                    Some(ref project) => {
                        let result = assign_address(ipam, address, &hostname, project).await;
                        outcome.record_result(Step::IpamAssign, address.to_string(), &result);
                    }
                    None => outcome.record(
                        Step::IpamAssign,
                        address.to_string(),
                        StepOutcome::skipped("no project"),
                    ),
                }
            }
        }

        if forward_written {
            let tag = metadata_hostname(&hostname);
            let tagged = instance
                .as_ref()
                .and_then(|i| i.metadata.get(DNS_METADATA_KEY))
                .is_some_and(|current| current == tag);
            let result = if tagged {
                Ok(StepOutcome::Unchanged)
            } else {
                self.backends
                    .compute
                    .set_instance_metadata(instance_id, DNS_METADATA_KEY, tag)
                    .await
                    .map(|()| StepOutcome::Applied)
            };
            outcome.record_result(Step::TagInstance, instance_id, &result);
        } else {
            outcome.record(Step::TagInstance, instance_id, StepOutcome::skipped("no forward record"));
        }
    }

    async fn on_delete(&self, instance_id: &str, outcome: &mut EventOutcome) {
        let dns = self.backends.dns.as_ref();

        // Fetched before any deletion; the instance may vanish meanwhile
        let instance = self.backends.compute.get_instance(instance_id).await;

        delete_step(
            dns,
            Step::DeleteForward,
            &self.config.zone_id,
            &RecordCriteria::owned_by(PLUGIN_NAME, instance_id).in_zone(&self.config.zone_id),
            outcome,
        )
        .await;

        // Whatever the instance still owns after the forward zone are its PTRs
        delete_step(
            dns,
            Step::DeleteReverse,
            instance_id,
            &RecordCriteria::owned_by(PLUGIN_NAME, instance_id),
            outcome,
        )
        .await;

        let floating = RecordCriteria::with_extra(
            super::floating::PLUGIN_NAME,
            instance_extra(instance_id),
        );
        let result = recordset::delete_owning_recordsets(dns, &floating)
            .await
            .map(deletion_outcome);
        outcome.record_result(Step::DeleteFloatingRecords, instance_id, &result);

        if let Some(ref ipam) = self.ipam {
            self.release_addresses(ipam, instance_id, instance, outcome).await;
        }
    }

    async fn release_addresses(
        &self,
        ipam: &IpamSync,
        instance_id: &str,
        instance: crate::Result<Instance>,
        outcome: &mut EventOutcome,
    ) {
        let instance = match instance {
            Ok(instance) => instance,
            Err(e) if e.is_not_found() => {
                outcome.record(Step::IpamUnassign, instance_id, StepOutcome::skipped("instance already gone"));
                return;
            }
            Err(e) => {
                outcome.record(Step::ResolveInstance, instance_id, StepOutcome::failed(&e));
                outcome.record(Step::IpamUnassign, instance_id, StepOutcome::skipped("instance unresolved"));
                return;
            }
        };

        for address in instance
            .addresses
            .iter()
            .filter(|a| IpVersion::of(a.addr) == IpVersion::V6)
            .map(|a| a.addr)
        {
            let result = ipam.release(address).await;
            outcome.record_result(Step::IpamUnassign, address.to_string(), &result);
        }
    }
}

#[async_trait]
impl NotificationHandler for FixedAddressHandler {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn exchange(&self) -> &str {
        &self.config.control_exchange
    }

    fn topics(&self) -> &[String] {
        &self.config.notification_topics
    }

    fn event_types(&self) -> &[EventTypeMatcher] {
        &self.event_types
    }

    async fn process(
        &self,
        event_type: &str,
        event: &SinkEvent,
        context: &NotificationContext,
    ) -> EventOutcome {
        let mut outcome = EventOutcome::new(PLUGIN_NAME, event_type);
        match event {
            SinkEvent::InstanceCreated {
                instance_id,
                fixed_ips,
            } => {
                info!("Instance {} created with {} fixed addresses", instance_id, fixed_ips.len());
                self.on_create(instance_id, fixed_ips, context, &mut outcome)
                    .await;
            }
            SinkEvent::InstanceDeleted { instance_id } => {
                info!("Instance {} deleting", instance_id);
                self.on_delete(instance_id, &mut outcome).await;
            }
            other => debug!("{} ignores {} events", PLUGIN_NAME, other.kind()),
        }
        outcome
    }
}
