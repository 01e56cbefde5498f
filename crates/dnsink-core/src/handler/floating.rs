// # Floating-Address Handler
//
// Reconciles floating IP lifecycle events.
//
// Records are owned by the floating IP (`managed_resource_id`) and carry the
// instance they point at as `instance:{id}` in `managed_extra`, which is how
// instance deletion finds them.
//
// - update, fixed address set: A (or AAAA) + PTR for the floating address,
//   IPAM object assigned
// - update, fixed address empty: records removed, IPAM object released
// - delete: forward and PTR records removed; the PTR by zone when the
//   payload carries the address, by owner across zones otherwise. IPAM needs
//   the address.

use async_trait::async_trait;
use std::net::IpAddr;
use tracing::{debug, info, warn};

use super::{
    Backends, NotificationHandler, ReverseZones, assign_address, delete_step, project_label,
    upsert_reverse,
};
use crate::config::FloatingHandlerConfig;
use crate::event::{FLOATINGIP_DELETE_PREFIX, FLOATINGIP_UPDATE_END, NotificationContext, SinkEvent};
use crate::hostname::{derive_hostname, fqdn};
use crate::ipam::IpamSync;
use crate::model::{Instance, InstanceFilter, ManagedIdentity, RecordCriteria, RecordType, instance_extra};
use crate::outcome::{EventOutcome, Step, StepOutcome};
use crate::recordset::{self, deletion_outcome};
use crate::registry::EventTypeMatcher;

/// Plugin name of records created for floating addresses
pub const PLUGIN_NAME: &str = "neutron_floating";

/// Reconciler for floating IP update/delete
pub struct FloatingAddressHandler {
    config: FloatingHandlerConfig,
    backends: Backends,
    ipam: Option<IpamSync>,
    event_types: Vec<EventTypeMatcher>,
}

/// Attachment carried by an update event
struct Attachment<'a> {
    floatingip_id: &'a str,
    floating: IpAddr,
    fixed: IpAddr,
    tenant_id: Option<&'a str>,
}

impl FloatingAddressHandler {
    pub fn new(config: FloatingHandlerConfig, backends: Backends) -> Self {
        let ipam = backends.ipam_sync(config.ipam_prefix_id.clone());
        Self {
            config,
            backends,
            ipam,
            event_types: vec![
                EventTypeMatcher::exact(FLOATINGIP_UPDATE_END),
                EventTypeMatcher::prefix(FLOATINGIP_DELETE_PREFIX),
            ],
        }
    }

    /// The single active instance holding the fixed address
    async fn owning_instance(
        &self,
        fixed: IpAddr,
        tenant_id: Option<&str>,
        outcome: &mut EventOutcome,
    ) -> Option<Instance> {
        let filter = InstanceFilter::active_with_ip(fixed, tenant_id.map(str::to_string));
        let mut instances = match self.backends.compute.list_instances(&filter).await {
            Ok(instances) => instances,
            Err(e) => {
                outcome.record(Step::ResolveInstance, fixed.to_string(), StepOutcome::failed(&e));
                return None;
            }
        };

        match instances.len() {
            1 => instances.pop(),
            0 => {
                outcome.record(
                    Step::ResolveInstance,
                    fixed.to_string(),
                    StepOutcome::skipped(format!("no active instance holds {}", fixed)),
                );
                None
            }
            n => {
                warn!("{} instances hold fixed address {}, not guessing", n, fixed);
                outcome.record(
                    Step::ResolveInstance,
                    fixed.to_string(),
                    StepOutcome::skipped(format!("ambiguous target: {} instances hold {}", n, fixed)),
                );
                None
            }
        }
    }

    async fn on_attach(
        &self,
        attachment: Attachment<'_>,
        context: &NotificationContext,
        outcome: &mut EventOutcome,
    ) {
        let dns = self.backends.dns.as_ref();
        let floating = attachment.floating;
        let target = floating.to_string();

        let Some(instance) = self
            .owning_instance(attachment.fixed, attachment.tenant_id, outcome)
            .await
        else {
            return;
        };

        let hostname = match dns.get_zone(&self.config.zone_id).await {
            Ok(zone) => match derive_hostname(&instance, &zone.name) {
                Ok(hostname) => Some(fqdn(&hostname)),
                Err(e) => {
                    outcome.record(Step::DeriveHostname, &instance.id, StepOutcome::skipped(e.to_string()));
                    None
                }
            },
            Err(e) => {
                outcome.record(Step::LookupZone, &self.config.zone_id, StepOutcome::failed(&e));
                None
            }
        };
        let Some(hostname) = hostname else {
            outcome.record(Step::UpsertForward, &target, StepOutcome::skipped("no hostname"));
            if self.ipam.is_some() {
                outcome.record(Step::IpamAssign, &target, StepOutcome::skipped("no hostname"));
            }
            return;
        };

        let extra = instance_extra(&instance.id);
        let identity = ManagedIdentity::instance(PLUGIN_NAME, attachment.floatingip_id)
            .with_extra(&extra);

        self.prune_previous_attachment(attachment.floatingip_id, &extra, outcome)
            .await;

        let result = recordset::upsert(
            dns,
            &self.config.zone_id,
            &hostname,
            RecordType::forward_for(floating),
            &target,
            &identity,
        )
        .await
        .map(|u| u.outcome);
        outcome.record_result(Step::UpsertForward, &target, &result);

        let reverse = ReverseZones::load(
            dns,
            None,
            self.config.zone_owner_tenant_id.as_deref(),
            outcome,
        )
        .await;
        upsert_reverse(dns, &reverse, floating, &hostname, &identity, outcome).await;

        if let Some(ref ipam) = self.ipam {
            let fallback = attachment.tenant_id.or(instance.tenant_id.as_deref());
            match project_label(context, fallback) {
                Some(project) => {
                    let result = assign_address(ipam, floating, &hostname, &project).await;
                    outcome.record_result(Step::IpamAssign, &target, &result);
                }
                None => outcome.record(Step::IpamAssign, &target, StepOutcome::skipped("no project")),
            }
        }
    }

    /// Drop records the floating IP still holds for a previous instance
    async fn prune_previous_attachment(
        &self,
        floatingip_id: &str,
        current_extra: &str,
        outcome: &mut EventOutcome,
    ) {
        let dns = self.backends.dns.as_ref();
        let owned = match dns
            .find_records(&RecordCriteria::owned_by(PLUGIN_NAME, floatingip_id))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                outcome.record(Step::PruneStale, floatingip_id, StepOutcome::failed(&e));
                return;
            }
        };
        let stale: Vec<_> = owned
            .into_iter()
            .filter(|r| {
                r.managed
                    .as_ref()
                    .is_some_and(|m| m.extra.as_deref() != Some(current_extra))
            })
            .collect();
        if stale.is_empty() {
            return;
        }

        debug!("Floating IP {} moved, pruning {} records", floatingip_id, stale.len());
        let result = recordset::remove_records(dns, &stale)
            .await
            .map(deletion_outcome);
        outcome.record_result(Step::PruneStale, floatingip_id, &result);
    }

    async fn on_detach(&self, floatingip_id: &str, floating: Option<IpAddr>, outcome: &mut EventOutcome) {
        let dns = self.backends.dns.as_ref();

        delete_step(
            dns,
            Step::DeleteForward,
            floatingip_id,
            &RecordCriteria::owned_by(PLUGIN_NAME, floatingip_id).in_zone(&self.config.zone_id),
            outcome,
        )
        .await;

        let Some(floating) = floating else {
            // Whatever the floating IP still owns after the forward zone are its PTRs
            delete_step(
                dns,
                Step::DeleteReverse,
                floatingip_id,
                &RecordCriteria::owned_by(PLUGIN_NAME, floatingip_id),
                outcome,
            )
            .await;
            if self.ipam.is_some() {
                outcome.record(
                    Step::IpamUnassign,
                    floatingip_id,
                    StepOutcome::skipped("floating address not in payload"),
                );
            }
            return;
        };

        let reverse = ReverseZones::load(
            dns,
            None,
            self.config.zone_owner_tenant_id.as_deref(),
            outcome,
        )
        .await;
        match reverse.resolve(floating) {
            Ok(zone) => {
                delete_step(
                    dns,
                    Step::DeleteReverse,
                    floating.to_string(),
                    &RecordCriteria::owned_by(PLUGIN_NAME, floatingip_id).in_zone(&zone.id),
                    outcome,
                )
                .await
            }
            Err(skipped) => outcome.record(Step::DeleteReverse, floating.to_string(), skipped),
        }

        if let Some(ref ipam) = self.ipam {
            let result = ipam.release(floating).await;
            outcome.record_result(Step::IpamUnassign, floating.to_string(), &result);
        }
    }
}

#[async_trait]
impl NotificationHandler for FloatingAddressHandler {
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
            SinkEvent::FloatingIpUpdated {
                floatingip_id,
                floating_ip_address,
                fixed_ip_address: Some(fixed),
                tenant_id,
            } => {
                info!("Floating IP {} attached to {}", floating_ip_address, fixed);
                let attachment = Attachment {
                    floatingip_id,
                    floating: *floating_ip_address,
                    fixed: *fixed,
                    tenant_id: tenant_id.as_deref(),
                };
                self.on_attach(attachment, context, &mut outcome).await;
            }
            SinkEvent::FloatingIpUpdated {
                floatingip_id,
                floating_ip_address,
                fixed_ip_address: None,
                ..
            } => {
                info!("Floating IP {} detached", floating_ip_address);
                self.on_detach(floatingip_id, Some(*floating_ip_address), &mut outcome)
                    .await;
            }
            SinkEvent::FloatingIpDeleted {
                floatingip_id,
                floating_ip_address,
            } => {
                info!("Floating IP {} deleted", floatingip_id);
                self.on_detach(floatingip_id, *floating_ip_address, &mut outcome)
                    .await;
            }
            other => debug!("{} ignores {} events", PLUGIN_NAME, other.kind()),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipam::UNASSIGNED_DESCRIPTION;
    use crate::memory::{MemoryComputeService, MemoryDnsService, MemoryIpam};
    use crate::model::Zone;
    use std::sync::Arc;

    struct Fixture {
        dns: Arc<MemoryDnsService>,
        compute: Arc<MemoryComputeService>,
        ipam: Arc<MemoryIpam>,
        handler: FloatingAddressHandler,
    }

    async fn fixture() -> Fixture {
        let dns = Arc::new(MemoryDnsService::new());
        dns.add_zone(Zone::new("z-fwd", "example.org.")).await;
        dns.add_zone(Zone::new("z-rev", "100.51.198.in-addr.arpa.")).await;

        let compute = Arc::new(MemoryComputeService::new());
        compute
            .add_instance(
                Instance::new("vm-1", "instance-00000001")
                    .with_address("10.0.0.5".parse().unwrap())
                    .with_tenant("t1"),
            )
            .await;

        let ipam = Arc::new(MemoryIpam::new());
        ipam.provision("198.51.100.7".parse().unwrap(), "pool", UNASSIGNED_DESCRIPTION)
            .await;

        let mut config = FloatingHandlerConfig::new("z-fwd");
        config.ipam_prefix_id = Some("pool".to_string());
        let backends = Backends::new(dns.clone(), compute.clone()).with_ipam(ipam.clone());
        Fixture {
            dns,
            compute,
            ipam,
            handler: FloatingAddressHandler::new(config, backends),
        }
    }

    fn attach(fixed: Option<&str>) -> SinkEvent {
        SinkEvent::FloatingIpUpdated {
            floatingip_id: "fip-1".to_string(),
            floating_ip_address: "198.51.100.7".parse().unwrap(),
            fixed_ip_address: fixed.map(|f| f.parse().unwrap()),
            tenant_id: Some("t1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_attach_then_detach() {
        let f = fixture().await;
        let context = NotificationContext::for_project("demo");

        let outcome = f
            .handler
            .process(FLOATINGIP_UPDATE_END, &attach(Some("10.0.0.5")), &context)
            .await;
        assert!(outcome.is_clean(), "{:?}", outcome.steps);
        assert_eq!(f.dns.records().await.len(), 2);

        let outcome = f.handler.process(FLOATINGIP_UPDATE_END, &attach(None), &context).await;
        assert!(outcome.is_clean(), "{:?}", outcome.steps);
        assert!(f.dns.records().await.is_empty());

        let object = f.ipam.get("198.51.100.7".parse().unwrap()).await.unwrap();
        assert_eq!(object.description, UNASSIGNED_DESCRIPTION);
    }

    #[tokio::test]
    async fn test_ambiguous_instance_skips_event() {
        let f = fixture().await;
        f.compute
            .add_instance(
                Instance::new("vm-2", "instance-00000002")
                    .with_address("10.0.0.5".parse().unwrap())
                    .with_tenant("t1"),
            )
            .await;

        let outcome = f
            .handler
            .process(FLOATINGIP_UPDATE_END, &attach(Some("10.0.0.5")), &NotificationContext::default())
            .await;
        assert!(matches!(outcome.outcome_of(Step::ResolveInstance), Some(StepOutcome::Skipped { .. })));
        assert!(outcome.outcome_of(Step::UpsertForward).is_none());
        assert!(f.dns.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_reattach_to_other_instance_moves_records() {
        let f = fixture().await;
        f.compute
            .add_instance(
                Instance::new("vm-2", "instance-00000002")
                    .with_address("10.0.0.6".parse().unwrap())
                    .with_tenant("t1"),
            )
            .await;
        let context = NotificationContext::for_project("demo");

        f.handler
            .process(FLOATINGIP_UPDATE_END, &attach(Some("10.0.0.5")), &context)
            .await;
        let outcome = f
            .handler
            .process(FLOATINGIP_UPDATE_END, &attach(Some("10.0.0.6")), &context)
            .await;
        assert_eq!(outcome.outcome_of(Step::PruneStale), Some(&StepOutcome::Applied));

        assert!(f.dns.records_named("z-fwd", "1.example.org.", RecordType::A).await.is_empty());
        let a = f.dns.records_named("z-fwd", "2.example.org.", RecordType::A).await;
        assert_eq!(a.len(), 1);
        let ptr = f
            .dns
            .records_named("z-rev", "7.100.51.198.in-addr.arpa.", RecordType::Ptr)
            .await;
        assert_eq!(ptr.len(), 1);
        assert_eq!(ptr[0].data, "2.example.org.");
    }

    #[tokio::test]
    async fn test_delete_start_without_address_removes_ptr_by_owner() {
        let f = fixture().await;
        let context = NotificationContext::for_project("demo");
        f.handler
            .process(FLOATINGIP_UPDATE_END, &attach(Some("10.0.0.5")), &context)
            .await;

        let deleted = SinkEvent::FloatingIpDeleted {
            floatingip_id: "fip-1".to_string(),
            floating_ip_address: None,
        };
        let outcome = f.handler.process("floatingip.delete.start", &deleted, &context).await;
        assert_eq!(outcome.outcome_of(Step::DeleteForward), Some(&StepOutcome::Applied));
        assert_eq!(outcome.outcome_of(Step::DeleteReverse), Some(&StepOutcome::Applied));
        // Releasing the IPAM object needs the address
        assert!(matches!(outcome.outcome_of(Step::IpamUnassign), Some(StepOutcome::Skipped { .. })));

        assert!(f.dns.records().await.is_empty());
        assert!(f.dns.recordsets().await.is_empty());
    }
}
