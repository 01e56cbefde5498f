//! Reconciliation Contract Test: Idempotent Redelivery
//!
//! The transport delivers at least once. A redelivered notification must
//! reconverge on the records the first delivery wrote.
//!
//! Constraints verified:
//! - One recordset per (zone, name, type) after any number of deliveries
//! - The second delivery reuses the first delivery's ids
//! - A create that loses a race is retried as a lookup
//!
//! If this test fails, someone has:
//! - Removed the lookup before recordset creation
//! - Started caching recordsets between events
//! - Turned a backend conflict into a failed step

mod common;

use common::*;
use dnsink_core::model::{RecordType, address_extra};
use dnsink_core::recordset;
use dnsink_core::{Backends, Dispatch, Step, StepOutcome};
use std::sync::Arc;

fn outcomes(dispatch: Dispatch) -> Vec<dnsink_core::EventOutcome> {
    match dispatch {
        Dispatch::Processed(outcomes) => outcomes,
        other => panic!("expected processed notification, got {:?}", other),
    }
}

#[tokio::test]
async fn redelivered_instance_create_converges() {
    let world = World::new().await;
    let registry = world.registry();

    let first = outcomes(registry.dispatch(&instance_created("vm-1")).await);
    let records_after_first = world.dns.records().await;

    let second = outcomes(registry.dispatch(&instance_created("vm-1")).await);

    assert!(first[0].is_clean(), "{:?}", first[0].steps);
    assert!(second[0].is_clean(), "{:?}", second[0].steps);
    assert_eq!(second[0].applied(), 0, "redelivery wrote something: {:?}", second[0].steps);

    assert_eq!(world.dns.records().await, records_after_first);
    assert_eq!(world.dns.recordsets().await.len(), 2);
}

#[tokio::test]
async fn redelivered_floating_attach_converges() {
    let world = World::new().await;
    let registry = world.registry();
    let attach = floating_updated("fip-1", "198.51.100.7", Some("10.0.0.5"));

    registry.dispatch(&attach).await;
    registry.dispatch(&attach).await;
    registry.dispatch(&attach).await;

    let a = world.dns.records_named(FORWARD_ZONE, "vm1.example.org.", RecordType::A).await;
    let ptr = world
        .dns
        .records_named(REVERSE_V4_ZONE, "7.100.51.198.in-addr.arpa.", RecordType::Ptr)
        .await;
    assert_eq!(a.len(), 1);
    assert_eq!(ptr.len(), 1);
    assert_eq!(world.dns.recordsets().await.len(), 2);
}

#[tokio::test]
async fn second_upsert_reuses_first_ids_without_creating() {
    let world = World::new().await;
    let dns = CountingDns::new(world.dns.clone());
    let identity = dnsink_core::model::ManagedIdentity::instance("nova_fixed", "vm-1");

    let first = recordset::upsert(&dns, FORWARD_ZONE, "vm1.example.org.", RecordType::Aaaa, "2001:db8::5", &identity)
        .await
        .unwrap();
    let second = recordset::upsert(&dns, FORWARD_ZONE, "vm1.example.org.", RecordType::Aaaa, "2001:db8::5", &identity)
        .await
        .unwrap();

    assert_eq!(first.recordset_id, second.recordset_id);
    assert_eq!(first.record_id, second.record_id);
    assert_eq!(second.outcome, StepOutcome::Unchanged);
    assert_eq!(dns.create_recordset_calls(), 1);
    assert_eq!(dns.create_record_calls(), 0);
}

#[tokio::test]
async fn lost_create_race_is_retried_as_lookup() {
    let world = World::new().await;
    let identity = dnsink_core::model::ManagedIdentity::instance("nova_fixed", "vm-1");

    // Another worker already created the recordset with the same record
    world
        .dns
        .seed_record(FORWARD_ZONE, "vm1.example.org.", RecordType::Aaaa, "2001:db8::5", Some(identity.clone()))
        .await;

    let dns = CountingDns::new(world.dns.clone());
    dns.hide_next_lookup();
    let upserted = tokio_test::assert_ok!(
        recordset::upsert(&dns, FORWARD_ZONE, "vm1.example.org.", RecordType::Aaaa, "2001:db8::5", &identity).await
    );

    assert_eq!(dns.create_recordset_calls(), 1);
    assert_eq!(upserted.outcome, StepOutcome::Unchanged);
    assert_eq!(world.dns.recordsets().await.len(), 1);
    assert_eq!(world.dns.records().await.len(), 1);
}

#[tokio::test]
async fn racing_handler_reports_forward_step_as_success() {
    let world = World::new().await;
    let identity = dnsink_core::model::ManagedIdentity::instance("nova_fixed", "vm-1")
        .with_extra(address_extra("2001:db8::5".parse().unwrap()));
    world
        .dns
        .seed_record(FORWARD_ZONE, "vm1.example.org.", RecordType::Aaaa, "2001:db8::5", Some(identity))
        .await;

    let dns = Arc::new(CountingDns::new(world.dns.clone()));
    dns.hide_next_lookup();
    let backends = Backends::new(dns.clone(), Arc::new(world.compute.clone()));
    let registry = World::registry_with(backends);

    let outcome = outcomes(registry.dispatch(&instance_created("vm-1")).await).remove(0);
    assert_eq!(outcome.outcome_of(Step::UpsertForward), Some(&StepOutcome::Unchanged));
    assert_eq!(world.dns.records_named(FORWARD_ZONE, "vm1.example.org.", RecordType::Aaaa).await.len(), 1);
}
