//! Idempotent recordset upsert and managed-record removal
//!
//! The DNS service is the only source of truth. Every upsert looks the
//! recordset up before creating it, so a redelivered event converges on the
//! records the first delivery wrote. A create that loses a race against
//! another worker comes back as [`Error::Conflict`] and is retried as a
//! lookup.

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{ManagedIdentity, NewRecord, Record, RecordCriteria, RecordType, Recordset};
use crate::outcome::StepOutcome;
use crate::traits::DnsService;

/// Identifiers of an upserted record, usable for later deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted {
    pub recordset_id: String,
    pub record_id: String,
    /// `Applied` when anything was written, `Unchanged` on a no-op
    pub outcome: StepOutcome,
}

/// Ensure `name`/`record_type` in `zone_id` holds `data` owned by `identity`
///
/// # Returns
///
/// - `Ok(Upserted)`: The record now exists; `outcome` tells whether it was written
/// - `Err(Error::Conflict)`: The same data is held by a record of another owner
pub async fn upsert(
    dns: &dyn DnsService,
    zone_id: &str,
    name: &str,
    record_type: RecordType,
    data: &str,
    identity: &ManagedIdentity,
) -> Result<Upserted> {
    let record = NewRecord {
        data: data.to_string(),
        managed: identity.clone(),
    };

    let recordset = match dns.find_recordset(zone_id, name, record_type).await? {
        Some(recordset) => recordset,
        None => match dns.create_recordset(zone_id, name, record_type, &record).await {
            Ok((recordset, created)) => {
                info!("Created {} recordset {} -> {} in zone {}", record_type, name, data, zone_id);
                return Ok(Upserted {
                    recordset_id: recordset.id,
                    record_id: created.id,
                    outcome: StepOutcome::Applied,
                });
            }
            Err(e) if e.is_conflict() => {
                debug!("Recordset {} {} created concurrently, retrying as lookup", name, record_type);
                dns.find_recordset(zone_id, name, record_type)
                    .await?
                    .ok_or(e)?
            }
            Err(e) => return Err(e),
        },
    };

    attach(dns, &recordset, &record).await
}

/// Place `record` inside an existing recordset
async fn attach(dns: &dyn DnsService, recordset: &Recordset, record: &NewRecord) -> Result<Upserted> {
    let existing = dns
        .find_records(
            &RecordCriteria::default()
                .in_zone(&recordset.zone_id)
                .in_recordset(&recordset.id),
        )
        .await?;

    let mut reused = None;
    let mut stale = Vec::new();
    for current in existing {
        let same_owner = current.managed.as_ref() == Some(&record.managed);
        match (current.data == record.data, same_owner) {
            (true, true) => reused = Some(current),
            (true, false) => {
                return Err(Error::conflict(format!(
                    "{} {} already holds {} for another owner",
                    recordset.record_type, recordset.name, record.data
                )));
            }
            (false, true) => stale.push(current),
            (false, false) => {}
        }
    }

    let mut changed = false;
    for old in &stale {
        dns.delete_record(&recordset.zone_id, &recordset.id, &old.id)
            .await?;
        info!(
            "Replaced {} {} -> {} (owner {})",
            recordset.record_type, recordset.name, old.data, record.managed.resource_id
        );
        changed = true;
    }

    if let Some(current) = reused {
        return Ok(Upserted {
            recordset_id: recordset.id.clone(),
            record_id: current.id,
            outcome: if changed {
                StepOutcome::Applied
            } else {
                StepOutcome::Unchanged
            },
        });
    }

    let created = dns
        .create_record(&recordset.zone_id, &recordset.id, record)
        .await?;
    info!(
        "Added {} {} -> {} to recordset {}",
        recordset.record_type, recordset.name, record.data, recordset.id
    );
    Ok(Upserted {
        recordset_id: recordset.id.clone(),
        record_id: created.id,
        outcome: StepOutcome::Applied,
    })
}

/// Remove every record matching `criteria`, then any recordset left empty
///
/// Criteria without identity fields would match foreign records, so they
/// are refused.
///
/// # Returns
///
/// Number of records removed; zero is not an error.
pub async fn delete_managed(dns: &dyn DnsService, criteria: &RecordCriteria) -> Result<usize> {
    if criteria.plugin_name.is_none() {
        return Err(Error::config("refusing to delete records without an owning plugin"));
    }

    let records = dns.find_records(criteria).await?;
    remove_records(dns, &records).await
}

/// Remove the given records, then any recordset left empty
pub async fn remove_records(dns: &dyn DnsService, records: &[Record]) -> Result<usize> {
    let mut touched = BTreeSet::new();
    for record in records {
        dns.delete_record(&record.zone_id, &record.recordset_id, &record.id)
            .await?;
        debug!("Deleted record {} ({}) from recordset {}", record.id, record.data, record.recordset_id);
        touched.insert((record.zone_id.clone(), record.recordset_id.clone()));
    }

    for (zone_id, recordset_id) in touched {
        let left = dns
            .find_records(&RecordCriteria::default().in_zone(&zone_id).in_recordset(&recordset_id))
            .await?;
        if !left.is_empty() {
            continue;
        }
        // Services that drop a recordset with its last record report it gone
        match dns.delete_recordset(&zone_id, &recordset_id).await {
            Ok(()) => debug!("Deleted empty recordset {} in zone {}", recordset_id, zone_id),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    Ok(records.len())
}

/// Remove whole recordsets containing a record that matches `criteria`
///
/// Used when a managed record proves the recordset belongs to a resource that
/// no longer exists. A recordset that vanished in the meantime is skipped.
pub async fn delete_owning_recordsets(
    dns: &dyn DnsService,
    criteria: &RecordCriteria,
) -> Result<usize> {
    let records: Vec<Record> = dns.find_records(criteria).await?;
    let recordsets: BTreeSet<(String, String)> = records
        .into_iter()
        .map(|r| (r.zone_id, r.recordset_id))
        .collect();

    let mut removed = 0;
    for (zone_id, recordset_id) in recordsets {
        match dns.delete_recordset(&zone_id, &recordset_id).await {
            Ok(()) => {
                info!("Deleted recordset {} in zone {}", recordset_id, zone_id);
                removed += 1;
            }
            Err(e) if e.is_not_found() => {
                warn!("Recordset {} in zone {} already gone", recordset_id, zone_id)
            }
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

/// Step outcome of a deletion that removed `count` objects
pub fn deletion_outcome(count: usize) -> StepOutcome {
    if count > 0 {
        StepOutcome::Applied
    } else {
        StepOutcome::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDnsService;
    use crate::model::Zone;

    fn identity(resource_id: &str) -> ManagedIdentity {
        ManagedIdentity::instance("nova_fixed", resource_id)
    }

    async fn service() -> MemoryDnsService {
        let dns = MemoryDnsService::new();
        dns.add_zone(Zone::new("z1", "example.org.")).await;
        dns
    }

    #[tokio::test]
    async fn test_upsert_twice_reuses_recordset() {
        let dns = service().await;
        let first = upsert(&dns, "z1", "2a.example.org.", RecordType::Aaaa, "2001:db8::5", &identity("vm-1"))
            .await
            .unwrap();
        let second = upsert(&dns, "z1", "2a.example.org.", RecordType::Aaaa, "2001:db8::5", &identity("vm-1"))
            .await
            .unwrap();

        assert_eq!(first.outcome, StepOutcome::Applied);
        assert_eq!(second.outcome, StepOutcome::Unchanged);
        assert_eq!(first.recordset_id, second.recordset_id);
        assert_eq!(first.record_id, second.record_id);
        assert_eq!(dns.recordsets().await.len(), 1);
        assert_eq!(dns.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_stale_data_of_same_owner() {
        let dns = service().await;
        upsert(&dns, "z1", "2a.example.org.", RecordType::Aaaa, "2001:db8::5", &identity("vm-1"))
            .await
            .unwrap();
        let moved = upsert(&dns, "z1", "2a.example.org.", RecordType::Aaaa, "2001:db8::6", &identity("vm-1"))
            .await
            .unwrap();

        assert_eq!(moved.outcome, StepOutcome::Applied);
        let records = dns.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, "2001:db8::6");
    }

    #[tokio::test]
    async fn test_upsert_keeps_other_owners_records() {
        let dns = service().await;
        upsert(&dns, "z1", "www.example.org.", RecordType::A, "192.0.2.1", &identity("vm-1"))
            .await
            .unwrap();
        upsert(&dns, "z1", "www.example.org.", RecordType::A, "192.0.2.2", &identity("vm-2"))
            .await
            .unwrap();
        assert_eq!(dns.records().await.len(), 2);

        let err = upsert(&dns, "z1", "www.example.org.", RecordType::A, "192.0.2.1", &identity("vm-3"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(dns.records().await.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_managed_removes_emptied_recordset_only() {
        let dns = service().await;
        upsert(&dns, "z1", "www.example.org.", RecordType::A, "192.0.2.1", &identity("vm-1"))
            .await
            .unwrap();
        upsert(&dns, "z1", "www.example.org.", RecordType::A, "192.0.2.2", &identity("vm-2"))
            .await
            .unwrap();
        upsert(&dns, "z1", "1.example.org.", RecordType::A, "192.0.2.1", &identity("vm-1"))
            .await
            .unwrap();

        let removed = delete_managed(&dns, &RecordCriteria::owned_by("nova_fixed", "vm-1"))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let recordsets = dns.recordsets().await;
        assert_eq!(recordsets.len(), 1);
        assert_eq!(recordsets[0].name, "www.example.org.");
        assert_eq!(dns.records().await.len(), 1);

        let again = delete_managed(&dns, &RecordCriteria::owned_by("nova_fixed", "vm-1"))
            .await
            .unwrap();
        assert_eq!(deletion_outcome(again), StepOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_delete_managed_refuses_unscoped_criteria() {
        let dns = service().await;
        assert!(delete_managed(&dns, &RecordCriteria::default().in_zone("z1")).await.is_err());
    }
}
