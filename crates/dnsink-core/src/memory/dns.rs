// # Memory DNS Service
//
// In-memory implementation of DnsService.
//
// Zones keep their insertion order, which is the iteration order
// `find_zones` reports and therefore the tie-break order of reverse-zone
// resolution.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::{
    ManagedIdentity, NewRecord, Record, RecordCriteria, RecordType, Recordset, Zone, ZoneCriteria,
};
use crate::reverse::zone_names_equal;
use crate::traits::DnsService;

#[derive(Debug, Default)]
struct DnsState {
    zones: Vec<Zone>,
    recordsets: Vec<Recordset>,
    records: Vec<Record>,
    next_id: u64,
}

impl DnsState {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn require_zone(&self, zone_id: &str) -> Result<(), Error> {
        if self.zones.iter().any(|z| z.id == zone_id) {
            Ok(())
        } else {
            Err(Error::not_found(format!("zone {}", zone_id)))
        }
    }

    fn recordset(&self, zone_id: &str, recordset_id: &str) -> Result<&Recordset, Error> {
        self.recordsets
            .iter()
            .find(|rs| rs.zone_id == zone_id && rs.id == recordset_id)
            .ok_or_else(|| Error::not_found(format!("recordset {} in zone {}", recordset_id, zone_id)))
    }

    fn push_record(&mut self, zone_id: &str, recordset_id: &str, data: &str, managed: Option<ManagedIdentity>) -> Record {
        let record = Record {
            id: self.allocate("record"),
            zone_id: zone_id.to_string(),
            recordset_id: recordset_id.to_string(),
            data: data.to_string(),
            managed,
        };
        self.records.push(record.clone());
        record
    }
}

/// In-memory zone-management service
#[derive(Debug, Clone, Default)]
pub struct MemoryDnsService {
    inner: Arc<RwLock<DnsState>>,
}

impl MemoryDnsService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a zone; zones are reported in insertion order
    pub async fn add_zone(&self, zone: Zone) {
        self.inner.write().await.zones.push(zone);
    }

    /// Insert a record directly, bypassing the reconciler
    ///
    /// Passing `None` as `managed` models a record created by another actor.
    pub async fn seed_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: RecordType,
        data: &str,
        managed: Option<ManagedIdentity>,
    ) -> Record {
        let mut guard = self.inner.write().await;
        let existing = guard
            .recordsets
            .iter()
            .find(|rs| rs.zone_id == zone_id && rs.record_type == record_type && zone_names_equal(&rs.name, name))
            .map(|rs| rs.id.clone());
        let recordset_id = match existing {
            Some(id) => id,
            None => {
                let id = guard.allocate("recordset");
                guard.recordsets.push(Recordset {
                    id: id.clone(),
                    zone_id: zone_id.to_string(),
                    name: name.to_string(),
                    record_type,
                });
                id
            }
        };
        guard.push_record(zone_id, &recordset_id, data, managed)
    }

    /// Snapshot of all recordsets
    pub async fn recordsets(&self) -> Vec<Recordset> {
        self.inner.read().await.recordsets.clone()
    }

    /// Snapshot of all records
    pub async fn records(&self) -> Vec<Record> {
        self.inner.read().await.records.clone()
    }

    /// Records of the recordset `(zone_id, name, type)`, empty when it does not exist
    pub async fn records_named(&self, zone_id: &str, name: &str, record_type: RecordType) -> Vec<Record> {
        let guard = self.inner.read().await;
        let Some(recordset) = guard
            .recordsets
            .iter()
            .find(|rs| rs.zone_id == zone_id && rs.record_type == record_type && zone_names_equal(&rs.name, name))
        else {
            return Vec::new();
        };
        guard
            .records
            .iter()
            .filter(|r| r.recordset_id == recordset.id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DnsService for MemoryDnsService {
    async fn find_zones(&self, criteria: &ZoneCriteria) -> Result<Vec<Zone>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .zones
            .iter()
            .filter(|z| criteria.matches(z))
            .cloned()
            .collect())
    }

    async fn get_zone(&self, zone_id: &str) -> Result<Zone, Error> {
        let guard = self.inner.read().await;
        guard
            .zones
            .iter()
            .find(|z| z.id == zone_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("zone {}", zone_id)))
    }

    async fn find_recordset(
        &self,
        zone_id: &str,
        name: &str,
        record_type: RecordType,
    ) -> Result<Option<Recordset>, Error> {
        let guard = self.inner.read().await;
        guard.require_zone(zone_id)?;
        Ok(guard
            .recordsets
            .iter()
            .find(|rs| rs.zone_id == zone_id && rs.record_type == record_type && zone_names_equal(&rs.name, name))
            .cloned())
    }

    async fn create_recordset(
        &self,
        zone_id: &str,
        name: &str,
        record_type: RecordType,
        record: &NewRecord,
    ) -> Result<(Recordset, Record), Error> {
        let mut guard = self.inner.write().await;
        guard.require_zone(zone_id)?;
        if guard
            .recordsets
            .iter()
            .any(|rs| rs.zone_id == zone_id && rs.record_type == record_type && zone_names_equal(&rs.name, name))
        {
            return Err(Error::conflict(format!(
                "recordset {} {} already exists in zone {}",
                name, record_type, zone_id
            )));
        }

        let recordset = Recordset {
            id: guard.allocate("recordset"),
            zone_id: zone_id.to_string(),
            name: name.to_string(),
            record_type,
        };
        guard.recordsets.push(recordset.clone());
        let created = guard.push_record(zone_id, &recordset.id, &record.data, Some(record.managed.clone()));
        Ok((recordset, created))
    }

    async fn create_record(
        &self,
        zone_id: &str,
        recordset_id: &str,
        record: &NewRecord,
    ) -> Result<Record, Error> {
        let mut guard = self.inner.write().await;
        guard.recordset(zone_id, recordset_id)?;
        if guard
            .records
            .iter()
            .any(|r| r.recordset_id == recordset_id && r.data == record.data)
        {
            return Err(Error::conflict(format!(
                "recordset {} already holds {}",
                recordset_id, record.data
            )));
        }
        Ok(guard.push_record(zone_id, recordset_id, &record.data, Some(record.managed.clone())))
    }

    async fn find_records(&self, criteria: &RecordCriteria) -> Result<Vec<Record>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .records
            .iter()
            .filter(|r| criteria.matches(r))
            .cloned()
            .collect())
    }

    async fn delete_record(
        &self,
        zone_id: &str,
        recordset_id: &str,
        record_id: &str,
    ) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let before = guard.records.len();
        guard
            .records
            .retain(|r| !(r.zone_id == zone_id && r.recordset_id == recordset_id && r.id == record_id));
        if guard.records.len() == before {
            return Err(Error::not_found(format!("record {}", record_id)));
        }
        Ok(())
    }

    async fn delete_recordset(&self, zone_id: &str, recordset_id: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.recordset(zone_id, recordset_id)?;
        guard
            .recordsets
            .retain(|rs| !(rs.zone_id == zone_id && rs.id == recordset_id));
        guard.records.retain(|r| r.recordset_id != recordset_id);
        Ok(())
    }

    fn service_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(data: &str) -> NewRecord {
        NewRecord {
            data: data.to_string(),
            managed: ManagedIdentity::instance("nova_fixed", "vm-1"),
        }
    }

    #[tokio::test]
    async fn test_recordset_uniqueness() {
        let dns = MemoryDnsService::new();
        dns.add_zone(Zone::new("z1", "example.org.")).await;

        dns.create_recordset("z1", "a.example.org.", RecordType::A, &new_record("192.0.2.1"))
            .await
            .unwrap();
        let err = dns
            .create_recordset("z1", "A.example.org", RecordType::A, &new_record("192.0.2.2"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Same name, other type is a distinct recordset
        dns.create_recordset("z1", "a.example.org.", RecordType::Aaaa, &new_record("2001:db8::1"))
            .await
            .unwrap();
        assert_eq!(dns.recordsets().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_zone_is_not_found() {
        let dns = MemoryDnsService::new();
        assert!(dns.get_zone("nope").await.unwrap_err().is_not_found());
        assert!(
            dns.find_recordset("nope", "a.", RecordType::A)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_delete_recordset_drops_records() {
        let dns = MemoryDnsService::new();
        dns.add_zone(Zone::new("z1", "example.org.")).await;
        let foreign = dns
            .seed_record("z1", "www.example.org.", RecordType::A, "192.0.2.9", None)
            .await;

        dns.delete_recordset("z1", &foreign.recordset_id).await.unwrap();
        assert!(dns.records().await.is_empty());
        assert!(dns.delete_recordset("z1", &foreign.recordset_id).await.is_err());
    }
}
