// # DNS Service Trait
//
// Defines the interface to the zone-management service.
//
// ## Implementations
//
// - Designate v2 REST API: `dnsink-openstack` crate
// - In-memory: `dnsink_core::memory::MemoryDnsService`
//
// All calls are made with an elevated, cross-tenant context so reverse
// zones owned by an administrative tenant stay visible.

use async_trait::async_trait;

use crate::model::{NewRecord, Record, RecordCriteria, RecordType, Recordset, Zone, ZoneCriteria};

/// Trait for zone-management service implementations
///
/// # Uniqueness
///
/// Implementations must enforce at most one recordset per
/// `(zone_id, name, type)`. A create that loses a race against another
/// writer must fail with [`crate::Error::Conflict`] so callers can fall back
/// to a lookup.
///
/// # Caching
///
/// Implementations must not cache between calls; the service is the
/// consistency boundary and writes must be visible to the next read.
#[async_trait]
pub trait DnsService: Send + Sync {
    /// List zones matching the criteria
    async fn find_zones(&self, criteria: &ZoneCriteria) -> Result<Vec<Zone>, crate::Error>;

    /// Fetch one zone by id
    ///
    /// # Returns
    ///
    /// - `Err(Error::NotFound)`: No such zone
    async fn get_zone(&self, zone_id: &str) -> Result<Zone, crate::Error>;

    /// Look up the recordset for `(zone_id, name, type)`
    async fn find_recordset(
        &self,
        zone_id: &str,
        name: &str,
        record_type: RecordType,
    ) -> Result<Option<Recordset>, crate::Error>;

    /// Create a recordset holding its first record
    ///
    /// # Returns
    ///
    /// - `Ok((Recordset, Record))`: The new recordset and its record
    /// - `Err(Error::Conflict)`: The recordset already exists
    async fn create_recordset(
        &self,
        zone_id: &str,
        name: &str,
        record_type: RecordType,
        record: &NewRecord,
    ) -> Result<(Recordset, Record), crate::Error>;

    /// Add a record to an existing recordset
    async fn create_record(
        &self,
        zone_id: &str,
        recordset_id: &str,
        record: &NewRecord,
    ) -> Result<Record, crate::Error>;

    /// List records matching the criteria, across zones unless one is given
    ///
    /// A recordset that no longer exists holds no records; it is not an
    /// error.
    async fn find_records(&self, criteria: &RecordCriteria) -> Result<Vec<Record>, crate::Error>;

    /// Remove one record from its recordset
    ///
    /// Services that cannot hold an empty recordset may drop the recordset
    /// together with its last record.
    async fn delete_record(
        &self,
        zone_id: &str,
        recordset_id: &str,
        record_id: &str,
    ) -> Result<(), crate::Error>;

    /// Remove a recordset with all its records
    async fn delete_recordset(&self, zone_id: &str, recordset_id: &str)
    -> Result<(), crate::Error>;

    /// Service name (for logging/debugging)
    fn service_name(&self) -> &'static str;
}
