// # Designate DNS Service
//
// Implements `DnsService` over the Designate v2 REST API.
//
// ## Record Ownership
//
// Designate stores a recordset as a list of data strings, so records carry
// no metadata of their own. The owners of managed records are kept in the
// recordset description as JSON keyed by record data:
//
// ```json
// { "dnsink": { "192.0.2.10": { "plugin_name": "nova_fixed", ... } } }
// ```
//
// A record's id is its data. Recordsets whose description is foreign text
// are read as unmanaged and never written.
//
// ## API Calls
//
// ```http
// GET    /v2/zones?name=...
// GET    /v2/zones/{zone_id}
// GET    /v2/zones/{zone_id}/recordsets?name=...&type=...
// GET    /v2/recordsets?description=*...*
// POST   /v2/zones/{zone_id}/recordsets
// PUT    /v2/zones/{zone_id}/recordsets/{recordset_id}
// DELETE /v2/zones/{zone_id}/recordsets/{recordset_id}
// X-Auth-Token: <keystone token>
// X-Auth-All-Projects: true
// X-Designate-Edit-Managed-Records: true
// ```

use async_trait::async_trait;
use dnsink_core::model::{
    ManagedIdentity, NewRecord, Record, RecordCriteria, RecordType, Recordset, Zone, ZoneCriteria,
};
use dnsink_core::{DnsService, Error, Result};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::http::{execute, parse};
use crate::keystone::{KeystoneSession, Service};

const SERVICE: &str = "designate";

#[derive(Debug, Deserialize)]
struct ZoneBody {
    id: String,
    name: String,
    #[serde(default)]
    project_id: Option<String>,
}

impl From<ZoneBody> for Zone {
    fn from(body: ZoneBody) -> Self {
        Zone {
            id: body.id,
            name: body.name,
            tenant_id: body.project_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RecordsetBody {
    id: String,
    zone_id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    #[serde(default)]
    records: Vec<String>,
    #[serde(default)]
    description: Option<String>,
}

impl RecordsetBody {
    fn recordset(&self) -> Option<Recordset> {
        Some(Recordset {
            id: self.id.clone(),
            zone_id: self.zone_id.clone(),
            name: self.name.clone(),
            record_type: RecordType::parse(&self.record_type)?,
        })
    }

    fn ownership(&self) -> Option<Ownership> {
        Ownership::parse(self.description.as_deref())
    }

    fn expand(&self) -> Vec<Record> {
        let owners = self.ownership().unwrap_or_default();
        self.records
            .iter()
            .map(|data| record(&self.zone_id, &self.id, data, owners.dnsink.get(data).cloned()))
            .collect()
    }
}

fn record(zone_id: &str, recordset_id: &str, data: &str, managed: Option<ManagedIdentity>) -> Record {
    Record {
        id: data.to_string(),
        zone_id: zone_id.to_string(),
        recordset_id: recordset_id.to_string(),
        data: data.to_string(),
        managed,
    }
}

/// Owners of the managed records of one recordset
#[derive(Debug, Default, Serialize, Deserialize)]
struct Ownership {
    dnsink: BTreeMap<String, ManagedIdentity>,
}

impl Ownership {
    /// `None` when the description holds something other than ownership
    fn parse(description: Option<&str>) -> Option<Self> {
        match description.map(str::trim) {
            None | Some("") => Some(Self::default()),
            Some(text) => serde_json::from_str(text).ok(),
        }
    }

    fn description(&self) -> Result<Option<String>> {
        if self.dnsink.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::to_string(self)?))
    }
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    next: Option<String>,
}

trait Page: DeserializeOwned {
    type Item;

    fn split(self) -> (Vec<Self::Item>, Option<String>);
}

#[derive(Debug, Deserialize)]
struct ZonePage {
    #[serde(default)]
    zones: Vec<ZoneBody>,
    #[serde(default)]
    links: Links,
}

impl Page for ZonePage {
    type Item = ZoneBody;

    fn split(self) -> (Vec<ZoneBody>, Option<String>) {
        (self.zones, self.links.next)
    }
}

#[derive(Debug, Deserialize)]
struct RecordsetPage {
    #[serde(default)]
    recordsets: Vec<RecordsetBody>,
    #[serde(default)]
    links: Links,
}

impl Page for RecordsetPage {
    type Item = RecordsetBody;

    fn split(self) -> (Vec<RecordsetBody>, Option<String>) {
        (self.recordsets, self.links.next)
    }
}

/// Designate v2 zone-management service
#[derive(Debug)]
pub struct DesignateDns {
    session: Arc<KeystoneSession>,
}

impl DesignateDns {
    pub fn new(session: Arc<KeystoneSession>) -> Self {
        Self { session }
    }

    async fn url(&self, path: &str) -> Result<String> {
        let endpoint = self.session.endpoint(Service::Dns).await?;
        let base = endpoint.strip_suffix("/v2").unwrap_or(&endpoint);
        Ok(format!("{}/v2/{}", base, path))
    }

    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        Ok(self
            .session
            .authorized(method, url)
            .await?
            .header("X-Auth-All-Projects", "true")
            .header("X-Designate-Edit-Managed-Records", "true"))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        execute(&self.session, SERVICE, request, what).await
    }

    /// GET every page of a listing, following `links.next`
    async fn paginate<P: Page>(&self, path: &str, query: &[(&str, String)], what: &str) -> Result<Vec<P::Item>> {
        let mut items = Vec::new();
        let mut request = self
            .request(Method::GET, &self.url(path).await?)
            .await?
            .query(query);
        loop {
            let response = self.send(request, what).await?;
            let page: P = parse(SERVICE, response).await?;
            let (mut batch, next) = page.split();
            items.append(&mut batch);
            match next {
                Some(next) => request = self.request(Method::GET, &next).await?,
                None => return Ok(items),
            }
        }
    }

    async fn get_recordset_body(&self, zone_id: &str, recordset_id: &str) -> Result<RecordsetBody> {
        let url = self
            .url(&format!("zones/{}/recordsets/{}", zone_id, recordset_id))
            .await?;
        let request = self.request(Method::GET, &url).await?;
        let response = self.send(request, "recordset lookup").await?;
        parse(SERVICE, response).await
    }

    async fn put_recordset(
        &self,
        body: &RecordsetBody,
        records: &[String],
        ownership: Option<&Ownership>,
    ) -> Result<()> {
        let url = self
            .url(&format!("zones/{}/recordsets/{}", body.zone_id, body.id))
            .await?;
        let mut update = serde_json::json!({ "records": records });
        if let Some(ownership) = ownership {
            update["description"] = serde_json::json!(ownership.description()?);
        }
        let request = self.request(Method::PUT, &url).await?.json(&update);
        self.send(request, "recordset update").await?;
        Ok(())
    }

    /// Recordsets that may hold records matching `criteria`
    async fn candidate_recordsets(&self, criteria: &RecordCriteria) -> Result<Vec<RecordsetBody>> {
        if let (Some(zone_id), Some(recordset_id)) = (&criteria.zone_id, &criteria.recordset_id) {
            return match self.get_recordset_body(zone_id, recordset_id).await {
                Ok(body) => Ok(vec![body]),
                Err(e) if e.is_not_found() => Ok(Vec::new()),
                Err(e) => Err(e),
            };
        }

        // Narrow the listing server-side on the most selective identity field
        let mut query = Vec::new();
        if let Some(needle) = criteria.resource_id.as_ref().or(criteria.extra.as_ref()) {
            query.push(("description", format!("*{}*", needle)));
        }
        let path = match &criteria.zone_id {
            Some(zone_id) => format!("zones/{}/recordsets", zone_id),
            None => "recordsets".to_string(),
        };
        self.paginate::<RecordsetPage>(&path, &query, "recordset listing")
            .await
    }
}

#[async_trait]
impl DnsService for DesignateDns {
    async fn find_zones(&self, criteria: &ZoneCriteria) -> Result<Vec<Zone>> {
        let mut query = Vec::new();
        if let Some(ref name) = criteria.name {
            query.push(("name", name.clone()));
        }
        let zones = self
            .paginate::<ZonePage>("zones", &query, "zone listing")
            .await?;
        Ok(zones
            .into_iter()
            .map(Zone::from)
            .filter(|zone| criteria.matches(zone))
            .collect())
    }

    async fn get_zone(&self, zone_id: &str) -> Result<Zone> {
        let url = self.url(&format!("zones/{}", zone_id)).await?;
        let request = self.request(Method::GET, &url).await?;
        let response = self.send(request, "zone lookup").await?;
        let body: ZoneBody = parse(SERVICE, response).await?;
        Ok(body.into())
    }

    async fn find_recordset(
        &self,
        zone_id: &str,
        name: &str,
        record_type: RecordType,
    ) -> Result<Option<Recordset>> {
        let query = [
            ("name", name.to_string()),
            ("type", record_type.as_str().to_string()),
        ];
        let found = self
            .paginate::<RecordsetPage>(
                &format!("zones/{}/recordsets", zone_id),
                &query,
                "recordset lookup",
            )
            .await?;
        Ok(found
            .iter()
            .filter_map(RecordsetBody::recordset)
            .find(|rs| rs.record_type == record_type && rs.name.eq_ignore_ascii_case(name)))
    }

    async fn create_recordset(
        &self,
        zone_id: &str,
        name: &str,
        record_type: RecordType,
        record: &NewRecord,
    ) -> Result<(Recordset, Record)> {
        let mut ownership = Ownership::default();
        ownership
            .dnsink
            .insert(record.data.clone(), record.managed.clone());

        let url = self.url(&format!("zones/{}/recordsets", zone_id)).await?;
        let body = serde_json::json!({
            "name": name,
            "type": record_type.as_str(),
            "records": [record.data],
            "description": ownership.description()?,
        });
        let request = self.request(Method::POST, &url).await?.json(&body);
        let response = self.send(request, "recordset creation").await?;
        let created: RecordsetBody = parse(SERVICE, response).await?;

        let recordset = created.recordset().ok_or_else(|| {
            Error::backend(SERVICE, format!("unexpected recordset type {}", created.record_type))
        })?;
        debug!("Designate created recordset {} ({} {})", recordset.id, name, record_type);
        let record = self::record(zone_id, &recordset.id, &record.data, Some(record.managed.clone()));
        Ok((recordset, record))
    }

    async fn create_record(
        &self,
        zone_id: &str,
        recordset_id: &str,
        record: &NewRecord,
    ) -> Result<Record> {
        let body = self.get_recordset_body(zone_id, recordset_id).await?;
        let mut ownership = body.ownership().ok_or_else(|| {
            Error::conflict(format!(
                "recordset {} carries a description not written by dnsink",
                body.name
            ))
        })?;

        if body.records.contains(&record.data) {
            return match ownership.dnsink.get(&record.data) {
                Some(owner) if *owner == record.managed => Ok(self::record(
                    zone_id,
                    recordset_id,
                    &record.data,
                    Some(owner.clone()),
                )),
                _ => Err(Error::conflict(format!(
                    "{} already holds {}",
                    body.name, record.data
                ))),
            };
        }

        let mut records = body.records.clone();
        records.push(record.data.clone());
        ownership
            .dnsink
            .insert(record.data.clone(), record.managed.clone());
        self.put_recordset(&body, &records, Some(&ownership)).await?;

        Ok(self::record(
            zone_id,
            recordset_id,
            &record.data,
            Some(record.managed.clone()),
        ))
    }

    async fn find_records(&self, criteria: &RecordCriteria) -> Result<Vec<Record>> {
        let recordsets = self.candidate_recordsets(criteria).await?;
        Ok(recordsets
            .iter()
            .filter(|body| RecordType::parse(&body.record_type).is_some())
            .flat_map(RecordsetBody::expand)
            .filter(|record| criteria.matches(record))
            .collect())
    }

    async fn delete_record(&self, zone_id: &str, recordset_id: &str, record_id: &str) -> Result<()> {
        let body = self.get_recordset_body(zone_id, recordset_id).await?;
        if !body.records.iter().any(|data| data == record_id) {
            return Err(Error::not_found(format!(
                "record {} in recordset {}",
                record_id, recordset_id
            )));
        }

        let records: Vec<String> = body
            .records
            .iter()
            .filter(|data| *data != record_id)
            .cloned()
            .collect();
        if records.is_empty() {
            // Designate cannot hold an empty recordset
            return self.delete_recordset(zone_id, recordset_id).await;
        }

        let ownership = body.ownership().map(|mut ownership| {
            ownership.dnsink.remove(record_id);
            ownership
        });
        if ownership.is_none() {
            warn!("Removing {} from recordset {} with foreign description", record_id, body.name);
        }
        self.put_recordset(&body, &records, ownership.as_ref()).await
    }

    async fn delete_recordset(&self, zone_id: &str, recordset_id: &str) -> Result<()> {
        let url = self
            .url(&format!("zones/{}/recordsets/{}", zone_id, recordset_id))
            .await?;
        let request = self.request(Method::DELETE, &url).await?;
        self.send(request, "recordset deletion").await?;
        debug!("Designate deleted recordset {} in zone {}", recordset_id, zone_id);
        Ok(())
    }

    fn service_name(&self) -> &'static str {
        SERVICE
    }
}
