// # Nova Compute Service
//
// Implements `ComputeService` over the Nova REST API.
//
// ## API Calls
//
// ```http
// GET /servers/{id}
// GET /servers/detail?ip=^192\.0\.2\.10$&status=ACTIVE&all_tenants=1
// PUT /servers/{id}/metadata/{key}   { "meta": { "<key>": "<value>" } }
// ```
//
// Floating addresses reported by Nova are not instance addresses here;
// only fixed ones are returned.

use async_trait::async_trait;
use dnsink_core::model::{Instance, InstanceAddress, InstanceFilter};
use dnsink_core::{ComputeService, Error, Result};
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::http::{execute, parse};
use crate::keystone::{KeystoneSession, Service};

const SERVICE: &str = "nova";

#[derive(Debug, Deserialize)]
struct AddressBody {
    addr: String,
    version: u8,
    #[serde(rename = "OS-EXT-IPS:type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerBody {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "OS-EXT-SRV-ATTR:instance_name", default)]
    instance_name: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    addresses: HashMap<String, Vec<AddressBody>>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl From<ServerBody> for Instance {
    fn from(server: ServerBody) -> Self {
        let mut addresses: Vec<InstanceAddress> = server
            .addresses
            .into_values()
            .flatten()
            .filter(|a| a.kind.as_deref() != Some("floating"))
            .filter_map(|a| match a.addr.parse::<IpAddr>() {
                Ok(addr) => Some(InstanceAddress {
                    addr,
                    version: a.version,
                }),
                Err(_) => {
                    warn!("Ignoring unparsable address {} of server {}", a.addr, server.id);
                    None
                }
            })
            .collect();
        // Network names come back in map order
        addresses.sort_by_key(|a| a.addr);

        Instance {
            id: server.id,
            name: server.name,
            internal_name: server.instance_name,
            tenant_id: server.tenant_id,
            status: server.status,
            addresses,
            metadata: server.metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: ServerBody,
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct ServerPage {
    #[serde(default)]
    servers: Vec<ServerBody>,
    #[serde(default)]
    servers_links: Vec<Link>,
}

/// Anchored regex for Nova's `ip`/`ip6` filters
fn exact_ip_pattern(ip: IpAddr) -> String {
    let escaped = ip.to_string().replace('.', "\\.");
    format!("^{}$", escaped)
}

/// Nova compute platform
#[derive(Debug)]
pub struct NovaCompute {
    session: Arc<KeystoneSession>,
}

impl NovaCompute {
    pub fn new(session: Arc<KeystoneSession>) -> Self {
        Self { session }
    }

    async fn url(&self, path: &str) -> Result<String> {
        let endpoint = self.session.endpoint(Service::Compute).await?;
        Ok(format!("{}/{}", endpoint, path))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        execute(&self.session, SERVICE, request, what).await
    }
}

#[async_trait]
impl ComputeService for NovaCompute {
    async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        let url = self.url(&format!("servers/{}", instance_id)).await?;
        let request = self.session.authorized(Method::GET, &url).await?;
        let response = self.send(request, "server lookup").await?;
        let envelope: ServerEnvelope = parse(SERVICE, response).await?;
        Ok(envelope.server.into())
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(ip) = filter.ip {
            let key = if ip.is_ipv4() { "ip" } else { "ip6" };
            query.push((key, exact_ip_pattern(ip)));
        }
        if let Some(ref status) = filter.status {
            query.push(("status", status.clone()));
        }
        if let Some(ref tenant_id) = filter.tenant_id {
            query.push(("tenant_id", tenant_id.clone()));
        }
        if filter.all_tenants {
            query.push(("all_tenants", "1".to_string()));
        }

        let mut instances = Vec::new();
        let mut request = self
            .session
            .authorized(Method::GET, &self.url("servers/detail").await?)
            .await?
            .query(&query);
        loop {
            let response = self.send(request, "server listing").await?;
            let page: ServerPage = parse(SERVICE, response).await?;
            instances.extend(page.servers.into_iter().map(Instance::from));
            match page.servers_links.into_iter().find(|l| l.rel == "next") {
                Some(next) => request = self.session.authorized(Method::GET, &next.href).await?,
                None => break,
            }
        }

        // Nova's ip filter is a regex over all addresses; confirm client-side
        instances.retain(|instance| filter.matches(instance));
        debug!("Nova listed {} instance(s) for {:?}", instances.len(), filter);
        Ok(instances)
    }

    async fn set_instance_metadata(&self, instance_id: &str, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::config("metadata key cannot be empty"));
        }
        let url = self
            .url(&format!("servers/{}/metadata/{}", instance_id, key))
            .await?;
        let body = serde_json::json!({ "meta": { key: value } });
        let request = self.session.authorized(Method::PUT, &url).await?.json(&body);
        self.send(request, "metadata update").await?;
        debug!("Nova set metadata {}={} on {}", key, value, instance_id);
        Ok(())
    }

    fn service_name(&self) -> &'static str {
        SERVICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystone::tests::{TOKEN, mount_keystone, session};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn server_json(id: &str, fixed: &str, status: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": "vm1",
            "status": status,
            "tenant_id": "tenant-a",
            "OS-EXT-SRV-ATTR:instance_name": "instance-0000002a",
            "metadata": { "role": "web" },
            "addresses": {
                "private": [
                    { "addr": fixed, "version": 4, "OS-EXT-IPS:type": "fixed" },
                    { "addr": "198.51.100.7", "version": 4, "OS-EXT-IPS:type": "floating" },
                    { "addr": "2001:db8::2a", "version": 6, "OS-EXT-IPS:type": "fixed" }
                ]
            }
        })
    }

    async fn nova() -> (MockServer, NovaCompute) {
        let server = MockServer::start().await;
        mount_keystone(&server).await;
        let compute = NovaCompute::new(Arc::new(session(&server)));
        (server, compute)
    }

    #[test]
    fn test_exact_ip_pattern() {
        assert_eq!(exact_ip_pattern("10.0.0.1".parse().unwrap()), "^10\\.0\\.0\\.1$");
        assert_eq!(exact_ip_pattern("2001:db8::1".parse().unwrap()), "^2001:db8::1$");
    }

    #[tokio::test]
    async fn test_get_instance_maps_fixed_addresses() {
        let (server, compute) = nova().await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/vm-1"))
            .and(header("X-Auth-Token", TOKEN))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "server": server_json("vm-1", "10.0.0.5", "ACTIVE") })),
            )
            .mount(&server)
            .await;

        let instance = compute.get_instance("vm-1").await.unwrap();
        assert_eq!(instance.internal_name.as_deref(), Some("instance-0000002a"));
        assert_eq!(instance.tenant_id.as_deref(), Some("tenant-a"));
        assert_eq!(instance.metadata.get("role").map(String::as_str), Some("web"));

        let addrs: Vec<IpAddr> = instance.addresses.iter().map(|a| a.addr).collect();
        assert_eq!(
            addrs,
            vec![
                "10.0.0.5".parse::<IpAddr>().unwrap(),
                "2001:db8::2a".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_instance_is_not_found() {
        let (server, compute) = nova().await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "itemNotFound": { "code": 404, "message": "Instance gone could not be found." }
            })))
            .mount(&server)
            .await;

        assert!(compute.get_instance("gone").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_instances_by_ip_across_pages() {
        let (server, compute) = nova().await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/detail"))
            .and(query_param("ip", "^10\\.0\\.0\\.5$"))
            .and(query_param("status", "ACTIVE"))
            .and(query_param("all_tenants", "1"))
            .and(query_param_is_missing("marker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "servers": [server_json("vm-1", "10.0.0.5", "ACTIVE")],
                "servers_links": [{
                    "rel": "next",
                    "href": format!("{}/compute/v2.1/servers/detail?marker=vm-1", server.uri())
                }]
            })))
            .mount(&server)
            .await;
        // Regex false positive that must be dropped client-side
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/detail"))
            .and(query_param("marker", "vm-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "servers": [server_json("vm-2", "10.0.0.50", "ACTIVE")]
            })))
            .mount(&server)
            .await;

        let found = compute
            .list_instances(&InstanceFilter::active_with_ip("10.0.0.5".parse().unwrap(), None))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "vm-1");
    }

    #[tokio::test]
    async fn test_list_instances_v6_uses_ip6_filter() {
        let (server, compute) = nova().await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/detail"))
            .and(query_param("ip6", "^2001:db8::2a$"))
            .and(query_param("tenant_id", "tenant-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "servers": [server_json("vm-1", "10.0.0.5", "ACTIVE")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let filter = InstanceFilter::active_with_ip(
            "2001:db8::2a".parse().unwrap(),
            Some("tenant-a".to_string()),
        );
        assert_eq!(compute.list_instances(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_instance_metadata() {
        let (server, compute) = nova().await;
        Mock::given(method("PUT"))
            .and(path("/compute/v2.1/servers/vm-1/metadata/dns"))
            .and(body_json(json!({ "meta": { "dns": "vm1.example.org" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": { "dns": "vm1.example.org" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        compute
            .set_instance_metadata("vm-1", "dns", "vm1.example.org")
            .await
            .unwrap();
        assert!(compute.set_instance_metadata("vm-1", "", "x").await.is_err());
    }
}
