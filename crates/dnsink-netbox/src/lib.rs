// # NetBox IPAM Backend
//
// `IpamBackend` over the NetBox REST API.
//
// The backend only moves address objects. What gets written, and when an
// object is deleted instead of reset, is decided by `dnsink_core::IpamSync`.
//
// ## Security
//
// - The API token NEVER appears in logs or Debug output
// - Construction fails fast on an empty token
//
// ## API Reference
//
// - Prefix lookup: GET `/api/ipam/prefixes/{id}/`
// - Address lookup: GET `/api/ipam/ip-addresses/?address=...&parent=...`
// - Create: POST `/api/ipam/ip-addresses/`
// - Update: PATCH `/api/ipam/ip-addresses/{id}/`
// - Delete: DELETE `/api/ipam/ip-addresses/{id}/`

use async_trait::async_trait;
use dnsink_core::model::{AddressObject, AddressUpdate};
use dnsink_core::{Error, IpamBackend, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

const BACKEND: &str = "netbox";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// NetBox connection settings
#[derive(Clone, Deserialize)]
pub struct NetboxConfig {
    /// Base URL, e.g. `https://netbox.example.org`
    pub url: String,

    /// API token
    /// ⚠️ NEVER log this value
    pub api_token: String,

    /// Prefix holding the floating address pool
    #[serde(default)]
    pub floating_ip_prefix_id: Option<String>,
}

impl std::fmt::Debug for NetboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetboxConfig")
            .field("url", &self.url)
            .field("api_token", &"<REDACTED>")
            .field("floating_ip_prefix_id", &self.floating_ip_prefix_id)
            .finish()
    }
}

impl NetboxConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.url.starts_with("https://") && !self.url.starts_with("http://") {
            return Err(Error::config(format!(
                "NetBox URL must use HTTP or HTTPS scheme. Got: {}",
                self.url
            )));
        }
        if self.api_token.trim().is_empty() {
            return Err(Error::config("NetBox API token cannot be empty"));
        }
        if self
            .floating_ip_prefix_id
            .as_deref()
            .is_some_and(|id| id.trim().is_empty())
        {
            return Err(Error::config("NetBox floating IP prefix id cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PrefixDto {
    prefix: String,
}

#[derive(Debug, Deserialize)]
struct IpAddressDto {
    id: u64,
    /// CIDR notation, e.g. `198.51.100.7/32`
    address: String,
    #[serde(default)]
    description: String,
}

/// IPAM backend over the NetBox REST API
pub struct NetboxIpam {
    base_url: String,
    api_token: String,
    client: reqwest::Client,
    /// Prefix id -> CIDR; prefixes are operator-provisioned and do not move
    prefixes: RwLock<HashMap<String, String>>,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for NetboxIpam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetboxIpam")
            .field("base_url", &self.base_url)
            .field("api_token", &"<REDACTED>")
            .finish()
    }
}

impl NetboxIpam {
    /// Create a backend for a validated configuration
    pub fn new(config: &NetboxConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            client,
            prefixes: RwLock::new(HashMap::new()),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/api/ipam/{}", self.base_url, path))
            .header("Authorization", format!("Token {}", self.api_token))
            .header("Accept", "application/json")
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::backend(BACKEND, format!("HTTP request failed: {}", e)))?;
        check_status(response, what).await
    }

    /// CIDR of a prefix, fetched once per prefix id
    async fn prefix_cidr(&self, prefix_id: &str) -> Result<String> {
        if let Some(cidr) = self.prefixes.read().await.get(prefix_id) {
            return Ok(cidr.clone());
        }

        let what = format!("prefix {}", prefix_id);
        let response = self
            .send(self.request(Method::GET, &format!("prefixes/{}/", prefix_id)), &what)
            .await?;
        let prefix: PrefixDto = parse(response).await?;
        debug!("NetBox prefix {} is {}", prefix_id, prefix.prefix);

        self.prefixes
            .write()
            .await
            .insert(prefix_id.to_string(), prefix.prefix.clone());
        Ok(prefix.prefix)
    }
}

#[async_trait]
impl IpamBackend for NetboxIpam {
    async fn find_address(
        &self,
        address: IpAddr,
        prefix_id: Option<&str>,
    ) -> Result<Option<AddressObject>> {
        let mut query = vec![("address", address.to_string())];
        if let Some(prefix_id) = prefix_id {
            query.push(("parent", self.prefix_cidr(prefix_id).await?));
        }

        let request = self.request(Method::GET, "ip-addresses/").query(&query);
        let response = self.send(request, &format!("address {}", address)).await?;
        let page: Page<IpAddressDto> = parse(response).await?;

        match page.results.len() {
            0 => Ok(None),
            1 => page
                .results
                .into_iter()
                .next()
                .map(|dto| to_object(dto, prefix_id))
                .transpose(),
            n => Err(Error::ambiguous(format!(
                "{} NetBox objects for {}",
                n, address
            ))),
        }
    }

    async fn create_address(&self, address: IpAddr) -> Result<AddressObject> {
        let body = serde_json::json!({ "address": host_cidr(address) });
        let request = self.request(Method::POST, "ip-addresses/").json(&body);
        let response = self.send(request, &format!("create {}", address)).await?;
        let object = to_object(parse(response).await?, None)?;
        info!("Created NetBox address {} (id {})", object.address, object.id);
        Ok(object)
    }

    async fn update_address(
        &self,
        object: &AddressObject,
        update: &AddressUpdate,
    ) -> Result<AddressObject> {
        let request = self
            .request(Method::PATCH, &format!("ip-addresses/{}/", object.id))
            .json(update);
        let response = self
            .send(request, &format!("update {}", object.address))
            .await?;
        to_object(parse(response).await?, object.prefix_id.as_deref())
    }

    async fn delete_address(&self, object: &AddressObject) -> Result<()> {
        let request = self.request(Method::DELETE, &format!("ip-addresses/{}/", object.id));
        self.send(request, &format!("delete {}", object.address))
            .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

/// Host-length CIDR for an address
fn host_cidr(address: IpAddr) -> String {
    match address {
        IpAddr::V4(_) => format!("{}/32", address),
        IpAddr::V6(_) => format!("{}/128", address),
    }
}

fn to_object(dto: IpAddressDto, prefix_id: Option<&str>) -> Result<AddressObject> {
    let host = dto.address.split('/').next().unwrap_or_default();
    let address: IpAddr = host.parse().map_err(|e| {
        Error::backend(BACKEND, format!("Invalid address {:?} in response: {}", dto.address, e))
    })?;
    Ok(AddressObject {
        id: dto.id.to_string(),
        address,
        prefix_id: prefix_id.map(str::to_string),
        description: dto.description,
    })
}

async fn parse<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| Error::backend(BACKEND, format!("Failed to parse response: {}", e)))
}

/// Map a non-success status to the error the reconciler acts on
async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());

    Err(match status.as_u16() {
        401 | 403 => Error::auth(format!(
            "NetBox rejected the API token or its permissions. Status: {}",
            status
        )),
        404 => Error::not_found(format!("NetBox {}: {}", what, status)),
        // Duplicate addresses are refused as validation errors
        400 | 409 if error_text.contains("Duplicate") => {
            Error::conflict(format!("NetBox {}: {}", what, error_text))
        }
        429 => Error::backend(BACKEND, format!("Rate limit exceeded. Status: {}", status)),
        500..=599 => Error::backend(
            BACKEND,
            format!("NetBox server error (transient): {} - {}", status, error_text),
        ),
        _ => Error::backend(BACKEND, format!("{} failed: {} - {}", what, status, error_text)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "0123456789abcdef0123456789abcdef01234567";

    fn config(url: &str) -> NetboxConfig {
        NetboxConfig {
            url: url.to_string(),
            api_token: TOKEN.to_string(),
            floating_ip_prefix_id: Some("71".to_string()),
        }
    }

    fn object(id: &str, address: &str, prefix: Option<&str>) -> AddressObject {
        AddressObject {
            id: id.to_string(),
            address: address.parse().unwrap(),
            prefix_id: prefix.map(str::to_string),
            description: String::new(),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(config("https://netbox.example.org").validate().is_ok());
        assert!(config("netbox.example.org").validate().is_err());

        let mut empty_token = config("https://netbox.example.org");
        empty_token.api_token = " ".to_string();
        assert!(empty_token.validate().is_err());
        assert!(NetboxIpam::new(&empty_token).is_err());
    }

    #[test]
    fn test_api_token_not_exposed_in_debug() {
        let cfg = config("https://netbox.example.org");
        let ipam = NetboxIpam::new(&cfg).unwrap();
        assert!(!format!("{:?}", cfg).contains(TOKEN));
        assert!(!format!("{:?}", ipam).contains(TOKEN));
        assert!(format!("{:?}", ipam).contains("NetboxIpam"));
    }

    #[test]
    fn test_host_cidr() {
        assert_eq!(host_cidr("198.51.100.7".parse().unwrap()), "198.51.100.7/32");
        assert_eq!(host_cidr("2001:db8::5".parse().unwrap()), "2001:db8::5/128");
    }

    #[tokio::test]
    async fn test_find_address_in_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ipam/prefixes/71/"))
            .and(header("Authorization", format!("Token {}", TOKEN).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 71,
                "prefix": "198.51.100.0/24"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/ipam/ip-addresses/"))
            .and(query_param("address", "198.51.100.7"))
            .and(query_param("parent", "198.51.100.0/24"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 1,
                "results": [
                    { "id": 17, "address": "198.51.100.7/32", "description": "Floating IP" }
                ]
            })))
            .mount(&server)
            .await;

        let ipam = NetboxIpam::new(&config(&server.uri())).unwrap();
        let address: IpAddr = "198.51.100.7".parse().unwrap();

        // Second lookup reuses the prefix CIDR
        for _ in 0..2 {
            let found = ipam.find_address(address, Some("71")).await.unwrap().unwrap();
            assert_eq!(found.id, "17");
            assert_eq!(found.address, address);
            assert_eq!(found.prefix_id.as_deref(), Some("71"));
            assert_eq!(found.description, "Floating IP");
        }
    }

    #[tokio::test]
    async fn test_find_address_absent_and_ambiguous() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ipam/ip-addresses/"))
            .and(query_param("address", "2001:db8::5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 0, "results": [] })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/ipam/ip-addresses/"))
            .and(query_param("address", "2001:db8::6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 2,
                "results": [
                    { "id": 1, "address": "2001:db8::6/64" },
                    { "id": 2, "address": "2001:db8::6/128" }
                ]
            })))
            .mount(&server)
            .await;

        let ipam = NetboxIpam::new(&config(&server.uri())).unwrap();
        assert!(ipam.find_address("2001:db8::5".parse().unwrap(), None).await.unwrap().is_none());
        assert!(matches!(
            ipam.find_address("2001:db8::6".parse().unwrap(), None).await,
            Err(Error::AmbiguousTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ipam/ip-addresses/"))
            .and(body_json(json!({ "address": "2001:db8::5/128" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 42, "address": "2001:db8::5/128", "description": ""
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/ipam/ip-addresses/42/"))
            .and(body_json(json!({ "description": "demo (2a.example.org)" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 42, "address": "2001:db8::5/128", "description": "demo (2a.example.org)"
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/ipam/ip-addresses/42/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let ipam = NetboxIpam::new(&config(&server.uri())).unwrap();
        let created = ipam.create_address("2001:db8::5".parse().unwrap()).await.unwrap();
        assert_eq!(created.id, "42");
        assert_eq!(created.prefix_id, None);

        let update = AddressUpdate {
            description: Some("demo (2a.example.org)".to_string()),
        };
        let updated = ipam.update_address(&created, &update).await.unwrap();
        assert_eq!(updated.description, "demo (2a.example.org)");

        ipam.delete_address(&updated).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/ipam/ip-addresses/1/"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/ipam/ip-addresses/2/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/ipam/ip-addresses/"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"address":["Duplicate IP address found in global table"]}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/ipam/ip-addresses/3/"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let ipam = NetboxIpam::new(&config(&server.uri())).unwrap();
        let update = AddressUpdate::default();

        assert!(matches!(
            ipam.update_address(&object("1", "198.51.100.7", None), &update).await,
            Err(Error::Authentication(_))
        ));
        assert!(
            ipam.delete_address(&object("2", "2001:db8::2", None))
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            ipam.create_address("2001:db8::5".parse().unwrap())
                .await
                .unwrap_err()
                .is_conflict()
        );
        let err = ipam
            .delete_address(&object("3", "2001:db8::3", None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
        assert!(err.to_string().contains("transient"));
    }

    #[tokio::test]
    async fn test_sync_assigns_through_netbox() {
        use dnsink_core::IpamSync;
        use std::sync::Arc;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ipam/prefixes/71/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 71, "prefix": "198.51.100.0/24"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/ipam/ip-addresses/"))
            .and(query_param("address", "198.51.100.7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "id": 17, "address": "198.51.100.7/32", "description": "Floating IP" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/ipam/ip-addresses/17/"))
            .and(body_json(json!({ "description": "demo (vm1.example.org)" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 17, "address": "198.51.100.7/32", "description": "demo (vm1.example.org)"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = Arc::new(NetboxIpam::new(&config(&server.uri())).unwrap());
        let sync = IpamSync::new(backend, Some("71".to_string()));
        let object = sync.resolve("198.51.100.7".parse().unwrap()).await.unwrap();
        let outcome = sync.assign(&object, "vm1.example.org.", "demo").await.unwrap();
        assert_eq!(outcome, dnsink_core::StepOutcome::Applied);
    }
}
