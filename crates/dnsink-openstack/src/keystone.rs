// # Keystone v3 Session
//
// Password authentication scoped to one project. The token and the service
// catalog are kept until shortly before the token expires, or until a
// backend answers 401.
//
// ## API Call
//
// ```http
// POST {auth_url}/auth/tokens
// { "auth": { "identity": { "methods": ["password"], ... }, "scope": { "project": ... } } }
//
// 201 Created
// X-Subject-Token: <token>
// { "token": { "expires_at": "...", "catalog": [ ... ] } }
// ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dnsink_core::{Error, Result};
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::OpenStackConfig;
use crate::http::{check_status, parse};

const SERVICE: &str = "keystone";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Tokens are renewed this long before Keystone would expire them
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Service looked up in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Dns,
    Compute,
}

impl Service {
    /// Catalog `type` of the service
    pub fn catalog_type(&self) -> &'static str {
        match self {
            Service::Dns => "dns",
            Service::Compute => "compute",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    url: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    expires_at: DateTime<Utc>,
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Clone)]
struct Token {
    value: String,
    expires_at: DateTime<Utc>,
    catalog: Vec<CatalogEntry>,
}

impl Token {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

/// Keystone v3 session shared by the OpenStack adapters
pub struct KeystoneSession {
    config: OpenStackConfig,
    client: reqwest::Client,
    token: RwLock<Option<Token>>,
}

// Custom Debug implementation that hides the password and the token
impl std::fmt::Debug for KeystoneSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystoneSession")
            .field("config", &self.config)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

impl KeystoneSession {
    /// Create a session; nothing is sent until the first call
    pub fn new(config: OpenStackConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
        })
    }

    /// A request carrying a valid token
    pub(crate) async fn authorized(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self.current().await?;
        Ok(self
            .client
            .request(method, url)
            .header("X-Auth-Token", token.value)
            .header("Accept", "application/json"))
    }

    /// Base URL of a service: the configured override, else the catalog
    pub async fn endpoint(&self, service: Service) -> Result<String> {
        let configured = match service {
            Service::Dns => self.config.designate_endpoint.as_deref(),
            Service::Compute => self.config.nova_endpoint.as_deref(),
        };
        if let Some(url) = configured {
            return Ok(url.trim_end_matches('/').to_string());
        }

        let token = self.current().await?;
        let region = self.config.region_name.as_deref();
        token
            .catalog
            .iter()
            .filter(|entry| entry.service_type == service.catalog_type())
            .flat_map(|entry| entry.endpoints.iter())
            .filter(|ep| ep.interface == "public")
            .find(|ep| {
                region.is_none_or(|r| {
                    ep.region.as_deref() == Some(r) || ep.region_id.as_deref() == Some(r)
                })
            })
            .map(|ep| ep.url.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                Error::config(format!(
                    "No public {} endpoint in the service catalog{}",
                    service.catalog_type(),
                    region.map(|r| format!(" for region {}", r)).unwrap_or_default()
                ))
            })
    }

    /// Drop the cached token
    pub async fn invalidate(&self) {
        if self.token.write().await.take().is_some() {
            debug!("Keystone token invalidated");
        }
    }

    async fn current(&self) -> Result<Token> {
        let now = Utc::now();
        if let Some(token) = self.token.read().await.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.clone());
        }

        let mut guard = self.token.write().await;
        // Another caller may have refreshed while we waited
        if let Some(token) = guard.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.clone());
        }
        let token = self.authenticate().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn authenticate(&self) -> Result<Token> {
        let url = format!("{}/auth/tokens", self.config.auth_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.config.username,
                            "domain": { "name": self.config.user_domain_name },
                            "password": self.config.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": self.config.project_name,
                        "domain": { "name": self.config.project_domain_name },
                    }
                }
            }
        });

        debug!("Authenticating {} against {}", self.config.username, url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::backend(SERVICE, format!("HTTP request failed: {}", e)))?;
        let response = check_status(SERVICE, response, "token request").await?;

        let value = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::auth("Keystone response carries no X-Subject-Token"))?;
        let body: TokenResponse = parse(SERVICE, response).await?;

        info!(
            "Keystone token issued for project {} (expires {})",
            self.config.project_name, body.token.expires_at
        );
        Ok(Token {
            value,
            expires_at: body.token.expires_at,
            catalog: body.token.catalog,
        })
    }
}
