// # OpenStack Backends
//
// This crate provides the OpenStack side of the reconciler:
//
// - [`DesignateDns`]: `DnsService` over the Designate v2 REST API
// - [`NovaCompute`]: `ComputeService` over the Nova REST API
// - [`KeystoneSession`]: Keystone v3 password session shared by both
//
// ## Architectural Constraints
//
// - One HTTP exchange per trait call (plus token refresh); no retries
// - No caching of zones, recordsets or instances between calls
// - No background tasks; the token is refreshed lazily on use
//
// ## Security
//
// - The Keystone password and the session token NEVER appear in logs
// - Debug implementations redact both

mod designate;
mod http;
mod keystone;
mod nova;

pub use designate::DesignateDns;
pub use keystone::{KeystoneSession, Service};
pub use nova::NovaCompute;

use dnsink_core::{Error, Result};
use serde::Deserialize;

/// Keystone credentials and endpoint overrides
#[derive(Clone, Deserialize)]
pub struct OpenStackConfig {
    /// Identity v3 endpoint, e.g. `https://keystone.example.org:5000/v3`
    pub auth_url: String,

    pub username: String,

    /// ⚠️ NEVER log this value
    pub password: String,

    pub project_name: String,

    #[serde(default = "default_domain")]
    pub user_domain_name: String,

    #[serde(default = "default_domain")]
    pub project_domain_name: String,

    /// Restrict catalog endpoints to one region
    #[serde(default)]
    pub region_name: Option<String>,

    /// Designate endpoint; taken from the catalog when unset
    #[serde(default)]
    pub designate_endpoint: Option<String>,

    /// Nova endpoint; taken from the catalog when unset
    #[serde(default)]
    pub nova_endpoint: Option<String>,
}

fn default_domain() -> String {
    "Default".to_string()
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for OpenStackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenStackConfig")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("project_name", &self.project_name)
            .field("user_domain_name", &self.user_domain_name)
            .field("project_domain_name", &self.project_domain_name)
            .field("region_name", &self.region_name)
            .field("designate_endpoint", &self.designate_endpoint)
            .field("nova_endpoint", &self.nova_endpoint)
            .finish()
    }
}

impl OpenStackConfig {
    pub fn new(
        auth_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            auth_url: auth_url.into(),
            username: username.into(),
            password: password.into(),
            project_name: project_name.into(),
            user_domain_name: default_domain(),
            project_domain_name: default_domain(),
            region_name: None,
            designate_endpoint: None,
            nova_endpoint: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let urls = std::iter::once(Some(&self.auth_url))
            .chain([self.designate_endpoint.as_ref(), self.nova_endpoint.as_ref()])
            .flatten();
        for url in urls {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(Error::config(format!(
                    "OpenStack URL must use HTTP or HTTPS scheme. Got: {}",
                    url
                )));
            }
        }

        let required = [
            ("username", &self.username),
            ("password", &self.password),
            ("project name", &self.project_name),
            ("user domain name", &self.user_domain_name),
            ("project domain name", &self.project_domain_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::config(format!("OpenStack {} cannot be empty", field)));
            }
        }
        Ok(())
    }
}
