//! Request execution shared by the Designate and Nova adapters

use dnsink_core::{Error, Result};
use reqwest::{RequestBuilder, Response, StatusCode};

use crate::keystone::KeystoneSession;

/// Send an authorized request and map the status to the core error taxonomy
///
/// A 401 drops the cached token so the next call re-authenticates.
pub(crate) async fn execute(
    session: &KeystoneSession,
    service: &'static str,
    request: RequestBuilder,
    what: &str,
) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::backend(service, format!("HTTP request failed: {}", e)))?;

    if response.status() == StatusCode::UNAUTHORIZED {
        session.invalidate().await;
    }
    check_status(service, response, what).await
}

pub(crate) async fn check_status(service: &'static str, response: Response, what: &str) -> Result<Response> {
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
            "{} rejected the token or its permissions for {}. Status: {}",
            service, what, status
        )),
        404 => Error::not_found(format!("{}: {}", what, status)),
        409 => Error::conflict(format!("{}: {}", what, error_text)),
        429 => Error::backend(service, format!("Rate limit exceeded. Status: {}", status)),
        500..=599 => Error::backend(
            service,
            format!("Server error (transient): {} - {}", status, error_text),
        ),
        _ => Error::backend(service, format!("{} failed: {} - {}", what, status, error_text)),
    })
}

pub(crate) async fn parse<T: serde::de::DeserializeOwned>(
    service: &'static str,
    response: Response,
) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| Error::backend(service, format!("Failed to parse response: {}", e)))
}
