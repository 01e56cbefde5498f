//! Hostname derivation from compute-platform metadata
//!
//! Instances are named after the numeric part of their platform-internal
//! name: `instance-0000002a` in zone `example.org.` becomes
//! `2a.example.org.`.

use crate::error::{Error, Result};
use crate::model::Instance;

/// Separator between the platform prefix and the numeric id
const SEPARATOR: char = '-';

/// Extract the numeric id from a platform-internal name
///
/// Everything up to and including the first separator is dropped and leading
/// zeros are stripped from the remainder. An all-zero remainder yields `0`.
pub fn numeric_id(internal_name: &str) -> Result<String> {
    let (_, suffix) = internal_name
        .split_once(SEPARATOR)
        .ok_or_else(|| Error::malformed(format!("no '{}' in instance name {:?}", SEPARATOR, internal_name)))?;

    if suffix.is_empty() {
        return Err(Error::malformed(format!(
            "empty id in instance name {:?}",
            internal_name
        )));
    }

    let trimmed = suffix.trim_start_matches('0');
    if trimmed.is_empty() {
        Ok("0".to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

/// Derive `{numeric-id}.{zone_name}` for an instance
///
/// # Returns
///
/// - `Err(Error::MalformedPayload)`: The instance has no internal name, or it
///   does not carry an id. Callers skip the DNS half of the event.
pub fn derive_hostname(instance: &Instance, zone_name: &str) -> Result<String> {
    let internal_name = instance
        .internal_name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::malformed(format!("instance {} has no internal name", instance.id)))?;

    Ok(format!("{}.{}", numeric_id(internal_name)?, zone_name))
}

/// Hostname as stored in instance metadata (no trailing dot)
pub fn metadata_hostname(hostname: &str) -> &str {
    hostname.strip_suffix('.').unwrap_or(hostname)
}

/// Absolute form of a name, as record names and PTR data require
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}
