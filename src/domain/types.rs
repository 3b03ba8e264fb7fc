//! Validated value types shared by gateway records
//!
//! These newtypes keep malformed configuration out of the store: anything
//! that deserializes or constructs successfully is safe for the data plane.

use nutype::nutype;
use thiserror::Error;

/// Load-balancing share of an origin. Always at least one.
#[nutype(
    validate(greater = 0),
    default = 1,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display,
        Default
    )
)]
pub struct Weight(u32);

/// DNS label identifying a tenant on the data plane (`<subdomain>.<base_domain>`)
#[nutype(
    sanitize(trim, lowercase),
    validate(regex = r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$"),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct Subdomain(String);

impl Subdomain {
    /// Derive a subdomain from a free-form tenant name
    pub fn derive_from(name: &str) -> Result<Self, ValidationError> {
        let mut label = String::with_capacity(name.len());
        for ch in name.trim().chars() {
            if ch.is_ascii_alphanumeric() {
                label.push(ch.to_ascii_lowercase());
            } else if !label.ends_with('-') && !label.is_empty() {
                label.push('-');
            }
        }
        let label: String = label.trim_end_matches('-').chars().take(63).collect();
        let label = label.trim_end_matches('-').to_string();
        Self::try_new(label).map_err(|e| ValidationError::new("subdomain", e.to_string()))
    }
}

/// Base URL of an origin. Only plain `http://` and `https://` are accepted.
#[nutype(
    sanitize(trim),
    validate(predicate = |s: &str| {
        (s.starts_with("http://") && s.len() > "http://".len())
            || (s.starts_with("https://") && s.len() > "https://".len())
    }),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct OriginUrl(String);

/// A rejected configuration value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Reject empty or whitespace-only names
pub(crate) fn require_name(field: &str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if trimmed.chars().count() > 255 {
        return Err(ValidationError::new(field, "must be at most 255 characters"));
    }
    Ok(trimmed.to_string())
}

/// Reject zero where a positive count or duration is required
pub(crate) fn require_positive(field: &str, value: u64) -> Result<u64, ValidationError> {
    if value == 0 {
        Err(ValidationError::new(field, "must be greater than zero"))
    } else {
        Ok(value)
    }
}
