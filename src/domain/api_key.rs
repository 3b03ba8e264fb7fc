//! API key records and secret handling
//!
//! Secrets are shown to the caller exactly once. Only the SHA-256 digest
//! (hex) and a short display prefix are kept.

use crate::domain::identifiers::{ApiKeyId, TenantId};
use crate::domain::patch::require_object;
use crate::domain::tenant::empty_object;
use crate::domain::types::{require_name, ValidationError};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

pub const SECRET_PREFIX: &str = "ve_live_";
pub const SECRET_RANDOM_LEN: usize = 40;
pub const KEY_PREFIX_LEN: usize = 12;
pub const DEFAULT_SCOPE: &str = "read";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub user_id: Option<String>,
    pub name: String,
    pub key_prefix: String,
    #[serde(default, skip_serializing)]
    pub key_hash: String,
    pub scopes: Vec<String>,
    /// Requests per second replacing the route's limit
    #[serde(default)]
    pub rate_limit_override: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_count: u64,
    pub is_active: bool,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewApiKey {
    pub name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub rate_limit_override: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_expiry")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Creation response: the record plus the plaintext secret, returned once
#[derive(Debug, Clone, Serialize)]
pub struct IssuedApiKey {
    #[serde(flatten)]
    pub api_key: ApiKey,
    pub key: String,
}

impl ApiKey {
    /// Create a record for `secret`, which must already be well formed
    pub fn create(
        tenant_id: TenantId,
        new: NewApiKey,
        secret: &str,
    ) -> Result<Self, ValidationError> {
        if !is_well_formed(secret) {
            return Err(ValidationError::new("key", "malformed API key secret"));
        }
        let name = require_name("name", &new.name)?;
        let mut scopes: Vec<String> = Vec::new();
        for scope in new.scopes.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            if !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        if scopes.is_empty() {
            scopes.push(DEFAULT_SCOPE.to_string());
        }
        if new.rate_limit_override == Some(0) {
            return Err(ValidationError::new(
                "rate_limit_override",
                "must be greater than zero",
            ));
        }
        let metadata = new.metadata.unwrap_or_else(empty_object);
        require_object("metadata", &metadata)?;

        let now = Utc::now();
        Ok(Self {
            id: ApiKeyId::generate(),
            tenant_id,
            user_id: new.user_id,
            name,
            key_prefix: secret.chars().take(KEY_PREFIX_LEN).collect(),
            key_hash: hash_secret(secret),
            scopes,
            rate_limit_override: new.rate_limit_override,
            expires_at: new.expires_at,
            last_used_at: None,
            usage_count: 0,
            is_active: true,
            metadata,
            created_at: now,
            updated_at: now,
        })
    }

    /// Generate a fresh secret and the record describing it
    pub fn issue(tenant_id: TenantId, new: NewApiKey) -> Result<IssuedApiKey, ValidationError> {
        let secret = generate_secret();
        let api_key = Self::create(tenant_id, new, &secret)?;
        Ok(IssuedApiKey {
            api_key,
            key: secret,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired_at(now)
    }
}

pub fn generate_secret() -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{SECRET_PREFIX}{random}")
}

/// SHA-256 of the secret, lowercase hex
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// `ve_live_` followed by exactly 40 ASCII alphanumerics
pub fn is_well_formed(secret: &str) -> bool {
    secret.strip_prefix(SECRET_PREFIX).is_some_and(|random| {
        random.len() == SECRET_RANDOM_LEN && random.bytes().all(|b| b.is_ascii_alphanumeric())
    })
}

/// Accepts RFC 3339 timestamps or plain dates; a date expires at its last second
fn deserialize_expiry<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| Some(naive.and_utc()))
        .ok_or_else(|| serde::de::Error::custom(format!("invalid expires_at '{raw}'")))
}

/// A stored key plus its live usage counters
///
/// Counters are updated from the request path without taking the store
/// lock; [`ApiKeyEntry::to_record`] folds them back into the record view.
#[derive(Debug)]
pub struct ApiKeyEntry {
    record: ApiKey,
    usage_count: AtomicU64,
    last_used_at: Mutex<Option<DateTime<Utc>>>,
}

impl ApiKeyEntry {
    pub fn new(record: ApiKey) -> Self {
        Self {
            usage_count: AtomicU64::new(record.usage_count),
            last_used_at: Mutex::new(record.last_used_at),
            record,
        }
    }

    pub fn record(&self) -> &ApiKey {
        &self.record
    }

    pub fn record_use(&self, at: DateTime<Utc>) {
        self.usage_count.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last_used_at.lock();
        if last.is_none_or(|prev| prev < at) {
            *last = Some(at);
        }
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count.load(Ordering::Relaxed)
    }

    pub fn to_record(&self) -> ApiKey {
        let mut record = self.record.clone();
        record.usage_count = self.usage_count();
        record.last_used_at = *self.last_used_at.lock();
        record
    }
}
