use crate::domain::identifiers::{OriginId, TenantId};
use crate::domain::patch::{merge_patch, require_object};
use crate::domain::tenant::empty_object;
use crate::domain::types::{require_name, require_positive, OriginUrl, ValidationError, Weight};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Defaults applied when an origin is created without explicit values
pub mod defaults {
    pub const HEALTH_CHECK_PATH: &str = "/health";
    pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;
    pub const TIMEOUT_SECS: u64 = 5;
    pub const MAX_RETRIES: u32 = 3;
}

/// A backend service instance that routes forward to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub id: OriginId,
    pub tenant_id: TenantId,
    pub name: String,
    pub url: OriginUrl,
    pub health_check_path: String,
    /// Seconds between probes
    pub health_check_interval: u64,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    #[serde(default)]
    pub weight: Weight,
    pub is_healthy: bool,
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrigin {
    pub name: String,
    pub url: String,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

fn default_health_check_path() -> String {
    defaults::HEALTH_CHECK_PATH.to_string()
}

fn default_health_check_interval() -> u64 {
    defaults::HEALTH_CHECK_INTERVAL_SECS
}

fn default_timeout() -> u64 {
    defaults::TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    defaults::MAX_RETRIES
}

fn default_weight() -> u32 {
    1
}

impl NewOrigin {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            health_check_path: default_health_check_path(),
            health_check_interval: default_health_check_interval(),
            timeout_seconds: default_timeout(),
            max_retries: default_max_retries(),
            weight: default_weight(),
            metadata: empty_object(),
        }
    }
}

/// Fields a PATCH may never change, plus health state owned by the monitor
const PROTECTED_FIELDS: &[&str] = &[
    "id",
    "tenant_id",
    "created_at",
    "updated_at",
    "is_healthy",
    "last_health_check",
];

impl Origin {
    pub fn create(tenant_id: TenantId, new: NewOrigin) -> Result<Self, ValidationError> {
        let url =
            OriginUrl::try_new(new.url).map_err(|e| ValidationError::new("url", e.to_string()))?;
        let weight = Weight::try_new(new.weight)
            .map_err(|e| ValidationError::new("weight", e.to_string()))?;
        let now = Utc::now();
        let origin = Self {
            id: OriginId::generate(),
            tenant_id,
            name: new.name,
            url,
            health_check_path: new.health_check_path,
            health_check_interval: new.health_check_interval,
            timeout_seconds: new.timeout_seconds,
            max_retries: new.max_retries,
            weight,
            is_healthy: true,
            last_health_check: None,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };
        origin.validated()
    }

    pub fn patched(&self, patch: &Value) -> Result<Self, ValidationError> {
        let mut updated = merge_patch(self, patch, PROTECTED_FIELDS)?;
        updated.updated_at = Utc::now();
        updated.validated()
    }

    fn validated(mut self) -> Result<Self, ValidationError> {
        self.name = require_name("name", &self.name)?;
        let path = self.health_check_path.trim();
        self.health_check_path = if path.is_empty() {
            defaults::HEALTH_CHECK_PATH.to_string()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        require_positive("health_check_interval", self.health_check_interval)?;
        require_positive("timeout_seconds", self.timeout_seconds)?;
        require_object("metadata", &self.metadata)?;
        Ok(self)
    }

    /// Full URL probed by the health monitor
    pub fn health_check_url(&self) -> String {
        format!(
            "{}{}",
            self.url.as_ref().trim_end_matches('/'),
            self.health_check_path
        )
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Consecutive probe failures that mark the origin unhealthy
    pub fn failure_threshold(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Anything that changes how the origin is probed
    pub fn probe_fingerprint(&self) -> (String, u64, u64, u32) {
        (
            self.health_check_url(),
            self.health_check_interval,
            self.timeout_seconds,
            self.failure_threshold(),
        )
    }
}
