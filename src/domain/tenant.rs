use crate::domain::identifiers::TenantId;
use crate::domain::patch::{merge_patch, require_object};
use crate::domain::types::{require_name, Subdomain, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    #[default]
    Active,
    Suspended,
    Deleted,
}

/// An isolated customer account owning origins, routes and API keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub subdomain: Subdomain,
    #[serde(default)]
    pub status: TenantStatus,
    #[serde(default = "empty_object")]
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sign-up payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewTenant {
    pub name: String,
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub settings: Option<Value>,
}

const PROTECTED_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

impl Tenant {
    pub fn create(id: TenantId, new: NewTenant) -> Result<Self, ValidationError> {
        let name = require_name("name", &new.name)?;
        let subdomain = match new.subdomain {
            Some(raw) => Subdomain::try_new(raw)
                .map_err(|e| ValidationError::new("subdomain", e.to_string()))?,
            None => Subdomain::derive_from(&name)?,
        };
        let settings = new.settings.unwrap_or_else(empty_object);
        require_object("settings", &settings)?;

        let now = Utc::now();
        Ok(Self {
            id,
            name,
            subdomain,
            status: TenantStatus::Active,
            settings,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn patched(&self, patch: &Value) -> Result<Self, ValidationError> {
        let mut updated = merge_patch(self, patch, PROTECTED_FIELDS)?;
        updated.name = require_name("name", &updated.name)?;
        require_object("settings", &updated.settings)?;
        updated.updated_at = Utc::now();
        Ok(updated)
    }

    /// Only active tenants receive data-plane traffic
    pub fn is_serving(&self) -> bool {
        self.status == TenantStatus::Active
    }

    pub fn mark_deleted(&mut self) {
        self.status = TenantStatus::Deleted;
        self.updated_at = Utc::now();
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
