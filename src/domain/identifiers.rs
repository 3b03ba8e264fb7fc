//! Identifiers for tenant-owned gateway records
//!
//! Every record is keyed by a UUID v7 newtype so that ids sort by creation
//! time and cannot be confused across record kinds.

use nutype::nutype;
use uuid::Uuid;

/// Unique identifier for a tenant
#[nutype(derive(
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
    Display,
    AsRef
))]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// Parse a tenant id from its hyphenated string form
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self::new)
    }
}

/// Unique identifier for an origin (backend service instance)
#[nutype(derive(
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
    Display,
    AsRef
))]
pub struct OriginId(Uuid);

impl OriginId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Unique identifier for a route
#[nutype(derive(
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
    Display,
    AsRef
))]
pub struct RouteId(Uuid);

impl RouteId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Unique identifier for an API key record
#[nutype(derive(
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
    Display,
    AsRef
))]
pub struct ApiKeyId(Uuid);

impl ApiKeyId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}
