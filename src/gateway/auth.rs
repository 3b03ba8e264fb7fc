//! Route authentication
//!
//! Provides:
//! - HS256 JWT verification (and issuing, for tooling and tests)
//! - API key verification against the published snapshot
//! - the per-route `auth_mode` decision

use crate::domain::api_key::{hash_secret, is_well_formed};
use crate::domain::{ApiKeyEntry, AuthMode, TenantId};
use crate::gateway::headers::{bearer_token, X_API_KEY};
use crate::gateway::snapshot::GatewaySnapshot;
use crate::gateway::types::{GatewayError, GatewayResult};
use crate::infrastructure::log_messages::auth as messages;
use chrono::Utc;
use http::HeaderMap;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Scopes recognised on management tokens
pub mod scopes {
    pub const OWNER: &str = "owner";
    pub const ADMIN: &str = "admin";
    pub const MEMBER: &str = "member";
    pub const VIEWER: &str = "viewer";
}

/// What a token may do through the management API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagementAccess {
    ReadOnly,
    Full,
}

/// JWT claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Tenant the token was issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl Claims {
    /// The tenant claim, if present and well formed
    pub fn tenant(&self) -> Option<TenantId> {
        self.tenant_id.as_deref().and_then(TenantId::parse)
    }

    /// A token scoped to another tenant (or with a garbled tenant claim) is refused
    pub fn permits_tenant(&self, tenant_id: TenantId) -> bool {
        match &self.tenant_id {
            None => true,
            Some(_) => self.tenant() == Some(tenant_id),
        }
    }

    /// `admin` implies every other scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope || s == scopes::ADMIN)
    }

    /// Management rights granted by the token's role scopes, if any
    ///
    /// Tokens minted for end users carry none of these and are refused.
    pub fn management_access(&self) -> Option<ManagementAccess> {
        if self.has_scope(scopes::OWNER) {
            Some(ManagementAccess::Full)
        } else if self.has_scope(scopes::MEMBER) || self.has_scope(scopes::VIEWER) {
            Some(ManagementAccess::ReadOnly)
        } else {
            None
        }
    }
}

/// JWT token manager
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
    token_ttl_secs: i64,
}

impl JwtVerifier {
    pub fn new(secret: &str, issuer: Option<String>, leeway_secs: u64, token_ttl_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        validation.set_required_spec_claims(&["exp"]);
        if let Some(iss) = &issuer {
            validation.set_issuer(&[iss.as_str()]);
        }
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
            token_ttl_secs: i64::try_from(token_ttl_secs).unwrap_or(i64::MAX),
        }
    }

    /// Validate and decode a JWT token
    pub fn verify(&self, token: &str) -> GatewayResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => GatewayError::Unauthorized("token expired".into()),
                _ => GatewayError::Unauthorized(format!("invalid token: {e}")),
            })
    }

    /// Generate a new JWT token
    pub fn issue(
        &self,
        sub: impl Into<String>,
        tenant_id: Option<TenantId>,
        scopes: Vec<String>,
    ) -> GatewayResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: sub.into(),
            tenant_id: tenant_id.map(|id| id.to_string()),
            exp: now.saturating_add(self.token_ttl_secs),
            iat: now,
            scopes,
            iss: self.issuer.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| GatewayError::Internal(format!("failed to sign token: {e}")))
    }
}

/// Credentials accepted for a request
#[derive(Debug, Default, Clone)]
pub struct AuthOutcome {
    pub claims: Option<Claims>,
    pub api_key: Option<Arc<ApiKeyEntry>>,
}

/// Applies a route's `auth_mode` to an inbound request
#[derive(Clone)]
pub struct AuthEnforcer {
    jwt: Arc<JwtVerifier>,
}

impl AuthEnforcer {
    pub fn new(jwt: Arc<JwtVerifier>) -> Self {
        Self { jwt }
    }

    pub fn authorize(
        &self,
        mode: AuthMode,
        tenant_id: TenantId,
        headers: &HeaderMap,
        snapshot: &GatewaySnapshot,
    ) -> GatewayResult<AuthOutcome> {
        let outcome = match mode {
            AuthMode::Public => AuthOutcome::default(),
            AuthMode::JwtRequired => AuthOutcome {
                claims: Some(self.verify_jwt(tenant_id, headers)?),
                api_key: None,
            },
            AuthMode::ApikeyRequired => AuthOutcome {
                claims: None,
                api_key: Some(self.verify_api_key(tenant_id, headers, snapshot)?),
            },
            AuthMode::Both => {
                let claims = self.verify_jwt(tenant_id, headers)?;
                let api_key = self.verify_api_key(tenant_id, headers, snapshot)?;
                AuthOutcome {
                    claims: Some(claims),
                    api_key: Some(api_key),
                }
            }
        };

        if let Some(entry) = &outcome.api_key {
            entry.record_use(Utc::now());
        }
        Ok(outcome)
    }

    fn verify_jwt(&self, tenant_id: TenantId, headers: &HeaderMap) -> GatewayResult<Claims> {
        let Some(token) = bearer_token(headers) else {
            warn!(tenant_id = %tenant_id, credential = "jwt", "{}", messages::MISSING_CREDENTIALS);
            return Err(GatewayError::Unauthorized("missing bearer token".into()));
        };
        let claims = self.jwt.verify(token).inspect_err(|e| {
            warn!(tenant_id = %tenant_id, reason = %e, "{}", messages::INVALID_JWT);
        })?;
        if !claims.permits_tenant(tenant_id) {
            warn!(tenant_id = %tenant_id, sub = %claims.sub, reason = "tenant mismatch", "{}", messages::INVALID_JWT);
            return Err(GatewayError::Unauthorized(
                "token issued for another tenant".into(),
            ));
        }
        Ok(claims)
    }

    fn verify_api_key(
        &self,
        tenant_id: TenantId,
        headers: &HeaderMap,
        snapshot: &GatewaySnapshot,
    ) -> GatewayResult<Arc<ApiKeyEntry>> {
        let reject = |reason: &'static str| {
            warn!(tenant_id = %tenant_id, reason, "{}", messages::INVALID_API_KEY);
            GatewayError::Unauthorized(reason.into())
        };

        let Some(secret) = headers.get(X_API_KEY).and_then(|h| h.to_str().ok()) else {
            warn!(tenant_id = %tenant_id, credential = "api_key", "{}", messages::MISSING_CREDENTIALS);
            return Err(GatewayError::Unauthorized("missing API key".into()));
        };
        let secret = secret.trim();
        if !is_well_formed(secret) {
            return Err(reject("malformed API key"));
        }
        let entry = snapshot
            .api_key_by_hash(&hash_secret(secret))
            .ok_or_else(|| reject("unknown API key"))?;
        let record = entry.record();
        if record.tenant_id != tenant_id {
            return Err(reject("API key belongs to another tenant"));
        }
        if !record.is_active {
            return Err(reject("API key revoked"));
        }
        if record.is_expired_at(Utc::now()) {
            return Err(reject("API key expired"));
        }
        Ok(Arc::clone(entry))
    }
}
