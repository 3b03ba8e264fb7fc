//! Request extractors for the management API

use crate::admin::AdminState;
use crate::domain::TenantId;
use crate::gateway::auth::{Claims, ManagementAccess};
use crate::gateway::headers::bearer_token;
use crate::gateway::types::{GatewayError, GatewayResult};
use crate::infrastructure::log_messages::auth as messages;
use axum::{
    extract::{FromRequest, FromRequestParts, Path, Request},
    http::{request::Parts, Method},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::warn;
use uuid::Uuid;

/// Verified claims of any valid bearer token, whatever its scopes
#[derive(Debug, Clone)]
pub struct Authenticated(pub Claims);

impl FromRequestParts<AdminState> for Authenticated {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AdminState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            warn!(path = %parts.uri.path(), "{}", messages::MISSING_CREDENTIALS);
            return Err(GatewayError::Unauthorized("missing bearer token".into()));
        };
        let claims = state.context().jwt.verify(token).inspect_err(|e| {
            warn!(path = %parts.uri.path(), error = %e, "{}", messages::INVALID_JWT);
        })?;
        Ok(Self(claims))
    }
}

/// Authenticated management caller
///
/// Built from the `Authorization: Bearer` token; the `tenant_id` claim
/// scopes every read and write the caller makes. The token must carry a
/// management role, and only `owner` or `admin` may change anything.
#[derive(Debug, Clone)]
pub struct Caller {
    pub claims: Claims,
    pub access: ManagementAccess,
}

impl Caller {
    /// The caller's own tenant
    pub fn tenant(&self) -> GatewayResult<TenantId> {
        self.claims
            .tenant()
            .ok_or_else(|| GatewayError::Forbidden("token is not bound to a tenant".into()))
    }

    /// The caller's tenant, provided it is the one named in the path
    pub fn tenant_matching(&self, requested: TenantId) -> GatewayResult<TenantId> {
        let own = self.tenant()?;
        if own != requested {
            return Err(GatewayError::Forbidden(
                "cannot access another tenant's resources".into(),
            ));
        }
        Ok(own)
    }

    /// Reject the call unless the granted access covers `method`
    fn permit(claims: Claims, method: &Method) -> GatewayResult<Self> {
        let access = claims.management_access().ok_or_else(|| {
            GatewayError::Forbidden("token does not grant management access".into())
        })?;
        let read_only = matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS);
        if access == ManagementAccess::ReadOnly && !read_only {
            return Err(GatewayError::Forbidden(
                "token grants read-only management access".into(),
            ));
        }
        Ok(Self { claims, access })
    }
}

impl FromRequestParts<AdminState> for Caller {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AdminState,
    ) -> Result<Self, Self::Rejection> {
        let Authenticated(claims) = Authenticated::from_request_parts(parts, state).await?;
        let subject = claims.sub.clone();
        Self::permit(claims, &parts.method).inspect_err(|e| {
            warn!(
                path = %parts.uri.path(),
                method = %parts.method,
                sub = %subject,
                error = %e,
                "{}",
                messages::INSUFFICIENT_SCOPE
            );
        })
    }
}

/// Record id taken from the last path parameter
///
/// A malformed id cannot name any record, so it is reported as not found.
#[derive(Debug, Clone, Copy)]
pub struct RecordId(pub Uuid);

impl<S> FromRequestParts<S> for RecordId
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| GatewayError::not_found("Resource"))?;
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| GatewayError::not_found("Resource"))
    }
}

/// JSON request body whose rejections use the standard error format
#[derive(Debug, Clone)]
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = GatewayError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(request, state)
            .await
            .map(|Json(value)| Self(value))
            .map_err(|rejection| GatewayError::config(rejection.body_text()))
    }
}
