//! `cache_key_pattern` templates
//!
//! Supported placeholders: `{tenant}`, `{route}`, `{method}`, `{path}`,
//! `{query}` and `{header:<name>}`. Everything else is copied literally.

use crate::domain::identifiers::{RouteId, TenantId};
use crate::domain::types::ValidationError;
use http::HeaderMap;

const FIELD: &str = "cache_key_pattern";
const HEADER_PREFIX: &str = "header:";

#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyPart {
    Literal(String),
    Tenant,
    Route,
    Method,
    Path,
    Query,
    Header(String),
}

/// Request attributes a cache key can be built from
#[derive(Debug, Clone, Copy)]
pub struct CacheKeyContext<'a> {
    pub tenant_id: TenantId,
    pub route_id: RouteId,
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub headers: &'a HeaderMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyTemplate {
    parts: Vec<KeyPart>,
}

impl CacheKeyTemplate {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.trim().is_empty() {
            return Err(ValidationError::new(FIELD, "must not be empty"));
        }

        let mut parts = Vec::new();
        let mut rest = raw;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                parts.push(KeyPart::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| ValidationError::new(FIELD, "unclosed '{' placeholder"))?;
            parts.push(Self::placeholder(&after[..close])?);
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            parts.push(KeyPart::Literal(rest.to_string()));
        }

        Ok(Self { parts })
    }

    fn placeholder(name: &str) -> Result<KeyPart, ValidationError> {
        match name {
            "tenant" => Ok(KeyPart::Tenant),
            "route" => Ok(KeyPart::Route),
            "method" => Ok(KeyPart::Method),
            "path" => Ok(KeyPart::Path),
            "query" => Ok(KeyPart::Query),
            other => match other.strip_prefix(HEADER_PREFIX) {
                Some(header) if !header.trim().is_empty() => {
                    Ok(KeyPart::Header(header.trim().to_ascii_lowercase()))
                }
                _ => Err(ValidationError::new(
                    FIELD,
                    format!("unknown placeholder '{{{other}}}'"),
                )),
            },
        }
    }

    pub fn render(&self, ctx: &CacheKeyContext<'_>) -> String {
        let mut key = String::with_capacity(64);
        for part in &self.parts {
            match part {
                KeyPart::Literal(text) => key.push_str(text),
                KeyPart::Tenant => key.push_str(&ctx.tenant_id.to_string()),
                KeyPart::Route => key.push_str(&ctx.route_id.to_string()),
                KeyPart::Method => key.push_str(ctx.method),
                KeyPart::Path => key.push_str(ctx.path),
                KeyPart::Query => key.push_str(ctx.query),
                KeyPart::Header(name) => {
                    let values = ctx
                        .headers
                        .get_all(name.as_str())
                        .iter()
                        .filter_map(|v| v.to_str().ok())
                        .collect::<Vec<_>>()
                        .join(",");
                    key.push_str(&values);
                }
            }
        }
        key
    }
}
