//! Immutable view of the configuration served by the data plane
//!
//! A snapshot is rebuilt from the store after every change and published
//! through an `ArcSwap`, so a request works against one consistent version
//! from route match to origin selection.

use crate::domain::{
    ApiKeyEntry, Origin, OriginId, Route, RouteId, Tenant, TenantId, TenantStatus,
};
use crate::gateway::matcher::{CompiledRoute, RouteTable};
use crate::gateway::rate_limiter::RatePolicy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::error;

/// A tenant and its compiled routes
#[derive(Debug)]
pub struct TenantView {
    pub tenant: Tenant,
    pub routes: RouteTable,
}

#[derive(Debug, Default)]
pub struct GatewaySnapshot {
    version: u64,
    tenants: HashMap<TenantId, Arc<TenantView>>,
    by_subdomain: HashMap<String, TenantId>,
    origins: HashMap<OriginId, Arc<Origin>>,
    api_keys: HashMap<String, Arc<ApiKeyEntry>>,
}

impl GatewaySnapshot {
    pub fn build<'a>(
        version: u64,
        tenants: impl IntoIterator<Item = &'a Tenant>,
        origins: impl IntoIterator<Item = &'a Origin>,
        routes: impl IntoIterator<Item = &'a Route>,
        api_keys: impl IntoIterator<Item = &'a Arc<ApiKeyEntry>>,
    ) -> Self {
        let mut compiled: HashMap<TenantId, Vec<CompiledRoute>> = HashMap::new();
        for route in routes {
            match CompiledRoute::compile(route.clone()) {
                Ok(c) => compiled.entry(route.tenant_id).or_default().push(c),
                Err(e) => error!(route_id = %route.id, error = %e, "Skipping uncompilable route"),
            }
        }

        let mut snapshot = Self {
            version,
            ..Self::default()
        };
        for tenant in tenants {
            let routes = RouteTable::build(compiled.remove(&tenant.id).unwrap_or_default());
            let subdomain = tenant.subdomain.as_ref().to_string();
            if tenant.status != TenantStatus::Deleted {
                snapshot.by_subdomain.insert(subdomain, tenant.id);
            } else {
                // a live tenant may have reused the subdomain
                snapshot.by_subdomain.entry(subdomain).or_insert(tenant.id);
            }
            snapshot.tenants.insert(
                tenant.id,
                Arc::new(TenantView {
                    tenant: tenant.clone(),
                    routes,
                }),
            );
        }
        snapshot.origins = origins
            .into_iter()
            .map(|o| (o.id, Arc::new(o.clone())))
            .collect();
        snapshot.api_keys = api_keys
            .into_iter()
            .map(|entry| (entry.record().key_hash.clone(), Arc::clone(entry)))
            .collect();
        snapshot
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn tenant(&self, id: TenantId) -> Option<&Arc<TenantView>> {
        self.tenants.get(&id)
    }

    pub fn tenant_by_subdomain(&self, subdomain: &str) -> Option<&Arc<TenantView>> {
        self.by_subdomain
            .get(&subdomain.to_ascii_lowercase())
            .and_then(|id| self.tenants.get(id))
    }

    pub fn origin(&self, id: OriginId) -> Option<&Arc<Origin>> {
        self.origins.get(&id)
    }

    pub fn origins(&self) -> impl Iterator<Item = &Arc<Origin>> {
        self.origins.values()
    }

    /// Ids of every compiled route, across tenants
    pub fn route_ids(&self) -> impl Iterator<Item = RouteId> + '_ {
        self.tenants
            .values()
            .flat_map(|view| view.routes.routes().map(|c| c.route.id))
    }

    /// Every (route, policy) pair a request could currently be limited under
    ///
    /// Covers each rate-limited route's own policy plus the override of every
    /// key of the route's tenant that carries one.
    pub fn rate_policies(&self) -> HashSet<(RouteId, RatePolicy)> {
        let mut overrides: HashMap<TenantId, Vec<&ApiKeyEntry>> = HashMap::new();
        for entry in self.api_keys.values() {
            if entry.record().rate_limit_override.is_some() {
                overrides
                    .entry(entry.record().tenant_id)
                    .or_default()
                    .push(entry.as_ref());
            }
        }
        let overrides = &overrides;

        self.tenants
            .values()
            .flat_map(|view| view.routes.routes().map(|c| Arc::clone(&c.route)))
            .filter(|route| route.rate_limit_enabled)
            .flat_map(move |route| {
                let keys = overrides
                    .get(&route.tenant_id)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                std::iter::once(RatePolicy::for_route(&route, None))
                    .chain(keys.iter().map(|key| RatePolicy::for_route(&route, Some(*key))))
                    .map(|policy| (route.id, policy))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Look up a key by the hex SHA-256 of its secret
    pub fn api_key_by_hash(&self, hash: &str) -> Option<&Arc<ApiKeyEntry>> {
        self.api_keys.get(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api_key::{generate_secret, hash_secret};
    use crate::domain::{ApiKey, NewApiKey, NewOrigin, NewRoute, NewTenant};
    use http::Method;

    #[test]
    fn snapshot_indexes_every_record_kind() {
        let tenant = Tenant::create(
            TenantId::generate(),
            NewTenant {
                name: "Acme".into(),
                subdomain: None,
                settings: None,
            },
        )
        .unwrap();
        let origin = Origin::create(tenant.id, NewOrigin::new("o", "http://o")).unwrap();
        let route = Route::create(tenant.id, NewRoute::new("r", "/r", origin.id)).unwrap();
        let secret = generate_secret();
        let key = ApiKey::create(
            tenant.id,
            NewApiKey {
                name: "k".into(),
                ..Default::default()
            },
            &secret,
        )
        .unwrap();
        let entry = Arc::new(ApiKeyEntry::new(key));

        let snapshot = GatewaySnapshot::build(
            7,
            [&tenant],
            [&origin],
            [&route],
            [&entry],
        );

        assert_eq!(snapshot.version(), 7);
        let view = snapshot.tenant_by_subdomain("ACME").unwrap();
        assert_eq!(view.tenant.id, tenant.id);
        assert!(view.routes.find(&Method::GET, "/r").is_some());
        assert!(snapshot.origin(origin.id).is_some());
        assert!(snapshot.api_key_by_hash(&hash_secret(&secret)).is_some());
    }
}
