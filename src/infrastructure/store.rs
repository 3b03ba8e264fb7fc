//! In-memory configuration store
//!
//! Holds every tenant, origin, route and API key. Management writes go
//! through a single write lock; after each successful mutation a fresh
//! [`GatewaySnapshot`] is published and subscribers are notified through a
//! `watch` channel carrying the new version.

use crate::domain::{
    ApiKey, ApiKeyEntry, ApiKeyId, IssuedApiKey, NewApiKey, NewOrigin, NewRoute, NewTenant,
    Origin, OriginId, Route, RouteId, Tenant, TenantId, TenantStatus,
};
use crate::gateway::snapshot::GatewaySnapshot;
use crate::gateway::types::{GatewayError, GatewayResult};
use crate::infrastructure::log_messages::store as messages;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct StoreState {
    version: u64,
    tenants: BTreeMap<TenantId, Tenant>,
    origins: BTreeMap<OriginId, Origin>,
    routes: BTreeMap<RouteId, Route>,
    api_keys: BTreeMap<ApiKeyId, Arc<ApiKeyEntry>>,
}

impl StoreState {
    fn live_tenant(&self, id: TenantId) -> GatewayResult<&Tenant> {
        self.tenants
            .get(&id)
            .filter(|t| t.status != TenantStatus::Deleted)
            .ok_or_else(|| GatewayError::not_found("Tenant"))
    }

    fn origin_of(&self, tenant_id: TenantId, id: OriginId) -> GatewayResult<&Origin> {
        self.origins
            .get(&id)
            .filter(|o| o.tenant_id == tenant_id)
            .ok_or_else(|| GatewayError::not_found("Origin"))
    }

    fn route_of(&self, tenant_id: TenantId, id: RouteId) -> GatewayResult<&Route> {
        self.routes
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or_else(|| GatewayError::not_found("Route"))
    }

    fn api_key_of(&self, tenant_id: TenantId, id: ApiKeyId) -> GatewayResult<&Arc<ApiKeyEntry>> {
        self.api_keys
            .get(&id)
            .filter(|k| k.record().tenant_id == tenant_id)
            .ok_or_else(|| GatewayError::not_found("API key"))
    }

    /// Every origin of the pool must exist and belong to the route's tenant
    fn check_pool(&self, route: &Route) -> GatewayResult<()> {
        for origin_id in route.pool() {
            if self.origin_of(route.tenant_id, origin_id).is_err() {
                return Err(GatewayError::config(format!(
                    "origin {origin_id} does not exist for this tenant"
                )));
            }
        }
        Ok(())
    }

    fn check_subdomain_free(&self, tenant: &Tenant) -> GatewayResult<()> {
        let taken = self
            .tenants
            .values()
            .filter(|t| t.status != TenantStatus::Deleted)
            .any(|t| t.id != tenant.id && t.subdomain == tenant.subdomain);
        if taken {
            Err(GatewayError::config(format!(
                "subdomain '{}' is already taken",
                tenant.subdomain
            )))
        } else {
            Ok(())
        }
    }

    fn snapshot(&self) -> GatewaySnapshot {
        GatewaySnapshot::build(
            self.version,
            self.tenants.values(),
            self.origins.values(),
            self.routes.values(),
            self.api_keys.values(),
        )
    }
}

/// Thread-safe configuration store with snapshot publication
pub struct ConfigStore {
    state: RwLock<StoreState>,
    snapshot: ArcSwap<GatewaySnapshot>,
    changes: watch::Sender<u64>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: RwLock::new(StoreState::default()),
            snapshot: ArcSwap::from_pointee(GatewaySnapshot::default()),
            changes,
        }
    }

    /// A store preloaded with `seed`, validated like management writes
    pub fn from_seed(seed: StoreSeed) -> GatewayResult<Self> {
        let store = Self::new();
        store.apply_seed(seed)?;
        Ok(store)
    }

    /// The configuration version currently served
    pub fn snapshot(&self) -> Arc<GatewaySnapshot> {
        self.snapshot.load_full()
    }

    /// Receive the store version after every change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Run `change` under the write lock and publish a new snapshot on success
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut StoreState) -> GatewayResult<T>,
    ) -> GatewayResult<T> {
        let mut state = self.state.write();
        let result = change(&mut state)?;
        state.version += 1;
        self.snapshot.store(Arc::new(state.snapshot()));
        let version = state.version;
        drop(state);
        self.changes.send_replace(version);
        debug!(version, "{}", messages::SNAPSHOT_PUBLISHED);
        Ok(result)
    }

    // ---- tenants ----

    pub fn create_tenant(&self, id: TenantId, new: NewTenant) -> GatewayResult<Tenant> {
        let tenant = Tenant::create(id, new)?;
        self.mutate(|state| {
            if state.tenants.contains_key(&tenant.id) {
                return Err(GatewayError::config("tenant already exists"));
            }
            state.check_subdomain_free(&tenant)?;
            state.tenants.insert(tenant.id, tenant.clone());
            Ok(())
        })?;
        info!(tenant_id = %tenant.id, subdomain = %tenant.subdomain, "{}", messages::TENANT_CREATED);
        Ok(tenant)
    }

    pub fn get_tenant(&self, id: TenantId) -> GatewayResult<Tenant> {
        self.state.read().live_tenant(id).cloned()
    }

    pub fn update_tenant(&self, id: TenantId, patch: &Value) -> GatewayResult<Tenant> {
        self.mutate(|state| {
            let updated = state.live_tenant(id)?.patched(patch)?;
            state.check_subdomain_free(&updated)?;
            state.tenants.insert(id, updated.clone());
            Ok(updated)
        })
    }

    /// Soft-delete the tenant and drop everything it owns
    pub fn delete_tenant(&self, id: TenantId) -> GatewayResult<Tenant> {
        let tenant = self.mutate(|state| {
            let mut tenant = state.live_tenant(id)?.clone();
            tenant.mark_deleted();
            state.routes.retain(|_, r| r.tenant_id != id);
            state.origins.retain(|_, o| o.tenant_id != id);
            state.api_keys.retain(|_, k| k.record().tenant_id != id);
            state.tenants.insert(id, tenant.clone());
            Ok(tenant)
        })?;
        info!(tenant_id = %id, "{}", messages::TENANT_DELETED);
        Ok(tenant)
    }

    // ---- origins ----

    pub fn list_origins(&self, tenant_id: TenantId) -> Vec<Origin> {
        self.state
            .read()
            .origins
            .values()
            .filter(|o| o.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn get_origin(&self, tenant_id: TenantId, id: OriginId) -> GatewayResult<Origin> {
        self.state.read().origin_of(tenant_id, id).cloned()
    }

    pub fn create_origin(&self, tenant_id: TenantId, new: NewOrigin) -> GatewayResult<Origin> {
        let origin = Origin::create(tenant_id, new)?;
        self.insert_origin(origin)
    }

    fn insert_origin(&self, origin: Origin) -> GatewayResult<Origin> {
        self.mutate(|state| {
            state.live_tenant(origin.tenant_id)?;
            if state.origins.contains_key(&origin.id) {
                return Err(GatewayError::config("origin already exists"));
            }
            state.origins.insert(origin.id, origin.clone());
            Ok(())
        })?;
        info!(tenant_id = %origin.tenant_id, origin_id = %origin.id, url = %origin.url, "{}", messages::ORIGIN_CREATED);
        Ok(origin)
    }

    pub fn update_origin(
        &self,
        tenant_id: TenantId,
        id: OriginId,
        patch: &Value,
    ) -> GatewayResult<Origin> {
        self.mutate(|state| {
            let updated = state.origin_of(tenant_id, id)?.patched(patch)?;
            state.origins.insert(id, updated.clone());
            Ok(updated)
        })
    }

    /// Origins still referenced by a route cannot be deleted
    pub fn delete_origin(&self, tenant_id: TenantId, id: OriginId) -> GatewayResult<Origin> {
        self.mutate(|state| {
            state.origin_of(tenant_id, id)?;
            if let Some(route) = state.routes.values().find(|r| r.references(id)) {
                return Err(GatewayError::config(format!(
                    "origin is still used by route '{}'",
                    route.name
                )));
            }
            state
                .origins
                .remove(&id)
                .ok_or_else(|| GatewayError::not_found("Origin"))
        })
    }

    /// Record a probe outcome; does not republish the snapshot
    pub fn record_health(&self, id: OriginId, healthy: bool, at: DateTime<Utc>) {
        if let Some(origin) = self.state.write().origins.get_mut(&id) {
            origin.is_healthy = healthy;
            origin.last_health_check = Some(at);
        }
    }

    // ---- routes ----

    pub fn list_routes(&self, tenant_id: TenantId) -> Vec<Route> {
        let mut routes: Vec<Route> = self
            .state
            .read()
            .routes
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        routes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        routes
    }

    pub fn get_route(&self, tenant_id: TenantId, id: RouteId) -> GatewayResult<Route> {
        self.state.read().route_of(tenant_id, id).cloned()
    }

    pub fn create_route(&self, tenant_id: TenantId, new: NewRoute) -> GatewayResult<Route> {
        let route = Route::create(tenant_id, new)?;
        self.insert_route(route)
    }

    fn insert_route(&self, route: Route) -> GatewayResult<Route> {
        self.mutate(|state| {
            state.live_tenant(route.tenant_id)?;
            state.check_pool(&route)?;
            if state.routes.contains_key(&route.id) {
                return Err(GatewayError::config("route already exists"));
            }
            state.routes.insert(route.id, route.clone());
            Ok(())
        })?;
        info!(tenant_id = %route.tenant_id, route_id = %route.id, pattern = %route.path_pattern, "{}", messages::ROUTE_CREATED);
        Ok(route)
    }

    pub fn update_route(
        &self,
        tenant_id: TenantId,
        id: RouteId,
        patch: &Value,
    ) -> GatewayResult<Route> {
        self.mutate(|state| {
            let updated = state.route_of(tenant_id, id)?.patched(patch)?;
            state.check_pool(&updated)?;
            state.routes.insert(id, updated.clone());
            Ok(updated)
        })
    }

    pub fn delete_route(&self, tenant_id: TenantId, id: RouteId) -> GatewayResult<Route> {
        self.mutate(|state| {
            state.route_of(tenant_id, id)?;
            state
                .routes
                .remove(&id)
                .ok_or_else(|| GatewayError::not_found("Route"))
        })
    }

    // ---- API keys ----

    pub fn list_api_keys(&self, tenant_id: TenantId) -> Vec<ApiKey> {
        self.state
            .read()
            .api_keys
            .values()
            .filter(|k| k.record().tenant_id == tenant_id)
            .map(|k| k.to_record())
            .collect()
    }

    pub fn get_api_key(&self, tenant_id: TenantId, id: ApiKeyId) -> GatewayResult<ApiKey> {
        self.state
            .read()
            .api_key_of(tenant_id, id)
            .map(|k| k.to_record())
    }

    /// Issue a new key; the returned secret is never stored
    pub fn create_api_key(
        &self,
        tenant_id: TenantId,
        new: NewApiKey,
    ) -> GatewayResult<IssuedApiKey> {
        let issued = ApiKey::issue(tenant_id, new)?;
        self.insert_api_key(issued.api_key.clone())?;
        Ok(issued)
    }

    fn insert_api_key(&self, api_key: ApiKey) -> GatewayResult<()> {
        self.mutate(|state| {
            state.live_tenant(api_key.tenant_id)?;
            if state
                .api_keys
                .values()
                .any(|k| k.record().key_hash == api_key.key_hash)
            {
                return Err(GatewayError::config("API key already exists"));
            }
            info!(tenant_id = %api_key.tenant_id, key_prefix = %api_key.key_prefix, "{}", messages::API_KEY_CREATED);
            state
                .api_keys
                .insert(api_key.id, Arc::new(ApiKeyEntry::new(api_key)));
            Ok(())
        })
    }

    pub fn delete_api_key(&self, tenant_id: TenantId, id: ApiKeyId) -> GatewayResult<ApiKey> {
        self.mutate(|state| {
            state.api_key_of(tenant_id, id)?;
            state
                .api_keys
                .remove(&id)
                .map(|k| k.to_record())
                .ok_or_else(|| GatewayError::not_found("API key"))
        })
    }

    // ---- seeding ----

    fn apply_seed(&self, seed: StoreSeed) -> GatewayResult<()> {
        let counts = (
            seed.tenants.len(),
            seed.origins.len(),
            seed.routes.len(),
            seed.api_keys.len(),
        );
        for tenant in seed.tenants {
            let status = tenant.status;
            let created = self.create_tenant(tenant.id, tenant.tenant)?;
            if status != TenantStatus::Active {
                self.update_tenant(created.id, &serde_json::json!({ "status": status }))?;
            }
        }
        for origin in seed.origins {
            let mut record = Origin::create(origin.tenant_id, origin.origin)?;
            record.id = origin.id;
            self.insert_origin(record)?;
        }
        for route in seed.routes {
            let mut record = Route::create(route.tenant_id, route.route)?;
            record.id = route.id;
            self.insert_route(record)?;
        }
        for key in seed.api_keys {
            let record = ApiKey::create(key.tenant_id, key.api_key, &key.secret)?;
            self.insert_api_key(record)?;
        }
        info!(
            tenants = counts.0,
            origins = counts.1,
            routes = counts.2,
            api_keys = counts.3,
            "{}",
            messages::SEED_LOADED
        );
        Ok(())
    }
}

/// Initial configuration loaded from `store.seed_file`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreSeed {
    pub tenants: Vec<SeedTenant>,
    pub origins: Vec<SeedOrigin>,
    pub routes: Vec<SeedRoute>,
    pub api_keys: Vec<SeedApiKey>,
}

#[derive(Debug, Deserialize)]
pub struct SeedTenant {
    pub id: TenantId,
    #[serde(default)]
    pub status: TenantStatus,
    #[serde(flatten)]
    pub tenant: NewTenant,
}

#[derive(Debug, Deserialize)]
pub struct SeedOrigin {
    pub id: OriginId,
    pub tenant_id: TenantId,
    #[serde(flatten)]
    pub origin: NewOrigin,
}

#[derive(Debug, Deserialize)]
pub struct SeedRoute {
    pub id: RouteId,
    pub tenant_id: TenantId,
    #[serde(flatten)]
    pub route: NewRoute,
}

/// A key whose secret is known ahead of time
#[derive(Debug, Deserialize)]
pub struct SeedApiKey {
    pub tenant_id: TenantId,
    pub secret: String,
    #[serde(flatten)]
    pub api_key: NewApiKey,
}

impl StoreSeed {
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api_key::{generate_secret, hash_secret};
    use serde_json::json;
    use std::io::Write;

    fn store_with_tenant() -> (ConfigStore, TenantId) {
        let store = ConfigStore::new();
        let id = TenantId::generate();
        store
            .create_tenant(
                id,
                NewTenant {
                    name: "Acme".into(),
                    subdomain: None,
                    settings: None,
                },
            )
            .unwrap();
        (store, id)
    }

    #[test]
    fn mutations_publish_new_snapshots() {
        let (store, tenant) = store_with_tenant();
        let before = store.snapshot().version();
        let mut rx = store.subscribe();
        let origin = store
            .create_origin(tenant, NewOrigin::new("o", "http://o"))
            .unwrap();
        let snapshot = store.snapshot();
        assert!(snapshot.version() > before);
        assert!(snapshot.origin(origin.id).is_some());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), snapshot.version());
    }

    #[test]
    fn failed_mutations_do_not_bump_version() {
        let (store, tenant) = store_with_tenant();
        let version = store.version();
        let err = store
            .create_route(tenant, NewRoute::new("r", "/r", OriginId::generate()))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
        assert_eq!(store.version(), version);
    }

    #[test]
    fn records_are_tenant_scoped() {
        let (store, tenant) = store_with_tenant();
        let other_store_tenant = TenantId::generate();
        store
            .create_tenant(
                other_store_tenant,
                NewTenant {
                    name: "Globex".into(),
                    subdomain: None,
                    settings: None,
                },
            )
            .unwrap();
        let origin = store
            .create_origin(tenant, NewOrigin::new("o", "http://o"))
            .unwrap();

        assert!(matches!(
            store.get_origin(other_store_tenant, origin.id),
            Err(GatewayError::NotFound(_))
        ));
        assert!(store.list_origins(other_store_tenant).is_empty());
        let foreign = store.create_route(
            other_store_tenant,
            NewRoute::new("r", "/r", origin.id),
        );
        assert!(matches!(foreign, Err(GatewayError::Config(_))));
    }

    #[test]
    fn referenced_origins_cannot_be_deleted() {
        let (store, tenant) = store_with_tenant();
        let origin = store
            .create_origin(tenant, NewOrigin::new("o", "http://o"))
            .unwrap();
        let route = store
            .create_route(tenant, NewRoute::new("r", "/r", origin.id))
            .unwrap();
        assert!(matches!(
            store.delete_origin(tenant, origin.id),
            Err(GatewayError::Config(_))
        ));
        store.delete_route(tenant, route.id).unwrap();
        store.delete_origin(tenant, origin.id).unwrap();
    }

    #[test]
    fn duplicate_subdomains_are_rejected() {
        let (store, _) = store_with_tenant();
        let result = store.create_tenant(
            TenantId::generate(),
            NewTenant {
                name: "Other".into(),
                subdomain: Some("acme".into()),
                settings: None,
            },
        );
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[test]
    fn tenant_delete_cascades() {
        let (store, tenant) = store_with_tenant();
        let origin = store
            .create_origin(tenant, NewOrigin::new("o", "http://o"))
            .unwrap();
        store
            .create_route(tenant, NewRoute::new("r", "/r", origin.id))
            .unwrap();
        store
            .create_api_key(
                tenant,
                NewApiKey {
                    name: "k".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        let deleted = store.delete_tenant(tenant).unwrap();
        assert_eq!(deleted.status, TenantStatus::Deleted);
        assert!(store.list_origins(tenant).is_empty());
        assert!(store.list_routes(tenant).is_empty());
        assert!(store.list_api_keys(tenant).is_empty());
        assert!(matches!(
            store.get_tenant(tenant),
            Err(GatewayError::NotFound(_))
        ));
        assert!(store
            .create_origin(tenant, NewOrigin::new("o", "http://o"))
            .is_err());
    }

    #[test]
    fn api_key_usage_survives_snapshot_rebuilds() {
        let (store, tenant) = store_with_tenant();
        let issued = store
            .create_api_key(
                tenant,
                NewApiKey {
                    name: "k".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let snapshot = store.snapshot();
        let entry = snapshot
            .api_key_by_hash(&hash_secret(&issued.key))
            .unwrap();
        entry.record_use(Utc::now());

        store
            .create_origin(tenant, NewOrigin::new("o", "http://o"))
            .unwrap();
        let listed = store.get_api_key(tenant, issued.api_key.id).unwrap();
        assert_eq!(listed.usage_count, 1);
        assert!(listed.last_used_at.is_some());
    }

    #[test]
    fn health_updates_are_visible_to_reads() {
        let (store, tenant) = store_with_tenant();
        let origin = store
            .create_origin(tenant, NewOrigin::new("o", "http://o"))
            .unwrap();
        let version = store.version();
        store.record_health(origin.id, false, Utc::now());
        let read = store.get_origin(tenant, origin.id).unwrap();
        assert!(!read.is_healthy);
        assert!(read.last_health_check.is_some());
        assert_eq!(store.version(), version);
    }

    #[test]
    fn seed_file_loads_all_record_kinds() {
        let tenant_id = TenantId::generate();
        let origin_id = OriginId::generate();
        let route_id = RouteId::generate();
        let secret = generate_secret();
        let seed = json!({
            "tenants": [{"id": tenant_id, "name": "Acme"}],
            "origins": [{"id": origin_id, "tenant_id": tenant_id, "name": "o", "url": "http://127.0.0.1:9000", "weight": 2}],
            "routes": [{"id": route_id, "tenant_id": tenant_id, "origin_id": origin_id, "name": "r", "path_pattern": "/api/**", "methods": ["ANY"]}],
            "api_keys": [{"tenant_id": tenant_id, "secret": secret, "name": "ci", "scopes": ["read", "write"]}]
        });
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(seed.to_string().as_bytes()).unwrap();

        let store = ConfigStore::from_seed(StoreSeed::from_file(file.path()).unwrap()).unwrap();
        assert_eq!(store.get_origin(tenant_id, origin_id).unwrap().weight.into_inner(), 2);
        assert_eq!(store.get_route(tenant_id, route_id).unwrap().methods, vec!["ANY"]);
        let snapshot = store.snapshot();
        assert!(snapshot.api_key_by_hash(&hash_secret(&secret)).is_some());
        assert!(snapshot.tenant_by_subdomain("acme").is_some());
    }

    #[test]
    fn seed_with_bad_secret_is_rejected() {
        let tenant_id = TenantId::generate();
        let seed: StoreSeed = serde_json::from_value(json!({
            "tenants": [{"id": tenant_id, "name": "Acme"}],
            "api_keys": [{"tenant_id": tenant_id, "secret": "plaintext", "name": "ci"}]
        }))
        .unwrap();
        assert!(ConfigStore::from_seed(seed).is_err());
    }
}
