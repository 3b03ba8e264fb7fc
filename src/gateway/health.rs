//! Active origin health checking
//!
//! The [`HealthMonitor`] runs one probe task per origin and reconciles that
//! task set whenever the store publishes a new version. Each task probes
//! `GET <url><health_check_path>` on the origin's interval; enough
//! consecutive failures mark the origin unhealthy and a single success marks
//! it healthy again. Transitions are written to the runtime registry (read by
//! the balancer) and to the stored origin record.

use crate::domain::{Origin, OriginId};
use crate::gateway::origin_state::{OriginRegistry, OriginRuntime};
use crate::gateway::upstream::UpstreamClient;
use crate::infrastructure::log_messages::health as messages;
use crate::infrastructure::ConfigStore;
use async_trait::async_trait;
use axum::body::Body;
use chrono::Utc;
use futures_util::future::join_all;
use hyper::Request;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// A single health check against an origin
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` when the origin answered with a 2xx status
    async fn probe(&self, origin: &Origin) -> bool;
}

/// Probes over plain HTTP with the shared upstream client
#[derive(Clone, Default)]
pub struct HttpProbe {
    client: UpstreamClient,
}

impl HttpProbe {
    pub fn new(client: UpstreamClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, origin: &Origin) -> bool {
        let url = origin.health_check_url();
        let request = match Request::get(url.as_str()).body(Body::empty()) {
            Ok(request) => request,
            Err(e) => {
                warn!(origin_id = %origin.id, url = %url, error = %e, "Invalid health check URL");
                return false;
            }
        };
        match self.client.send(request, origin.probe_timeout()).await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(origin_id = %origin.id, error = %e, "Health probe failed");
                false
            }
        }
    }
}

/// Consecutive-failure bookkeeping for one origin
#[derive(Debug, Clone)]
pub struct HealthTracker {
    threshold: u32,
    consecutive_failures: u32,
    healthy: bool,
}

impl HealthTracker {
    pub fn new(healthy: bool, threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            healthy,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Record a probe result; returns the new health on a transition
    pub fn record(&mut self, success: bool) -> Option<bool> {
        if success {
            self.consecutive_failures = 0;
            if self.healthy {
                return None;
            }
            self.healthy = true;
            return Some(true);
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.healthy && self.consecutive_failures >= self.threshold {
            self.healthy = false;
            return Some(false);
        }
        None
    }
}

struct ProbeTask {
    fingerprint: (String, u64, u64, u32),
    // dropping the sender stops the task
    _stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct HealthMonitor {
    store: Arc<ConfigStore>,
    registry: Arc<OriginRegistry>,
    probe: Arc<dyn HealthProbe>,
    tasks: HashMap<OriginId, ProbeTask>,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<ConfigStore>,
        registry: Arc<OriginRegistry>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            store,
            registry,
            probe,
            tasks: HashMap::new(),
        }
    }

    /// Run until `shutdown` flips or its sender is dropped
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut changes = self.store.subscribe();
        self.reconcile();
        info!(origins = self.tasks.len(), "{}", messages::MONITOR_STARTED);

        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.reconcile();
                }
                _ = shutdown.changed() => break,
            }
        }

        join_all(self.tasks.drain().map(|(_, task)| task.handle)).await;
        info!("{}", messages::MONITOR_STOPPED);
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    fn reconcile(&mut self) {
        let snapshot = self.store.snapshot();
        let mut live: HashMap<OriginId, Arc<Origin>> = snapshot
            .origins()
            .map(|origin| (origin.id, Arc::clone(origin)))
            .collect();

        // stop tasks of deleted origins and of origins whose probe settings changed
        self.tasks.retain(|id, task| {
            live.get(id)
                .is_some_and(|origin| origin.probe_fingerprint() == task.fingerprint)
        });
        live.retain(|id, _| !self.tasks.contains_key(id));

        for origin in live.into_values() {
            let (stop_tx, stop_rx) = watch::channel(false);
            let runtime = self.registry.runtime(&origin);
            let handle = tokio::spawn(probe_loop(
                Arc::clone(&origin),
                runtime,
                Arc::clone(&self.store),
                Arc::clone(&self.probe),
                stop_rx,
            ));
            self.tasks.insert(
                origin.id,
                ProbeTask {
                    fingerprint: origin.probe_fingerprint(),
                    _stop: stop_tx,
                    handle,
                },
            );
        }
    }
}

async fn probe_loop(
    origin: Arc<Origin>,
    runtime: Arc<OriginRuntime>,
    store: Arc<ConfigStore>,
    probe: Arc<dyn HealthProbe>,
    mut stop: watch::Receiver<bool>,
) {
    debug!(origin_id = %origin.id, interval_secs = origin.health_check_interval, "{}", messages::PROBE_STARTED);
    let mut interval = tokio::time::interval(origin.probe_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = HealthTracker::new(runtime.is_healthy(), origin.failure_threshold());

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = interval.tick() => {}
        }
        let success = tokio::select! {
            _ = stop.changed() => break,
            outcome = tokio::time::timeout(origin.probe_timeout(), probe.probe(&origin)) => {
                outcome.unwrap_or(false)
            }
        };

        if let Some(healthy) = tracker.record(success) {
            runtime.set_healthy(healthy);
            if healthy {
                info!(origin_id = %origin.id, url = %origin.url, "{}", messages::ORIGIN_RECOVERED);
            } else {
                warn!(
                    origin_id = %origin.id,
                    url = %origin.url,
                    failures = origin.failure_threshold(),
                    "{}",
                    messages::ORIGIN_UNHEALTHY
                );
            }
        }
        store.record_health(origin.id, tracker.is_healthy(), Utc::now());
    }
    debug!(origin_id = %origin.id, "{}", messages::PROBE_STOPPED);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewOrigin, NewTenant, TenantId};
    use crate::gateway::circuit_breaker::BreakerPolicy;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedProbe {
        up: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, _origin: &Origin) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.up.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn tracker_flips_after_threshold_and_back_on_one_success() {
        let mut tracker = HealthTracker::new(true, 3);
        assert_eq!(tracker.record(false), None);
        assert_eq!(tracker.record(false), None);
        assert_eq!(tracker.record(false), Some(false));
        assert_eq!(tracker.record(false), None);
        assert_eq!(tracker.record(true), Some(true));
        assert_eq!(tracker.record(true), None);
    }

    #[test]
    fn tracker_resets_failures_on_success() {
        let mut tracker = HealthTracker::new(true, 2);
        tracker.record(false);
        tracker.record(true);
        assert_eq!(tracker.record(false), None);
        assert_eq!(tracker.record(false), Some(false));
    }

    #[test]
    fn zero_threshold_acts_as_one() {
        let mut tracker = HealthTracker::new(true, 0);
        assert_eq!(tracker.record(false), Some(false));
    }

    fn origin_for(url: String) -> Origin {
        Origin::create(TenantId::generate(), NewOrigin::new("o", url)).unwrap()
    }

    #[tokio::test]
    async fn http_probe_accepts_2xx_only() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/health")
            .with_status(204)
            .create_async()
            .await;
        let probe = HttpProbe::default();
        assert!(probe.probe(&origin_for(server.url())).await);
        ok.assert_async().await;

        let mut failing = mockito::Server::new_async().await;
        failing
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;
        assert!(!probe.probe(&origin_for(failing.url())).await);
    }

    #[tokio::test]
    async fn http_probe_uses_the_configured_path() {
        let mut server = mockito::Server::new_async().await;
        let status = server
            .mock("GET", "/status")
            .with_status(200)
            .create_async()
            .await;
        let mut origin = origin_for(server.url());
        origin.health_check_path = "/status".into();
        assert!(HttpProbe::default().probe(&origin).await);
        status.assert_async().await;
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_flips_origin_health_in_registry_and_store() {
        let store = Arc::new(ConfigStore::new());
        let tenant = store
            .create_tenant(
                TenantId::generate(),
                NewTenant {
                    name: "Acme".into(),
                    subdomain: None,
                    settings: None,
                },
            )
            .unwrap();
        let mut new = NewOrigin::new("api", "http://10.0.0.1");
        new.health_check_interval = 1;
        new.max_retries = 2;
        let origin = store.create_origin(tenant.id, new).unwrap();

        let registry = Arc::new(OriginRegistry::new(BreakerPolicy::default()));
        let probe = Arc::new(ScriptedProbe::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = HealthMonitor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&probe) as Arc<dyn HealthProbe>,
        )
        .spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(probe.calls.load(Ordering::SeqCst) >= 2);
        assert!(!registry.get(origin.id).unwrap().is_healthy());
        let stored = store.get_origin(tenant.id, origin.id).unwrap();
        assert!(!stored.is_healthy);
        assert!(stored.last_health_check.is_some());

        probe.up.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(registry.get(origin.id).unwrap().is_healthy());
        assert!(store.get_origin(tenant.id, origin.id).unwrap().is_healthy);

        shutdown_tx.send(true).unwrap();
        monitor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_stops_probing_deleted_origins() {
        let store = Arc::new(ConfigStore::new());
        let tenant = store
            .create_tenant(
                TenantId::generate(),
                NewTenant {
                    name: "Acme".into(),
                    subdomain: None,
                    settings: None,
                },
            )
            .unwrap();
        let mut new = NewOrigin::new("api", "http://10.0.0.1");
        new.health_check_interval = 1;
        let origin = store.create_origin(tenant.id, new).unwrap();

        let probe = Arc::new(ScriptedProbe::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _monitor = HealthMonitor::new(
            Arc::clone(&store),
            Arc::new(OriginRegistry::default()),
            Arc::clone(&probe) as Arc<dyn HealthProbe>,
        )
        .spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        store.delete_origin(tenant.id, origin.id).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let calls = probe.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
    }
}
