//! Background upkeep for runtime state
//!
//! The sweeper evicts expired cache entries and idle rate-limit keys on a
//! timer. The pruner follows store changes and releases per-origin and
//! per-route state for records that no longer exist.

use crate::domain::{OriginId, RouteId};
use crate::gateway::GatewayContext;
use crate::infrastructure::log_messages::maintenance as messages;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument};

/// Sweep periods; zero is clamped to one second
#[derive(Debug, Clone, Copy)]
pub struct SweepIntervals {
    pub cache: Duration,
    pub rate_limits: Duration,
}

impl Default for SweepIntervals {
    fn default() -> Self {
        Self {
            cache: Duration::from_secs(60),
            rate_limits: Duration::from_secs(60),
        }
    }
}

pub fn spawn_sweeper(
    context: GatewayContext,
    intervals: SweepIntervals,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_sweeper(context, intervals, shutdown))
}

#[instrument(skip_all)]
async fn run_sweeper(
    context: GatewayContext,
    intervals: SweepIntervals,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut cache_tick = interval(intervals.cache.max(Duration::from_secs(1)));
    let mut limit_tick = interval(intervals.rate_limits.max(Duration::from_secs(1)));
    cache_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    limit_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        cache_secs = intervals.cache.as_secs(),
        rate_limit_secs = intervals.rate_limits.as_secs(),
        "{}",
        messages::SWEEPER_STARTED
    );

    loop {
        tokio::select! {
            _ = cache_tick.tick() => {
                let evicted = context.cache.sweep();
                if evicted > 0 {
                    debug!(evicted, remaining = context.cache.len(), "{}", messages::CACHE_SWEPT);
                }
            }
            _ = limit_tick.tick() => {
                let tracked = context.rate_limiter.sweep();
                debug!(tracked_keys = tracked, "{}", messages::RATE_LIMITS_SWEPT);
            }
            _ = shutdown.changed() => break,
        }
    }
}

pub fn spawn_pruner(context: GatewayContext, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(run_pruner(context, shutdown))
}

#[instrument(skip_all)]
async fn run_pruner(context: GatewayContext, mut shutdown: watch::Receiver<bool>) {
    let mut changes = context.store.subscribe();
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                prune(&context);
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Drop runtime state of deleted origins and routes, and of stale rate policies
pub fn prune(context: &GatewayContext) {
    let snapshot = context.store.snapshot();
    let origins: HashSet<OriginId> = snapshot.origins().map(|o| o.id).collect();
    let routes: HashSet<RouteId> = snapshot.route_ids().collect();

    context.origins.retain(&origins);
    context.rate_limiter.retain_live(&snapshot.rate_policies());
    context.balancer.retain_routes(&routes);
    debug!(
        version = snapshot.version(),
        origins = origins.len(),
        routes = routes.len(),
        "Pruned runtime state"
    );
}
