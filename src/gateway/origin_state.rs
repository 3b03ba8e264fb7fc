//! Runtime state of origins
//!
//! Health, in-flight request counts and circuit breakers live here rather
//! than in the config snapshot, so they survive snapshot rebuilds and can be
//! updated without touching the store.

use crate::domain::{Origin, OriginId};
use crate::gateway::circuit_breaker::{BreakerPolicy, CircuitBreaker};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct OriginRuntime {
    pub origin_id: OriginId,
    healthy: AtomicBool,
    in_flight: AtomicUsize,
    breaker: Arc<CircuitBreaker>,
}

impl OriginRuntime {
    fn new(origin: &Origin, policy: BreakerPolicy) -> Self {
        Self {
            origin_id: origin.id,
            healthy: AtomicBool::new(origin.is_healthy),
            in_flight: AtomicUsize::new(0),
            breaker: Arc::new(CircuitBreaker::new(origin.id, policy)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Returns the previous value
    pub fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::AcqRel)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Count a request against this origin until the guard is dropped
    pub fn track(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            runtime: Arc::clone(self),
        }
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    runtime: Arc<OriginRuntime>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.runtime.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Default)]
pub struct OriginRegistry {
    runtimes: RwLock<HashMap<OriginId, Arc<OriginRuntime>>>,
    policy: BreakerPolicy,
}

impl OriginRegistry {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            runtimes: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Runtime state for an origin, created from the record on first use
    pub fn runtime(&self, origin: &Origin) -> Arc<OriginRuntime> {
        if let Some(runtime) = self.runtimes.read().get(&origin.id) {
            return Arc::clone(runtime);
        }
        let mut runtimes = self.runtimes.write();
        Arc::clone(
            runtimes
                .entry(origin.id)
                .or_insert_with(|| Arc::new(OriginRuntime::new(origin, self.policy))),
        )
    }

    pub fn get(&self, id: OriginId) -> Option<Arc<OriginRuntime>> {
        self.runtimes.read().get(&id).cloned()
    }

    /// Forget origins that were deleted
    pub fn retain(&self, live: &HashSet<OriginId>) {
        self.runtimes.write().retain(|id, _| live.contains(id));
    }

    pub fn len(&self) -> usize {
        self.runtimes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
