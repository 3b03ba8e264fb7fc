//! Origin selection
//!
//! The pool of a route is filtered down to healthy origins whose breaker
//! admits traffic, then one origin is chosen by the route's strategy.

use crate::domain::{LoadBalancing, Origin, OriginId, Route, RouteId};
use crate::gateway::circuit_breaker::CircuitPermit;
use crate::gateway::origin_state::{InFlightGuard, OriginRuntime};
use crate::gateway::types::{GatewayError, GatewayResult};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

/// Virtual nodes per unit of weight on the hash ring
pub const VNODES_PER_WEIGHT: u32 = 40;

/// An origin of the route's pool with its runtime state
#[derive(Debug, Clone)]
pub struct Candidate {
    pub origin: Arc<Origin>,
    pub runtime: Arc<OriginRuntime>,
}

impl Candidate {
    fn weight(&self) -> u32 {
        self.origin.weight.into_inner()
    }
}

/// The chosen origin; holds its in-flight slot and breaker permit
#[derive(Debug)]
pub struct Selection {
    pub origin: Arc<Origin>,
    pub runtime: Arc<OriginRuntime>,
    pub permit: Option<CircuitPermit>,
    _in_flight: InFlightGuard,
}

/// Smooth weighted round-robin over (origin, weight) pairs
///
/// Every call adds each member's weight to its running score, picks the
/// highest score and subtracts the total weight from it. Over one cycle of
/// `sum(weights)` calls each member is picked exactly `weight` times.
#[derive(Debug, Default)]
pub struct SmoothWeighted {
    scores: HashMap<OriginId, i64>,
}

impl SmoothWeighted {
    pub fn next(&mut self, members: &[(OriginId, u32)]) -> Option<OriginId> {
        let total: i64 = members.iter().map(|(_, w)| i64::from(*w)).sum();
        let mut best: Option<(OriginId, i64)> = None;
        for (id, weight) in members {
            let score = self.scores.entry(*id).or_insert(0);
            *score += i64::from(*weight);
            if best.is_none_or(|(_, top)| *score > top) {
                best = Some((*id, *score));
            }
        }
        let (chosen, _) = best?;
        if let Some(score) = self.scores.get_mut(&chosen) {
            *score -= total;
        }
        Some(chosen)
    }

    /// Reverse a [`Self::next`] call that returned `chosen` for `members`
    pub fn undo(&mut self, chosen: OriginId, members: &[(OriginId, u32)]) {
        let total: i64 = members.iter().map(|(_, w)| i64::from(*w)).sum();
        for (id, weight) in members {
            if let Some(score) = self.scores.get_mut(id) {
                *score -= i64::from(*weight);
            }
        }
        if let Some(score) = self.scores.get_mut(&chosen) {
            *score += total;
        }
    }
}

/// Weighted consistent-hash ring over SHA-256
#[derive(Debug)]
pub struct HashRing {
    members: Vec<(OriginId, u32)>,
    points: Vec<(u64, OriginId)>,
}

fn ring_hash(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

impl HashRing {
    pub fn new(members: &[(OriginId, u32)]) -> Self {
        let mut points: Vec<(u64, OriginId)> = members
            .iter()
            .flat_map(|(id, weight)| {
                (0..weight.saturating_mul(VNODES_PER_WEIGHT))
                    .map(move |vnode| (ring_hash(&format!("{id}#{vnode}")), *id))
            })
            .collect();
        points.sort_unstable_by_key(|(hash, _)| *hash);
        Self {
            members: members.to_vec(),
            points,
        }
    }

    fn serves(&self, members: &[(OriginId, u32)]) -> bool {
        self.members == members
    }

    /// First point clockwise from the key's hash
    pub fn locate(&self, key: &str) -> Option<OriginId> {
        if self.points.is_empty() {
            return None;
        }
        let hash = ring_hash(key);
        let index = self.points.partition_point(|(point, _)| *point < hash);
        let (_, id) = self.points[index % self.points.len()];
        Some(id)
    }
}

/// Per-route balancing state
#[derive(Debug, Default)]
pub struct LoadBalancer {
    round_robin: RwLock<HashMap<RouteId, Arc<Mutex<SmoothWeighted>>>>,
    rings: RwLock<HashMap<RouteId, Arc<HashRing>>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick an eligible origin for the request and take its breaker permit
    pub fn select(
        &self,
        route: &Route,
        candidates: Vec<Candidate>,
        client_ip: IpAddr,
    ) -> GatewayResult<Selection> {
        let mut eligible: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.runtime.is_healthy())
            .filter(|c| !route.circuit_breaker_enabled || c.runtime.breaker().is_available())
            .collect();

        while !eligible.is_empty() {
            let Some(index) = self.pick(route, &eligible, client_ip) else {
                break;
            };
            let chosen = &eligible[index];
            let permit = if route.circuit_breaker_enabled {
                match chosen.runtime.breaker().try_acquire() {
                    Some(permit) => Some(permit),
                    None => {
                        // lost the half-open slot to a concurrent request
                        self.unpick(route, &eligible, index);
                        eligible.remove(index);
                        continue;
                    }
                }
            } else {
                None
            };
            let chosen = eligible.swap_remove(index);
            return Ok(Selection {
                _in_flight: chosen.runtime.track(),
                origin: chosen.origin,
                runtime: chosen.runtime,
                permit,
            });
        }

        Err(GatewayError::ServiceUnavailable(format!(
            "no healthy origin available for route {}",
            route.id
        )))
    }

    fn pick(&self, route: &Route, eligible: &[Candidate], client_ip: IpAddr) -> Option<usize> {
        let members = members(eligible);
        let chosen = match route.load_balancing {
            LoadBalancing::WeightedRoundRobin => {
                self.round_robin_state(route.id).lock().next(&members)
            }
            LoadBalancing::LeastConnections => least_loaded(eligible),
            LoadBalancing::ConsistentHash => self
                .ring(route.id, &members)
                .locate(&client_ip.to_string()),
        }?;
        eligible.iter().position(|c| c.origin.id == chosen)
    }

    /// Give back the round-robin credit of a pick that was not used
    fn unpick(&self, route: &Route, eligible: &[Candidate], index: usize) {
        if route.load_balancing == LoadBalancing::WeightedRoundRobin {
            self.round_robin_state(route.id)
                .lock()
                .undo(eligible[index].origin.id, &members(eligible));
        }
    }

    fn round_robin_state(&self, route_id: RouteId) -> Arc<Mutex<SmoothWeighted>> {
        if let Some(state) = self.round_robin.read().get(&route_id) {
            return Arc::clone(state);
        }
        Arc::clone(self.round_robin.write().entry(route_id).or_default())
    }

    fn ring(&self, route_id: RouteId, members: &[(OriginId, u32)]) -> Arc<HashRing> {
        if let Some(ring) = self.rings.read().get(&route_id) {
            if ring.serves(members) {
                return Arc::clone(ring);
            }
        }
        let ring = Arc::new(HashRing::new(members));
        self.rings.write().insert(route_id, Arc::clone(&ring));
        ring
    }

    /// Drop state of deleted routes
    pub fn retain_routes(&self, live: &HashSet<RouteId>) {
        self.round_robin.write().retain(|id, _| live.contains(id));
        self.rings.write().retain(|id, _| live.contains(id));
    }
}

/// Fewest in-flight requests per unit of weight; ties keep pool order
fn members(eligible: &[Candidate]) -> Vec<(OriginId, u32)> {
    eligible
        .iter()
        .map(|c| (c.origin.id, c.weight()))
        .collect()
}

fn least_loaded(eligible: &[Candidate]) -> Option<OriginId> {
    eligible
        .iter()
        .reduce(|best, c| {
            // in_flight / weight compared without division
            let lhs = c.runtime.in_flight() as u128 * u128::from(best.weight());
            let rhs = best.runtime.in_flight() as u128 * u128::from(c.weight());
            if lhs < rhs {
                c
            } else {
                best
            }
        })
        .map(|c| c.origin.id)
}
