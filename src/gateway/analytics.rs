//! Request analytics
//!
//! Every data-plane request attributed to a tenant is folded into that
//! tenant's running aggregate: totals, status counts, per-minute buckets for
//! the last hour and per-route usage.

use crate::domain::{RouteId, TenantId};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Minutes of history kept for `requests_over_time`
pub const TIMELINE_MINUTES: usize = 60;
pub const TOP_ROUTES: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct RequestLog {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub route_id: Option<RouteId>,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub cache_hit: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeBucket {
    pub timestamp: DateTime<Utc>,
    pub count: u64,
    pub avg_latency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteUsage {
    pub path: String,
    pub count: u64,
    pub avg_latency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryCount {
    pub country: String,
    pub count: u64,
}

/// Body of `GET /api/v1/analytics`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsReport {
    pub total_requests: u64,
    pub cache_hit_rate: f64,
    /// Milliseconds
    pub avg_response_time: f64,
    pub error_rate: f64,
    pub requests_by_status: BTreeMap<String, u64>,
    pub requests_over_time: Vec<TimeBucket>,
    pub top_routes: Vec<RouteUsage>,
    pub geographic_distribution: Vec<CountryCount>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    count: u64,
    latency_ms: u64,
}

impl Tally {
    fn add(&mut self, latency_ms: u64) {
        self.count += 1;
        self.latency_ms = self.latency_ms.saturating_add(latency_ms);
    }

    fn average(&self) -> f64 {
        ratio(self.latency_ms, self.count)
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Debug, Default)]
struct TenantAggregate {
    requests: Tally,
    errors: u64,
    cache_hits: u64,
    by_status: BTreeMap<u16, u64>,
    timeline: VecDeque<(DateTime<Utc>, Tally)>,
    routes: HashMap<String, Tally>,
}

impl TenantAggregate {
    fn record(&mut self, log: &RequestLog, route_pattern: Option<&str>) {
        self.requests.add(log.response_time_ms);
        if log.status_code >= 400 {
            self.errors += 1;
        }
        if log.cache_hit {
            self.cache_hits += 1;
        }
        *self.by_status.entry(log.status_code).or_default() += 1;

        let minute = log
            .created_at
            .duration_trunc(TimeDelta::minutes(1))
            .unwrap_or(log.created_at);
        match self.timeline.iter_mut().rev().find(|(start, _)| *start == minute) {
            Some((_, tally)) => tally.add(log.response_time_ms),
            None => {
                let mut tally = Tally::default();
                tally.add(log.response_time_ms);
                let at = self
                    .timeline
                    .iter()
                    .position(|(start, _)| *start > minute)
                    .unwrap_or(self.timeline.len());
                self.timeline.insert(at, (minute, tally));
            }
        }
        while self.timeline.len() > TIMELINE_MINUTES {
            self.timeline.pop_front();
        }

        if let Some(pattern) = route_pattern {
            self.routes
                .entry(pattern.to_string())
                .or_default()
                .add(log.response_time_ms);
        }
    }

    fn report(&self, now: DateTime<Utc>) -> AnalyticsReport {
        let horizon = now - TimeDelta::minutes(TIMELINE_MINUTES as i64);
        let mut top_routes: Vec<RouteUsage> = self
            .routes
            .iter()
            .map(|(path, tally)| RouteUsage {
                path: path.clone(),
                count: tally.count,
                avg_latency: tally.average(),
            })
            .collect();
        top_routes.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
        top_routes.truncate(TOP_ROUTES);

        AnalyticsReport {
            total_requests: self.requests.count,
            cache_hit_rate: ratio(self.cache_hits, self.requests.count),
            avg_response_time: self.requests.average(),
            error_rate: ratio(self.errors, self.requests.count),
            requests_by_status: self
                .by_status
                .iter()
                .map(|(status, count)| (status.to_string(), *count))
                .collect(),
            requests_over_time: self
                .timeline
                .iter()
                .filter(|(start, _)| *start > horizon)
                .map(|(start, tally)| TimeBucket {
                    timestamp: *start,
                    count: tally.count,
                    avg_latency: tally.average(),
                })
                .collect(),
            top_routes,
            // no geo-IP source is configured
            geographic_distribution: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct AnalyticsRecorder {
    tenants: RwLock<HashMap<TenantId, Arc<Mutex<TenantAggregate>>>>,
}

impl AnalyticsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, log: &RequestLog, route_pattern: Option<&str>) {
        let aggregate = {
            let existing = self.tenants.read().get(&log.tenant_id).cloned();
            match existing {
                Some(aggregate) => aggregate,
                None => Arc::clone(self.tenants.write().entry(log.tenant_id).or_default()),
            }
        };
        aggregate.lock().record(log, route_pattern);
    }

    pub fn report(&self, tenant_id: TenantId) -> AnalyticsReport {
        let aggregate = self.tenants.read().get(&tenant_id).cloned();
        match aggregate {
            Some(aggregate) => aggregate.lock().report(Utc::now()),
            None => TenantAggregate::default().report(Utc::now()),
        }
    }

    /// Drop the aggregate of a deleted tenant
    pub fn forget(&self, tenant_id: TenantId) {
        self.tenants.write().remove(&tenant_id);
    }
}
