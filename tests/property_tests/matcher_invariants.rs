//! The route table agrees with a linear scan over every pattern

use http::Method;
use proptest::prelude::*;
use vantage_edge::domain::{NewRoute, OriginId, Route, TenantId};
use vantage_edge::gateway::matcher::{CompiledRoute, RouteTable};

pub mod generators {
    use super::*;
    use proptest::collection::vec;

    pub fn segment() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("a"), Just("b"), Just("c")]
    }

    /// Glob patterns over a tiny alphabet so that overlaps are common
    pub fn pattern() -> impl Strategy<Value = String> {
        (
            vec(prop_oneof![Just("a"), Just("b"), Just("*")], 1..4),
            prop_oneof![Just(""), Just("/*"), Just("/**")],
        )
            .prop_map(|(segments, tail)| format!("/{}{tail}", segments.join("/")))
    }

    pub fn path() -> impl Strategy<Value = String> {
        vec(segment(), 0..5).prop_map(|segments| format!("/{}", segments.join("/")))
    }

    pub fn routes() -> impl Strategy<Value = Vec<(String, i32)>> {
        vec((pattern(), -3i32..3), 1..8)
    }
}

fn compile(tenant_id: TenantId, specs: &[(String, i32)]) -> Vec<CompiledRoute> {
    specs
        .iter()
        .enumerate()
        .map(|(i, (pattern, priority))| {
            let mut new = NewRoute::new(format!("r{i}"), pattern.clone(), OriginId::generate());
            new.priority = *priority;
            CompiledRoute::compile(Route::create(tenant_id, new).unwrap()).unwrap()
        })
        .collect()
}

proptest! {
    #[test]
    fn find_returns_a_match_exactly_when_one_exists(
        specs in generators::routes(),
        path in generators::path(),
    ) {
        let compiled = compile(TenantId::generate(), &specs);
        let matching: Vec<i32> = compiled
            .iter()
            .filter(|c| c.pattern.matches(&path))
            .map(|c| c.route.priority)
            .collect();
        let table = RouteTable::build(compiled);

        match table.find(&Method::GET, &path) {
            Some(found) => {
                prop_assert!(found.pattern.matches(&path));
                prop_assert_eq!(Some(found.route.priority), matching.iter().copied().max());
            }
            None => prop_assert!(matching.is_empty()),
        }
    }

    #[test]
    fn other_methods_never_match_get_only_routes(
        specs in generators::routes(),
        path in generators::path(),
    ) {
        let table = RouteTable::build(compile(TenantId::generate(), &specs));
        prop_assert!(table.find(&Method::DELETE, &path).is_none());
    }
}
