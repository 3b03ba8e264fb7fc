//! Weighted selection and ring placement invariants

use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::HashMap;
use vantage_edge::domain::OriginId;
use vantage_edge::gateway::balancer::{HashRing, SmoothWeighted};

fn members(weights: &[u32]) -> Vec<(OriginId, u32)> {
    weights.iter().map(|w| (OriginId::generate(), *w)).collect()
}

proptest! {
    #[test]
    fn one_cycle_picks_each_member_weight_times(weights in vec(1u32..8, 1..6)) {
        let members = members(&weights);
        let total: u32 = weights.iter().sum();
        let mut wrr = SmoothWeighted::default();
        let mut picks: HashMap<OriginId, u32> = HashMap::new();
        for _ in 0..total {
            let id = wrr.next(&members).unwrap();
            *picks.entry(id).or_default() += 1;
        }
        for (id, weight) in &members {
            prop_assert_eq!(picks.get(id).copied().unwrap_or(0), *weight);
        }
    }

    #[test]
    fn removing_another_member_keeps_a_keys_origin(
        weights in vec(1u32..5, 2..6),
        key in "[a-z0-9.:]{1,24}",
    ) {
        let members = members(&weights);
        let ring = HashRing::new(&members);
        let chosen = ring.locate(&key).unwrap();

        let survivors: Vec<(OriginId, u32)> = members
            .iter()
            .copied()
            .filter(|(id, _)| *id != chosen)
            .skip(1)
            .chain(members.iter().copied().filter(|(id, _)| *id == chosen))
            .collect();
        let shrunk = HashRing::new(&survivors);
        prop_assert_eq!(shrunk.locate(&key), Some(chosen));
    }
}
