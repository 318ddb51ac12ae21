//! Property-based tests for the reward language and the power bowls.
//!
//! These cover the invariants the rest of the engine leans on: reward text
//! round-trips, merges preserve totals, and no token ever appears or
//! vanishes while moving between power areas.

use proptest::prelude::*;

use concord_core::PowerBowls;
use concord_protocol::{Resource, Reward};

fn reward_kind() -> impl Strategy<Value = Resource> {
    prop::sample::select(vec![
        Resource::Credit,
        Resource::Ore,
        Resource::Knowledge,
        Resource::Qic,
        Resource::VictoryPoint,
        Resource::ChargePower,
        Resource::GainToken,
        Resource::TokenArea3,
        Resource::GaiaFormer,
        Resource::AdvanceResearch,
        Resource::UpgradeLowest,
        Resource::TechTile,
        Resource::LostPlanet,
        Resource::SpaceStation,
        Resource::FederationToken,
        Resource::RescoreFederation,
        Resource::TemporaryStep,
        Resource::TemporaryRange,
        Resource::Ship,
        Resource::PiSwap,
        Resource::DowngradeLab,
    ])
}

fn reward() -> impl Strategy<Value = Reward> {
    (-9i32..=9, reward_kind()).prop_map(|(count, kind)| Reward::new(count, kind))
}

proptest! {
    /// Any reward list prints to text that parses back to the same list.
    #[test]
    fn reward_lists_round_trip(rewards in prop::collection::vec(reward(), 0..6)) {
        let text = Reward::format_list(&rewards);
        let parsed = Reward::parse_list(&text).unwrap();
        prop_assert_eq!(parsed, rewards);
    }

    /// Merging keeps the per-kind totals and drops only true zeroes.
    #[test]
    fn merge_preserves_totals(rewards in prop::collection::vec(reward(), 0..8)) {
        let merged = Reward::merge(rewards.iter().copied());
        for entry in &merged {
            let total: i32 = rewards
                .iter()
                .filter(|r| r.kind == entry.kind)
                .map(|r| r.count)
                .sum();
            prop_assert_eq!(entry.count, total);
            prop_assert_ne!(entry.count, 0);
        }
        for reward in &rewards {
            let total: i32 = rewards
                .iter()
                .filter(|r| r.kind == reward.kind)
                .map(|r| r.count)
                .sum();
            let kept = merged.iter().any(|m| m.kind == reward.kind);
            prop_assert_eq!(total != 0, kept);
        }
    }

    /// No sequence of charges, burns, spends, gains and discards breaks
    /// token conservation across the areas.
    #[test]
    fn power_bowls_stay_conserved(
        area1 in 0u32..8,
        area2 in 0u32..8,
        brainstone in any::<bool>(),
        ops in prop::collection::vec((0u8..6, 1u32..4), 0..24),
    ) {
        let mut bowls = PowerBowls::new(area1, area2, brainstone);
        for (op, n) in ops {
            match op {
                0 => {
                    bowls.charge(n);
                }
                1 => {
                    let _ = bowls.burn(n, false);
                }
                2 => {
                    let _ = bowls.burn(n, true);
                }
                3 => {
                    let _ = bowls.spend(n, false, false);
                }
                4 => bowls.gain(n),
                _ => {
                    let _ = bowls.discard_any(n);
                }
            }
            prop_assert!(bowls.conserved(), "areas no longer sum to the bowl total");
        }
    }

    /// Charging reports exactly the steps it used, bounded by the request
    /// and by what the bowls could absorb.
    #[test]
    fn charge_is_bounded(
        area1 in 0u32..8,
        area2 in 0u32..8,
        brainstone in any::<bool>(),
        steps in 0u32..32,
    ) {
        let mut bowls = PowerBowls::new(area1, area2, brainstone);
        let open = bowls.chargeable();
        let used = bowls.charge(steps);
        prop_assert!(used <= steps);
        prop_assert!(used <= open);
        prop_assert_eq!(used, steps.min(open));
        prop_assert!(bowls.conserved());
    }
}
