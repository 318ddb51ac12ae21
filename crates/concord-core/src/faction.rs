use concord_protocol::{Faction, PowerArea, Resource, Reward};

use crate::player::Player;

/// Rule-changing faction behavior, dispatched explicitly. Countable data
/// (starting resources, board income, planetary-institute events) lives in
/// the YAML boards; everything that bends a rule goes through here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactionAbility {
    /// Gaia-area tokens return to area 2.
    Terrans,
    /// Guest mines on other players' planets; no gaia access cost there.
    Lantids,
    /// Federation threshold drops to 6 with the planetary institute.
    Xenos,
    /// Ore in place of QIC until the institute; VP for gaia colonization;
    /// a faction-only federation token on the institute.
    Gleens,
    /// The brainstone, and dual-ordered leech offers with the institute.
    Taklons,
    /// Institute special: swap the institute with a mine.
    Ambas,
    /// Institute: pay credits in place of power for conversions.
    HadschHallas,
    /// One growing federation paid with QIC satellites; institute placed
    /// last in setup; space stations.
    Ivits,
    /// Institute: knowledge whenever a new planet type is colonized.
    Geodens,
    /// Navigation locked until the institute; gaiaformers convert to QIC.
    BalTaks,
    /// Special: downgrade a research lab and advance a track.
    Firaks,
    /// Swapped board income and the advance-lowest-track special.
    Bescods,
    /// Area-3 tokens convert to knowledge; institute halves power costs.
    Nevlas,
    /// Burned tokens land in the gaia area and buy tech tiles there.
    Itars,
}

impl FactionAbility {
    pub fn of(faction: Faction) -> FactionAbility {
        match faction {
            Faction::Terrans => FactionAbility::Terrans,
            Faction::Lantids => FactionAbility::Lantids,
            Faction::Xenos => FactionAbility::Xenos,
            Faction::Gleens => FactionAbility::Gleens,
            Faction::Taklons => FactionAbility::Taklons,
            Faction::Ambas => FactionAbility::Ambas,
            Faction::HadschHallas => FactionAbility::HadschHallas,
            Faction::Ivits => FactionAbility::Ivits,
            Faction::Geodens => FactionAbility::Geodens,
            Faction::BalTaks => FactionAbility::BalTaks,
            Faction::Firaks => FactionAbility::Firaks,
            Faction::Bescods => FactionAbility::Bescods,
            Faction::Nevlas => FactionAbility::Nevlas,
            Faction::Itars => FactionAbility::Itars,
        }
    }

    /// Where gaia-area tokens return during the gaia phase.
    pub fn gaia_return_area(self) -> PowerArea {
        match self {
            FactionAbility::Terrans => PowerArea::Area2,
            _ => PowerArea::Area1,
        }
    }

    /// What one new satellite costs this player.
    pub fn satellite_cost(self) -> Resource {
        match self {
            FactionAbility::Ivits => Resource::Qic,
            _ => Resource::GainToken,
        }
    }

    /// Satellites the player could still pay for.
    pub fn satellite_budget(self, player: &Player) -> u32 {
        match self {
            FactionAbility::Ivits => player.resources.qic,
            _ => player.power.tokens_in_bowls(),
        }
    }

    /// The surcharge for putting a mine on a gaia planet without an own
    /// gaiaformer on it.
    pub fn gaia_access_cost(self) -> Reward {
        match self {
            FactionAbility::Gleens => Reward::new(1, Resource::Ore),
            _ => Reward::new(1, Resource::Qic),
        }
    }

    /// Victory points granted on colonizing a gaia planet.
    pub fn gaia_colonize_vp(self) -> i32 {
        match self {
            FactionAbility::Gleens => 2,
            _ => 0,
        }
    }

    /// Whether the `up nav` action is blocked before the institute.
    pub fn navigation_locked(self, player: &Player) -> bool {
        self == FactionAbility::BalTaks && !player.pi_built()
    }

    pub fn builds_guest_mines(self) -> bool {
        self == FactionAbility::Lantids
    }

    /// Setup placement: one planetary institute instead of two mines.
    pub fn setup_institute_only(self) -> bool {
        self == FactionAbility::Ivits
    }

    /// Setup placement: a third mine after the snake order.
    pub fn setup_third_mine(self) -> bool {
        self == FactionAbility::Xenos
    }

    pub fn dual_leech(self, player: &Player) -> bool {
        self == FactionAbility::Taklons && player.pi_built()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_protocol::PlayerId;
    use crate::rules::{load_rules, RulesSource};

    #[test]
    fn every_faction_resolves() {
        for faction in Faction::ALL {
            let ability = FactionAbility::of(*faction);
            if *faction == Faction::Terrans {
                assert_eq!(ability.gaia_return_area(), PowerArea::Area2);
            } else {
                assert_eq!(ability.gaia_return_area(), PowerArea::Area1);
            }
        }
    }

    #[test]
    fn ivits_pay_satellites_with_qic() {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        let mut ivits = Player::new(&rules, PlayerId(0), Faction::Ivits);
        ivits.resources.qic = 3;
        let ability = FactionAbility::of(Faction::Ivits);
        assert_eq!(ability.satellite_cost(), Resource::Qic);
        assert_eq!(ability.satellite_budget(&ivits), 3);
        let taklons = Player::new(&rules, PlayerId(1), Faction::Taklons);
        assert_eq!(
            FactionAbility::of(Faction::Taklons).satellite_budget(&taklons),
            taklons.power.tokens_in_bowls()
        );
    }
}
