text_enum! {
    kind = "planet";
    /// Planet kinds, with the single-letter codes used by sector layout
    /// strings. `Transdim` hexes become `Gaia` once a gaiaformer finishes.
    pub enum PlanetType {
        Terra => "r",
        Oxide => "o",
        Volcanic => "v",
        Desert => "d",
        Swamp => "s",
        Titanium => "t",
        Ice => "i",
        Gaia => "g",
        Transdim => "m",
        Lost => "l",
    }
}

impl PlanetType {
    /// The seven basic types arranged on the terraforming wheel.
    pub const WHEEL: [PlanetType; 7] = [
        PlanetType::Terra,
        PlanetType::Oxide,
        PlanetType::Volcanic,
        PlanetType::Desert,
        PlanetType::Swamp,
        PlanetType::Titanium,
        PlanetType::Ice,
    ];

    pub fn is_basic(self) -> bool {
        PlanetType::WHEEL.contains(&self)
    }

    /// Terraforming steps between two basic types: the shorter way around the
    /// wheel. `None` when either side is not on the wheel.
    pub fn terraform_steps(self, other: PlanetType) -> Option<u32> {
        let pos = |p| PlanetType::WHEEL.iter().position(|w| *w == p);
        let (a, b) = (pos(self)?, pos(other)?);
        let diff = (a as i32 - b as i32).unsigned_abs();
        Some(diff.min(PlanetType::WHEEL.len() as u32 - diff))
    }
}

text_enum! {
    kind = "building";
    pub enum Building {
        Mine => "m",
        TradingStation => "ts",
        ResearchLab => "lab",
        PlanetaryInstitute => "PI",
        Academy1 => "ac1",
        Academy2 => "ac2",
        GaiaFormer => "gf",
        SpaceStation => "sp",
        /// The lost-planet marker. Counts as a mine for scoring and events.
        LostPlanet => "lp",
    }
}

impl Building {
    /// Power value before tile/faction adjustments.
    pub const fn base_value(self) -> u32 {
        match self {
            Building::Mine | Building::LostPlanet => 1,
            Building::TradingStation | Building::ResearchLab => 2,
            Building::PlanetaryInstitute | Building::Academy1 | Building::Academy2 => 3,
            Building::GaiaFormer | Building::SpaceStation => 0,
        }
    }

    /// Buildings that occupy a planet and count toward planet/structure tallies.
    pub fn is_colonizing(self) -> bool {
        !matches!(self, Building::GaiaFormer | Building::SpaceStation)
    }

    pub fn counts_as_mine(self) -> bool {
        matches!(self, Building::Mine | Building::LostPlanet)
    }

    pub fn is_big(self) -> bool {
        matches!(
            self,
            Building::PlanetaryInstitute | Building::Academy1 | Building::Academy2
        )
    }
}

text_enum! {
    kind = "faction";
    pub enum Faction {
        Terrans => "terrans",
        Lantids => "lantids",
        Xenos => "xenos",
        Gleens => "gleens",
        Taklons => "taklons",
        Ambas => "ambas",
        HadschHallas => "hadsch-hallas",
        Ivits => "ivits",
        Geodens => "geodens",
        BalTaks => "bal-taks",
        Firaks => "firaks",
        Bescods => "bescods",
        Nevlas => "nevlas",
        Itars => "itars",
    }
}

impl Faction {
    pub const fn home_planet(self) -> PlanetType {
        match self {
            Faction::Terrans | Faction::Lantids => PlanetType::Terra,
            Faction::Xenos | Faction::Gleens => PlanetType::Desert,
            Faction::Taklons | Faction::Ambas => PlanetType::Swamp,
            Faction::HadschHallas | Faction::Ivits => PlanetType::Oxide,
            Faction::Geodens | Faction::BalTaks => PlanetType::Volcanic,
            Faction::Firaks | Faction::Bescods => PlanetType::Titanium,
            Faction::Nevlas | Faction::Itars => PlanetType::Ice,
        }
    }
}

text_enum! {
    kind = "research track";
    pub enum ResearchTrack {
        Terraforming => "terra",
        Navigation => "nav",
        Intelligence => "int",
        GaiaProject => "gaia",
        Economy => "eco",
        Science => "sci",
    }
}

text_enum! {
    kind = "tech tile slot";
    /// Where a tech tile sits on the research board. Track and free slots hold
    /// standard tiles; `adv-*` slots hold advanced tiles.
    pub enum TechTilePos {
        Terra => "terra",
        Nav => "nav",
        Int => "int",
        Gaia => "gaia",
        Eco => "eco",
        Sci => "sci",
        Free1 => "free1",
        Free2 => "free2",
        Free3 => "free3",
        AdvTerra => "adv-terra",
        AdvNav => "adv-nav",
        AdvInt => "adv-int",
        AdvGaia => "adv-gaia",
        AdvEco => "adv-eco",
        AdvSci => "adv-sci",
    }
}

impl TechTilePos {
    pub fn is_advanced(self) -> bool {
        matches!(
            self,
            TechTilePos::AdvTerra
                | TechTilePos::AdvNav
                | TechTilePos::AdvInt
                | TechTilePos::AdvGaia
                | TechTilePos::AdvEco
                | TechTilePos::AdvSci
        )
    }

    /// The research track this slot is bound to, if any. Free slots let the
    /// player pick.
    pub fn track(self) -> Option<ResearchTrack> {
        match self {
            TechTilePos::Terra | TechTilePos::AdvTerra => Some(ResearchTrack::Terraforming),
            TechTilePos::Nav | TechTilePos::AdvNav => Some(ResearchTrack::Navigation),
            TechTilePos::Int | TechTilePos::AdvInt => Some(ResearchTrack::Intelligence),
            TechTilePos::Gaia | TechTilePos::AdvGaia => Some(ResearchTrack::GaiaProject),
            TechTilePos::Eco | TechTilePos::AdvEco => Some(ResearchTrack::Economy),
            TechTilePos::Sci | TechTilePos::AdvSci => Some(ResearchTrack::Science),
            TechTilePos::Free1 | TechTilePos::Free2 | TechTilePos::Free3 => None,
        }
    }

    pub fn advanced_slot(track: ResearchTrack) -> TechTilePos {
        match track {
            ResearchTrack::Terraforming => TechTilePos::AdvTerra,
            ResearchTrack::Navigation => TechTilePos::AdvNav,
            ResearchTrack::Intelligence => TechTilePos::AdvInt,
            ResearchTrack::GaiaProject => TechTilePos::AdvGaia,
            ResearchTrack::Economy => TechTilePos::AdvEco,
            ResearchTrack::Science => TechTilePos::AdvSci,
        }
    }
}

text_enum! {
    kind = "tech tile";
    pub enum TechTile {
        Tech1 => "tech1",
        Tech2 => "tech2",
        Tech3 => "tech3",
        Tech4 => "tech4",
        Tech5 => "tech5",
        Tech6 => "tech6",
        Tech7 => "tech7",
        Tech8 => "tech8",
        Tech9 => "tech9",
    }
}

text_enum! {
    kind = "advanced tech tile";
    pub enum AdvTechTile {
        AdvTech1 => "advtech1",
        AdvTech2 => "advtech2",
        AdvTech3 => "advtech3",
        AdvTech4 => "advtech4",
        AdvTech5 => "advtech5",
        AdvTech6 => "advtech6",
    }
}

text_enum! {
    kind = "booster";
    pub enum Booster {
        Booster1 => "booster1",
        Booster2 => "booster2",
        Booster3 => "booster3",
        Booster4 => "booster4",
        Booster5 => "booster5",
        Booster6 => "booster6",
        Booster7 => "booster7",
        Booster8 => "booster8",
        Booster9 => "booster9",
        Booster10 => "booster10",
    }
}

text_enum! {
    kind = "federation token";
    pub enum FedToken {
        Fed1 => "fed1",
        Fed2 => "fed2",
        Fed3 => "fed3",
        Fed4 => "fed4",
        Fed5 => "fed5",
        Fed6 => "fed6",
        /// The token granted by the Gleens planetary institute.
        FedGleens => "fed-gleens",
    }
}

text_enum! {
    kind = "scoring tile";
    pub enum ScoringTile {
        Round1 => "round1",
        Round2 => "round2",
        Round3 => "round3",
        Round4 => "round4",
        Round5 => "round5",
        Round6 => "round6",
        Round7 => "round7",
        Round8 => "round8",
        Round9 => "round9",
        Round10 => "round10",
    }
}

text_enum! {
    kind = "final scoring tile";
    pub enum FinalTile {
        Structure => "structure",
        StructureFed => "structure-fed",
        PlanetTypes => "planet-types",
        Gaia => "gaia",
        Sector => "sector",
        Satellite => "satellite",
    }
}

text_enum! {
    kind = "board action";
    pub enum BoardAction {
        Power1 => "power1",
        Power2 => "power2",
        Power3 => "power3",
        Power4 => "power4",
        Power5 => "power5",
        Power6 => "power6",
        Power7 => "power7",
        Qic1 => "qic1",
        Qic2 => "qic2",
        Qic3 => "qic3",
    }
}

text_enum! {
    kind = "power area";
    pub enum PowerArea {
        Area1 => "area1",
        Area2 => "area2",
        Area3 => "area3",
        Gaia => "gaia",
        Discard => "discard",
    }
}

text_enum! {
    kind = "phase";
    pub enum Phase {
        SetupInit => "setup-init",
        SetupBoard => "setup-board",
        SetupFaction => "setup-faction",
        SetupAuction => "setup-auction",
        SetupBuilding => "setup-building",
        SetupBooster => "setup-booster",
        RoundIncome => "round-income",
        RoundGaia => "round-gaia",
        RoundMove => "round-move",
        RoundLeech => "round-leech",
        EndGame => "end-game",
    }
}

text_enum! {
    kind = "subphase";
    /// Interrupts pushed inside `RoundMove` (and, for Itars, `RoundGaia`).
    /// While one is active the generator only offers its options.
    pub enum SubPhase {
        BeforeMove => "before-move",
        AfterMove => "after-move",
        ChooseTechTile => "choose-tech-tile",
        CoverTechTile => "cover-tech-tile",
        UpgradeResearch => "upgrade-research",
        PlaceLostPlanet => "place-lost-planet",
        BuildMineOrGaiaFormer => "build-mine-or-gaia-former",
        SpaceStation => "space-station",
        PlaceShip => "place-ship",
        PiSwap => "pi-swap",
        DowngradeLab => "downgrade-lab",
        RescoreFederationTile => "rescore-federation-tile",
        BrainStone => "brain-stone",
        ChooseFederationTile => "choose-federation-tile",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for faction in Faction::ALL {
            assert_eq!(faction.code().parse::<Faction>().unwrap(), *faction);
        }
        for pos in TechTilePos::ALL {
            assert_eq!(pos.code().parse::<TechTilePos>().unwrap(), *pos);
        }
        assert_eq!("PI".parse::<Building>().unwrap(), Building::PlanetaryInstitute);
        assert_eq!("pi".parse::<Building>().unwrap(), Building::PlanetaryInstitute);
        assert!("tower".parse::<Building>().is_err());
    }

    #[test]
    fn serde_uses_the_text_codes() {
        let json = serde_json::to_string(&Faction::HadschHallas).unwrap();
        assert_eq!(json, "\"hadsch-hallas\"");
        let back: Faction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Faction::HadschHallas);
    }

    #[test]
    fn terraform_wheel_distances() {
        assert_eq!(PlanetType::Terra.terraform_steps(PlanetType::Terra), Some(0));
        assert_eq!(PlanetType::Terra.terraform_steps(PlanetType::Oxide), Some(1));
        assert_eq!(PlanetType::Terra.terraform_steps(PlanetType::Ice), Some(1));
        assert_eq!(PlanetType::Terra.terraform_steps(PlanetType::Desert), Some(3));
        assert_eq!(PlanetType::Oxide.terraform_steps(PlanetType::Titanium), Some(3));
        assert_eq!(PlanetType::Terra.terraform_steps(PlanetType::Gaia), None);
    }

    #[test]
    fn advanced_slots_map_to_their_tracks() {
        for track in ResearchTrack::ALL {
            let slot = TechTilePos::advanced_slot(*track);
            assert!(slot.is_advanced());
            assert_eq!(slot.track(), Some(*track));
        }
        assert_eq!(TechTilePos::Free2.track(), None);
    }
}
