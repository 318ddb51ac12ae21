use std::collections::BTreeMap;

use concord_protocol::{
    AdvTechTile, BoardAction, Booster, Event, EventSource, Faction, FedToken, FinalTile, Hex,
    Operator, ResearchTrack, ScoringTile, TechTile,
};

use crate::error::RulesError;
use crate::rules::{
    CompiledRules, RawBoardAction, RawFaction, RawFederations, RawScoring, RawSectors,
    RawTechTiles, RawTrack,
};

/// Where the rules YAML comes from. `Embedded` is the shipped data set;
/// `Texts` lets tests substitute individual files (a custom sector list, a
/// trimmed faction pool) without touching the rest.
pub enum RulesSource<'a> {
    Embedded,
    Texts {
        factions: &'a str,
        research: &'a str,
        tech_tiles: &'a str,
        boosters: &'a str,
        federations: &'a str,
        scoring: &'a str,
        board_actions: &'a str,
        sectors: &'a str,
    },
}

impl RulesSource<'_> {
    /// The shipped YAML, usable as a baseline for `Texts` substitutions.
    pub const EMBEDDED_FACTIONS: &'static str = include_str!("../../data/factions.yaml");
    pub const EMBEDDED_RESEARCH: &'static str = include_str!("../../data/research.yaml");
    pub const EMBEDDED_TECH_TILES: &'static str = include_str!("../../data/tech_tiles.yaml");
    pub const EMBEDDED_BOOSTERS: &'static str = include_str!("../../data/boosters.yaml");
    pub const EMBEDDED_FEDERATIONS: &'static str = include_str!("../../data/federations.yaml");
    pub const EMBEDDED_SCORING: &'static str = include_str!("../../data/scoring.yaml");
    pub const EMBEDDED_BOARD_ACTIONS: &'static str = include_str!("../../data/board_actions.yaml");
    pub const EMBEDDED_SECTORS: &'static str = include_str!("../../data/sectors.yaml");
}

pub fn load_rules(source: RulesSource<'_>) -> Result<CompiledRules, RulesError> {
    match source {
        RulesSource::Embedded => compile(
            RulesSource::EMBEDDED_FACTIONS,
            RulesSource::EMBEDDED_RESEARCH,
            RulesSource::EMBEDDED_TECH_TILES,
            RulesSource::EMBEDDED_BOOSTERS,
            RulesSource::EMBEDDED_FEDERATIONS,
            RulesSource::EMBEDDED_SCORING,
            RulesSource::EMBEDDED_BOARD_ACTIONS,
            RulesSource::EMBEDDED_SECTORS,
        ),
        RulesSource::Texts {
            factions,
            research,
            tech_tiles,
            boosters,
            federations,
            scoring,
            board_actions,
            sectors,
        } => compile(
            factions,
            research,
            tech_tiles,
            boosters,
            federations,
            scoring,
            board_actions,
            sectors,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn compile(
    factions_yaml: &str,
    research_yaml: &str,
    tech_tiles_yaml: &str,
    boosters_yaml: &str,
    federations_yaml: &str,
    scoring_yaml: &str,
    board_actions_yaml: &str,
    sectors_yaml: &str,
) -> Result<CompiledRules, RulesError> {
    let raw_factions: BTreeMap<Faction, RawFaction> = serde_yaml::from_str(factions_yaml)?;
    require_complete(&raw_factions, Faction::ALL, "faction")?;
    let factions = raw_factions
        .into_iter()
        .map(|(faction, raw)| Ok((faction, raw.compile(faction)?)))
        .collect::<Result<BTreeMap<_, _>, RulesError>>()?;

    let raw_research: BTreeMap<ResearchTrack, RawTrack> = serde_yaml::from_str(research_yaml)?;
    require_complete(&raw_research, ResearchTrack::ALL, "research track")?;
    let research = raw_research
        .into_iter()
        .map(|(track, raw)| Ok((track, raw.compile(track)?)))
        .collect::<Result<BTreeMap<_, _>, RulesError>>()?;

    let raw_tiles: RawTechTiles = serde_yaml::from_str(tech_tiles_yaml)?;
    require_complete(&raw_tiles.standard, TechTile::ALL, "tech tile")?;
    require_complete(&raw_tiles.advanced, AdvTechTile::ALL, "advanced tech tile")?;
    let tech_tiles = raw_tiles
        .standard
        .into_iter()
        .map(|(tile, specs)| {
            let events = parse_events(&specs, EventSource::Tech { tile })?;
            Ok((tile, events))
        })
        .collect::<Result<BTreeMap<_, _>, RulesError>>()?;
    let adv_tech_tiles = raw_tiles
        .advanced
        .into_iter()
        .map(|(tile, specs)| {
            let events = parse_events(&specs, EventSource::AdvTech { tile })?;
            Ok((tile, events))
        })
        .collect::<Result<BTreeMap<_, _>, RulesError>>()?;

    let raw_boosters: BTreeMap<Booster, Vec<String>> = serde_yaml::from_str(boosters_yaml)?;
    require_complete(&raw_boosters, Booster::ALL, "booster")?;
    let boosters = raw_boosters
        .into_iter()
        .map(|(tile, specs)| {
            let events = parse_events(&specs, EventSource::Booster { tile })?;
            Ok((tile, events))
        })
        .collect::<Result<BTreeMap<_, _>, RulesError>>()?;

    let raw_federations: RawFederations = serde_yaml::from_str(federations_yaml)?;
    require_complete(&raw_federations.tokens, FedToken::ALL, "federation token")?;
    if raw_federations.threshold == 0 {
        return Err(RulesError::Invalid(
            "federation threshold must be positive".to_string(),
        ));
    }
    let fed_tokens = raw_federations
        .tokens
        .into_iter()
        .map(|(token, raw)| {
            Ok((
                token,
                crate::rules::FedTokenData {
                    rewards: concord_protocol::Reward::parse_list(&raw.rewards)?,
                    count: raw.count,
                },
            ))
        })
        .collect::<Result<BTreeMap<_, _>, RulesError>>()?;

    let raw_scoring: RawScoring = serde_yaml::from_str(scoring_yaml)?;
    require_complete(&raw_scoring.round, ScoringTile::ALL, "scoring tile")?;
    require_complete(&raw_scoring.final_tiles, FinalTile::ALL, "final scoring tile")?;
    let round_scoring = raw_scoring
        .round
        .into_iter()
        .map(|(tile, spec)| {
            let event = Event::parse(&spec, EventSource::Scoring { tile })?;
            if event.operator != Operator::Trigger {
                return Err(RulesError::Invalid(format!(
                    "{tile}: round scoring must be a trigger event, got `{event}`"
                )));
            }
            Ok((tile, event))
        })
        .collect::<Result<BTreeMap<_, _>, RulesError>>()?;
    let final_scoring = raw_scoring
        .final_tiles
        .into_iter()
        .map(|(tile, raw)| (tile, raw.neutral))
        .collect();

    let raw_actions: BTreeMap<BoardAction, RawBoardAction> =
        serde_yaml::from_str(board_actions_yaml)?;
    require_complete(&raw_actions, BoardAction::ALL, "board action")?;
    let board_actions = raw_actions
        .into_iter()
        .map(|(action, raw)| Ok((action, raw.compile(action)?)))
        .collect::<Result<BTreeMap<_, _>, RulesError>>()?;

    let raw_sectors: RawSectors = serde_yaml::from_str(sectors_yaml)?;
    let sectors = raw_sectors
        .sectors
        .into_iter()
        .map(|raw| raw.compile())
        .collect::<Result<Vec<_>, _>>()?;
    let centers_small = parse_centers(&raw_sectors.centers_small)?;
    let centers_large = parse_centers(&raw_sectors.centers_large)?;
    if sectors.len() < centers_large.len() {
        return Err(RulesError::Invalid(format!(
            "need at least {} sector tiles, found {}",
            centers_large.len(),
            sectors.len()
        )));
    }
    if centers_small.len() >= centers_large.len() {
        return Err(RulesError::Invalid(
            "small map must use fewer sectors than the large map".to_string(),
        ));
    }

    Ok(CompiledRules {
        factions,
        research,
        tech_tiles,
        adv_tech_tiles,
        boosters,
        fed_tokens,
        fed_threshold: raw_federations.threshold,
        round_scoring,
        final_scoring,
        board_actions,
        sectors,
        centers_small,
        centers_large,
    })
}

fn require_complete<K: Ord + std::fmt::Display + Copy, V>(
    map: &BTreeMap<K, V>,
    all: &[K],
    what: &str,
) -> Result<(), RulesError> {
    match all.iter().find(|key| !map.contains_key(key)) {
        Some(missing) => Err(RulesError::Invalid(format!("missing {what} `{missing}`"))),
        None => Ok(()),
    }
}

fn parse_events(specs: &[String], source: EventSource) -> Result<Vec<Event>, RulesError> {
    specs
        .iter()
        .map(|spec| Ok(Event::parse(spec, source)?))
        .collect()
}

fn parse_centers(texts: &[String]) -> Result<Vec<Hex>, RulesError> {
    texts
        .iter()
        .map(|text| Ok(text.parse::<Hex>()?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_rules_compile() {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        assert_eq!(rules.factions.len(), Faction::ALL.len());
        assert_eq!(rules.research.len(), 6);
        assert_eq!(rules.tech_tiles.len(), 9);
        assert_eq!(rules.adv_tech_tiles.len(), 6);
        assert_eq!(rules.boosters.len(), 10);
        assert_eq!(rules.round_scoring.len(), 10);
        assert_eq!(rules.final_scoring.len(), 6);
        assert_eq!(rules.board_actions.len(), 10);
        assert_eq!(rules.sectors.len(), 10);
        assert_eq!(rules.centers_small.len(), 7);
        assert_eq!(rules.centers_large.len(), 10);
        assert_eq!(rules.fed_threshold, 7);
    }

    #[test]
    fn embedded_sectors_are_playable() {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        for sector in &rules.sectors {
            let planets = sector.planets.iter().flatten().count();
            assert!(
                (4..=9).contains(&planets),
                "sector {} has {planets} planets",
                sector.name
            );
        }
        // Every faction must be able to find a home planet somewhere.
        for faction in Faction::ALL {
            let home = faction.home_planet();
            let anywhere = rules
                .sectors
                .iter()
                .any(|s| s.planets.iter().flatten().any(|p| *p == home));
            assert!(anywhere, "no {home} planet for {faction}");
        }
    }

    #[test]
    fn substituted_text_overrides_one_file() {
        let bad = "threshold: 0\ntokens: {}\n";
        let result = load_rules(RulesSource::Texts {
            factions: RulesSource::EMBEDDED_FACTIONS,
            research: RulesSource::EMBEDDED_RESEARCH,
            tech_tiles: RulesSource::EMBEDDED_TECH_TILES,
            boosters: RulesSource::EMBEDDED_BOOSTERS,
            federations: bad,
            scoring: RulesSource::EMBEDDED_SCORING,
            board_actions: RulesSource::EMBEDDED_BOARD_ACTIONS,
            sectors: RulesSource::EMBEDDED_SECTORS,
        });
        assert!(matches!(result, Err(RulesError::Invalid(_))));
    }
}
