use std::collections::{BTreeMap, BTreeSet, VecDeque};

use concord_protocol::{Building, Faction, FederationInfo, Hex, TechTile};

use crate::faction::FactionAbility;
use crate::map::SpaceMap;
use crate::player::Player;
use crate::rules::CompiledRules;

/// How a hex participates in a candidate federation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cell {
    /// Own structure with positive power value; seeds a building group.
    Structure(u32),
    /// A hex already inside the player's growing federation (Ivits);
    /// seeds the mandatory group at no power value.
    Anchor,
    /// Own zero-value structure (space station). Crossed for free, never
    /// a group seed.
    FreePass,
    /// Empty space; joining costs one new satellite.
    Space,
    /// Other players' planets, unbuilt planets, and (outside Ivits) hexes
    /// already inside one of the player's federations.
    Blocked,
}

/// Power value a structure contributes to federations. The Bescods
/// planetary institute is worth 4, and the big-building tech tile lifts
/// institutes and academies by one more.
pub fn structure_value(player: &Player, building: Building) -> u32 {
    let mut value = building.base_value();
    if building == Building::PlanetaryInstitute && player.faction == Faction::Bescods {
        value += 1;
    }
    if building.is_big() && player.uncovered_tech().any(|t| t == TechTile::Tech3) {
        value += 1;
    }
    value
}

/// Power value a federation must reach. Xenos drop to 6 once their
/// planetary institute stands; the Ivits federation is a single growing one
/// whose requirement climbs by the base threshold per token taken.
pub fn effective_threshold(rules: &CompiledRules, player: &Player) -> u32 {
    let base = rules.fed_threshold;
    match player.faction {
        Faction::Xenos if player.pi_built() => base.saturating_sub(1),
        Faction::Ivits => base * (player.federations_formed + 1),
        _ => base,
    }
}

/// Tie-break policy for growing connection trees. Strict mode uses only
/// [`PathPolicy::AvoidForeign`]; flexible mode explores the alternatives
/// too, so its candidate set is a superset of the strict one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PathPolicy {
    /// At equal satellite cost, prefer paths that skirt hexes carrying
    /// other players' satellites or ships.
    AvoidForeign,
    /// Equal-cost ties resolved toward the lowest hex.
    Forward,
    /// Equal-cost ties resolved toward the highest hex.
    Reverse,
}

/// Enumerate the federations this player could form right now.
///
/// Candidates are connected hex sets of the player's structures plus newly
/// placed satellites, worth at least the threshold and disjoint from the
/// player's existing federations (Ivits instead must grow theirs). New
/// satellites are bounded by the satellite budget: spendable power tokens,
/// or QIC for Ivits. Candidates outclassed under the planets/satellites
/// dominance order are dropped.
pub fn federation_candidates(
    rules: &CompiledRules,
    map: &SpaceMap,
    player: &Player,
    flexible: bool,
) -> Vec<FederationInfo> {
    let threshold = effective_threshold(rules, player);
    let budget = FactionAbility::of(player.faction).satellite_budget(player);
    let ivits = player.faction == Faction::Ivits;

    let mut cells: BTreeMap<Hex, Cell> = BTreeMap::new();
    for (hex, data) in &map.hexes {
        let in_own_fed = data.in_federation_of(player.id);
        if in_own_fed && !ivits {
            cells.insert(*hex, Cell::Blocked);
            continue;
        }
        let cell = match data.planet {
            Some(_) => {
                if data.owner == Some(player.id)
                    && data.building.map(Building::is_colonizing).unwrap_or(false)
                {
                    Cell::Structure(structure_value(player, data.building.unwrap_or(Building::Mine)))
                } else {
                    // Guest mines carry no power value and stay out.
                    Cell::Blocked
                }
            }
            None if in_own_fed => Cell::Anchor,
            None => {
                if data.building == Some(Building::SpaceStation) && data.owner == Some(player.id) {
                    Cell::FreePass
                } else {
                    Cell::Space
                }
            }
        };
        cells.insert(*hex, cell);
    }

    let components = building_groups(&cells);
    if components.is_empty() {
        return Vec::new();
    }
    // The group holding the existing Ivits federation must be part of
    // every candidate.
    let mandatory = ivits
        .then(|| {
            components.iter().position(|comp| {
                comp.hexes
                    .iter()
                    .any(|hex| map.get(*hex).map(|d| d.in_federation_of(player.id)).unwrap_or(false))
            })
        })
        .flatten();

    let mut candidates: Vec<FederationInfo> = Vec::new();
    let n = components.len().min(12);
    for mask in 1_u32..(1 << n) {
        if let Some(required) = mandatory {
            if mask & (1 << required) == 0 {
                continue;
            }
        }
        let picked: Vec<usize> = (0..n).filter(|i| mask & (1 << i) != 0).collect();
        let subset_value: u32 = picked.iter().map(|i| components[*i].value).sum();
        if subset_value < threshold {
            continue;
        }

        let mut trees: Vec<BTreeSet<Hex>> = Vec::new();
        let grow = |seed: usize, policy: PathPolicy, trees: &mut Vec<BTreeSet<Hex>>| {
            if let Some(tree) = connect(&cells, map, &components, &picked, seed, policy) {
                if !trees.contains(&tree) {
                    trees.push(tree);
                }
            }
        };
        grow(0, PathPolicy::AvoidForeign, &mut trees);
        if flexible {
            for seed in 0..picked.len() {
                grow(seed, PathPolicy::Forward, &mut trees);
                grow(seed, PathPolicy::Reverse, &mut trees);
            }
        }

        for tree in trees {
            let Some(info) = describe(map, &cells, &tree, threshold) else {
                continue;
            };
            if info.new_satellites > budget {
                continue;
            }
            if candidates.iter().any(|c| c.same_hexes(&info)) {
                continue;
            }
            candidates.push(info);
        }
    }

    // Same-or-fewer planets with same-or-more new satellites never survive.
    let mut kept: Vec<FederationInfo> = Vec::new();
    for info in &candidates {
        if !candidates.iter().any(|other| info.outclassed_by(other)) {
            kept.push(info.clone());
        }
    }
    kept.sort_by(|a, b| {
        b.planets
            .cmp(&a.planets)
            .then(a.new_satellites.cmp(&b.new_satellites))
            .then(a.hexes.cmp(&b.hexes))
    });
    kept
}

/// Check a submitted hex set against the current candidates. Wasteful trees
/// are never candidates, so a submission buildable with strictly fewer
/// satellites finds no match here.
pub fn matches_candidate(candidates: &[FederationInfo], hexes: &[Hex]) -> Option<FederationInfo> {
    let mut sorted = hexes.to_vec();
    sorted.sort();
    sorted.dedup();
    candidates
        .iter()
        .find(|c| {
            let mut own = c.hexes.clone();
            own.sort();
            own == sorted
        })
        .cloned()
}

struct Component {
    hexes: BTreeSet<Hex>,
    value: u32,
}

/// Flood-fill over hexes with positive building value or membership in the
/// player's existing federation.
fn building_groups(cells: &BTreeMap<Hex, Cell>) -> Vec<Component> {
    let seed = |cell: &Cell| matches!(cell, Cell::Structure(_) | Cell::Anchor);
    let mut seen: BTreeSet<Hex> = BTreeSet::new();
    let mut components = Vec::new();
    for (start, cell) in cells {
        if !seed(cell) || seen.contains(start) {
            continue;
        }
        let mut hexes = BTreeSet::new();
        let mut value = 0;
        let mut queue = VecDeque::from([*start]);
        seen.insert(*start);
        while let Some(hex) = queue.pop_front() {
            if let Some(Cell::Structure(v)) = cells.get(&hex) {
                value += v;
            }
            hexes.insert(hex);
            for next in hex.neighbors() {
                if cells.get(&next).map(seed).unwrap_or(false) && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        components.push(Component { hexes, value });
    }
    components
}

/// Grow a connection tree over the picked components: start from the seed,
/// repeatedly attach the cheapest remaining component by its satellite
/// path, then fold in every adjacent building hex.
fn connect(
    cells: &BTreeMap<Hex, Cell>,
    map: &SpaceMap,
    components: &[Component],
    picked: &[usize],
    seed: usize,
    policy: PathPolicy,
) -> Option<BTreeSet<Hex>> {
    let mut tree: BTreeSet<Hex> = components[picked[seed]].hexes.clone();
    let mut remaining: Vec<usize> = picked
        .iter()
        .enumerate()
        .filter(|(pos, _)| *pos != seed)
        .map(|(_, index)| *index)
        .collect();
    fold_in(cells, &mut tree, &mut remaining, components);

    while !remaining.is_empty() {
        let (dist, parent) = satellite_distances(cells, map, &tree, policy);
        // Cheapest remaining component, ties toward the earlier one.
        let mut best: Option<((u32, u32), usize, Hex)> = None;
        for index in &remaining {
            for hex in &components[*index].hexes {
                if let Some(d) = dist.get(hex) {
                    let candidate = (*d, *index, *hex);
                    if best.map(|b| candidate < b).unwrap_or(true) {
                        best = Some(candidate);
                    }
                }
            }
        }
        let (_, chosen, entry) = best?;

        let mut cursor = entry;
        loop {
            tree.insert(cursor);
            match parent.get(&cursor) {
                Some(prev) => cursor = *prev,
                None => break,
            }
        }
        tree.extend(components[chosen].hexes.iter().copied());
        fold_in(cells, &mut tree, &mut remaining, components);
    }
    Some(tree)
}

/// Pull adjacent building hexes into the tree until nothing new joins, and
/// drop components the tree has absorbed.
fn fold_in(
    cells: &BTreeMap<Hex, Cell>,
    tree: &mut BTreeSet<Hex>,
    remaining: &mut Vec<usize>,
    components: &[Component],
) {
    loop {
        let joining: Vec<Hex> = tree
            .iter()
            .flat_map(|hex| hex.neighbors())
            .filter(|next| {
                !tree.contains(next)
                    && matches!(
                        cells.get(next),
                        Some(Cell::Structure(_) | Cell::Anchor | Cell::FreePass)
                    )
            })
            .collect();
        if joining.is_empty() {
            break;
        }
        tree.extend(joining);
    }
    remaining.retain(|index| !components[*index].hexes.iter().any(|h| tree.contains(h)));
}

/// Dijkstra from the tree. Entering a building hex is free, entering empty
/// space costs one satellite; the secondary cost carries the strict-mode
/// preference for avoiding other players' content, and the pop order
/// carries the forward/reverse tie-break.
fn satellite_distances(
    cells: &BTreeMap<Hex, Cell>,
    map: &SpaceMap,
    tree: &BTreeSet<Hex>,
    policy: PathPolicy,
) -> (BTreeMap<Hex, (u32, u32)>, BTreeMap<Hex, Hex>) {
    let mut dist: BTreeMap<Hex, (u32, u32)> = BTreeMap::new();
    let mut parent: BTreeMap<Hex, Hex> = BTreeMap::new();
    let mut queue: BTreeSet<((u32, u32), Hex)> = BTreeSet::new();
    for hex in tree {
        dist.insert(*hex, (0, 0));
        queue.insert(((0, 0), *hex));
    }
    while let Some((cost, hex)) = pop(&mut queue, policy) {
        for next in hex.neighbors() {
            let satellites = match cells.get(&next) {
                Some(Cell::Structure(_) | Cell::Anchor | Cell::FreePass) => 0,
                Some(Cell::Space) => 1,
                Some(Cell::Blocked) | None => continue,
            };
            let foreign = match policy {
                PathPolicy::AvoidForeign if foreign_content(map, next) => 1,
                _ => 0,
            };
            let through = (cost.0 + satellites, cost.1 + foreign);
            if dist.get(&next).map(|d| through < *d).unwrap_or(true) {
                if let Some(old) = dist.insert(next, through) {
                    queue.remove(&(old, next));
                }
                parent.insert(next, hex);
                queue.insert((through, next));
            }
        }
    }
    (dist, parent)
}

/// Take the cheapest queue entry; among equal costs, `Reverse` settles the
/// highest hex first and the others the lowest.
fn pop(queue: &mut BTreeSet<((u32, u32), Hex)>, policy: PathPolicy) -> Option<((u32, u32), Hex)> {
    if policy != PathPolicy::Reverse {
        return queue.pop_first();
    }
    let cheapest = queue.first().map(|(cost, _)| *cost)?;
    let entry = *queue
        .range((cheapest, Hex::new(i32::MIN, i32::MIN))..=(cheapest, Hex::new(i32::MAX, i32::MAX)))
        .next_back()?;
    queue.remove(&entry);
    Some(entry)
}

fn foreign_content(map: &SpaceMap, hex: Hex) -> bool {
    map.get(hex)
        .map(|data| !data.satellites.is_empty() || !data.ships.is_empty())
        .unwrap_or(false)
}

fn describe(
    map: &SpaceMap,
    cells: &BTreeMap<Hex, Cell>,
    tree: &BTreeSet<Hex>,
    threshold: u32,
) -> Option<FederationInfo> {
    let mut planets = 0;
    let mut satellites = 0;
    let mut new_satellites = 0;
    let mut power_value = 0;
    for hex in tree {
        let data = map.get(*hex)?;
        match cells.get(hex) {
            Some(Cell::Structure(value)) => {
                power_value += value;
                if data.planet.is_some() {
                    planets += 1;
                }
            }
            Some(Cell::Anchor | Cell::FreePass) => satellites += 1,
            Some(Cell::Space) => {
                satellites += 1;
                new_satellites += 1;
            }
            _ => return None,
        }
    }
    if power_value < threshold {
        return None;
    }
    Some(FederationInfo {
        hexes: tree.iter().copied().collect(),
        planets,
        satellites,
        new_satellites,
        power_value,
    })
}
