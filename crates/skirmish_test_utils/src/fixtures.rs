//! Test fixtures and helpers.
//!
//! A small content set written in the same RON the headless runner loads,
//! plus prepared battles for consistent testing. Every fixture uses inline
//! flow-field dispatch so runs are reproducible.

use skirmish_core::components::{EntityId, Order, Team};
use skirmish_core::config::{SimConfig, TeamConfig};
use skirmish_core::data::StatTable;
use skirmish_core::math::{Fixed, Vec2Fixed};
use skirmish_core::pathfinding::FlowDispatch;
use skirmish_core::simulation::Simulation;

/// Content used by tests and benchmarks.
pub const STATS_RON: &str = r#"(
    units: {
        "footman": (
            speed: 60.0,
            health: 120,
            armor: Medium,
            width: 16.0,
            height: 16.0,
            cost: 50,
            population: 1,
            vision_range: 300.0,
            attack: Some((
                damage: 20,
                attack_type: Normal,
                role: Melee,
                range: 10.0,
                cooldown_ticks: 30,
            )),
        ),
        "archer": (
            speed: 55.0,
            health: 70,
            armor: Light,
            width: 14.0,
            height: 14.0,
            cost: 60,
            vision_range: 380.0,
            attack: Some((
                damage: 12,
                attack_type: Pierce,
                role: Ranged,
                range: 160.0,
                cooldown_ticks: 45,
                projectile_speed: 420.0,
                arc_height: 12.0,
            )),
        ),
        "catapult": (
            speed: 35.0,
            health: 150,
            armor: Heavy,
            width: 28.0,
            height: 28.0,
            cost: 150,
            population: 3,
            vision_range: 320.0,
            attack: Some((
                damage: 40,
                attack_type: Siege,
                role: Siege,
                range: 300.0,
                cooldown_ticks: 120,
                projectile_speed: 250.0,
                splash_radius: 40.0,
                arc_height: 60.0,
            )),
        ),
        "cleric": (
            speed: 50.0,
            health: 60,
            armor: Unarmored,
            width: 14.0,
            height: 14.0,
            cost: 80,
            vision_range: 300.0,
            attack: Some((
                damage: 15,
                attack_type: Magic,
                role: Support,
                range: 120.0,
                cooldown_ticks: 60,
                projectile_speed: 300.0,
                heal_mana_cost: 10.0,
            )),
            mana: Some((max: 100.0, regen_per_tick: 0.25)),
            skills: ["heal"],
        ),
        "peasant": (
            speed: 50.0,
            health: 40,
            width: 12.0,
            height: 12.0,
            cost: 25,
            vision_range: 200.0,
        ),
    },
    buildings: {
        "barracks": (
            health: 800,
            width: 96.0,
            height: 96.0,
            cost: 150,
            population_provided: 10,
            produces: ["footman", "archer", "cleric"],
            vision_range: 250.0,
        ),
        "farm": (
            health: 400,
            width: 64.0,
            height: 64.0,
            cost: 60,
            population_provided: 8,
        ),
        "tower": (
            health: 500,
            width: 48.0,
            height: 48.0,
            cost: 100,
            vision_range: 320.0,
            attack: Some((
                damage: 15,
                attack_type: Pierce,
                role: Ranged,
                range: 200.0,
                cooldown_ticks: 40,
                projectile_speed: 500.0,
            )),
        ),
    },
    skills: {
        "heal": (mana_cost: 10.0, cooldown_ticks: 60, range: 120.0),
    },
)"#;

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> Fixed {
    Fixed::from_num(n)
}

/// Create a world position from integers.
#[must_use]
pub fn pos(x: i32, y: i32) -> Vec2Fixed {
    Vec2Fixed::from_ints(x, y)
}

/// Parse [`STATS_RON`].
///
/// # Panics
///
/// Panics if the fixture content does not parse.
#[must_use]
pub fn stat_table() -> StatTable {
    ron::from_str(STATS_RON).expect("fixture stat table parses")
}

/// West spawn of the two-team fixture map.
pub const WEST_SPAWN: (i32, i32) = (200, 1024);

/// East spawn of the two-team fixture map.
pub const EAST_SPAWN: (i32, i32) = (1848, 1024);

/// Default-sized map with team 1 in the west and team 2 in the east.
#[must_use]
pub fn two_team_config(seed: u64) -> SimConfig {
    SimConfig::default()
        .with_seed(seed)
        .with_flow_dispatch(FlowDispatch::Inline)
        .with_team(TeamConfig {
            team: Team(1),
            spawn_point: pos(WEST_SPAWN.0, WEST_SPAWN.1),
            resources: 5000,
            population_cap: 200,
        })
        .with_team(TeamConfig {
            team: Team(2),
            spawn_point: pos(EAST_SPAWN.0, EAST_SPAWN.1),
            resources: 5000,
            population_cap: 200,
        })
}

/// Insert a unit at an exact position, bypassing cost and jitter.
///
/// # Panics
///
/// Panics if `key` is not in the stat table.
pub fn place_unit(sim: &mut Simulation, key: &str, team: Team, position: Vec2Fixed) -> EntityId {
    let unit = sim
        .create_unit(key, team, position)
        .unwrap_or_else(|e| panic!("fixture unit '{key}': {e}"));
    sim.insert_entity(unit)
}

/// Insert a building at an exact position, bypassing cost and placement.
///
/// # Panics
///
/// Panics if `kind` is not in the stat table.
pub fn place_building(sim: &mut Simulation, kind: &str, team: Team, position: Vec2Fixed) -> EntityId {
    let building = sim
        .create_building(kind, team, position)
        .unwrap_or_else(|e| panic!("fixture building '{kind}': {e}"));
    sim.insert_entity(building)
}

/// Two units facing each other `gap` units apart, fog disabled.
///
/// Returns the simulation plus the attacker and defender ids.
#[must_use]
pub fn duel(attacker: &str, defender: &str, gap: i32) -> (Simulation, EntityId, EntityId) {
    let mut config = two_team_config(7);
    config.fog_enabled = false;
    let mut sim = Simulation::new(config, stat_table());
    let a = place_unit(&mut sim, attacker, Team(1), pos(1000 - gap / 2, 1000));
    let d = place_unit(&mut sim, defender, Team(2), pos(1000 + gap / 2, 1000));
    (sim, a, d)
}

/// Two armies of `per_side` mixed units attack-moving at each other.
///
/// Units are laid out in columns in front of each spawn point.
///
/// # Panics
///
/// Panics if an attack-move order is rejected.
#[must_use]
pub fn skirmish(seed: u64, per_side: usize) -> Simulation {
    let mut sim = Simulation::new(two_team_config(seed), stat_table());
    let roster = ["footman", "footman", "archer", "footman", "cleric"];

    for (team, origin, goal, facing) in [
        (Team(1), WEST_SPAWN, EAST_SPAWN, 1),
        (Team(2), EAST_SPAWN, WEST_SPAWN, -1),
    ] {
        for i in 0..per_side {
            let column = (i / 10) as i32;
            let row = (i % 10) as i32;
            let position = pos(origin.0 + facing * column * 24, origin.1 - 120 + row * 24);
            let id = place_unit(&mut sim, roster[i % roster.len()], team, position);
            sim.issue_order(id, Order::AttackMove(pos(goal.0, goal.1)), false)
                .expect("attack-move accepted");
        }
    }
    sim
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_stats_are_clean() {
        let stats = stat_table();
        assert!(stats.validate().is_empty(), "{:?}", stats.validate());
        assert_eq!(stats.units.len(), 5);
        assert!(stats.building("barracks").is_some_and(|b| b.can_produce("archer")));
    }

    #[test]
    fn test_decimal_fields_parse() {
        let stats = stat_table();
        let cleric = stats.unit("cleric").expect("cleric");
        assert_eq!(cleric.mana.as_ref().map(|m| m.regen_per_tick), Some(Fixed::from_num(0.25)));
        assert_eq!(stats.unit("footman").map(|u| u.speed), Some(fixed(60)));
    }

    #[test]
    fn test_skirmish_layout() {
        let sim = skirmish(1, 12);
        assert_eq!(sim.entities().len(), 24);
        assert_eq!(sim.team(Team(1)).map(|t| t.population), Some(12));
    }
}
