//! End-to-end simulation tests.
//!
//! These drive a full [`Simulation`] through the public command surface and
//! check the observable outcome: events, health, positions and states.

use skirmish_core::prelude::*;
use skirmish_test_utils::fixtures::{duel, place_building, place_unit, pos, skirmish, stat_table, two_team_config};

fn tick_n(sim: &mut Simulation, n: u32) -> Vec<TickEvents> {
    (0..n).map(|_| sim.tick()).collect()
}

fn health(sim: &Simulation, id: EntityId) -> Option<u32> {
    sim.get_entity(id).map(|e| e.health.current)
}

/// Tick until `pred` holds on the returned events, up to `limit` ticks.
fn tick_until(sim: &mut Simulation, limit: u32, pred: impl Fn(&TickEvents) -> bool) -> Option<TickEvents> {
    (0..limit).map(|_| sim.tick()).find(|events| pred(events))
}

// =============================================================================
// Combat
// =============================================================================

mod combat {
    use super::*;

    #[test]
    fn test_melee_hit_uses_damage_matrix() {
        // Normal attack against medium armor is 150%: 20 → 30.
        let (mut sim, a, d) = duel("footman", "footman", 20);
        let events = sim.tick();

        let damage: Vec<_> = events
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::DamageDealt { attacker, target, amount, .. } => Some((*attacker, *target, *amount)),
                _ => None,
            })
            .collect();
        assert_eq!(damage, vec![(a, d, 30), (d, a, 30)]);
        assert_eq!(health(&sim, a), Some(90));
        assert_eq!(health(&sim, d), Some(90));
    }

    #[test]
    fn test_lower_id_wins_a_mirror_match() {
        // Hits land on ticks 1, 31, 61 and 91; the first mover strikes first.
        let (mut sim, a, d) = duel("footman", "footman", 20);
        let events = tick_n(&mut sim, 91);

        assert_eq!(events[90].deaths(), 1);
        assert!(events[..90].iter().all(|e| e.deaths() == 0));
        assert_eq!(health(&sim, a), Some(30));
        assert!(sim.get_entity(d).is_some_and(|e| !e.is_alive()));
    }

    #[test]
    fn test_cooldown_only_decays_between_attacks() {
        let (mut sim, a, _) = duel("footman", "footman", 20);
        let cooldown = |sim: &Simulation| {
            sim.get_entity(a)
                .and_then(|e| e.attack)
                .map_or(0, |attack| attack.cooldown_remaining)
        };

        let mut previous = cooldown(&sim);
        for _ in 0..80 {
            sim.tick();
            let now = cooldown(&sim);
            assert!(
                now + 1 == previous || (previous == 0 && now == 29),
                "cooldown went from {previous} to {now}"
            );
            previous = now;
        }
    }

    #[test]
    fn test_move_order_waits_out_cooldown() {
        let (mut sim, a, _) = duel("footman", "footman", 20);
        sim.tick();
        let before = sim.get_entity(a).map(|e| (e.position, e.attack.map(|x| x.cooldown_remaining)));
        assert_eq!(before.and_then(|(_, c)| c), Some(29));

        sim.issue_order(a, Order::Move(pos(0, 0)), false).expect("move");
        tick_n(&mut sim, 3);

        let unit = sim.get_entity(a).expect("attacker");
        assert_eq!(unit.state(), Some(UnitState::Move));
        assert_eq!(unit.attack.map(|x| x.cooldown_remaining), Some(26));
        assert_eq!(Some(unit.position), before.map(|(p, _)| p));
    }

    #[test]
    fn test_ranged_attack_travels_as_projectile() {
        // Pierce against unarmored is 150%: 12 → 18.
        let (mut sim, archer, peasant) = duel("archer", "peasant", 100);

        let first = sim.tick();
        assert!(first
            .events
            .iter()
            .any(|e| matches!(e, SimEvent::ProjectileFired { source, target, .. } if *source == archer && *target == peasant)));
        assert_eq!(health(&sim, peasant), Some(40));
        assert_eq!(sim.projectiles().len(), 1);

        let hit = tick_until(&mut sim, 30, |events| {
            events.events.iter().any(|e| matches!(e, SimEvent::ProjectileHit { .. }))
        })
        .expect("projectile lands");
        assert!(hit
            .events
            .iter()
            .any(|e| matches!(e, SimEvent::DamageDealt { amount: 18, .. })));
        assert_eq!(health(&sim, peasant), Some(22));
        assert!(sim.projectiles().is_empty());
    }

    #[test]
    fn test_support_heals_damaged_ally_and_spends_mana() {
        let mut sim = Simulation::new(two_team_config(3), stat_table());
        let cleric = place_unit(&mut sim, "cleric", Team(1), pos(1000, 1000));
        let footman = place_unit(&mut sim, "footman", Team(1), pos(1050, 1000));

        // Save with the footman wounded and reload.
        let mut snapshot = sim.snapshot();
        for saved in &mut snapshot.entities {
            if saved.id == footman {
                saved.health.current = 50;
            }
        }
        let mut sim = Simulation::restore(sim.config().clone(), stat_table(), &snapshot).expect("restore");
        assert_eq!(health(&sim, footman), Some(50));

        sim.tick();
        let mana = sim.get_entity(cleric).and_then(|e| e.mana).map(|m| m.current);
        assert_eq!(mana, Some(Fixed::from_num(90.25)));

        let healed = tick_until(&mut sim, 30, |events| {
            events.events.iter().any(|e| matches!(e, SimEvent::Healed { .. }))
        })
        .expect("heal lands");
        assert!(healed
            .events
            .iter()
            .any(|e| matches!(e, SimEvent::Healed { source, amount: 15, .. } if *source == cleric)));
        assert_eq!(health(&sim, footman), Some(65));
    }

    #[test]
    fn test_unarmed_units_never_fight() {
        let (mut sim, a, d) = duel("peasant", "peasant", 20);
        let events = tick_n(&mut sim, 60);
        assert!(events.iter().all(|e| e.events.is_empty()));
        assert_eq!(health(&sim, a), Some(40));
        assert_eq!(health(&sim, d), Some(40));
    }
}

// =============================================================================
// Death and reaping
// =============================================================================

mod death {
    use super::*;

    #[test]
    fn test_dead_entity_stays_queryable_for_grace_period() {
        // Two hits of 20 kill a 40 hp peasant on tick 31.
        let (mut sim, footman, peasant) = duel("footman", "peasant", 20);
        let grace = sim.config().death_grace_ticks;
        assert_eq!(sim.team(Team(2)).map(|t| t.population), Some(1));

        let events = tick_n(&mut sim, 31);
        assert_eq!(events[30].deaths(), 1);

        let corpse = sim.get_entity(peasant).expect("corpse kept");
        assert!(!corpse.is_alive());
        assert!(!corpse.solid);
        assert_eq!(corpse.state(), Some(UnitState::Die));
        assert_eq!(sim.team(Team(2)).map(|t| t.population), Some(0));

        tick_n(&mut sim, grace);
        assert!(sim.get_entity(peasant).is_some());

        sim.tick();
        assert!(sim.get_entity(peasant).is_none());
        assert_eq!(sim.get_entity(footman).and_then(Entity::state), Some(UnitState::Idle));
    }

    #[test]
    fn test_dead_entities_are_not_attacked_again() {
        let (mut sim, _, peasant) = duel("footman", "peasant", 20);
        let events = tick_n(&mut sim, 120);
        let hits_on_peasant = events
            .iter()
            .flat_map(|e| e.events.iter())
            .filter(|e| matches!(e, SimEvent::DamageDealt { target, .. } if *target == peasant))
            .count();
        assert_eq!(hits_on_peasant, 2);
    }
}

// =============================================================================
// Movement
// =============================================================================

mod movement {
    use super::*;

    fn lone_unit(key: &str, at: Vec2Fixed) -> (Simulation, EntityId) {
        let mut sim = Simulation::new(two_team_config(1), stat_table());
        let id = place_unit(&mut sim, key, Team(1), at);
        (sim, id)
    }

    fn position(sim: &Simulation, id: EntityId) -> Vec2Fixed {
        sim.get_entity(id).map(|e| e.position).unwrap_or_default()
    }

    #[test]
    fn test_move_into_obstacle_stops_at_nearest_free_cell() {
        let (mut sim, unit) = lone_unit("footman", pos(1000, 1000));
        let wall = Entity::obstacle(pos(1200, 1000), Footprint::new(Fixed::from_num(128), Fixed::from_num(128)));
        sim.insert_entity(wall);

        let goal = pos(1200, 1000);
        sim.issue_order(unit, Order::Move(goal), false).expect("move");
        for _ in 0..400 {
            sim.tick();
            assert!(sim.pathfinder().grid().is_world_walkable(position(&sim, unit)));
        }

        assert_eq!(sim.get_entity(unit).and_then(Entity::state), Some(UnitState::Idle));
        assert!(position(&sim, unit).distance(goal) < Fixed::from_num(128));
    }

    #[test]
    fn test_attack_move_without_enemies_arrives() {
        let (mut sim, unit) = lone_unit("footman", pos(200, 1024));
        let goal = pos(600, 1024);
        sim.issue_order(unit, Order::AttackMove(goal), false).expect("attack-move");
        tick_n(&mut sim, 600);

        assert_eq!(sim.get_entity(unit).and_then(Entity::state), Some(UnitState::Idle));
        assert!(position(&sim, unit).distance(goal) <= sim.config().arrival_radius);
    }

    #[test]
    fn test_attack_move_fights_then_continues() {
        let (mut sim, footman) = lone_unit("footman", pos(200, 1024));
        let peasant = place_unit(&mut sim, "peasant", Team(2), pos(700, 1024));
        let goal = pos(1000, 1024);
        sim.issue_order(footman, Order::AttackMove(goal), false).expect("attack-move");

        tick_n(&mut sim, 1500);
        assert!(sim.get_entity(peasant).map_or(true, |p| !p.is_alive()));
        assert_eq!(sim.get_entity(footman).and_then(Entity::state), Some(UnitState::Idle));
        assert!(position(&sim, footman).distance(goal) <= sim.config().arrival_radius);
    }

    #[test]
    fn test_move_stops_for_enemy_in_reach_then_continues() {
        let (mut sim, footman) = lone_unit("footman", pos(200, 1024));
        let peasant = place_unit(&mut sim, "peasant", Team(2), pos(600, 1024));
        let goal = pos(1000, 1024);
        sim.issue_order(footman, Order::Move(goal), false).expect("move");

        let mut fought = false;
        for _ in 0..900 {
            sim.tick();
            fought |= sim.get_entity(footman).and_then(Entity::state) == Some(UnitState::Attack);
        }
        assert!(fought, "never engaged the peasant");
        assert!(sim.get_entity(peasant).map_or(true, |p| !p.is_alive()));
        assert_eq!(sim.get_entity(footman).and_then(Entity::state), Some(UnitState::Idle));
        assert!(position(&sim, footman).distance(goal) <= sim.config().arrival_radius);
    }

    #[test]
    fn test_footprint_never_overlaps_buildings() {
        let (mut sim, unit) = lone_unit("footman", pos(990, 900));
        let farm = place_building(&mut sim, "farm", Team(1), pos(1024, 1024));
        let goal = pos(990, 1150);
        sim.issue_order(unit, Order::Move(goal), false).expect("move");

        let farm_rect = sim.get_entity(farm).map(Entity::rect).expect("farm");
        for tick in 0..600 {
            sim.tick();
            let rect = sim.get_entity(unit).map(Entity::rect).expect("unit");
            assert!(!rect.intersects(&farm_rect), "overlap on tick {tick}: {rect:?}");
        }
        assert_eq!(sim.get_entity(unit).and_then(Entity::state), Some(UnitState::Idle));
        assert!(position(&sim, unit).distance(goal) <= sim.config().arrival_radius);
    }

    #[test]
    fn test_attack_move_routes_around_wall_while_field_pending() {
        let (mut sim, decoy) = lone_unit("footman", pos(200, 200));
        let unit = place_unit(&mut sim, "footman", Team(1), pos(1000, 1000));
        let wall = Entity::obstacle(pos(1060, 1000), Footprint::new(Fixed::from_num(64), Fixed::from_num(320)));
        let wall = sim.insert_entity(wall);
        let wall_rect = sim.get_entity(wall).map(Entity::rect).expect("wall");

        // Only one field computes at a time, so the second goal waits a tick.
        sim.issue_order(decoy, Order::AttackMove(pos(400, 200)), false).expect("decoy");
        let goal = pos(1200, 1000);
        sim.issue_order(unit, Order::AttackMove(goal), false).expect("attack-move");

        sim.tick();
        assert_eq!(sim.pathfinder().flows().cached_len(), 1);
        let velocity = sim.get_entity(unit).map(Entity::velocity).expect("unit");
        assert!(!velocity.is_zero());
        // Heading round the wall, not straight into it.
        assert!(velocity.y.abs() > velocity.x.abs(), "velocity {velocity:?}");

        for _ in 0..1500 {
            sim.tick();
            let rect = sim.get_entity(unit).map(Entity::rect).expect("unit");
            assert!(!rect.intersects(&wall_rect));
        }
        assert_eq!(sim.get_entity(unit).and_then(Entity::state), Some(UnitState::Idle));
        assert!(position(&sim, unit).distance(goal) <= sim.config().arrival_radius);
    }

    #[test]
    fn test_queued_moves_run_in_order() {
        let (mut sim, unit) = lone_unit("footman", pos(500, 500));
        let first = pos(560, 500);
        let second = pos(560, 560);
        sim.issue_order(unit, Order::Move(first), false).expect("first");
        sim.issue_order(unit, Order::Move(second), true).expect("second");

        let current = |sim: &Simulation| {
            sim.get_entity(unit)
                .and_then(|e| e.control.as_ref())
                .and_then(|c| c.orders.current().copied())
        };
        let mut switched = false;
        for _ in 0..120 {
            sim.tick();
            if current(&sim) == Some(Order::Move(second)) {
                switched = true;
                break;
            }
        }
        assert!(switched, "second order never started");
        assert!(position(&sim, unit).distance(first) <= sim.config().arrival_radius + Fixed::from_num(2));

        tick_n(&mut sim, 120);
        assert_eq!(current(&sim), None);
        assert!(position(&sim, unit).distance(second) <= sim.config().arrival_radius);
    }

    #[test]
    fn test_head_on_pair_passes() {
        let mut sim = Simulation::new(two_team_config(5), stat_table());
        let a = place_unit(&mut sim, "footman", Team(1), pos(900, 1000));
        let b = place_unit(&mut sim, "footman", Team(1), pos(1100, 1000));
        sim.issue_order(a, Order::Move(pos(1100, 1000)), false).expect("a");
        sim.issue_order(b, Order::Move(pos(900, 1000)), false).expect("b");

        tick_n(&mut sim, 900);
        for id in [a, b] {
            assert_eq!(sim.get_entity(id).and_then(Entity::state), Some(UnitState::Idle));
        }
        assert!(position(&sim, a).distance(pos(1100, 1000)) <= sim.config().arrival_radius);
        assert!(position(&sim, b).distance(pos(900, 1000)) <= sim.config().arrival_radius);
    }

    #[test]
    fn test_units_stay_inside_the_map() {
        let (mut sim, unit) = lone_unit("footman", pos(20, 20));
        sim.issue_order(unit, Order::Move(pos(-500, -500)), false).expect("move");
        for _ in 0..120 {
            sim.tick();
            let p = position(&sim, unit);
            assert!(p.x >= Fixed::ZERO && p.y >= Fixed::ZERO);
        }
    }
}

// =============================================================================
// Commands and economy
// =============================================================================

mod commands {
    use super::*;

    #[test]
    fn test_spawn_from_production_building() {
        let mut sim = Simulation::new(two_team_config(2), stat_table());
        let barracks = sim
            .place_building("barracks", Team(1), pos(400, 1024))
            .expect("barracks");
        let unit = sim.spawn_unit("archer", Team(1)).expect("archer");

        let building = sim.get_entity(barracks).map(Entity::rect).expect("barracks");
        let spawned = sim.get_entity(unit).map(|e| e.position).expect("archer");
        assert!(spawned.y > building.max.y);
        assert!(sim.pathfinder().grid().is_world_walkable(spawned));

        let team = sim.team(Team(1)).copied().unwrap_or_default();
        assert_eq!(team.resources, 5000 - 150 - 60);
        assert_eq!(team.population_cap, 210);
    }

    #[test]
    fn test_spawn_without_building_uses_spawn_point() {
        let mut sim = Simulation::new(two_team_config(2), stat_table());
        let unit = sim.spawn_unit("footman", Team(2)).expect("footman");
        let spawned = sim.get_entity(unit).map(|e| e.position).expect("footman");
        // Within the configured jitter of the east spawn.
        assert!(spawned.distance(pos(1848, 1024)) <= Fixed::from_num(12));
    }

    #[test]
    fn test_rejected_commands_change_nothing() {
        let mut sim = Simulation::new(two_team_config(2), stat_table());
        let before = sim.state_hash();

        assert!(matches!(sim.spawn_unit("dragon", Team(1)), Err(GameError::UnknownUnitKey(_))));
        assert!(matches!(
            sim.place_building("castle", Team(1), pos(500, 500)),
            Err(GameError::UnknownBuildingKind(_))
        ));
        assert!(matches!(
            sim.place_building("barracks", Team(1), pos(2040, 500)),
            Err(GameError::InvalidPlacement { .. })
        ));
        assert!(matches!(
            sim.spawn_unit("footman", Team(9)),
            Err(GameError::InsufficientResources { .. })
        ));
        assert_eq!(sim.issue_order(42, Order::Stop, false), Err(GameError::EntityNotFound(42)));
        assert_eq!(sim.state_hash(), before);
    }

    #[test]
    fn test_cannot_build_on_units_or_obstacles() {
        let mut sim = Simulation::new(two_team_config(2), stat_table());
        place_unit(&mut sim, "footman", Team(2), pos(600, 600));
        sim.insert_entity(Entity::obstacle(pos(900, 900), Footprint::new(Fixed::from_num(64), Fixed::from_num(64))));

        assert!(!sim.can_place_building("farm", Team(1), pos(620, 600)));
        assert!(!sim.can_place_building("farm", Team(1), pos(930, 900)));
        assert!(sim.can_place_building("farm", Team(1), pos(1300, 1300)));
    }

    #[test]
    fn test_neutral_obstacles_are_never_targeted() {
        let mut sim = Simulation::new(two_team_config(2), stat_table());
        let rock = sim.insert_entity(Entity::obstacle(pos(1000, 1000), Footprint::new(Fixed::from_num(32), Fixed::from_num(32))));
        let footman = place_unit(&mut sim, "footman", Team(1), pos(1030, 1000));
        tick_n(&mut sim, 60);

        assert_eq!(sim.get_entity(footman).and_then(|e| e.attack).and_then(|a| a.target), None);
        assert_eq!(health(&sim, rock), Some(1));
    }

    #[test]
    fn test_events_reach_subscribers() {
        let (mut sim, _, _) = duel("footman", "footman", 20);
        let rx = sim.subscribe();
        let returned = sim.tick();
        let received: Vec<SimEvent> = rx.try_iter().collect();
        assert_eq!(received, returned.events);
    }

    #[test]
    fn test_advance_runs_capped_ticks() {
        let mut sim = Simulation::new(two_team_config(2), stat_table());
        // One second is clamped to 0.25 s: 15 ticks, none dropped.
        let batches = sim.advance(1.0);
        assert_eq!(batches.len(), 15);
        assert_eq!(sim.current_tick(), 15);

        let batches = sim.advance(1.0 / 120.0);
        assert!(batches.is_empty());
        assert!(sim.interpolation_alpha() > 0.4);
    }

    #[test]
    fn test_destroyed_building_triggers_hit_stop() {
        let (mut sim, _, _) = duel("peasant", "peasant", 400);
        let tower = sim.place_building("tower", Team(2), pos(1000, 1400)).expect("tower");
        let catapult = place_unit(&mut sim, "catapult", Team(1), pos(1000, 1150));
        sim.issue_order(catapult, Order::Attack(tower), false).expect("attack");

        let events = tick_until(&mut sim, 3000, |events| {
            events
                .events
                .iter()
                .any(|e| matches!(e, SimEvent::EntityDied { entity, .. } if *entity == tower))
        });
        assert!(events.is_some(), "tower destroyed");
        assert!(sim.clock().in_hit_stop());
    }
}

// =============================================================================
// Snapshots
// =============================================================================

mod snapshots {
    use super::*;

    #[test]
    fn test_restore_keeps_ids_health_and_orders() {
        let mut sim = skirmish(4, 10);
        tick_n(&mut sim, 45);
        let snapshot = sim.snapshot();
        let bytes = snapshot.to_bytes().expect("encode");
        let decoded = SimulationSnapshot::from_bytes(&bytes).expect("decode");

        let mut restored = Simulation::restore(sim.config().clone(), stat_table(), &decoded).expect("restore");
        assert_eq!(restored.current_tick(), 45);
        assert_eq!(restored.snapshot(), snapshot);
        for saved in &snapshot.entities {
            let entity = restored.get_entity(saved.id).expect("same id");
            assert_eq!(entity.position, saved.position);
            assert_eq!(entity.health, saved.health);
        }

        let max_id = snapshot.entities.iter().map(|e| e.id).max().unwrap_or(0);
        let fresh = restored.spawn_unit("footman", Team(1)).expect("spawn after restore");
        assert!(fresh > max_id);
    }

    #[test]
    fn test_restore_drops_attack_on_missing_target() {
        let (sim, a, d) = duel("footman", "footman", 300);
        let mut sim = sim;
        sim.issue_order(a, Order::Attack(d), false).expect("attack");
        let mut snapshot = sim.snapshot();
        snapshot.entities.retain(|e| e.id != d);

        let restored = Simulation::restore(sim.config().clone(), stat_table(), &snapshot).expect("restore");
        let unit = restored.get_entity(a).expect("attacker");
        assert_eq!(unit.state(), Some(UnitState::Idle));
        assert!(unit.control.as_ref().is_some_and(|c| c.orders.current().is_none()));
    }

    #[test]
    fn test_restore_rejects_unknown_keys() {
        let (sim, _, _) = duel("footman", "footman", 300);
        let mut snapshot = sim.snapshot();
        snapshot.entities[0].key = "wyvern".to_string();
        assert!(matches!(
            Simulation::restore(sim.config().clone(), stat_table(), &snapshot),
            Err(GameError::UnknownUnitKey(_))
        ));
    }
}

// =============================================================================
// Determinism
// =============================================================================

mod determinism {
    use super::*;
    use skirmish_test_utils::determinism::{find_first_divergence, verify_determinism};

    #[test]
    fn test_same_seed_same_battle() {
        verify_determinism(3, 600, || skirmish(21, 30), |sim| {
            sim.tick();
        }, Simulation::state_hash)
        .assert_deterministic();
    }

    #[test]
    fn test_no_divergence_tick_by_tick() {
        assert_eq!(find_first_divergence(|| skirmish(8, 20), 400), None);
    }

    #[test]
    fn test_seed_changes_spawn_jitter() {
        let spawn = |seed| {
            let mut sim = Simulation::new(two_team_config(seed), stat_table());
            let id = sim.spawn_unit("footman", Team(1)).expect("spawn");
            sim.get_entity(id).map(|e| e.position)
        };
        assert_eq!(spawn(1), spawn(1));
        assert_ne!(spawn(1), spawn(2));
    }
}
