//! Per-unit state machine.
//!
//! Each tick the simulation takes one entity out of storage and hands it to
//! [`update`] together with read access to everyone else. The update picks
//! a desired velocity from the entity's state, runs it through the
//! avoidance solver and may return a [`Strike`] for the simulation to
//! resolve once the entity is back in storage.
//!
//! # Transitions
//!
//! - `Idle`: scans periodically; a found target switches to `Attack`.
//! - `Move`: follows its A* path. Scans on the way but only engages a
//!   target already inside attack range, and never chases it.
//! - `AttackMove`: follows the shared flow field and scans on the way. While
//!   the field is still computing it walks an interim A* route.
//! - `Attack`: holds during cooldown, chases when out of range, fires when
//!   ready. A lost target resumes the current order (or goes `Idle`).
//! - `Die`: set by the simulation; nothing happens here.
//!
//! A unit whose attack is cooling down holds position in every state.

use rand_chacha::ChaCha8Rng;
use tracing::trace;

use crate::avoidance::{self, Agent, Neighbor, RotationTable};
use crate::components::{Attack, AttackRole, Entity, EntityId, EntityKind, Order, Team, UnitState};
use crate::config::SimConfig;
use crate::fog::FogOfWar;
use crate::math::{Fixed, Vec2Fixed};
use crate::pathfinding::{Direction, Pathfinder};
use crate::simulation::EntityStorage;
use crate::spatial::SpatialIndex;

/// Everything an entity's update may look at besides itself.
pub(crate) struct Context<'a> {
    pub entities: &'a EntityStorage,
    pub spatial: &'a SpatialIndex,
    pub pathfinder: &'a mut Pathfinder,
    pub fog: &'a FogOfWar,
    pub config: &'a SimConfig,
    pub rotations: &'a RotationTable,
    pub rng: &'a mut ChaCha8Rng,
    pub scratch: &'a mut Vec<EntityId>,
    pub neighbors: &'a mut Vec<Neighbor>,
    pub dt: Fixed,
}

/// An attack that fired this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Strike {
    pub attacker: EntityId,
    pub team: Team,
    pub target: EntityId,
    pub origin: Vec2Fixed,
    pub aim: Vec2Fixed,
    pub attack: Attack,
}

/// Run one tick of the state machine for `entity`.
pub(crate) fn update(entity: &mut Entity, ctx: &mut Context<'_>) -> Option<Strike> {
    if !entity.is_alive() {
        return None;
    }
    let interval = ctx.config.scan_interval_ticks;
    let scan_due = match entity.control.as_mut() {
        Some(control) => tick_scan(&mut control.scan_ticks, interval),
        None => return None,
    };

    let mut strike = None;
    let desired = match entity.state() {
        Some(UnitState::Idle) => {
            if scan_due && acquire(entity, ctx, Reach::Scan) {
                engage(entity, ctx, &mut strike)
            } else {
                Vec2Fixed::ZERO
            }
        }
        Some(UnitState::Move | UnitState::AttackMove) if cooling_down(entity) => Vec2Fixed::ZERO,
        Some(UnitState::Move) => {
            if scan_due && acquire(entity, ctx, Reach::Attack) {
                engage(entity, ctx, &mut strike)
            } else {
                follow_path(entity, ctx)
            }
        }
        Some(UnitState::AttackMove) => {
            if scan_due && acquire(entity, ctx, Reach::Scan) {
                engage(entity, ctx, &mut strike)
            } else {
                follow_flow(entity, ctx)
            }
        }
        Some(UnitState::Attack) => engage(entity, ctx, &mut strike),
        Some(UnitState::Die) | None => Vec2Fixed::ZERO,
    };

    steer(entity, desired, ctx);
    strike
}

/// Make `order` the entity's active behaviour.
///
/// The order must already be current in the entity's queue.
pub(crate) fn begin_order(entity: &mut Entity, order: Order, pathfinder: &mut Pathfinder) {
    if let Some(movement) = entity.movement.as_mut() {
        movement.clear_route();
    }
    if let Some(attack) = entity.attack.as_mut() {
        attack.target = None;
    }

    let state = match order {
        Order::Move(goal) => {
            let (position, clearance) = (entity.position, entity.radius());
            if let Some(movement) = entity.movement.as_mut() {
                movement.path = pathfinder.find_path(position, goal, clearance).into();
            }
            UnitState::Move
        }
        Order::AttackMove(goal) => {
            if let Some(movement) = entity.movement.as_mut() {
                let cell = pathfinder.flow_goal(goal);
                movement.flow_goal = Some(cell);
                pathfinder.request_flow(cell);
            }
            UnitState::AttackMove
        }
        Order::Attack(target) => {
            if entity.attack.is_none() {
                advance_order(entity, pathfinder);
                return;
            }
            if let Some(attack) = entity.attack.as_mut() {
                attack.target = Some(target);
            }
            UnitState::Attack
        }
        Order::Stop => {
            if let Some(control) = entity.control.as_mut() {
                control.orders.clear();
            }
            if let Some(movement) = entity.movement.as_mut() {
                movement.velocity = Vec2Fixed::ZERO;
            }
            UnitState::Idle
        }
    };
    set_state(entity, state);
}

/// Finish the current order and start the next queued one.
pub(crate) fn advance_order(entity: &mut Entity, pathfinder: &mut Pathfinder) {
    let next = entity.control.as_mut().and_then(|c| c.orders.complete());
    match next {
        Some(order) => begin_order(entity, order, pathfinder),
        None => {
            if let Some(movement) = entity.movement.as_mut() {
                movement.clear_route();
            }
            set_state(entity, UnitState::Idle);
        }
    }
}

fn set_state(entity: &mut Entity, state: UnitState) {
    if let Some(control) = entity.control.as_mut() {
        if control.state != state {
            trace!(entity = entity.id, from = ?control.state, to = ?state, "state transition");
            control.state = state;
        }
    }
}

fn cooling_down(entity: &Entity) -> bool {
    entity.attack.is_some_and(|a| !a.can_fire())
}

/// Count down the scan timer; true when a scan is due this tick.
fn tick_scan(timer: &mut u32, interval: u32) -> bool {
    if *timer == 0 {
        *timer = interval;
        true
    } else {
        *timer -= 1;
        false
    }
}

// ============================================================================
// Targeting
// ============================================================================

/// Distance from the attacker's edge to the target's footprint.
fn reach(attacker: &Entity, target: &Entity) -> Fixed {
    (target.rect().distance_to(attacker.position) - attacker.radius()).max(Fixed::ZERO)
}

fn scan_range(entity: &Entity, attack: &Attack, config: &SimConfig) -> Fixed {
    if entity.movement.is_none() {
        attack.range + entity.radius()
    } else {
        config.scan_range(attack.role == AttackRole::Melee)
    }
}

fn is_candidate(entity: &Entity, attack: &Attack, other: &Entity, fog: &FogOfWar) -> bool {
    if other.id == entity.id || !other.is_alive() || other.kind == EntityKind::Obstacle {
        return false;
    }
    if attack.role.targets_allies() {
        other.team == entity.team && !other.health.is_full()
    } else {
        entity.team.is_hostile_to(other.team) && fog.is_visible(entity.team, other.position)
    }
}

/// Units first, then armed buildings, then everything else.
fn target_class(other: &Entity) -> u8 {
    match other.kind {
        EntityKind::Unit => 0,
        EntityKind::Building if other.attack.is_some() => 1,
        _ => 2,
    }
}

/// How far a scan may look for a new target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reach {
    /// Anything within scan range.
    Scan,
    /// Only targets the attack already reaches.
    Attack,
}

/// Scan for the best target; on success switch to `Attack`.
fn acquire(entity: &mut Entity, ctx: &mut Context<'_>, reach_limit: Reach) -> bool {
    let Some(attack) = entity.attack else {
        return false;
    };
    let range = scan_range(entity, &attack, ctx.config);
    let static_only = entity.movement.is_none() || reach_limit == Reach::Attack;
    let query = range.max(attack.range + entity.radius());
    ctx.spatial
        .query_near(entity.position, ctx.spatial.cells_for_distance(query), ctx.scratch);

    let mut best: Option<(u8, Fixed, EntityId)> = None;
    for &id in ctx.scratch.iter() {
        let Some(other) = ctx.entities.get(id) else {
            continue;
        };
        if !is_candidate(entity, &attack, other, ctx.fog) {
            continue;
        }
        let distance = entity.position.distance(other.position);
        let in_scan = if static_only {
            reach(entity, other) <= attack.range
        } else {
            distance <= range
        };
        if !in_scan {
            continue;
        }
        let class = if attack.role.targets_allies() { 0 } else { target_class(other) };
        let key = (class, distance, id);
        if best.map_or(true, |b| key < b) {
            best = Some(key);
        }
    }

    let Some((_, _, target)) = best else {
        return false;
    };
    trace!(entity = entity.id, target, "target acquired");
    if let Some(attack) = entity.attack.as_mut() {
        attack.target = Some(target);
    }
    set_state(entity, UnitState::Attack);
    true
}

/// Whether the entity's current order names `target` explicitly.
fn ordered_target(entity: &Entity, target: EntityId) -> bool {
    entity
        .control
        .as_ref()
        .and_then(|c| c.orders.current())
        .is_some_and(|order| *order == Order::Attack(target))
}

fn still_valid(entity: &Entity, attack: &Attack, target: &Entity, ctx: &Context<'_>) -> bool {
    if !target.is_alive() {
        return false;
    }
    if attack.role.targets_allies() {
        return target.team == entity.team && !target.health.is_full();
    }
    if !ctx.fog.is_visible(entity.team, target.position) {
        return false;
    }
    if entity.movement.is_none() || on_plain_move(entity) {
        return reach(entity, target) <= attack.range;
    }
    ordered_target(entity, target.id)
        || entity.position.distance(target.position) <= scan_range(entity, attack, ctx.config)
}

/// Whether the current order is a plain move, which never chases.
fn on_plain_move(entity: &Entity) -> bool {
    entity
        .control
        .as_ref()
        .and_then(|c| c.orders.current())
        .is_some_and(|order| matches!(order, Order::Move(_)))
}

/// Drop the current target and go back to whatever the order says.
fn resume(entity: &mut Entity, ctx: &mut Context<'_>) -> Vec2Fixed {
    let previous = entity.attack.as_mut().and_then(|a| a.target.take());
    trace!(entity = entity.id, ?previous, "target lost");
    if let Some(movement) = entity.movement.as_mut() {
        movement.path.clear();
        movement.repath_ticks = 0;
    }

    let current = entity.control.as_ref().and_then(|c| c.orders.current().copied());
    match current {
        Some(Order::Attack(_)) => advance_order(entity, ctx.pathfinder),
        Some(Order::Move(goal)) => begin_order(entity, Order::Move(goal), ctx.pathfinder),
        Some(Order::AttackMove(_)) => set_state(entity, UnitState::AttackMove),
        Some(Order::Stop) | None => set_state(entity, UnitState::Idle),
    }
    Vec2Fixed::ZERO
}

/// Attack-state behaviour: hold, chase or fire.
fn engage(entity: &mut Entity, ctx: &mut Context<'_>, strike: &mut Option<Strike>) -> Vec2Fixed {
    let Some(attack) = entity.attack else {
        return resume(entity, ctx);
    };
    let Some(target_id) = attack.target else {
        return resume(entity, ctx);
    };
    let target = ctx
        .entities
        .get(target_id)
        .filter(|t| still_valid(entity, &attack, t, ctx))
        .map(|t| (t.position, reach(entity, t)));
    let Some((target_position, distance)) = target else {
        return resume(entity, ctx);
    };

    if !attack.can_fire() {
        return Vec2Fixed::ZERO;
    }

    if distance > attack.range {
        if entity.movement.is_none() {
            return resume(entity, ctx);
        }
        return chase(entity, target_position, ctx);
    }

    if attack.role == AttackRole::Support {
        if let Some(mana) = entity.mana.as_mut() {
            if !mana.try_spend(attack.heal_mana_cost) {
                return Vec2Fixed::ZERO;
            }
        }
    }

    if let Some(movement) = entity.movement.as_mut() {
        movement.path.clear();
    }
    if let Some(control) = entity.control.as_mut() {
        let facing = target_position - entity.position;
        if !facing.is_zero() {
            control.facing = facing.normalize();
        }
    }
    if let Some(attack) = entity.attack.as_mut() {
        attack.reset_cooldown();
    }
    *strike = Some(Strike {
        attacker: entity.id,
        team: entity.team,
        target: target_id,
        origin: entity.position,
        aim: target_position,
        attack,
    });
    Vec2Fixed::ZERO
}

// ============================================================================
// Movement
// ============================================================================

/// Velocity from `from` towards `to` that does not overshoot within a tick.
fn toward(from: Vec2Fixed, to: Vec2Fixed, speed: Fixed, dt: Fixed) -> Vec2Fixed {
    let offset = to - from;
    let distance = offset.length();
    if distance == Fixed::ZERO {
        return Vec2Fixed::ZERO;
    }
    let limit = if dt > Fixed::ZERO { distance / dt } else { speed };
    offset.with_length(speed.min(limit))
}

/// Drop reached waypoints and head for the next one.
fn seek(entity: &mut Entity, arrival: Fixed, dt: Fixed) -> Vec2Fixed {
    let position = entity.position;
    let Some(movement) = entity.movement.as_mut() else {
        return Vec2Fixed::ZERO;
    };
    while movement
        .path
        .front()
        .is_some_and(|waypoint| waypoint.distance(position) <= arrival)
    {
        movement.path.pop_front();
    }
    movement
        .path
        .front()
        .map_or(Vec2Fixed::ZERO, |&waypoint| toward(position, waypoint, movement.speed, dt))
}

fn follow_path(entity: &mut Entity, ctx: &mut Context<'_>) -> Vec2Fixed {
    let velocity = seek(entity, ctx.config.arrival_radius, ctx.dt);
    let arrived = entity.movement.as_ref().map_or(true, |m| m.path.is_empty());
    if arrived {
        trace!(entity = entity.id, "move order complete");
        advance_order(entity, ctx.pathfinder);
        return Vec2Fixed::ZERO;
    }
    velocity
}

fn chase(entity: &mut Entity, target: Vec2Fixed, ctx: &mut Context<'_>) -> Vec2Fixed {
    let (position, clearance) = (entity.position, entity.radius());
    let Some(movement) = entity.movement.as_mut() else {
        return Vec2Fixed::ZERO;
    };
    if movement.repath_ticks == 0 || movement.path.is_empty() {
        movement.path = ctx.pathfinder.find_path(position, target, clearance).into();
        movement.repath_ticks = ctx.config.repath_interval_ticks;
    } else {
        movement.repath_ticks -= 1;
    }
    seek(entity, ctx.config.arrival_radius, ctx.dt)
}

fn follow_flow(entity: &mut Entity, ctx: &mut Context<'_>) -> Vec2Fixed {
    let Some(Order::AttackMove(target)) = entity.control.as_ref().and_then(|c| c.orders.current().copied())
    else {
        return resume(entity, ctx);
    };
    let position = entity.position;
    let Some(movement) = entity.movement.as_mut() else {
        return Vec2Fixed::ZERO;
    };
    let speed = movement.speed;
    let goal = *movement
        .flow_goal
        .get_or_insert_with(|| ctx.pathfinder.flow_goal(target));

    if position.distance(target) <= ctx.config.arrival_radius {
        trace!(entity = entity.id, "attack-move complete");
        advance_order(entity, ctx.pathfinder);
        return Vec2Fixed::ZERO;
    }

    let grid = ctx.pathfinder.grid();
    let cell = grid.world_to_grid_clamped(position);
    if cell == goal {
        if grid.world_to_grid(target) != Some(goal) {
            // The target itself is blocked; the substitute cell is as close as it gets.
            advance_order(entity, ctx.pathfinder);
            return Vec2Fixed::ZERO;
        }
        return toward(position, target, speed, ctx.dt);
    }

    let direction = ctx.pathfinder.request_flow(goal).direction_at(cell.0, cell.1);
    match direction {
        // Still computing.
        None => interim_route(entity, target, ctx),
        // Complete but no way forward from here.
        Some(Direction::None) => {
            clear_path(entity);
            toward(position, target, speed, ctx.dt)
        }
        Some(direction) => {
            clear_path(entity);
            direction.to_vector().scale(speed)
        }
    }
}

/// Walk an A* route towards `target` until the flow field is published.
fn interim_route(entity: &mut Entity, target: Vec2Fixed, ctx: &mut Context<'_>) -> Vec2Fixed {
    let (position, clearance) = (entity.position, entity.radius());
    if let Some(movement) = entity.movement.as_mut() {
        if movement.path.is_empty() {
            trace!(entity = entity.id, "flow field pending, routing with A*");
            movement.path = ctx.pathfinder.find_path(position, target, clearance).into();
        }
    }
    seek(entity, ctx.config.arrival_radius, ctx.dt)
}

fn clear_path(entity: &mut Entity) {
    if let Some(movement) = entity.movement.as_mut() {
        movement.path.clear();
    }
}

/// Turn the desired velocity into a safe one and store it.
fn steer(entity: &mut Entity, desired: Vec2Fixed, ctx: &mut Context<'_>) {
    let Some(movement) = entity.movement.as_ref() else {
        return;
    };
    let agent = Agent {
        position: entity.position,
        velocity: movement.velocity,
        radius: entity.radius(),
        max_speed: movement.speed,
    };

    let config = &ctx.config.avoidance;
    let radius = config.neighbor_radius;
    // A pursuer must be able to close on its own target.
    let pursued = entity.attack.and_then(|a| a.target);
    ctx.spatial
        .query_near(entity.position, ctx.spatial.cells_for_distance(radius), ctx.scratch);
    ctx.neighbors.clear();
    for &id in ctx.scratch.iter() {
        let Some(other) = ctx.entities.get(id) else {
            continue;
        };
        if other.id == entity.id || Some(other.id) == pursued {
            continue;
        }
        if other.kind != EntityKind::Unit || !other.solid || !other.is_alive() {
            continue;
        }
        if other.position.distance_squared(entity.position) > radius * radius {
            continue;
        }
        ctx.neighbors.push(Neighbor {
            position: other.position,
            velocity: other.velocity(),
            radius: other.radius(),
        });
    }

    let velocity = avoidance::solve(config, ctx.rotations, &agent, desired, ctx.neighbors, ctx.rng);
    if let Some(movement) = entity.movement.as_mut() {
        movement.velocity = velocity;
    }
    if !velocity.is_zero() {
        if let Some(control) = entity.control.as_mut() {
            control.facing = velocity.normalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Control, Footprint, Health, Movement};
    use crate::pathfinding::{CostGrid, FlowDispatch, DEFAULT_IMPASSABLE};

    fn pathfinder() -> Pathfinder {
        let grid = CostGrid::for_map(
            Fixed::from_num(640),
            Fixed::from_num(640),
            Fixed::from_num(32),
            DEFAULT_IMPASSABLE,
        );
        Pathfinder::new(grid, FlowDispatch::Inline)
    }

    fn unit(x: i32, y: i32) -> Entity {
        let mut e = Entity::new(
            EntityKind::Unit,
            "footman",
            Team(1),
            Vec2Fixed::from_ints(x, y),
            Footprint::new(Fixed::from_num(16), Fixed::from_num(16)),
            Health::new(100),
        );
        e.id = 1;
        e.movement = Some(Movement::new(Fixed::from_num(60)));
        e.control = Some(Control::default());
        e
    }

    fn issue(entity: &mut Entity, order: Order, queued: bool, pathfinder: &mut Pathfinder) {
        let became_current = entity
            .control
            .as_mut()
            .is_some_and(|c| c.orders.issue(order, queued));
        if became_current {
            begin_order(entity, order, pathfinder);
        }
    }

    #[test]
    fn test_move_order_builds_path() {
        let mut pf = pathfinder();
        let mut e = unit(50, 50);
        issue(&mut e, Order::Move(Vec2Fixed::from_ints(400, 300)), false, &mut pf);

        assert_eq!(e.state(), Some(UnitState::Move));
        let path = e.movement.as_ref().map(|m| m.path.clone()).unwrap_or_default();
        assert_eq!(path.back().copied(), Some(Vec2Fixed::from_ints(400, 300)));
    }

    #[test]
    fn test_stop_clears_queue() {
        let mut pf = pathfinder();
        let mut e = unit(50, 50);
        issue(&mut e, Order::Move(Vec2Fixed::from_ints(400, 300)), false, &mut pf);
        issue(&mut e, Order::Move(Vec2Fixed::from_ints(100, 300)), true, &mut pf);
        issue(&mut e, Order::Stop, false, &mut pf);

        let control = e
            .control
            .as_ref()
            .map(|c| (c.state, c.orders.pending_len(), c.orders.current().copied()));
        assert_eq!(control, Some((UnitState::Idle, 0, None)));
    }

    #[test]
    fn test_completed_order_promotes_queue() {
        let mut pf = pathfinder();
        let mut e = unit(50, 50);
        issue(&mut e, Order::Move(Vec2Fixed::from_ints(400, 300)), false, &mut pf);
        issue(&mut e, Order::AttackMove(Vec2Fixed::from_ints(100, 300)), true, &mut pf);
        assert_eq!(e.state(), Some(UnitState::Move));

        advance_order(&mut e, &mut pf);
        assert_eq!(e.state(), Some(UnitState::AttackMove));
        assert!(e.movement.as_ref().is_some_and(|m| m.flow_goal.is_some()));

        advance_order(&mut e, &mut pf);
        assert_eq!(e.state(), Some(UnitState::Idle));
    }

    #[test]
    fn test_attack_order_without_weapon_is_skipped() {
        let mut pf = pathfinder();
        let mut e = unit(50, 50);
        issue(&mut e, Order::Attack(99), false, &mut pf);
        assert_eq!(e.state(), Some(UnitState::Idle));
    }

    #[test]
    fn test_scan_timer_fires_every_interval() {
        let mut timer = 0;
        let fired: Vec<bool> = (0..7).map(|_| tick_scan(&mut timer, 2)).collect();
        assert_eq!(fired, vec![true, false, false, true, false, false, true]);
    }

    #[test]
    fn test_toward_never_overshoots() {
        let dt = Fixed::ONE / Fixed::from_num(60);
        let target = Vec2Fixed::new(Fixed::ZERO, Fixed::from_num(0.5));
        let v = toward(Vec2Fixed::ZERO, target, Fixed::from_num(60), dt);
        // 0.5 units away at 60/s would overshoot; speed is limited to 30/s.
        assert!((v.y - Fixed::from_num(30)).abs() < Fixed::from_num(0.01));
    }

    #[test]
    fn test_target_class_order() {
        let u = unit(0, 0);
        let mut tower = unit(0, 0);
        tower.kind = EntityKind::Building;
        tower.attack = Some(crate::data::AttackStats {
            damage: 1,
            attack_type: crate::components::AttackType::Pierce,
            role: AttackRole::Ranged,
            range: Fixed::from_num(100),
            cooldown_ticks: 10,
            projectile_speed: Fixed::from_num(100),
            splash_radius: Fixed::ZERO,
            arc_height: Fixed::ZERO,
            heal_mana_cost: Fixed::ZERO,
        }
        .to_attack());
        let mut farm = unit(0, 0);
        farm.kind = EntityKind::Building;
        assert!(target_class(&u) < target_class(&tower));
        assert!(target_class(&tower) < target_class(&farm));
    }
}
