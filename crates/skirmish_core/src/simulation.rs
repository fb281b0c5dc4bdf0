//! Core simulation loop.
//!
//! [`Simulation`] is the one context object: it owns entity storage, the
//! spatial index, the pathfinder, fog of war, the clock, the seeded RNG and
//! the event bus. There are no globals.
//!
//! # Determinism
//!
//! Given identical configuration, content and commands, two simulations
//! produce identical trajectories:
//! - all simulation math is fixed-point (see [`Fixed`])
//! - entities are processed in ascending id order every tick
//! - the only randomness is the seeded [`ChaCha8Rng`]
//! - with [`FlowDispatch::Inline`] flow fields are published on a fixed tick
//!
//! # Example
//!
//! ```
//! use skirmish_core::config::{SimConfig, TeamConfig};
//! use skirmish_core::data::StatTable;
//! use skirmish_core::components::Team;
//! use skirmish_core::math::Vec2Fixed;
//! use skirmish_core::pathfinding::FlowDispatch;
//! use skirmish_core::simulation::Simulation;
//!
//! let config = SimConfig::default()
//!     .with_flow_dispatch(FlowDispatch::Inline)
//!     .with_team(TeamConfig {
//!         team: Team(1),
//!         spawn_point: Vec2Fixed::from_ints(100, 100),
//!         resources: 0,
//!         population_cap: 0,
//!     });
//! let mut sim = Simulation::new(config, StatTable::default());
//! let events = sim.tick();
//! assert_eq!(events.tick, 1);
//! assert_eq!(sim.current_tick(), 1);
//! ```
//!
//! [`FlowDispatch::Inline`]: crate::pathfinding::FlowDispatch::Inline

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::mpsc::Receiver;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::avoidance::{Neighbor, RotationTable};
use crate::behavior::{self, Context, Strike};
use crate::clock::SimulationClock;
use crate::combat::{step_projectile, ProjectileStep};
use crate::components::{
    AttackRole, AttackType, Control, Entity, EntityId, EntityKind, Footprint, Health, Movement,
    Order, Projectile, Team, UnitState,
};
use crate::config::SimConfig;
use crate::data::{AttackStats, ManaStats, StatTable};
use crate::error::{GameError, Result};
use crate::events::{EventBus, SimEvent, TickEvents};
use crate::fog::FogOfWar;
use crate::math::{Fixed, Rect, Vec2Fixed};
use crate::pathfinding::{CostGrid, Pathfinder};
use crate::spatial::SpatialIndex;

/// Gap left between a production building and a unit spawned below it.
const SPAWN_GAP: i32 = 4;

/// Storage for all entities in the simulation.
///
/// Uses a `HashMap` for O(1) entity lookup by ID, with deterministic
/// iteration via sorted keys when processing systems.
#[derive(Debug, Clone, Default)]
pub struct EntityStorage {
    entities: HashMap<EntityId, Entity>,
    next_id: EntityId,
}

impl EntityStorage {
    /// Create empty entity storage. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_id: 1,
        }
    }

    /// Insert a new entity and return its assigned ID.
    pub fn insert(&mut self, mut entity: Entity) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        entity.id = id;
        self.entities.insert(id, entity);
        id
    }

    /// Insert an entity under a fixed id, as when restoring a snapshot.
    pub(crate) fn insert_with_id(&mut self, id: EntityId, mut entity: Entity) {
        entity.id = id;
        self.next_id = self.next_id.max(id + 1);
        self.entities.insert(id, entity);
    }

    /// Temporarily take an entity out for an exclusive update.
    pub(crate) fn take(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Return an entity taken with [`Self::take`].
    pub(crate) fn put_back(&mut self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    /// Remove an entity by ID.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Get an entity by ID.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Get a mutable reference to an entity by ID.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Check if an entity exists.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Get the number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Get sorted entity IDs for deterministic iteration.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over all entities in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.sorted_ids()
            .into_iter()
            .filter_map(move |id| self.entities.get(&id))
    }

    /// Iterate over all entities in no particular order.
    pub fn values(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }
}

/// Per-team economy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TeamState {
    /// Unspent resources.
    pub resources: u32,
    /// Population used by living units.
    pub population: u32,
    /// Population allowed.
    pub population_cap: u32,
}

impl TeamState {
    fn charge(&self, team: Team, cost: u32) -> Result<()> {
        if self.resources < cost {
            return Err(GameError::InsufficientResources {
                team,
                required: cost,
                available: self.resources,
            });
        }
        Ok(())
    }

    fn room_for(&self, team: Team, population: u32) -> Result<()> {
        if self.population.saturating_add(population) > self.population_cap {
            return Err(GameError::PopulationCapReached {
                team,
                population: self.population,
                cap: self.population_cap,
                required: population,
            });
        }
        Ok(())
    }
}

/// The core game simulation.
///
/// # Tick order
///
/// 1. Publish a finished background flow field, if any
/// 2. Rebuild the dynamic spatial grid
/// 3. Refresh fog of war
/// 4. Run every entity's state machine and steering, resolving strikes
/// 5. Integrate positions against the cost grid and map bounds
/// 6. Advance projectiles, decay cooldowns, regenerate mana
/// 7. Mark new deaths and reap entities past the grace period
pub struct Simulation {
    config: SimConfig,
    stats: StatTable,
    tick: u64,
    entities: EntityStorage,
    projectiles: Vec<Projectile>,
    next_projectile_id: u64,
    teams: BTreeMap<Team, TeamState>,
    spatial: SpatialIndex,
    pathfinder: Pathfinder,
    fog: FogOfWar,
    clock: SimulationClock,
    rotations: RotationTable,
    rng: ChaCha8Rng,
    events: EventBus,
    max_unit_radius: Fixed,
    scratch: Vec<EntityId>,
    neighbors: Vec<Neighbor>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("tick", &self.tick)
            .field("entities", &self.entities.len())
            .field("projectiles", &self.projectiles.len())
            .field("teams", &self.teams)
            .field("pathfinder", &self.pathfinder)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Create an empty simulation.
    ///
    /// Content problems are logged as warnings and never block startup.
    #[must_use]
    pub fn new(config: SimConfig, stats: StatTable) -> Self {
        for warning in stats.validate() {
            warn!(%warning, "content validation");
        }

        let mut teams = BTreeMap::new();
        for setup in &config.teams {
            if setup.team.is_neutral() {
                warn!("team 0 is neutral and cannot be configured, ignoring");
                continue;
            }
            teams.insert(
                setup.team,
                TeamState {
                    resources: setup.resources,
                    population: 0,
                    population_cap: setup.population_cap,
                },
            );
        }

        let grid = CostGrid::for_map(
            config.map_width,
            config.map_height,
            config.path_cell_size,
            config.impassable_cost,
        );
        let max_unit_radius = stats
            .units
            .values()
            .map(|u| u.footprint().radius())
            .max()
            .unwrap_or(Fixed::ZERO);

        info!(
            seed = config.seed,
            units = stats.units.len(),
            buildings = stats.buildings.len(),
            grid_width = grid.width(),
            grid_height = grid.height(),
            "simulation created"
        );

        Self {
            spatial: SpatialIndex::new(config.map_width, config.map_height, config.spatial_cell_size),
            pathfinder: Pathfinder::new(grid, config.flow_dispatch),
            fog: FogOfWar::new(
                config.map_width,
                config.map_height,
                config.fog_cell_size,
                config.fog_enabled,
            ),
            clock: SimulationClock::new(config.clock.clone()),
            rotations: RotationTable::new(&config.avoidance.fan_angles),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            events: EventBus::new(),
            tick: 0,
            entities: EntityStorage::new(),
            projectiles: Vec::new(),
            next_projectile_id: 1,
            teams,
            max_unit_radius,
            scratch: Vec::new(),
            neighbors: Vec::new(),
            config,
            stats,
        }
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    /// Get the current tick number.
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Content data in use.
    #[must_use]
    pub const fn stats(&self) -> &StatTable {
        &self.stats
    }

    /// All entities, including dead ones awaiting removal.
    #[must_use]
    pub const fn entities(&self) -> &EntityStorage {
        &self.entities
    }

    /// Get an entity by ID.
    #[must_use]
    pub fn get_entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Projectiles in flight.
    #[must_use]
    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    /// Economy of `team`, if the team exists.
    #[must_use]
    pub fn team(&self, team: Team) -> Option<&TeamState> {
        self.teams.get(&team)
    }

    /// Every team's economy, by team.
    pub fn teams(&self) -> impl Iterator<Item = (Team, &TeamState)> {
        self.teams.iter().map(|(team, state)| (*team, state))
    }

    /// Fraction of a tick left over after the last [`Self::advance`].
    ///
    /// For rendering interpolation only.
    #[must_use]
    pub fn interpolation_alpha(&self) -> f64 {
        self.clock.alpha()
    }

    /// The fixed-timestep clock.
    #[must_use]
    pub const fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    /// The pathfinder (cost grid and flow-field cache).
    #[must_use]
    pub const fn pathfinder(&self) -> &Pathfinder {
        &self.pathfinder
    }

    /// Fog of war as of the last tick.
    #[must_use]
    pub const fn fog(&self) -> &FogOfWar {
        &self.fog
    }

    /// Receive every event published from now on.
    pub fn subscribe(&mut self) -> Receiver<SimEvent> {
        self.events.subscribe()
    }

    /// Set the clock's base time scale.
    pub fn set_time_scale(&mut self, scale: f64) {
        self.clock.set_time_scale(scale);
    }

    /// Wait until every requested flow field has been published.
    pub fn block_until_paths_ready(&mut self) {
        self.pathfinder.block_until_idle();
    }

    // ------------------------------------------------------------------
    // Entity construction
    // ------------------------------------------------------------------

    /// Build a unit from the stat table without inserting it.
    pub fn create_unit(&self, key: &str, team: Team, position: Vec2Fixed) -> Result<Entity> {
        let stats = self
            .stats
            .unit(key)
            .ok_or_else(|| GameError::UnknownUnitKey(key.to_string()))?;
        let mut unit = Entity::new(
            EntityKind::Unit,
            key,
            team,
            position,
            stats.footprint(),
            Health::new(stats.health),
        );
        unit.armor = stats.armor;
        unit.population = stats.population;
        unit.movement = Some(Movement::new(stats.speed));
        unit.attack = stats.attack.as_ref().map(AttackStats::to_attack);
        unit.vision = stats.vision();
        unit.mana = stats.mana.as_ref().map(ManaStats::to_mana);
        unit.control = Some(Control {
            facing: Vec2Fixed::new(Fixed::ONE, Fixed::ZERO),
            ..Control::default()
        });
        Ok(unit)
    }

    /// Build a building from the stat table without inserting it.
    pub fn create_building(&self, kind: &str, team: Team, position: Vec2Fixed) -> Result<Entity> {
        let stats = self
            .stats
            .building(kind)
            .ok_or_else(|| GameError::UnknownBuildingKind(kind.to_string()))?;
        let mut building = Entity::new(
            EntityKind::Building,
            kind,
            team,
            position,
            stats.footprint(),
            Health::new(stats.health),
        );
        building.armor = stats.armor;
        building.population = stats.population_provided;
        building.vision = stats.vision();
        building.attack = stats.attack.as_ref().map(AttackStats::to_attack);
        if building.attack.is_some() {
            building.control = Some(Control::default());
        }
        Ok(building)
    }

    /// Insert a ready-made entity and return its id.
    ///
    /// No resources are charged, but population and population cap are
    /// counted as for a produced entity.
    pub fn insert_entity(&mut self, entity: Entity) -> EntityId {
        let kind = entity.kind;
        let team = entity.team;
        let position = entity.position;
        let id = self.entities.insert(entity);
        self.register(id);
        self.publish(&SimEvent::EntitySpawned {
            entity: id,
            kind,
            team,
            position,
        });
        if kind.is_static() {
            self.rebuild_costs();
        }
        id
    }

    /// Bookkeeping shared by every insertion path.
    fn register(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get(id) else {
            return;
        };
        if !entity.team.is_neutral() {
            let state = self.teams.entry(entity.team).or_default();
            match entity.kind {
                EntityKind::Unit => state.population += entity.population,
                EntityKind::Building => state.population_cap += entity.population,
                EntityKind::Obstacle => {}
            }
        }
        if entity.kind.is_static() {
            self.spatial.insert_static(id, entity.rect());
        } else {
            self.refresh_dynamic();
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Whether `spawn_unit(key, team)` would currently succeed.
    #[must_use]
    pub fn can_spawn_unit(&self, key: &str, team: Team) -> bool {
        self.check_spawn(key, team).is_ok() && self.spawn_anchor(key, team).is_ok()
    }

    /// Produce a unit for `team`, charging its cost and population.
    ///
    /// The unit appears below the team's lowest-id production building that
    /// makes `key`, or at the team's spawn point.
    pub fn spawn_unit(&mut self, key: &str, team: Team) -> Result<EntityId> {
        self.try_spawn_unit(key, team).map_err(|err| {
            debug!(%err, key, %team, "spawn rejected");
            err
        })
    }

    fn try_spawn_unit(&mut self, key: &str, team: Team) -> Result<EntityId> {
        let cost = self.check_spawn(key, team)?;
        let anchor = self.spawn_anchor(key, team)?;
        let position = self.spawn_position(anchor);
        let unit = self.create_unit(key, team, position)?;

        if let Some(state) = self.teams.get_mut(&team) {
            state.resources -= cost;
        }
        let id = self.insert_entity(unit);
        debug!(id, key, %team, "unit spawned");
        Ok(id)
    }

    fn check_spawn(&self, key: &str, team: Team) -> Result<u32> {
        let stats = self
            .stats
            .unit(key)
            .ok_or_else(|| GameError::UnknownUnitKey(key.to_string()))?;
        let state = self.teams.get(&team).copied().unwrap_or_default();
        state.charge(team, stats.cost)?;
        state.room_for(team, stats.population)?;
        Ok(stats.cost)
    }

    /// Unjittered spawn location for a new `key` unit.
    fn spawn_anchor(&self, key: &str, team: Team) -> Result<Vec2Fixed> {
        let unit_height = self
            .stats
            .unit(key)
            .map_or(Fixed::ZERO, |u| u.footprint().height());
        let producer = self.entities.iter().find(|e| {
            e.kind == EntityKind::Building
                && e.team == team
                && e.is_alive()
                && self.stats.building(&e.key).is_some_and(|b| b.can_produce(key))
        });
        if let Some(building) = producer {
            let half = Fixed::from_num(2);
            let below = building.footprint.height() / half + unit_height / half + Fixed::from_num(SPAWN_GAP);
            return Ok(building.position + Vec2Fixed::new(Fixed::ZERO, below));
        }
        self.config
            .team(team)
            .map(|t| t.spawn_point)
            .ok_or_else(|| GameError::InvalidState(format!("team {team} has no spawn point")))
    }

    /// Jitter, clamp to the map and move onto walkable ground.
    fn spawn_position(&mut self, anchor: Vec2Fixed) -> Vec2Fixed {
        let jitter = self.config.spawn_jitter.to_bits().max(0);
        let mut position = anchor;
        if jitter > 0 {
            position.x += Fixed::from_bits(self.rng.gen_range(-jitter..=jitter));
            position.y += Fixed::from_bits(self.rng.gen_range(-jitter..=jitter));
        }
        let position = self.clamp_to_map(position);
        let grid = self.pathfinder.grid();
        if grid.is_world_walkable(position) {
            return position;
        }
        let (x, y) = grid.world_to_grid_clamped(position);
        grid.nearest_walkable(x, y)
            .map_or(position, |(x, y)| grid.grid_to_world(x, y))
    }

    /// Whether `place_building(kind, team, position)` would currently succeed.
    #[must_use]
    pub fn can_place_building(&self, kind: &str, team: Team, position: Vec2Fixed) -> bool {
        self.check_build(kind, team, position).is_ok()
    }

    /// Place a building for `team`, charging its cost.
    pub fn place_building(&mut self, kind: &str, team: Team, position: Vec2Fixed) -> Result<EntityId> {
        let cost = self.check_build(kind, team, position).map_err(|err| {
            debug!(%err, kind, %team, "placement rejected");
            err
        })?;
        let building = self.create_building(kind, team, position)?;
        if let Some(state) = self.teams.get_mut(&team) {
            state.resources -= cost;
        }
        let id = self.insert_entity(building);
        self.publish(&SimEvent::BuildingPlaced {
            entity: id,
            kind: kind.to_string(),
            team,
        });
        info!(id, kind, %team, "building placed");
        Ok(id)
    }

    fn check_build(&self, kind: &str, team: Team, position: Vec2Fixed) -> Result<u32> {
        let stats = self
            .stats
            .building(kind)
            .ok_or_else(|| GameError::UnknownBuildingKind(kind.to_string()))?;
        let state = self.teams.get(&team).copied().unwrap_or_default();
        state.charge(team, stats.cost)?;
        self.check_placement(kind, stats.footprint().rect_at(position))?;
        Ok(stats.cost)
    }

    fn check_placement(&self, kind: &str, rect: Rect) -> Result<()> {
        let invalid = |reason: String| GameError::InvalidPlacement {
            kind: kind.to_string(),
            reason,
        };
        if rect.min.x < Fixed::ZERO
            || rect.min.y < Fixed::ZERO
            || rect.max.x > self.config.map_width
            || rect.max.y > self.config.map_height
        {
            return Err(invalid("footprint leaves the map".to_string()));
        }

        let margin = Vec2Fixed::new(self.max_unit_radius, self.max_unit_radius);
        let search = Rect {
            min: rect.min - margin,
            max: rect.max + margin,
        };
        let mut found = Vec::new();
        self.spatial.query_rect(search, &mut found);
        let blocker = found.into_iter().find(|&id| {
            self.entities
                .get(id)
                .is_some_and(|e| e.solid && e.is_alive() && e.rect().intersects(&rect))
        });
        if let Some(id) = blocker {
            return Err(invalid(format!("overlaps entity {id}")));
        }

        if !self.pathfinder.grid().is_rect_free(&rect) {
            return Err(invalid("terrain is blocked".to_string()));
        }
        Ok(())
    }

    /// Give `order` to a unit.
    ///
    /// Non-queued orders replace everything; queued orders wait behind the
    /// current one.
    pub fn issue_order(&mut self, unit: EntityId, order: Order, queued: bool) -> Result<()> {
        self.validate_order(unit, order).map_err(|err| {
            debug!(%err, unit, ?order, "order rejected");
            err
        })?;
        let Some(mut entity) = self.entities.take(unit) else {
            return Err(GameError::EntityNotFound(unit));
        };
        let became_current = entity
            .control
            .as_mut()
            .is_some_and(|control| control.orders.issue(order, queued));
        if became_current {
            behavior::begin_order(&mut entity, order, &mut self.pathfinder);
        }
        self.entities.put_back(entity);
        self.publish(&SimEvent::OrderAcknowledged {
            unit,
            order,
            queued,
        });
        Ok(())
    }

    fn validate_order(&self, unit: EntityId, order: Order) -> Result<()> {
        let entity = self.entities.get(unit).ok_or(GameError::EntityNotFound(unit))?;
        if entity.kind != EntityKind::Unit || entity.control.is_none() || !entity.is_alive() {
            return Err(GameError::NotCommandable(unit));
        }
        if let Order::Attack(target) = order {
            if entity.attack.is_none() {
                return Err(GameError::InvalidState(format!("unit {unit} has no attack")));
            }
            if !self.entities.get(target).is_some_and(Entity::is_alive) {
                return Err(GameError::EntityNotFound(target));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Time
    // ------------------------------------------------------------------

    /// Feed one frame of wall-clock time and run the resulting ticks.
    pub fn advance(&mut self, real_dt: f64) -> Vec<TickEvents> {
        let ticks = self.clock.advance(real_dt);
        (0..ticks).map(|_| self.tick()).collect()
    }

    /// Advance the simulation by exactly one tick.
    pub fn tick(&mut self) -> TickEvents {
        let mut events = Vec::new();

        if let Some(goal) = self.pathfinder.poll() {
            trace!(?goal, "flow field published");
        }
        self.refresh_dynamic();
        self.fog.rebuild(self.entities.values());

        let ids = self.entities.sorted_ids();
        for &id in &ids {
            self.update_entity(id, &mut events);
        }

        self.integrate(&ids);
        self.refresh_dynamic();

        self.advance_projectiles(&mut events);
        self.decay_timers(&ids);
        self.process_deaths(&ids, &mut events);

        self.tick += 1;

        #[cfg(feature = "debug-validation")]
        self.check_invariants();

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            trace!(tick = self.tick, state_hash = hash, "Simulation state hash");
        }

        for event in &events {
            self.events.publish(event);
        }
        TickEvents {
            tick: self.tick,
            events,
        }
    }

    fn update_entity(&mut self, id: EntityId, events: &mut Vec<SimEvent>) {
        let Some(mut entity) = self.entities.take(id) else {
            return;
        };
        let strike = {
            let mut ctx = Context {
                entities: &self.entities,
                spatial: &self.spatial,
                pathfinder: &mut self.pathfinder,
                fog: &self.fog,
                config: &self.config,
                rotations: &self.rotations,
                rng: &mut self.rng,
                scratch: &mut self.scratch,
                neighbors: &mut self.neighbors,
                dt: self.clock.tick_dt(),
            };
            behavior::update(&mut entity, &mut ctx)
        };
        self.entities.put_back(entity);
        if let Some(strike) = strike {
            self.resolve_strike(strike, events);
        }
    }

    fn resolve_strike(&mut self, strike: Strike, events: &mut Vec<SimEvent>) {
        let attack = strike.attack;
        if attack.role.uses_projectile() {
            let id = self.next_projectile_id;
            self.next_projectile_id += 1;
            self.projectiles.push(Projectile {
                id,
                source: strike.attacker,
                team: strike.team,
                target: strike.target,
                position: strike.origin,
                origin: strike.origin,
                aim_point: strike.aim,
                speed: attack.projectile_speed,
                damage: attack.damage,
                attack_type: attack.attack_type,
                role: attack.role,
                splash_radius: attack.splash_radius,
                arc_height: attack.arc_height,
            });
            events.push(SimEvent::ProjectileFired {
                projectile: id,
                source: strike.attacker,
                target: strike.target,
            });
        } else {
            self.deal_damage(strike.attacker, strike.target, attack.damage, attack.attack_type, events);
        }
    }

    fn deal_damage(
        &mut self,
        attacker: EntityId,
        target: EntityId,
        base: u32,
        attack_type: AttackType,
        events: &mut Vec<SimEvent>,
    ) {
        let Some(victim) = self.entities.get_mut(target).filter(|e| e.is_alive()) else {
            return;
        };
        let amount = self.stats.damage.calculate_damage(base, attack_type, victim.armor);
        let dealt = victim.health.apply_damage(amount);
        trace!(attacker, target, dealt, remaining = victim.health.current, "damage");
        events.push(SimEvent::DamageDealt {
            attacker,
            target,
            amount: dealt,
            attack_type,
        });
    }

    fn integrate(&mut self, ids: &[EntityId]) {
        let dt = self.clock.tick_dt();
        let max_x = self.config.map_width - Fixed::DELTA;
        let max_y = self.config.map_height - Fixed::DELTA;
        let grid = self.pathfinder.grid();

        for &id in ids {
            let Some(entity) = self.entities.get_mut(id) else {
                continue;
            };
            if !entity.is_alive() {
                continue;
            }
            let Some(movement) = entity.movement.as_mut() else {
                continue;
            };
            if movement.velocity.is_zero() {
                continue;
            }

            let from = entity.position;
            let mut to = from + movement.velocity.scale(dt);
            to.x = to.x.clamp(Fixed::ZERO, max_x);
            to.y = to.y.clamp(Fixed::ZERO, max_y);

            let next = resolve_step(grid, entity.footprint, from, to, movement.speed * dt);
            if next == from {
                movement.velocity = Vec2Fixed::ZERO;
            }
            entity.position = next;
        }
    }

    fn advance_projectiles(&mut self, events: &mut Vec<SimEvent>) {
        let dt = self.clock.tick_dt();
        let in_flight = std::mem::take(&mut self.projectiles);
        let mut kept = Vec::with_capacity(in_flight.len());

        for mut projectile in in_flight {
            let target_position = self
                .entities
                .get(projectile.target)
                .filter(|t| t.is_alive())
                .map(|t| t.position);
            match step_projectile(&mut projectile, target_position, dt) {
                ProjectileStep::InFlight => kept.push(projectile),
                ProjectileStep::Arrived if target_position.is_some() => {
                    self.projectile_hit(&projectile, events);
                }
                ProjectileStep::Arrived => {
                    trace!(projectile = projectile.id, "projectile missed");
                    events.push(SimEvent::ProjectileMissed {
                        projectile: projectile.id,
                        position: projectile.position,
                    });
                }
            }
        }
        self.projectiles = kept;
    }

    fn projectile_hit(&mut self, projectile: &Projectile, events: &mut Vec<SimEvent>) {
        events.push(SimEvent::ProjectileHit {
            projectile: projectile.id,
            target: projectile.target,
        });

        match projectile.role {
            AttackRole::Support => {
                let Some(ally) = self.entities.get_mut(projectile.target) else {
                    return;
                };
                let amount = ally.health.heal(projectile.damage);
                events.push(SimEvent::Healed {
                    source: projectile.source,
                    target: projectile.target,
                    amount,
                });
            }
            AttackRole::Siege if projectile.splash_radius > Fixed::ZERO => {
                let reach = projectile.splash_radius + self.max_unit_radius;
                let cells = self.spatial.cells_for_distance(reach);
                self.spatial.query_near(projectile.aim_point, cells, &mut self.scratch);
                let victims: Vec<EntityId> = self
                    .scratch
                    .iter()
                    .copied()
                    .filter(|&id| {
                        self.entities.get(id).is_some_and(|e| {
                            e.is_alive()
                                && projectile.team.is_hostile_to(e.team)
                                && e.rect().distance_to(projectile.aim_point) <= projectile.splash_radius
                        })
                    })
                    .collect();
                for victim in victims {
                    self.deal_damage(projectile.source, victim, projectile.damage, projectile.attack_type, events);
                }
            }
            _ => {
                self.deal_damage(
                    projectile.source,
                    projectile.target,
                    projectile.damage,
                    projectile.attack_type,
                    events,
                );
            }
        }
    }

    fn decay_timers(&mut self, ids: &[EntityId]) {
        for &id in ids {
            let Some(entity) = self.entities.get_mut(id) else {
                continue;
            };
            if !entity.is_alive() {
                continue;
            }
            if let Some(attack) = entity.attack.as_mut() {
                attack.tick_cooldown();
            }
            if let Some(mana) = entity.mana.as_mut() {
                mana.regen();
            }
        }
    }

    fn process_deaths(&mut self, ids: &[EntityId], events: &mut Vec<SimEvent>) {
        let grace = self.config.death_grace_ticks;
        let mut layout_changed = false;
        let mut building_destroyed = false;

        for &id in ids {
            let Some(entity) = self.entities.get_mut(id) else {
                continue;
            };
            let death_ticks = entity.death_ticks;
            match death_ticks {
                Some(ticks) if ticks >= grace => {
                    self.entities.remove(id);
                    trace!(id, "entity reaped");
                }
                Some(ticks) => entity.death_ticks = Some(ticks + 1),
                None if entity.health.is_dead() => {
                    mark_dead(entity);
                    let (kind, team, population) = (entity.kind, entity.team, entity.population);
                    debug!(id, ?kind, %team, "entity died");

                    if let Some(state) = self.teams.get_mut(&team) {
                        match kind {
                            EntityKind::Unit => {
                                state.population = state.population.saturating_sub(population);
                            }
                            EntityKind::Building => {
                                state.population_cap = state.population_cap.saturating_sub(population);
                            }
                            EntityKind::Obstacle => {}
                        }
                    }
                    if kind.is_static() {
                        self.spatial.remove_static(id);
                        layout_changed = true;
                    }
                    building_destroyed |= kind == EntityKind::Building;
                    events.push(SimEvent::EntityDied { entity: id, kind, team });
                }
                None => {}
            }
        }

        if layout_changed {
            self.rebuild_costs();
        }
        if building_destroyed {
            self.clock
                .trigger_hit_stop(self.config.hit_stop_scale, self.config.hit_stop_secs);
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn publish(&mut self, event: &SimEvent) {
        self.events.publish(event);
    }

    fn refresh_dynamic(&mut self) {
        let units = self
            .entities
            .values()
            .filter(|e| !e.kind.is_static() && e.is_alive())
            .map(|e| (e.id, e.position));
        self.spatial.rebuild_dynamic(units);
    }

    fn rebuild_costs(&mut self) {
        self.pathfinder.rebuild_costs(self.entities.values());
    }

    fn clamp_to_map(&self, p: Vec2Fixed) -> Vec2Fixed {
        Vec2Fixed::new(
            p.x.clamp(Fixed::ZERO, self.config.map_width - Fixed::DELTA),
            p.y.clamp(Fixed::ZERO, self.config.map_height - Fixed::DELTA),
        )
    }

    /// Insert an entity under its saved id without charging or announcing it.
    pub(crate) fn insert_restored(&mut self, id: EntityId, entity: Entity) {
        self.entities.insert_with_id(id, entity);
    }

    /// Rebuild every derived structure after a batch of restored inserts.
    pub(crate) fn finish_restore(&mut self, tick: u64, teams: impl IntoIterator<Item = (Team, TeamState)>) {
        self.tick = tick;
        self.teams = teams.into_iter().collect();
        let statics: Vec<(EntityId, Rect)> = self
            .entities
            .values()
            .filter(|e| e.kind.is_static() && e.is_alive())
            .map(|e| (e.id, e.rect()))
            .collect();
        self.spatial.rebuild_static(statics);
        self.refresh_dynamic();
        self.rebuild_costs();
    }

    /// Re-issue a restored unit's order without announcing it.
    pub(crate) fn restore_order(&mut self, unit: EntityId, order: Order, queued: bool) {
        if self.validate_order(unit, order).is_err() {
            debug!(unit, ?order, "restored order no longer valid, dropping");
            return;
        }
        let Some(mut entity) = self.entities.take(unit) else {
            return;
        };
        let became_current = entity
            .control
            .as_mut()
            .is_some_and(|control| control.orders.issue(order, queued));
        if became_current {
            behavior::begin_order(&mut entity, order, &mut self.pathfinder);
        }
        self.entities.put_back(entity);
    }

    /// Compute a hash of the current simulation state.
    ///
    /// Used for desync detection and determinism checks.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.tick.hash(&mut hasher);

        let ids = self.entities.sorted_ids();
        ids.len().hash(&mut hasher);
        for id in ids {
            let Some(entity) = self.entities.get(id) else {
                continue;
            };
            id.hash(&mut hasher);
            entity.position.hash(&mut hasher);
            entity.health.current.hash(&mut hasher);
            entity.death_ticks.hash(&mut hasher);
            entity.velocity().hash(&mut hasher);
            entity.state().hash(&mut hasher);
            if let Some(attack) = &entity.attack {
                attack.cooldown_remaining.hash(&mut hasher);
                attack.target.hash(&mut hasher);
            }
        }

        self.projectiles.len().hash(&mut hasher);
        for projectile in &self.projectiles {
            projectile.id.hash(&mut hasher);
            projectile.position.hash(&mut hasher);
            projectile.target.hash(&mut hasher);
        }

        for (team, state) in &self.teams {
            team.hash(&mut hasher);
            state.resources.hash(&mut hasher);
            state.population.hash(&mut hasher);
        }

        hasher.finish()
    }

    #[cfg(feature = "debug-validation")]
    fn check_invariants(&self) {
        for entity in self.entities.values() {
            if entity.death_ticks.is_some() {
                debug_assert!(!entity.solid, "dead entity {} is still solid", entity.id);
                debug_assert_eq!(entity.state().unwrap_or(UnitState::Die), UnitState::Die);
            }
            debug_assert!(entity.footprint.width() >= Fixed::ZERO);
            debug_assert!(entity.footprint.height() >= Fixed::ZERO);
        }
        for (team, state) in &self.teams {
            let used: u32 = self
                .entities
                .values()
                .filter(|e| e.team == *team && e.kind == EntityKind::Unit && e.is_alive())
                .map(|e| e.population)
                .sum();
            debug_assert_eq!(used, state.population, "population drift for team {team}");
        }
    }
}

/// Where a body with `footprint` ends up when it tries to move `from -> to`.
///
/// The footprint may never enter an impassable cell. A blocked step slides
/// along one axis when that keeps at least half of the step; otherwise the
/// body drifts towards the centre of its cell by at most `max_step`, which
/// frees it from a corner it was pressed into. A body that already overlaps
/// a blocked cell (spawned against a wall) moves freely until it is clear.
fn resolve_step(grid: &CostGrid, footprint: Footprint, from: Vec2Fixed, to: Vec2Fixed, max_step: Fixed) -> Vec2Fixed {
    let free = |p: Vec2Fixed| grid.is_rect_free(&footprint.rect_at(p));
    if !free(from) || free(to) {
        return to;
    }
    let step = (to - from).length_squared();
    let slides = [Vec2Fixed::new(to.x, from.y), Vec2Fixed::new(from.x, to.y)];
    let useful = |p: &Vec2Fixed| (*p - from).length_squared() * Fixed::from_num(4) >= step;
    if let Some(&slide) = slides.iter().find(|p| useful(p) && free(**p)) {
        return slide;
    }
    let (cx, cy) = grid.world_to_grid_clamped(from);
    let offset = grid.grid_to_world(cx, cy) - from;
    if offset.is_zero() {
        return from;
    }
    let centred = from + offset.clamp_length(max_step);
    if free(centred) {
        centred
    } else {
        from
    }
}

/// Turn a zero-health entity into a non-blocking corpse.
fn mark_dead(entity: &mut Entity) {
    entity.death_ticks = Some(0);
    entity.solid = false;
    if let Some(control) = entity.control.as_mut() {
        control.state = UnitState::Die;
        control.orders.clear();
    }
    if let Some(movement) = entity.movement.as_mut() {
        movement.clear_route();
        movement.velocity = Vec2Fixed::ZERO;
    }
    if let Some(attack) = entity.attack.as_mut() {
        attack.target = None;
    }
}
