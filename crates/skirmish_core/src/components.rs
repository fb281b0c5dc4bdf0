//! Entity representation.
//!
//! Every simulated object is one [`Entity`]: an explicit [`EntityKind`] tag
//! plus optional capability records. Behavior dispatches on the kind and on
//! which capabilities are present, never on a type hierarchy.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::{fixed_serde, Fixed, Rect, Vec2Fixed};

/// Unique identifier for entities.
pub type EntityId = u64;

/// Team affiliation. Team 0 is neutral (map obstacles, scenery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Team(pub u8);

impl Team {
    /// Neutral team; never hostile, never targeted.
    pub const NEUTRAL: Self = Self(0);

    /// Check whether two teams fight each other.
    #[must_use]
    pub const fn is_hostile_to(self, other: Self) -> bool {
        self.0 != 0 && other.0 != 0 && self.0 != other.0
    }

    /// Check whether this is the neutral team.
    #[must_use]
    pub const fn is_neutral(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Mobile, order-driven.
    Unit,
    /// Static structure owned by a team; may be armed.
    Building,
    /// Static map blocker.
    Obstacle,
}

impl EntityKind {
    /// Static entities live in the static spatial grid and feed the cost grid.
    #[must_use]
    pub const fn is_static(self) -> bool {
        !matches!(self, Self::Unit)
    }
}

// ============================================================================
// Combat Types
// ============================================================================

/// Attack classification. Each attack type has a multiplier against every
/// armor type (see [`crate::combat::DamageMatrix`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AttackType {
    /// Swords, claws, rifles.
    #[default]
    Normal,
    /// Arrows and bolts. Good vs light armor.
    Pierce,
    /// Catapults and explosives. Good vs fortified structures.
    Siege,
    /// Spells. Ignores most armor.
    Magic,
}

impl AttackType {
    /// All attack types, in matrix row order.
    pub const ALL: [Self; 4] = [Self::Normal, Self::Pierce, Self::Siege, Self::Magic];

    /// Matrix row index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Armor classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ArmorType {
    /// No armor at all.
    #[default]
    Unarmored,
    /// Light infantry armor.
    Light,
    /// Medium armor.
    Medium,
    /// Heavy plate and vehicles.
    Heavy,
    /// Walls, towers and other structures.
    Fortified,
}

impl ArmorType {
    /// All armor types, in matrix column order.
    pub const ALL: [Self; 5] = [
        Self::Unarmored,
        Self::Light,
        Self::Medium,
        Self::Heavy,
        Self::Fortified,
    ];

    /// Matrix column index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// How an attacker delivers its attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AttackRole {
    /// Instant damage at close range.
    #[default]
    Melee,
    /// Projectile, single target.
    Ranged,
    /// Projectile with area of effect.
    Siege,
    /// Projectile that heals damaged allies instead of hurting enemies.
    Support,
}

impl AttackRole {
    /// Whether attacks spawn a projectile instead of resolving instantly.
    #[must_use]
    pub const fn uses_projectile(self) -> bool {
        !matches!(self, Self::Melee)
    }

    /// Whether this role targets allies.
    #[must_use]
    pub const fn targets_allies(self) -> bool {
        matches!(self, Self::Support)
    }
}

// ============================================================================
// Shared records
// ============================================================================

/// Rectangular extent used for collision and placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footprint {
    #[serde(with = "fixed_serde")]
    width: Fixed,
    #[serde(with = "fixed_serde")]
    height: Fixed,
}

impl Footprint {
    /// Create a footprint. Negative sizes are clamped to zero.
    #[must_use]
    pub fn new(width: Fixed, height: Fixed) -> Self {
        Self {
            width: width.max(Fixed::ZERO),
            height: height.max(Fixed::ZERO),
        }
    }

    /// Footprint width.
    #[must_use]
    pub const fn width(&self) -> Fixed {
        self.width
    }

    /// Footprint height.
    #[must_use]
    pub const fn height(&self) -> Fixed {
        self.height
    }

    /// Collision radius used by the avoidance solver.
    #[must_use]
    pub fn radius(&self) -> Fixed {
        self.width.max(self.height) / Fixed::from_num(2)
    }

    /// World rectangle covered when centered at `center`.
    #[must_use]
    pub fn rect_at(&self, center: Vec2Fixed) -> Rect {
        Rect::centered(center, self.width, self.height)
    }
}

/// Health component for damageable entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Current health points.
    pub current: u32,
    /// Maximum health points.
    pub max: u32,
}

impl Health {
    /// Create new health component at full health.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self { current: max, max }
    }

    /// Create health with a pre-set current value (restored from a snapshot).
    #[must_use]
    pub fn with_current(current: u32, max: u32) -> Self {
        Self {
            current: current.min(max),
            max,
        }
    }

    /// Check if entity is dead (health == 0).
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.current == 0
    }

    /// Check if entity is at full health.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.current >= self.max
    }

    /// Apply damage, returning actual damage dealt.
    pub fn apply_damage(&mut self, amount: u32) -> u32 {
        let actual = amount.min(self.current);
        self.current -= actual;
        actual
    }

    /// Heal the entity, returning actual amount healed.
    pub fn heal(&mut self, amount: u32) -> u32 {
        let headroom = self.max.saturating_sub(self.current);
        let actual = amount.min(headroom);
        self.current += actual;
        actual
    }
}

// ============================================================================
// Orders
// ============================================================================

/// An order that can be issued to a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    /// Move to a point, ignoring enemies.
    Move(Vec2Fixed),
    /// Attack a specific entity.
    Attack(EntityId),
    /// Move to a point, engaging enemies met on the way.
    AttackMove(Vec2Fixed),
    /// Stop all actions.
    Stop,
}

impl Order {
    /// Destination point of point-targeted orders.
    #[must_use]
    pub const fn target_point(&self) -> Option<Vec2Fixed> {
        match self {
            Self::Move(p) | Self::AttackMove(p) => Some(*p),
            Self::Attack(_) | Self::Stop => None,
        }
    }
}

/// A unit's active order plus the FIFO of orders queued behind it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderQueue {
    current: Option<Order>,
    pending: VecDeque<Order>,
}

impl OrderQueue {
    /// Create an empty order queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue an order.
    ///
    /// A queued order goes to the back of the FIFO (or becomes current if
    /// the unit is idle); a non-queued order clears everything and becomes
    /// current immediately. Returns `true` if the order became current.
    pub fn issue(&mut self, order: Order, queued: bool) -> bool {
        if queued && self.current.is_some() {
            self.pending.push_back(order);
            false
        } else {
            self.pending.clear();
            self.current = Some(order);
            true
        }
    }

    /// The order being executed.
    #[must_use]
    pub const fn current(&self) -> Option<&Order> {
        self.current.as_ref()
    }

    /// Finish the current order and promote the next queued one.
    pub fn complete(&mut self) -> Option<Order> {
        self.current = self.pending.pop_front();
        self.current
    }

    /// Drop the current order and everything queued.
    pub fn clear(&mut self) {
        self.current = None;
        self.pending.clear();
    }

    /// Orders waiting behind the current one.
    pub fn pending(&self) -> impl Iterator<Item = &Order> {
        self.pending.iter()
    }

    /// Number of queued orders, not counting the current one.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Unit state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UnitState {
    /// No order; will defend itself.
    #[default]
    Idle,
    /// Following a point-to-point path.
    Move,
    /// Following a flow field and scanning for enemies.
    AttackMove,
    /// Engaging a target.
    Attack,
    /// Dead, waiting to be reaped.
    Die,
}

// ============================================================================
// Capabilities
// ============================================================================

/// Movement capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    /// Maximum speed in world units per second.
    #[serde(with = "fixed_serde")]
    pub speed: Fixed,
    /// Current velocity in world units per second.
    pub velocity: Vec2Fixed,
    /// Remaining waypoints of the cached point-to-point path.
    pub path: VecDeque<Vec2Fixed>,
    /// Goal cell of the flow field being followed, if any.
    pub flow_goal: Option<(u32, u32)>,
    /// Ticks until the chase path may be recomputed.
    pub repath_ticks: u32,
}

impl Movement {
    /// Create a stationary movement capability.
    #[must_use]
    pub fn new(speed: Fixed) -> Self {
        Self {
            speed,
            velocity: Vec2Fixed::ZERO,
            path: VecDeque::new(),
            flow_goal: None,
            repath_ticks: 0,
        }
    }

    /// Forget any cached route.
    pub fn clear_route(&mut self) {
        self.path.clear();
        self.flow_goal = None;
        self.repath_ticks = 0;
    }
}

/// Attack capability, shared by units and armed buildings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attack {
    /// Base damage (or heal amount for support).
    pub damage: u32,
    /// Attack type for the damage matrix.
    pub attack_type: AttackType,
    /// Delivery role.
    pub role: AttackRole,
    /// Reach, measured from the attacker's edge to the target's footprint.
    #[serde(with = "fixed_serde")]
    pub range: Fixed,
    /// Ticks between attacks.
    pub cooldown_ticks: u32,
    /// Ticks remaining before the next attack may fire.
    pub cooldown_remaining: u32,
    /// Current target. Checked for liveness at every use.
    pub target: Option<EntityId>,
    /// Projectile speed in world units per second.
    #[serde(with = "fixed_serde")]
    pub projectile_speed: Fixed,
    /// Area-of-effect radius for siege projectiles.
    #[serde(with = "fixed_serde")]
    pub splash_radius: Fixed,
    /// Peak height of the projectile arc (presentation only).
    #[serde(with = "fixed_serde")]
    pub arc_height: Fixed,
    /// Mana spent per heal by support attackers with a mana pool.
    #[serde(with = "fixed_serde")]
    pub heal_mana_cost: Fixed,
}

impl Attack {
    /// Check if ready to attack.
    #[must_use]
    pub const fn can_fire(&self) -> bool {
        self.cooldown_remaining == 0
    }

    /// Reset cooldown after attacking.
    pub fn reset_cooldown(&mut self) {
        self.cooldown_remaining = self.cooldown_ticks;
    }

    /// Tick down the cooldown by one, stopping at zero.
    pub fn tick_cooldown(&mut self) {
        self.cooldown_remaining = self.cooldown_remaining.saturating_sub(1);
    }
}

/// Vision capability; feeds the team's fog-of-war grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vision {
    /// Sight radius in world units.
    #[serde(with = "fixed_serde")]
    pub range: Fixed,
}

/// Mana pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mana {
    /// Current mana.
    #[serde(with = "fixed_serde")]
    pub current: Fixed,
    /// Pool size.
    #[serde(with = "fixed_serde")]
    pub max: Fixed,
    /// Mana regenerated per tick.
    #[serde(with = "fixed_serde")]
    pub regen_per_tick: Fixed,
}

impl Mana {
    /// Regenerate one tick's worth of mana.
    pub fn regen(&mut self) {
        self.current = (self.current + self.regen_per_tick).min(self.max);
    }

    /// Spend `cost` if available.
    pub fn try_spend(&mut self, cost: Fixed) -> bool {
        if self.current >= cost {
            self.current -= cost;
            true
        } else {
            false
        }
    }
}

/// Order-driven control state for units.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Control {
    /// State machine state.
    pub state: UnitState,
    /// Active order and queue.
    pub orders: OrderQueue,
    /// Ticks until the next target scan.
    pub scan_ticks: u32,
    /// Unit-length facing direction.
    pub facing: Vec2Fixed,
}

// ============================================================================
// Entity
// ============================================================================

/// A simulated object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier.
    pub id: EntityId,
    /// Kind tag.
    pub kind: EntityKind,
    /// Stat-table key this entity was created from.
    pub key: String,
    /// Owner.
    pub team: Team,
    /// Center position in world units.
    pub position: Vec2Fixed,
    /// Whether the entity blocks others.
    pub solid: bool,
    /// Collision and placement extent.
    pub footprint: Footprint,
    /// Health.
    pub health: Health,
    /// Armor type for the damage matrix.
    pub armor: ArmorType,
    /// Ticks spent dead; `None` while alive.
    pub death_ticks: Option<u32>,
    /// Population this entity occupies (units) or provides (buildings).
    pub population: u32,
    /// Movement capability.
    pub movement: Option<Movement>,
    /// Attack capability.
    pub attack: Option<Attack>,
    /// Vision capability.
    pub vision: Option<Vision>,
    /// Mana pool.
    pub mana: Option<Mana>,
    /// Order-driven control.
    pub control: Option<Control>,
}

impl Entity {
    /// Create a bare entity with no capabilities.
    #[must_use]
    pub fn new(
        kind: EntityKind,
        key: impl Into<String>,
        team: Team,
        position: Vec2Fixed,
        footprint: Footprint,
        health: Health,
    ) -> Self {
        Self {
            id: 0,
            kind,
            key: key.into(),
            team,
            position,
            solid: true,
            footprint,
            health,
            armor: ArmorType::default(),
            death_ticks: None,
            population: 0,
            movement: None,
            attack: None,
            vision: None,
            mana: None,
            control: None,
        }
    }

    /// A neutral map blocker. Neutral entities are never targeted.
    #[must_use]
    pub fn obstacle(position: Vec2Fixed, footprint: Footprint) -> Self {
        let mut obstacle = Self::new(
            EntityKind::Obstacle,
            "obstacle",
            Team::NEUTRAL,
            position,
            footprint,
            Health::new(1),
        );
        obstacle.armor = ArmorType::Fortified;
        obstacle
    }

    /// Alive entities take part in movement and combat.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.death_ticks.is_none() && !self.health.is_dead()
    }

    /// World rectangle covered by the footprint.
    #[must_use]
    pub fn rect(&self) -> Rect {
        self.footprint.rect_at(self.position)
    }

    /// Collision radius.
    #[must_use]
    pub fn radius(&self) -> Fixed {
        self.footprint.radius()
    }

    /// Current velocity (zero for static entities).
    #[must_use]
    pub fn velocity(&self) -> Vec2Fixed {
        self.movement
            .as_ref()
            .map_or(Vec2Fixed::ZERO, |m| m.velocity)
    }

    /// State machine state, if this entity takes orders.
    #[must_use]
    pub fn state(&self) -> Option<UnitState> {
        self.control.as_ref().map(|c| c.state)
    }

    /// Whether this is a building that can attack.
    #[must_use]
    pub fn is_combat_building(&self) -> bool {
        self.kind == EntityKind::Building && self.attack.is_some()
    }

    /// Solid and not a unit: contributes to the cost grid.
    #[must_use]
    pub fn blocks_pathing(&self) -> bool {
        self.solid && self.kind.is_static() && self.is_alive()
    }
}

// ============================================================================
// Projectile
// ============================================================================

/// A projectile in flight.
///
/// Projectiles home on their target's current position while it lives; if
/// the target dies in flight they keep flying to its last known position
/// and miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projectile {
    /// Unique projectile id (separate counter from entities).
    pub id: u64,
    /// Entity that fired the projectile.
    pub source: EntityId,
    /// Team of the shooter at firing time.
    pub team: Team,
    /// Intended target.
    pub target: EntityId,
    /// Current ground position.
    pub position: Vec2Fixed,
    /// Launch position.
    pub origin: Vec2Fixed,
    /// Where the target was last seen.
    pub aim_point: Vec2Fixed,
    /// Travel speed per second.
    #[serde(with = "fixed_serde")]
    pub speed: Fixed,
    /// Base damage or heal amount.
    pub damage: u32,
    /// Attack type for the damage matrix.
    pub attack_type: AttackType,
    /// Role of the shooter (siege splashes, support heals).
    pub role: AttackRole,
    /// Area-of-effect radius.
    #[serde(with = "fixed_serde")]
    pub splash_radius: Fixed,
    /// Peak arc height.
    #[serde(with = "fixed_serde")]
    pub arc_height: Fixed,
}

impl Projectile {
    /// Fraction of the flight completed, 0 to 1.
    #[must_use]
    pub fn progress(&self) -> Fixed {
        let total = self.origin.distance(self.aim_point);
        if total == Fixed::ZERO {
            return Fixed::ONE;
        }
        let travelled = self.origin.distance(self.position);
        (travelled / total).min(Fixed::ONE)
    }

    /// Height above ground on a parabolic arc: `4h·t·(1-t)`.
    #[must_use]
    pub fn height(&self) -> Fixed {
        let t = self.progress();
        Fixed::from_num(4) * self.arc_height * t * (Fixed::ONE - t)
    }
}
