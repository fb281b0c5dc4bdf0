//! Unit and attack stat definitions.

use serde::{Deserialize, Serialize};

use crate::components::{ArmorType, Attack, AttackRole, AttackType, Footprint, Mana, Vision};
use crate::math::{decimal_serde, Fixed};

/// Attack stats shared by units and armed buildings.
///
/// # Example RON
///
/// ```ron
/// AttackStats(
///     damage: 12,
///     attack_type: Pierce,
///     role: Ranged,
///     range: 180.0,
///     cooldown_ticks: 45,
///     projectile_speed: 400.0,
///     arc_height: 20.0,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackStats {
    /// Base damage per hit, or heal amount for support.
    pub damage: u32,

    /// Attack type looked up in the damage matrix.
    #[serde(default)]
    pub attack_type: AttackType,

    /// Delivery role.
    #[serde(default)]
    pub role: AttackRole,

    /// Reach from the attacker's edge to the target's footprint.
    #[serde(with = "decimal_serde")]
    pub range: Fixed,

    /// Ticks between attacks.
    pub cooldown_ticks: u32,

    /// Projectile speed in world units per second (projectile roles only).
    #[serde(default, with = "decimal_serde")]
    pub projectile_speed: Fixed,

    /// Area-of-effect radius for siege projectiles.
    #[serde(default, with = "decimal_serde")]
    pub splash_radius: Fixed,

    /// Peak projectile arc height.
    #[serde(default, with = "decimal_serde")]
    pub arc_height: Fixed,

    /// Mana spent per heal (support units with a mana pool).
    #[serde(default, with = "decimal_serde")]
    pub heal_mana_cost: Fixed,
}

impl AttackStats {
    /// Build a ready-to-fire attack capability.
    #[must_use]
    pub fn to_attack(&self) -> Attack {
        Attack {
            damage: self.damage,
            attack_type: self.attack_type,
            role: self.role,
            range: self.range,
            cooldown_ticks: self.cooldown_ticks,
            cooldown_remaining: 0,
            target: None,
            projectile_speed: self.projectile_speed,
            splash_radius: self.splash_radius,
            arc_height: self.arc_height,
            heal_mana_cost: self.heal_mana_cost,
        }
    }
}

/// Mana pool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManaStats {
    /// Pool size. Units spawn with a full pool.
    #[serde(with = "decimal_serde")]
    pub max: Fixed,

    /// Regeneration per tick.
    #[serde(default, with = "decimal_serde")]
    pub regen_per_tick: Fixed,
}

impl ManaStats {
    /// Build a full mana pool.
    #[must_use]
    pub fn to_mana(&self) -> Mana {
        Mana {
            current: self.max,
            max: self.max,
            regen_per_tick: self.regen_per_tick,
        }
    }
}

/// A named skill a unit can carry.
///
/// Skills are pure content: the core validates references to them and
/// exposes them to callers, it does not cast them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillStats {
    /// Mana cost per use.
    #[serde(default, with = "decimal_serde")]
    pub mana_cost: Fixed,

    /// Ticks between uses.
    #[serde(default)]
    pub cooldown_ticks: u32,

    /// Cast range.
    #[serde(default, with = "decimal_serde")]
    pub range: Fixed,
}

/// Data-driven unit definition, keyed by its content key in the stat table.
///
/// # Example RON
///
/// ```ron
/// UnitStats(
///     speed: 60.0,
///     health: 100,
///     armor: Medium,
///     width: 16.0,
///     height: 16.0,
///     cost: 50,
///     population: 1,
///     vision_range: 250.0,
///     attack: Some(AttackStats(
///         damage: 20,
///         attack_type: Normal,
///         role: Melee,
///         range: 10.0,
///         cooldown_ticks: 30,
///     )),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitStats {
    /// Movement speed in world units per second.
    #[serde(with = "decimal_serde")]
    pub speed: Fixed,

    /// Maximum health.
    pub health: u32,

    /// Armor type for the damage matrix.
    #[serde(default)]
    pub armor: ArmorType,

    /// Footprint width.
    #[serde(with = "decimal_serde")]
    pub width: Fixed,

    /// Footprint height.
    #[serde(with = "decimal_serde")]
    pub height: Fixed,

    /// Resource cost.
    #[serde(default)]
    pub cost: u32,

    /// Population used while alive.
    #[serde(default = "default_population")]
    pub population: u32,

    /// Sight radius for fog of war.
    #[serde(default, with = "decimal_serde")]
    pub vision_range: Fixed,

    /// Attack (None for non-combatants).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack: Option<AttackStats>,

    /// Mana pool (None for units without one).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mana: Option<ManaStats>,

    /// Skill keys.
    #[serde(default)]
    pub skills: Vec<String>,
}

const fn default_population() -> u32 {
    1
}

impl UnitStats {
    /// Footprint built from width and height.
    #[must_use]
    pub fn footprint(&self) -> Footprint {
        Footprint::new(self.width, self.height)
    }

    /// Vision capability, if the unit can see.
    #[must_use]
    pub fn vision(&self) -> Option<Vision> {
        (self.vision_range > Fixed::ZERO).then_some(Vision {
            range: self.vision_range,
        })
    }

    /// Check if this unit can engage in combat.
    #[must_use]
    pub fn is_combatant(&self) -> bool {
        self.attack.is_some()
    }

    /// Check if this unit carries the named skill.
    #[must_use]
    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.iter().any(|s| s == skill)
    }
}
