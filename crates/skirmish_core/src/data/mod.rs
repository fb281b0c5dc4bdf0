//! Content data: unit, building and skill stats plus the damage matrix.
//!
//! Pure serde types with no IO. File loading is the caller's job; the
//! headless runner reads these from RON.

mod building_data;
mod unit_data;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::combat::DamageMatrix;
use crate::math::Fixed;

pub use building_data::BuildingStats;
pub use unit_data::{AttackStats, ManaStats, SkillStats, UnitStats};

/// A content problem found at load time.
///
/// Warnings never block startup; they are logged and the offending entry
/// is used as written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationWarning {
    /// A building lists a unit key that does not exist.
    #[error("building '{building}' produces unknown unit '{unit}'")]
    UnknownProducedUnit {
        /// Building kind.
        building: String,
        /// Missing unit key.
        unit: String,
    },
    /// A unit references a skill that does not exist.
    #[error("unit '{unit}' references missing skill '{skill}'")]
    MissingSkill {
        /// Unit key.
        unit: String,
        /// Missing skill key.
        skill: String,
    },
    /// Width or height is zero.
    #[error("'{key}' has a zero-size footprint")]
    ZeroFootprint {
        /// Unit key or building kind.
        key: String,
    },
    /// A projectile-based attack fires every tick.
    #[error("'{key}' has a ranged attack with zero cooldown")]
    ZeroRangedCooldown {
        /// Unit key or building kind.
        key: String,
    },
    /// A projectile role with no projectile speed.
    #[error("'{key}' uses projectiles but has no projectile speed")]
    MissingProjectileSpeed {
        /// Unit key or building kind.
        key: String,
    },
}

/// Every stat definition the simulation spawns from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatTable {
    /// Unit stats by content key.
    pub units: BTreeMap<String, UnitStats>,
    /// Building stats by kind.
    pub buildings: BTreeMap<String, BuildingStats>,
    /// Skill stats by key.
    pub skills: BTreeMap<String, SkillStats>,
    /// Attack-type versus armor-type multipliers.
    pub damage: DamageMatrix,
}

impl StatTable {
    /// Find a unit by key.
    #[must_use]
    pub fn unit(&self, key: &str) -> Option<&UnitStats> {
        self.units.get(key)
    }

    /// Find a building by kind.
    #[must_use]
    pub fn building(&self, kind: &str) -> Option<&BuildingStats> {
        self.buildings.get(kind)
    }

    /// Find a skill by key.
    #[must_use]
    pub fn skill(&self, key: &str) -> Option<&SkillStats> {
        self.skills.get(key)
    }

    /// Check internal consistency.
    ///
    /// Checks for:
    /// - produced unit keys that are not defined
    /// - skill references that are not defined
    /// - zero-size footprints
    /// - projectile attacks with zero cooldown or zero projectile speed
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        for (kind, building) in &self.buildings {
            for unit in &building.produces {
                if !self.units.contains_key(unit) {
                    warnings.push(ValidationWarning::UnknownProducedUnit {
                        building: kind.clone(),
                        unit: unit.clone(),
                    });
                }
            }
            check_body(kind, building.width, building.height, &mut warnings);
            if let Some(attack) = &building.attack {
                check_attack(kind, attack, &mut warnings);
            }
        }

        for (key, unit) in &self.units {
            for skill in &unit.skills {
                if !self.skills.contains_key(skill) {
                    warnings.push(ValidationWarning::MissingSkill {
                        unit: key.clone(),
                        skill: skill.clone(),
                    });
                }
            }
            check_body(key, unit.width, unit.height, &mut warnings);
            if let Some(attack) = &unit.attack {
                check_attack(key, attack, &mut warnings);
            }
        }

        warnings
    }
}

fn check_body(key: &str, width: Fixed, height: Fixed, warnings: &mut Vec<ValidationWarning>) {
    if width <= Fixed::ZERO || height <= Fixed::ZERO {
        warnings.push(ValidationWarning::ZeroFootprint { key: key.to_string() });
    }
}

fn check_attack(key: &str, attack: &AttackStats, warnings: &mut Vec<ValidationWarning>) {
    if !attack.role.uses_projectile() {
        return;
    }
    if attack.cooldown_ticks == 0 {
        warnings.push(ValidationWarning::ZeroRangedCooldown { key: key.to_string() });
    }
    if attack.projectile_speed <= Fixed::ZERO {
        warnings.push(ValidationWarning::MissingProjectileSpeed { key: key.to_string() });
    }
}
