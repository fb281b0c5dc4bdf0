//! Building stat definitions.

use serde::{Deserialize, Serialize};

use super::unit_data::AttackStats;
use crate::components::{ArmorType, Footprint, Vision};
use crate::math::{decimal_serde, Fixed};

/// Data-driven building definition, keyed by its kind in the stat table.
///
/// # Example RON
///
/// ```ron
/// BuildingStats(
///     health: 1500,
///     armor: Fortified,
///     width: 96.0,
///     height: 96.0,
///     cost: 200,
///     population_provided: 10,
///     produces: ["footman", "archer"],
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingStats {
    /// Maximum health.
    pub health: u32,

    /// Armor type for the damage matrix.
    #[serde(default = "default_armor")]
    pub armor: ArmorType,

    /// Footprint width.
    #[serde(with = "decimal_serde")]
    pub width: Fixed,

    /// Footprint height.
    #[serde(with = "decimal_serde")]
    pub height: Fixed,

    /// Resource cost to place.
    #[serde(default)]
    pub cost: u32,

    /// Population cap added while the building stands.
    #[serde(default)]
    pub population_provided: u32,

    /// Unit keys this building can produce.
    #[serde(default)]
    pub produces: Vec<String>,

    /// Sight radius for fog of war.
    #[serde(default, with = "decimal_serde")]
    pub vision_range: Fixed,

    /// Tower attack (None for non-combat buildings).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack: Option<AttackStats>,
}

const fn default_armor() -> ArmorType {
    ArmorType::Fortified
}

impl BuildingStats {
    /// Footprint built from width and height.
    #[must_use]
    pub fn footprint(&self) -> Footprint {
        Footprint::new(self.width, self.height)
    }

    /// Vision capability, if the building can see.
    #[must_use]
    pub fn vision(&self) -> Option<Vision> {
        (self.vision_range > Fixed::ZERO).then_some(Vision {
            range: self.vision_range,
        })
    }

    /// Check if this building can produce the specified unit.
    #[must_use]
    pub fn can_produce(&self, unit_key: &str) -> bool {
        self.produces.iter().any(|u| u == unit_key)
    }

    /// Check if this building can attack.
    #[must_use]
    pub fn is_combat(&self) -> bool {
        self.attack.is_some()
    }
}
