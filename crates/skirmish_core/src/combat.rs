//! Attack-type versus armor-type damage resolution and projectile flight.
//!
//! Damage is `base × multiplier`, where the multiplier is a percentage looked
//! up in a [`DamageMatrix`]. The matrix is content data: the default table is
//! only a starting point and every cell can be overridden from the stat table.

use serde::{Deserialize, Serialize};

use crate::components::{ArmorType, AttackType, Projectile};
use crate::math::{Fixed, Vec2Fixed};

/// Minimum damage floor for attacks whose multiplier is non-zero.
pub const MIN_DAMAGE: u32 = 1;

/// Percent multipliers indexed by `[attack_type][armor_type]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageMatrix {
    percent: [[u16; 5]; 4],
}

impl Default for DamageMatrix {
    fn default() -> Self {
        Self {
            percent: [
                // Unarmored, Light, Medium, Heavy, Fortified
                [100, 100, 150, 100, 70],  // Normal
                [150, 200, 75, 100, 35],   // Pierce
                [150, 100, 50, 100, 150],  // Siege
                [100, 125, 75, 200, 35],   // Magic
            ],
        }
    }
}

impl DamageMatrix {
    /// A matrix where every pairing deals 100%.
    #[must_use]
    pub fn uniform() -> Self {
        Self {
            percent: [[100; 5]; 4],
        }
    }

    /// Builder method to override one cell.
    #[must_use]
    pub fn with_percent(mut self, attack: AttackType, armor: ArmorType, percent: u16) -> Self {
        self.set_percent(attack, armor, percent);
        self
    }

    /// Override one cell.
    pub fn set_percent(&mut self, attack: AttackType, armor: ArmorType, percent: u16) {
        self.percent[attack.index()][armor.index()] = percent;
    }

    /// Raw percentage for a pairing.
    #[must_use]
    pub fn percent(&self, attack: AttackType, armor: ArmorType) -> u16 {
        self.percent[attack.index()][armor.index()]
    }

    /// Multiplier for a pairing as a fixed-point fraction.
    #[must_use]
    pub fn multiplier(&self, attack: AttackType, armor: ArmorType) -> Fixed {
        Fixed::from_num(self.percent(attack, armor)) / Fixed::from_num(100)
    }

    /// Final damage for one hit.
    ///
    /// Rounds down, but never below [`MIN_DAMAGE`] unless the multiplier or
    /// the base damage is zero.
    #[must_use]
    pub fn calculate_damage(&self, base: u32, attack: AttackType, armor: ArmorType) -> u32 {
        let modifier = self.multiplier(attack, armor);
        if modifier == Fixed::ZERO || base == 0 {
            return 0;
        }
        let damage = (Fixed::from_num(base) * modifier).to_num::<i64>();
        (damage.max(0) as u32).max(MIN_DAMAGE)
    }
}

/// Result of advancing a projectile by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectileStep {
    /// Still travelling.
    InFlight,
    /// Reached its aim point this tick.
    Arrived,
}

/// Advance a projectile towards its aim point.
///
/// `target_position` is the target's current position while it is alive;
/// `None` freezes the aim point at the last known location.
pub fn step_projectile(
    projectile: &mut Projectile,
    target_position: Option<Vec2Fixed>,
    dt: Fixed,
) -> ProjectileStep {
    if let Some(position) = target_position {
        projectile.aim_point = position;
    }

    let to_aim = projectile.aim_point - projectile.position;
    let step = projectile.speed * dt;
    if step <= Fixed::ZERO || to_aim.length_squared() <= step * step {
        projectile.position = projectile.aim_point;
        return ProjectileStep::Arrived;
    }
    projectile.position += to_aim.with_length(step);
    ProjectileStep::InFlight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{AttackRole, Team};

    #[test]
    fn test_normal_vs_medium_is_one_and_a_half() {
        let matrix = DamageMatrix::default();
        assert_eq!(
            matrix.multiplier(AttackType::Normal, ArmorType::Medium),
            Fixed::from_num(150) / Fixed::from_num(100)
        );
        assert_eq!(matrix.calculate_damage(20, AttackType::Normal, ArmorType::Medium), 30);
    }

    #[test]
    fn test_override_cell() {
        let matrix = DamageMatrix::uniform().with_percent(AttackType::Magic, ArmorType::Fortified, 0);
        assert_eq!(matrix.calculate_damage(50, AttackType::Magic, ArmorType::Fortified), 0);
        assert_eq!(matrix.calculate_damage(50, AttackType::Magic, ArmorType::Heavy), 50);
    }

    #[test]
    fn test_minimum_damage() {
        let matrix = DamageMatrix::default();
        // 1 * 35% rounds to zero but still lands.
        assert_eq!(matrix.calculate_damage(1, AttackType::Pierce, ArmorType::Fortified), MIN_DAMAGE);
    }

    fn arrow(speed: i32) -> Projectile {
        Projectile {
            id: 1,
            source: 1,
            team: Team(1),
            target: 2,
            position: Vec2Fixed::ZERO,
            origin: Vec2Fixed::ZERO,
            aim_point: Vec2Fixed::from_ints(100, 0),
            speed: Fixed::from_num(speed),
            damage: 10,
            attack_type: AttackType::Pierce,
            role: AttackRole::Ranged,
            splash_radius: Fixed::ZERO,
            arc_height: Fixed::ZERO,
        }
    }

    #[test]
    fn test_projectile_homes_on_live_target() {
        let mut projectile = arrow(60);
        let dt = Fixed::ONE;
        assert_eq!(
            step_projectile(&mut projectile, Some(Vec2Fixed::from_ints(100, 0)), dt),
            ProjectileStep::InFlight
        );
        assert_eq!(projectile.position, Vec2Fixed::from_ints(60, 0));

        // Target moved; projectile follows.
        assert_eq!(
            step_projectile(&mut projectile, Some(Vec2Fixed::from_ints(90, 0)), dt),
            ProjectileStep::Arrived
        );
        assert_eq!(projectile.position, Vec2Fixed::from_ints(90, 0));
    }

    #[test]
    fn test_projectile_keeps_last_aim_when_target_gone() {
        let mut projectile = arrow(40);
        step_projectile(&mut projectile, Some(Vec2Fixed::from_ints(80, 0)), Fixed::ONE);
        step_projectile(&mut projectile, None, Fixed::ONE);
        assert_eq!(projectile.position, Vec2Fixed::from_ints(80, 0));
        assert_eq!(projectile.aim_point, Vec2Fixed::from_ints(80, 0));
    }
}
