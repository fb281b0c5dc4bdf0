//! Sampled local collision avoidance.
//!
//! Each tick a moving unit turns its desired velocity into a safe one by
//! scoring a fixed fan of candidate velocities against its neighbours and
//! keeping the cheapest. This is an approximation of velocity obstacles: it
//! minimises overlap but does not guarantee zero overlap.
//!
//! All velocities are in world units per second. Scores are dimensionless:
//! velocity differences are measured in multiples of the agent's top speed.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::math::{decimal_serde, fixed_sqrt, Fixed, Vec2Fixed};
use crate::pathfinding::Direction;

/// Tuning for the avoidance solver.
///
/// The defaults are empirical starting points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvoidanceConfig {
    /// Weight of the distance between candidate and desired velocity.
    #[serde(with = "decimal_serde")]
    pub deviation_weight: Fixed,
    /// Weight applied when a candidate points against the desired direction.
    #[serde(with = "decimal_serde")]
    pub reversal_weight: Fixed,
    /// Penalty for closing in on an already-overlapping neighbour.
    #[serde(with = "decimal_serde")]
    pub overlap_penalty: Fixed,
    /// Score added (negative = reward) for separating from an overlapping neighbour.
    #[serde(with = "decimal_serde")]
    pub overlap_reward: Fixed,
    /// Penalty for a predicted collision, scaled by urgency.
    #[serde(with = "decimal_serde")]
    pub collision_weight: Fixed,
    /// Look-ahead window for collision prediction, in seconds.
    #[serde(with = "decimal_serde")]
    pub horizon_secs: Fixed,
    /// Distance (edge to edge) within which the escape candidate is offered.
    #[serde(with = "decimal_serde")]
    pub separation_radius: Fixed,
    /// Radius around the agent in which neighbours are considered.
    #[serde(with = "decimal_serde")]
    pub neighbor_radius: Fixed,
    /// Speeds below this count as standing still.
    #[serde(with = "decimal_serde")]
    pub stationary_speed: Fixed,
    /// Rotation angles (radians) applied to the desired velocity.
    pub fan_angles: Vec<f64>,
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        Self {
            deviation_weight: Fixed::ONE,
            reversal_weight: Fixed::from_num(10),
            overlap_penalty: Fixed::from_num(1000),
            overlap_reward: Fixed::from_num(-50),
            collision_weight: Fixed::from_num(300),
            horizon_secs: Fixed::ONE,
            separation_radius: Fixed::from_num(8),
            neighbor_radius: Fixed::from_num(120),
            stationary_speed: Fixed::ONE,
            fan_angles: vec![0.2, -0.2, 0.5, -0.5, 0.9, -0.9, 1.5, -1.5, 2.0, -2.0, 2.5, -2.5],
        }
    }
}

/// Precomputed `(cos, sin)` pairs for the candidate fan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationTable {
    rotations: Vec<(Fixed, Fixed)>,
}

impl RotationTable {
    /// Build the table. Floating point is used here once; the solver itself
    /// only touches the fixed-point results.
    #[must_use]
    pub fn new(angles: &[f64]) -> Self {
        let rotations = angles
            .iter()
            .filter_map(|&a| Some((Fixed::checked_from_num(a.cos())?, Fixed::checked_from_num(a.sin())?)))
            .collect();
        Self { rotations }
    }

    /// Number of rotations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rotations.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rotations.is_empty()
    }
}

/// The unit being steered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Agent {
    /// Center position.
    pub position: Vec2Fixed,
    /// Current velocity.
    pub velocity: Vec2Fixed,
    /// Collision radius.
    pub radius: Fixed,
    /// Top speed.
    pub max_speed: Fixed,
}

/// A live, solid body near the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    /// Center position.
    pub position: Vec2Fixed,
    /// Current velocity (zero for static bodies).
    pub velocity: Vec2Fixed,
    /// Collision radius.
    pub radius: Fixed,
}

/// Pick the lowest-scoring candidate velocity.
///
/// Candidates are tried in a fixed order (desired first) and ties keep the
/// earlier one, so an unobstructed unit always gets exactly its desired
/// velocity. `rng` is only consulted to pick an escape direction for an
/// exactly coincident neighbour.
pub fn solve<R: Rng>(
    config: &AvoidanceConfig,
    table: &RotationTable,
    agent: &Agent,
    desired: Vec2Fixed,
    neighbors: &[Neighbor],
    rng: &mut R,
) -> Vec2Fixed {
    if neighbors.is_empty() || agent.max_speed <= Fixed::ZERO {
        return desired;
    }
    let desired = desired.clamp_length(agent.max_speed);

    let mut best = desired;
    let mut best_score = score(config, agent, desired, desired, neighbors);
    let mut consider = |candidate: Vec2Fixed| {
        let candidate = candidate.clamp_length(agent.max_speed);
        let s = score(config, agent, candidate, desired, neighbors);
        if s < best_score {
            best_score = s;
            best = candidate;
        }
    };

    let current = if agent.velocity.length_squared() < config.stationary_speed * config.stationary_speed {
        Vec2Fixed::ZERO
    } else {
        agent.velocity
    };
    consider(current);

    let half = Fixed::from_num(2);
    for &(cos, sin) in &table.rotations {
        let rotated = desired.rotate(cos, sin);
        consider(rotated);
        consider(Vec2Fixed::new(rotated.x / half, rotated.y / half));
    }

    if let Some(escape) = escape_vector(config, agent, neighbors, rng) {
        consider(escape);
    }

    best
}

/// Velocity pointing away from the nearest neighbour inside the separation
/// radius, at full speed.
fn escape_vector<R: Rng>(
    config: &AvoidanceConfig,
    agent: &Agent,
    neighbors: &[Neighbor],
    rng: &mut R,
) -> Option<Vec2Fixed> {
    let mut nearest: Option<(Fixed, &Neighbor)> = None;
    for neighbor in neighbors {
        let gap = agent.position.distance(neighbor.position) - agent.radius - neighbor.radius;
        if gap <= config.separation_radius && nearest.map_or(true, |(g, _)| gap < g) {
            nearest = Some((gap, neighbor));
        }
    }
    let (_, neighbor) = nearest?;
    let away = agent.position - neighbor.position;
    if away.is_zero() {
        let dir = Direction::COMPASS[rng.gen_range(0..Direction::COMPASS.len())];
        return Some(dir.to_vector().scale(agent.max_speed));
    }
    Some(away.with_length(agent.max_speed))
}

fn score(
    config: &AvoidanceConfig,
    agent: &Agent,
    candidate: Vec2Fixed,
    desired: Vec2Fixed,
    neighbors: &[Neighbor],
) -> Fixed {
    let speed = agent.max_speed;
    let mut total = config.deviation_weight * (candidate - desired).length() / speed;

    let alignment = candidate.dot(desired);
    if alignment < Fixed::ZERO {
        total += config.reversal_weight * (-alignment) / (speed * speed);
    }

    for neighbor in neighbors {
        total += neighbor_cost(config, agent, candidate, neighbor);
    }
    total
}

fn neighbor_cost(config: &AvoidanceConfig, agent: &Agent, candidate: Vec2Fixed, neighbor: &Neighbor) -> Fixed {
    let offset = neighbor.position - agent.position;
    let combined = agent.radius + neighbor.radius;
    if combined <= Fixed::ZERO {
        return Fixed::ZERO;
    }
    let relative = candidate - neighbor.velocity;
    let dist_sq = offset.length_squared();

    if dist_sq < combined * combined {
        let depth = (combined - fixed_sqrt(dist_sq)) / combined;
        if offset.is_zero() {
            // Exactly coincident: any relative motion separates.
            return if relative.is_zero() {
                config.overlap_penalty * depth
            } else {
                config.overlap_reward * depth
            };
        }
        // Closing by either the pair's relative motion or the agent's own
        // motion counts; the neighbour may change course next tick.
        let closing = relative.dot(offset);
        let own = candidate.dot(offset);
        return if closing > Fixed::ZERO || own > Fixed::ZERO {
            config.overlap_penalty * depth
        } else if closing < Fixed::ZERO {
            config.overlap_reward * depth
        } else {
            Fixed::ZERO
        };
    }

    match time_to_collision(offset, relative, combined) {
        Some(t) if t < config.horizon_secs => {
            let urgency = (config.horizon_secs - t) / config.horizon_secs;
            config.collision_weight * urgency
        }
        _ => Fixed::ZERO,
    }
}

/// Earliest `t ≥ 0` at which `|offset - relative·t| = radius`, for a pair
/// that does not overlap now.
fn time_to_collision(offset: Vec2Fixed, relative: Vec2Fixed, radius: Fixed) -> Option<Fixed> {
    let a = relative.length_squared();
    let b = offset.dot(relative);
    if a == Fixed::ZERO || b <= Fixed::ZERO {
        return None;
    }
    let c = offset.length_squared() - radius * radius;
    let discriminant = b * b - a * c;
    if discriminant < Fixed::ZERO {
        return None;
    }
    let t = (b - fixed_sqrt(discriminant)) / a;
    Some(t.max(Fixed::ZERO))
}
