//! Simulation configuration.
//!
//! Plain serde types with defaults for every field, so a scenario file only
//! needs to name what it changes.

use serde::{Deserialize, Serialize};

use crate::avoidance::AvoidanceConfig;
use crate::clock::ClockConfig;
use crate::components::Team;
use crate::math::{decimal_serde, decimal_vec_serde, Fixed, Vec2Fixed};
use crate::pathfinding::{FlowDispatch, DEFAULT_IMPASSABLE};
use crate::spatial::DEFAULT_CELL_SIZE;

/// Per-team starting setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Team id. Team 0 is neutral and cannot be configured.
    pub team: Team,
    /// Where units appear when no production building is standing.
    #[serde(with = "decimal_vec_serde")]
    pub spawn_point: Vec2Fixed,
    /// Starting resources.
    #[serde(default)]
    pub resources: u32,
    /// Population cap before any buildings are placed.
    #[serde(default)]
    pub population_cap: u32,
}

/// Everything the simulation needs besides content data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Map width in world units.
    #[serde(with = "decimal_serde")]
    pub map_width: Fixed,
    /// Map height in world units.
    #[serde(with = "decimal_serde")]
    pub map_height: Fixed,
    /// Cell size of the spatial index.
    #[serde(with = "decimal_serde")]
    pub spatial_cell_size: Fixed,
    /// Cell size of the pathfinding cost grid.
    #[serde(with = "decimal_serde")]
    pub path_cell_size: Fixed,
    /// Cell size of the fog-of-war grid.
    #[serde(with = "decimal_serde")]
    pub fog_cell_size: Fixed,
    /// Whether fog of war hides enemies from target acquisition.
    pub fog_enabled: bool,
    /// Cost value treated as impassable.
    pub impassable_cost: u8,
    /// Clock limits and tick rate.
    pub clock: ClockConfig,
    /// Ticks a dead entity stays queryable before removal.
    pub death_grace_ticks: u32,
    /// Ticks between target scans.
    pub scan_interval_ticks: u32,
    /// Scan range for melee attackers.
    #[serde(with = "decimal_serde")]
    pub melee_scan_range: Fixed,
    /// Scan range for every other role.
    #[serde(with = "decimal_serde")]
    pub ranged_scan_range: Fixed,
    /// Ticks between path refreshes while chasing a moving target.
    pub repath_interval_ticks: u32,
    /// Distance at which a waypoint counts as reached.
    #[serde(with = "decimal_serde")]
    pub arrival_radius: Fixed,
    /// Local avoidance tuning.
    pub avoidance: AvoidanceConfig,
    /// Where flow fields are computed.
    pub flow_dispatch: FlowDispatch,
    /// Seed for the simulation RNG.
    pub seed: u64,
    /// Largest random offset applied to a freshly spawned unit.
    #[serde(with = "decimal_serde")]
    pub spawn_jitter: Fixed,
    /// Time scale while hit-stop is active.
    pub hit_stop_scale: f64,
    /// Hit-stop duration in real seconds.
    pub hit_stop_secs: f64,
    /// Team setups.
    pub teams: Vec<TeamConfig>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            map_width: Fixed::from_num(2048),
            map_height: Fixed::from_num(2048),
            spatial_cell_size: Fixed::from_num(DEFAULT_CELL_SIZE),
            path_cell_size: Fixed::from_num(32),
            fog_cell_size: Fixed::from_num(64),
            fog_enabled: true,
            impassable_cost: DEFAULT_IMPASSABLE,
            clock: ClockConfig::default(),
            death_grace_ticks: 120,
            scan_interval_ticks: 10,
            melee_scan_range: Fixed::from_num(200),
            ranged_scan_range: Fixed::from_num(350),
            repath_interval_ticks: 30,
            arrival_radius: Fixed::from_num(6),
            avoidance: AvoidanceConfig::default(),
            flow_dispatch: FlowDispatch::Background,
            seed: 0,
            spawn_jitter: Fixed::from_num(8),
            hit_stop_scale: 0.2,
            hit_stop_secs: 0.15,
            teams: Vec::new(),
        }
    }
}

impl SimConfig {
    /// Setup for `team`, if configured.
    #[must_use]
    pub fn team(&self, team: Team) -> Option<&TeamConfig> {
        self.teams.iter().find(|t| t.team == team)
    }

    /// Builder-style override of the seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builder-style override of the flow dispatch mode.
    #[must_use]
    pub fn with_flow_dispatch(mut self, dispatch: FlowDispatch) -> Self {
        self.flow_dispatch = dispatch;
        self
    }

    /// Builder-style addition of a team.
    #[must_use]
    pub fn with_team(mut self, team: TeamConfig) -> Self {
        self.teams.retain(|t| t.team != team.team);
        self.teams.push(team);
        self
    }

    /// Scan range for an attacker of the given role.
    #[must_use]
    pub fn scan_range(&self, melee: bool) -> Fixed {
        if melee {
            self.melee_scan_range
        } else {
            self.ranged_scan_range
        }
    }
}
