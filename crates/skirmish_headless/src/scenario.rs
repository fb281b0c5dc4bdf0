//! Scenario loading and configuration.
//!
//! A scenario is one RON file holding everything a headless battle needs:
//! the simulation config, the content stat table, the starting layout and a
//! script of commands keyed by tick.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use skirmish_core::components::{EntityId, Order, Team};
use skirmish_core::config::SimConfig;
use skirmish_core::data::StatTable;
use skirmish_core::error::GameError;
use skirmish_core::math::{Fixed, Vec2Fixed};

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// A coordinate does not fit the fixed-point range.
    #[error("Coordinate out of range: ({0}, {1})")]
    OutOfRange(f64, f64),
    /// A scripted command names a label no placement defined.
    #[error("Unknown unit label: {0}")]
    UnknownLabel(String),
    /// The simulation rejected a placement or command.
    #[error("Rejected by simulation: {0}")]
    Rejected(#[from] GameError),
    /// Frame delta must be positive.
    #[error("Invalid frame delta: {0}")]
    InvalidFrameDelta(f64),
    /// Failed to write the summary.
    #[error("Failed to encode summary: {0}")]
    Output(#[from] serde_json::Error),
}

/// A complete scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Simulation config, including teams and seed.
    #[serde(default)]
    pub config: SimConfig,
    /// Content stat table.
    pub stats: StatTable,
    /// Hard limit on simulated ticks.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,
    /// Real seconds fed to the clock per frame.
    #[serde(default = "default_frame_dt")]
    pub frame_dt: f64,
    /// End the run as soon as at most one team has live entities.
    #[serde(default = "default_true")]
    pub stop_on_elimination: bool,
    /// Units inserted before the first tick, free of cost.
    #[serde(default)]
    pub units: Vec<UnitPlacement>,
    /// Buildings inserted before the first tick, free of cost.
    #[serde(default)]
    pub buildings: Vec<BuildingPlacement>,
    /// Neutral map blockers.
    #[serde(default)]
    pub obstacles: Vec<ObstaclePlacement>,
    /// Commands applied once the simulation reaches their tick.
    #[serde(default)]
    pub script: Vec<ScriptedCommand>,
}

const fn default_max_ticks() -> u64 {
    // Five minutes at 60 tps.
    18_000
}

const fn default_frame_dt() -> f64 {
    1.0 / 60.0
}

const fn default_true() -> bool {
    true
}

impl Scenario {
    /// Load a scenario from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron_str(&contents)
    }

    /// Load from a RON string (useful for embedded scenarios).
    pub fn from_ron_str(ron: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = ron::from_str(ron)?;
        Ok(scenario)
    }

    /// Override the config seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Override the tick limit.
    #[must_use]
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }
}

/// Convert an authored `(x, y)` pair into a world position.
pub fn world_point((x, y): (f64, f64)) -> Result<Vec2Fixed, ScenarioError> {
    match (Fixed::checked_from_num(x), Fixed::checked_from_num(y)) {
        (Some(fx), Some(fy)) => Ok(Vec2Fixed::new(fx, fy)),
        _ => Err(ScenarioError::OutOfRange(x, y)),
    }
}

/// Placement of one or more units at scenario start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitPlacement {
    /// Unit stat key.
    pub key: String,
    /// Owning team.
    pub team: Team,
    /// Position of the first unit.
    pub position: (f64, f64),
    /// Number of units, laid out in a row of `spacing` steps.
    #[serde(default = "default_count")]
    pub count: u32,
    /// Horizontal step between units of a row.
    #[serde(default = "default_spacing")]
    pub spacing: f64,
    /// Name scripted commands can refer to. Shared by every unit of the row.
    #[serde(default)]
    pub label: Option<String>,
}

const fn default_count() -> u32 {
    1
}

const fn default_spacing() -> f64 {
    24.0
}

/// Placement of a building at scenario start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildingPlacement {
    /// Building kind.
    pub kind: String,
    /// Owning team.
    pub team: Team,
    /// Center position.
    pub position: (f64, f64),
    /// Name scripted commands can refer to.
    #[serde(default)]
    pub label: Option<String>,
}

/// A neutral, impassable rectangle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstaclePlacement {
    /// Center position.
    pub position: (f64, f64),
    /// Width and height.
    pub size: (f64, f64),
}

/// Which units a scripted order applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    /// Units placed under this label.
    Label(String),
    /// Every live commandable unit of the team.
    Team(Team),
}

/// Order as written in a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptOrder {
    /// Move to a point.
    Move((f64, f64)),
    /// Move to a point, fighting on the way.
    AttackMove((f64, f64)),
    /// Attack the first live entity under a label.
    Attack(String),
    /// Drop all orders.
    Stop,
}

impl ScriptOrder {
    /// Resolve points and labels into a simulation order.
    ///
    /// `resolve` maps a label to the entity it should target.
    pub fn to_order(
        &self,
        resolve: impl Fn(&str) -> Option<EntityId>,
    ) -> Result<Order, ScenarioError> {
        Ok(match self {
            Self::Move(point) => Order::Move(world_point(*point)?),
            Self::AttackMove(point) => Order::AttackMove(world_point(*point)?),
            Self::Attack(label) => {
                Order::Attack(resolve(label).ok_or_else(|| ScenarioError::UnknownLabel(label.clone()))?)
            }
            Self::Stop => Order::Stop,
        })
    }
}

/// One scripted command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Give an order to a selection of units.
    Order {
        /// Units to command.
        select: Selection,
        /// The order.
        order: ScriptOrder,
        /// Append instead of replacing.
        #[serde(default)]
        queued: bool,
    },
    /// Buy a unit through the normal spawn rules.
    Spawn {
        /// Unit stat key.
        key: String,
        /// Buying team.
        team: Team,
        /// Label to add the new unit under.
        #[serde(default)]
        label: Option<String>,
    },
    /// Buy and place a building.
    Build {
        /// Building kind.
        kind: String,
        /// Buying team.
        team: Team,
        /// Center position.
        position: (f64, f64),
    },
    /// Change the clock's time scale.
    TimeScale(f64),
}

/// A command and the tick it becomes due.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedCommand {
    /// Applied before the first tick whose number is at least this.
    pub tick: u64,
    /// What to do.
    pub command: Command,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        Scenario(
            name: "Minimal",
            stats: (
                units: {
                    "grunt": (speed: 40.0, health: 50, width: 10.0, height: 10.0),
                },
            ),
            config: (
                seed: 9,
                teams: [(team: Team(1), spawn_point: (100.0, 100.0), resources: 300)],
            ),
            units: [(key: "grunt", team: Team(1), position: (120.0, 100.0), count: 3, label: Some("squad"))],
            script: [
                (tick: 30, command: Order(select: Label("squad"), order: Move((400.0, 100.0)))),
                (tick: 60, command: Spawn(key: "grunt", team: Team(1))),
            ],
        )
    "#;

    #[test]
    fn test_parse_minimal() {
        let scenario = Scenario::from_ron_str(MINIMAL).expect("parse");
        assert_eq!(scenario.name, "Minimal");
        assert_eq!(scenario.config.seed, 9);
        assert_eq!(scenario.config.teams.len(), 1);
        assert_eq!(scenario.config.teams[0].spawn_point, Vec2Fixed::from_ints(100, 100));
        assert_eq!(scenario.units[0].count, 3);
        assert_eq!(scenario.max_ticks, default_max_ticks());
        assert!(scenario.stop_on_elimination);
        assert_eq!(scenario.script.len(), 2);
    }

    #[test]
    fn test_overrides() {
        let scenario = Scenario::from_ron_str(MINIMAL)
            .expect("parse")
            .with_seed(77)
            .with_max_ticks(10);
        assert_eq!(scenario.config.seed, 77);
        assert_eq!(scenario.max_ticks, 10);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Scenario::load("does/not/exist.ron"),
            Err(ScenarioError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            Scenario::from_ron_str("Scenario(name: 3)"),
            Err(ScenarioError::ParseError(_))
        ));
    }

    #[test]
    fn test_world_point_range() {
        assert_eq!(world_point((3.0, 4.5)).ok(), Some(Vec2Fixed::new(Fixed::from_num(3), Fixed::from_num(4.5))));
        assert!(matches!(world_point((1e300, 0.0)), Err(ScenarioError::OutOfRange(..))));
    }

    #[test]
    fn test_attack_order_needs_label() {
        let order = ScriptOrder::Attack("boss".to_string());
        assert_eq!(order.to_order(|l| (l == "boss").then_some(4)).ok(), Some(Order::Attack(4)));
        assert!(matches!(order.to_order(|_| None), Err(ScenarioError::UnknownLabel(_))));
    }
}
