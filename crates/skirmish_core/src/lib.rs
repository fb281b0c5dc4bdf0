//! # Skirmish Core
//!
//! Deterministic battlefield simulation for a real-time strategy game.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No file IO
//! - No system randomness (one seeded RNG per simulation)
//! - No floating-point math in the tick (uses fixed-point)
//!
//! This separation enables:
//! - Headless batch runs
//! - Snapshots and replays
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`simulation`] - Entity storage, commands and the tick pipeline
//! - [`components`] - Entity, capabilities, orders and projectiles
//! - [`pathfinding`] - Cost grid, A*, flow fields and the flow worker
//! - [`avoidance`] - Sampling-based local collision avoidance
//! - [`spatial`] - Static and dynamic spatial grids
//! - [`combat`] - Damage matrix and projectile flight
//! - [`clock`] - Fixed-timestep accumulator with hit-stop
//! - [`data`] - Content stat tables
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod avoidance;
mod behavior;
pub mod clock;
pub mod combat;
pub mod components;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod fog;
pub mod math;
pub mod pathfinding;
pub mod simulation;
pub mod snapshot;
pub mod spatial;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::components::*;
    pub use crate::config::{SimConfig, TeamConfig};
    pub use crate::data::{AttackStats, BuildingStats, StatTable, UnitStats};
    pub use crate::error::{GameError, Result};
    pub use crate::events::{SimEvent, TickEvents};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::pathfinding::FlowDispatch;
    pub use crate::simulation::{Simulation, TeamState};
    pub use crate::snapshot::SimulationSnapshot;
}
