//! Grid pathfinding.
//!
//! Two cooperating strategies share one [`CostGrid`]:
//! - [`astar`]: exact single-unit paths, computed synchronously.
//! - [`flow_field`]: direction fields for mass movement, computed off the
//!   tick by [`worker::FlowService`] and cached per goal cell.
//!
//! [`Pathfinder`] owns both and is the only thing the simulation talks to.

pub mod astar;
pub mod flow_field;
pub mod grid;
pub mod worker;

use std::sync::Arc;

use tracing::info;

pub use astar::{find_cell_path, find_path, smooth_path};
pub use flow_field::{Direction, FlowField, FlowScratch};
pub use grid::{CostGrid, DEFAULT_IMPASSABLE, FREE_COST};
pub use worker::{FlowDispatch, FlowService};

use crate::components::Entity;
use crate::math::{Fixed, Vec2Fixed};

/// Cost grid plus the path and flow-field services built on it.
#[derive(Debug)]
pub struct Pathfinder {
    grid: CostGrid,
    flows: FlowService,
}

impl Pathfinder {
    /// Create a pathfinder over `grid`.
    #[must_use]
    pub fn new(grid: CostGrid, dispatch: FlowDispatch) -> Self {
        Self {
            grid,
            flows: FlowService::new(dispatch),
        }
    }

    /// The current cost grid.
    #[must_use]
    pub const fn grid(&self) -> &CostGrid {
        &self.grid
    }

    /// Flow-field service state.
    #[must_use]
    pub const fn flows(&self) -> &FlowService {
        &self.flows
    }

    /// Recompute the cost grid from `entities` and drop every cached field.
    pub fn rebuild_costs<'a>(&mut self, entities: impl IntoIterator<Item = &'a Entity>) {
        self.grid.rebuild_costs(entities);
        self.flows.invalidate();
        info!(version = self.flows.version(), "navigation layout invalidated");
    }

    /// A* path from `start` to `goal` for a body of half-size `clearance`;
    /// see [`astar::find_path`].
    #[must_use]
    pub fn find_path(&self, start: Vec2Fixed, goal: Vec2Fixed, clearance: Fixed) -> Vec<Vec2Fixed> {
        astar::find_path(&self.grid, start, goal, clearance)
    }

    /// Goal cell used for a world-space flow target.
    ///
    /// Out-of-range targets clamp to the grid; unwalkable ones move to the
    /// nearest walkable cell.
    #[must_use]
    pub fn flow_goal(&self, target: Vec2Fixed) -> (u32, u32) {
        let (x, y) = self.grid.world_to_grid_clamped(target);
        self.grid.nearest_walkable(x, y).unwrap_or((x, y))
    }

    /// Field for `goal`, or a pending placeholder while it is computed.
    pub fn request_flow(&mut self, goal: (u32, u32)) -> Arc<FlowField> {
        self.flows.request(&self.grid, goal)
    }

    /// Absorb a finished background field. Called once per tick.
    pub fn poll(&mut self) -> Option<(u32, u32)> {
        self.flows.poll(&self.grid)
    }

    /// Wait for every queued field to be published.
    pub fn block_until_idle(&mut self) {
        self.flows.block_until_idle(&self.grid);
    }
}
