//! Shortest-path direction fields for mass movement.
//!
//! A flow field answers "which way to the goal?" for every cell at once, so
//! any number of units heading to the same point share one computation.
//! Construction has two phases: integration (single-sink label-correcting
//! propagation of octile step costs outward from the goal) and direction
//! picking (each cell points at its neighbour with the lowest strictly
//! smaller cost).

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::grid::{CostGrid, NEIGHBORS};
use crate::math::{Fixed, Vec2Fixed};

/// Integration cost of an unreachable cell.
pub const UNREACHABLE: u32 = u32::MAX;

/// One of nine discrete flow directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// At the goal, or no way forward.
    #[default]
    None,
    /// Negative y.
    North,
    /// Positive x, negative y.
    NorthEast,
    /// Positive x.
    East,
    /// Positive x, positive y.
    SouthEast,
    /// Positive y.
    South,
    /// Negative x, positive y.
    SouthWest,
    /// Negative x.
    West,
    /// Negative x, negative y.
    NorthWest,
}

impl Direction {
    /// The eight moving directions, in [`NEIGHBORS`] order.
    pub const COMPASS: [Self; 8] = [
        Self::North,
        Self::NorthEast,
        Self::East,
        Self::SouthEast,
        Self::South,
        Self::SouthWest,
        Self::West,
        Self::NorthWest,
    ];

    /// Cell offset of this direction.
    #[must_use]
    pub const fn offset(self) -> (i32, i32) {
        match self {
            Self::None => (0, 0),
            Self::North => NEIGHBORS[0],
            Self::NorthEast => NEIGHBORS[1],
            Self::East => NEIGHBORS[2],
            Self::SouthEast => NEIGHBORS[3],
            Self::South => NEIGHBORS[4],
            Self::SouthWest => NEIGHBORS[5],
            Self::West => NEIGHBORS[6],
            Self::NorthWest => NEIGHBORS[7],
        }
    }

    /// Unit-length world vector (zero for [`Direction::None`]).
    #[must_use]
    pub fn to_vector(self) -> Vec2Fixed {
        let (dx, dy) = self.offset();
        if dx != 0 && dy != 0 {
            let d = Fixed::from_num(fixed::consts::FRAC_1_SQRT_2);
            Vec2Fixed::new(d * Fixed::from_num(dx), d * Fixed::from_num(dy))
        } else {
            Vec2Fixed::from_ints(dx, dy)
        }
    }
}

/// Reusable working memory for one flow-field computation.
#[derive(Debug, Default)]
pub struct FlowScratch {
    queue: VecDeque<usize>,
    queued: Vec<bool>,
}

impl FlowScratch {
    fn reset(&mut self, cells: usize) {
        self.queue.clear();
        self.queued.clear();
        self.queued.resize(cells, false);
    }
}

/// Per-cell directions towards one goal cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowField {
    goal: (u32, u32),
    width: u32,
    height: u32,
    costs: Vec<u32>,
    directions: Vec<Direction>,
    complete: bool,
}

impl FlowField {
    /// An incomplete field that answers every lookup with "pending".
    #[must_use]
    pub fn pending(goal: (u32, u32)) -> Self {
        Self {
            goal,
            width: 0,
            height: 0,
            costs: Vec::new(),
            directions: Vec::new(),
            complete: false,
        }
    }

    /// Compute a complete field for `goal` over `grid`.
    ///
    /// An out-of-range goal is clamped to the grid; an unwalkable goal moves
    /// to the nearest walkable cell. If no cell is walkable every direction
    /// is [`Direction::None`].
    #[must_use]
    pub fn compute(grid: &CostGrid, goal: (u32, u32), scratch: &mut FlowScratch) -> Self {
        let requested = (
            goal.0.min(grid.width() - 1),
            goal.1.min(grid.height() - 1),
        );
        let cells = grid.len();
        let mut costs = vec![UNREACHABLE; cells];
        let mut directions = vec![Direction::None; cells];

        let Some(sink) = grid.nearest_walkable(requested.0, requested.1) else {
            return Self {
                goal: requested,
                width: grid.width(),
                height: grid.height(),
                costs,
                directions,
                complete: true,
            };
        };

        integrate(grid, sink, &mut costs, scratch);
        pick_directions(grid, &costs, &mut directions);

        Self {
            goal: sink,
            width: grid.width(),
            height: grid.height(),
            costs,
            directions,
            complete: true,
        }
    }

    /// Goal cell the field flows towards.
    #[must_use]
    pub const fn goal(&self) -> (u32, u32) {
        self.goal
    }

    /// Whether the field may be consulted.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Direction at a cell.
    ///
    /// `None` means the field is still pending (or the cell is out of range);
    /// it is never confused with [`Direction::None`], which means "arrived"
    /// or "no way forward".
    #[must_use]
    pub fn direction_at(&self, x: u32, y: u32) -> Option<Direction> {
        if !self.complete || x >= self.width || y >= self.height {
            return None;
        }
        Some(self.directions[(y as usize) * (self.width as usize) + (x as usize)])
    }

    /// Integration cost at a cell, if the field is complete.
    #[must_use]
    pub fn cost_at(&self, x: u32, y: u32) -> Option<u32> {
        if !self.complete || x >= self.width || y >= self.height {
            return None;
        }
        Some(self.costs[(y as usize) * (self.width as usize) + (x as usize)])
    }
}

/// Label-correcting propagation from `sink`.
fn integrate(grid: &CostGrid, sink: (u32, u32), costs: &mut [u32], scratch: &mut FlowScratch) {
    scratch.reset(costs.len());
    let sink_index = grid.index(sink.0, sink.1);
    costs[sink_index] = 0;
    scratch.queue.push_back(sink_index);
    scratch.queued[sink_index] = true;

    while let Some(current) = scratch.queue.pop_front() {
        scratch.queued[current] = false;
        let (cx, cy) = grid.coords(current);
        let current_cost = costs[current];

        for &(dx, dy) in &NEIGHBORS {
            let nx = i64::from(cx) + i64::from(dx);
            let ny = i64::from(cy) + i64::from(dy);
            if !grid.is_walkable_i(nx, ny) {
                continue;
            }
            let (nx, ny) = (nx as u32, ny as u32);
            // Cost for a unit standing on the neighbour to step onto `current`.
            let Some(step) = grid.step_cost(nx, ny, -dx, -dy) else {
                continue;
            };
            let neighbor = grid.index(nx, ny);
            let candidate = current_cost.saturating_add(step);
            if candidate < costs[neighbor] {
                costs[neighbor] = candidate;
                if !scratch.queued[neighbor] {
                    scratch.queued[neighbor] = true;
                    scratch.queue.push_back(neighbor);
                }
            }
        }
    }
}

fn pick_directions(grid: &CostGrid, costs: &[u32], directions: &mut [Direction]) {
    for index in 0..costs.len() {
        let (x, y) = grid.coords(index);
        let walkable = grid.is_walkable(x, y);
        // Blocked cells push outward to the best reachable walkable neighbour.
        let mut best = if walkable { costs[index] } else { UNREACHABLE };
        let mut best_dir = Direction::None;

        for dir in Direction::COMPASS {
            let (dx, dy) = dir.offset();
            let reachable = if walkable {
                grid.step_cost(x, y, dx, dy).is_some()
            } else {
                grid.is_walkable_i(i64::from(x) + i64::from(dx), i64::from(y) + i64::from(dy))
            };
            if !reachable {
                continue;
            }
            let neighbor = grid.index(
                (i64::from(x) + i64::from(dx)) as u32,
                (i64::from(y) + i64::from(dy)) as u32,
            );
            if costs[neighbor] < best {
                best = costs[neighbor];
                best_dir = dir;
            }
        }
        directions[index] = best_dir;
    }
}
