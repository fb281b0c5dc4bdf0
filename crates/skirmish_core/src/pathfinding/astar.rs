//! Single-path A* queries over the cost grid.
//!
//! Path queries never fail: blocked endpoints are moved to the nearest
//! walkable cell, and when no route exists the path degrades to a single
//! waypoint at the requested target so the caller still has somewhere to go.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::grid::{CostGrid, CARDINAL_STEP, DIAGONAL_STEP, NEIGHBORS};
use crate::math::{Fixed, Rect, Vec2Fixed};

/// A node in the A* open set priority queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct AStarNode {
    index: usize,
    g_score: u32,
    f_score: u32,
    /// Tie-breaker for determinism: lower coordinates first.
    tie_breaker: u64,
}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for lowest f first.
        match other.f_score.cmp(&self.f_score) {
            Ordering::Equal => other.tie_breaker.cmp(&self.tie_breaker),
            ord => ord,
        }
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Octile distance in step-cost units.
#[inline]
fn octile_heuristic(x1: u32, y1: u32, x2: u32, y2: u32) -> u32 {
    let dx = x1.abs_diff(x2);
    let dy = y1.abs_diff(y2);
    CARDINAL_STEP * dx.max(dy) + (DIAGONAL_STEP - CARDINAL_STEP) * dx.min(dy)
}

#[inline]
fn coords_to_tie_breaker(x: u32, y: u32) -> u64 {
    (u64::from(y) << 32) | u64::from(x)
}

/// Find a cell path between two walkable cells.
///
/// Returns the cells from start to goal inclusive, or `None` if the goal is
/// unreachable.
#[must_use]
pub fn find_cell_path(grid: &CostGrid, start: (u32, u32), goal: (u32, u32)) -> Option<Vec<(u32, u32)>> {
    if !grid.is_walkable(start.0, start.1) || !grid.is_walkable(goal.0, goal.1) {
        return None;
    }
    if start == goal {
        return Some(vec![start]);
    }

    let mut g_score = vec![u32::MAX; grid.len()];
    let mut came_from = vec![usize::MAX; grid.len()];
    let mut open_set = BinaryHeap::new();

    let start_index = grid.index(start.0, start.1);
    let goal_index = grid.index(goal.0, goal.1);
    g_score[start_index] = 0;
    open_set.push(AStarNode {
        index: start_index,
        g_score: 0,
        f_score: octile_heuristic(start.0, start.1, goal.0, goal.1),
        tie_breaker: coords_to_tie_breaker(start.0, start.1),
    });

    while let Some(current) = open_set.pop() {
        if current.index == goal_index {
            return Some(reconstruct_path(grid, &came_from, goal_index));
        }
        // Stale heap entry.
        if current.g_score > g_score[current.index] {
            continue;
        }

        let (cx, cy) = grid.coords(current.index);
        for &(dx, dy) in &NEIGHBORS {
            let Some(step) = grid.step_cost(cx, cy, dx, dy) else {
                continue;
            };
            let nx = (i64::from(cx) + i64::from(dx)) as u32;
            let ny = (i64::from(cy) + i64::from(dy)) as u32;
            let neighbor = grid.index(nx, ny);
            let tentative_g = current.g_score + step;
            if tentative_g < g_score[neighbor] {
                g_score[neighbor] = tentative_g;
                came_from[neighbor] = current.index;
                open_set.push(AStarNode {
                    index: neighbor,
                    g_score: tentative_g,
                    f_score: tentative_g + octile_heuristic(nx, ny, goal.0, goal.1),
                    tie_breaker: coords_to_tie_breaker(nx, ny),
                });
            }
        }
    }

    None
}

fn reconstruct_path(grid: &CostGrid, came_from: &[usize], goal_index: usize) -> Vec<(u32, u32)> {
    let mut path = vec![grid.coords(goal_index)];
    let mut current = goal_index;
    while came_from[current] != usize::MAX {
        current = came_from[current];
        path.push(grid.coords(current));
    }
    path.reverse();
    path
}

/// Smooth a path by removing waypoints that have a clear line of sight past them.
///
/// `clearance` is the half-size of the square body that will walk the path;
/// a shortcut is only taken when that body fits along it.
#[must_use]
pub fn smooth_path(grid: &CostGrid, path: Vec<Vec2Fixed>, clearance: Fixed) -> Vec<Vec2Fixed> {
    if path.len() <= 2 {
        return path;
    }

    let mut smoothed = Vec::with_capacity(path.len());
    smoothed.push(path[0]);

    let mut current_idx = 0;
    while current_idx < path.len() - 1 {
        let mut furthest_visible = current_idx + 1;
        for check_idx in (current_idx + 2)..path.len() {
            if grid.has_clear_line(path[current_idx], path[check_idx], clearance) {
                furthest_visible = check_idx;
            }
        }
        smoothed.push(path[furthest_visible]);
        current_idx = furthest_visible;
    }

    smoothed
}

/// Find a world-space path from `start` to `goal` for a body of half-size
/// `clearance`.
///
/// The returned waypoints exclude the start position. The last waypoint is
/// the literal `goal` when the body fits there, otherwise the center of the
/// goal cell (or of the nearest walkable cell when the goal cell is
/// blocked). If no route exists at all, the result is the single waypoint
/// `goal`.
#[must_use]
pub fn find_path(grid: &CostGrid, start: Vec2Fixed, goal: Vec2Fixed, clearance: Fixed) -> Vec<Vec2Fixed> {
    let (sx, sy) = grid.world_to_grid_clamped(start);
    let Some(start_cell) = grid.nearest_walkable(sx, sy) else {
        return vec![goal];
    };

    let (gx, gy) = grid.world_to_grid_clamped(goal);
    let Some(goal_cell) = grid.nearest_walkable(gx, gy) else {
        return vec![goal];
    };
    let side = clearance.max(Fixed::ZERO) * Fixed::from_num(2);
    let destination = if grid.is_rect_free(&Rect::centered(goal, side, side)) {
        goal
    } else {
        grid.grid_to_world(goal_cell.0, goal_cell.1)
    };

    let Some(cells) = find_cell_path(grid, start_cell, goal_cell) else {
        return vec![goal];
    };

    let mut points: Vec<Vec2Fixed> = cells.iter().map(|&(x, y)| grid.grid_to_world(x, y)).collect();
    // Walk from where the body actually is, not from its cell center.
    points[0] = start;
    if points.last() != Some(&destination) {
        points.push(destination);
    }
    let mut waypoints = smooth_path(grid, points, clearance);
    waypoints.remove(0);
    waypoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathfinding::grid::DEFAULT_IMPASSABLE;

    fn grid(w: u32, h: u32) -> CostGrid {
        CostGrid::new(w, h, Fixed::ONE, DEFAULT_IMPASSABLE)
    }

    fn vec2(x: i32, y: i32) -> Vec2Fixed {
        Vec2Fixed::from_ints(x, y)
    }

    #[test]
    fn test_octile_heuristic() {
        assert_eq!(octile_heuristic(0, 0, 5, 5), 70);
        assert_eq!(octile_heuristic(0, 0, 3, 7), 82);
        assert_eq!(octile_heuristic(4, 4, 4, 4), 0);
    }

    #[test]
    fn test_straight_path_is_single_waypoint() {
        let g = grid(10, 10);
        let path = find_path(&g, vec2(0, 0), vec2(7, 0), Fixed::ZERO);
        assert_eq!(path, vec![vec2(7, 0)]);
    }

    #[test]
    fn test_path_around_wall() {
        let mut g = grid(10, 10);
        for y in 2..8 {
            g.set_cost(5, y, DEFAULT_IMPASSABLE);
        }

        let cells = find_cell_path(&g, (2, 5), (8, 5)).unwrap();
        assert_eq!(cells.first(), Some(&(2, 5)));
        assert_eq!(cells.last(), Some(&(8, 5)));
        for &(x, y) in &cells {
            assert!(g.is_walkable(x, y), "path crosses blocked cell ({x}, {y})");
        }

        let path = find_path(&g, vec2(2, 5), vec2(8, 5), Fixed::ZERO);
        assert!(path.len() >= 2, "wall forces at least one corner");
        assert_eq!(path.last(), Some(&vec2(8, 5)));
    }

    #[test]
    fn test_enclosed_goal_falls_back_to_literal_target() {
        let mut g = grid(10, 10);
        for y in 0..10 {
            g.set_cost(5, y, DEFAULT_IMPASSABLE);
        }
        assert!(find_cell_path(&g, (2, 5), (8, 5)).is_none());
        assert_eq!(find_path(&g, vec2(2, 5), vec2(8, 5), Fixed::ZERO), vec![vec2(8, 5)]);
    }

    #[test]
    fn test_blocked_goal_uses_nearest_walkable_cell() {
        let mut g = grid(10, 10);
        g.set_cost(7, 5, DEFAULT_IMPASSABLE);
        let start = Vec2Fixed::new(Fixed::from_num(0.5), Fixed::from_num(5.5));
        let goal = Vec2Fixed::new(Fixed::from_num(7.5), Fixed::from_num(5.5));
        let path = find_path(&g, start, goal, Fixed::ZERO);
        let last = *path.last().unwrap();
        let (lx, ly) = g.world_to_grid(last).unwrap();
        assert!(g.is_walkable(lx, ly));
        assert_eq!((lx, ly), (7, 4));
    }

    #[test]
    fn test_blocked_start_is_escaped() {
        let mut g = grid(10, 10);
        g.set_cost(0, 0, DEFAULT_IMPASSABLE);
        let path = find_path(&g, vec2(0, 0), vec2(9, 9), Fixed::ZERO);
        assert_eq!(path.last(), Some(&vec2(9, 9)));
    }

    #[test]
    fn test_same_cell() {
        let g = grid(10, 10);
        let goal = Vec2Fixed::new(Fixed::from_num(5.75), Fixed::from_num(5.25));
        assert_eq!(find_path(&g, vec2(5, 5), goal, Fixed::ZERO), vec![goal]);
    }

    #[test]
    fn test_determinism() {
        let mut g = grid(20, 20);
        for i in 5..15 {
            g.set_cost(10, i, DEFAULT_IMPASSABLE);
        }
        let path1 = find_path(&g, vec2(5, 10), vec2(15, 10), Fixed::ZERO);
        let path2 = find_path(&g, vec2(5, 10), vec2(15, 10), Fixed::ZERO);
        assert_eq!(path1, path2);
    }

    #[test]
    fn test_prefers_cheap_cells() {
        let mut g = grid(5, 3);
        for x in 1..4 {
            g.set_cost(x, 1, 9);
        }
        let cells = find_cell_path(&g, (0, 1), (4, 1)).unwrap();
        assert!(!cells.iter().any(|&(x, y)| y == 1 && (1..4).contains(&x)));
    }
}
