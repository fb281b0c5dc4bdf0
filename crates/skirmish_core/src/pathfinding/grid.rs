//! Walkability cost grid.

use serde::{Deserialize, Serialize};

use crate::components::Entity;
use crate::math::{fixed_serde, Fixed, Rect, Vec2Fixed};

/// Cost of a walkable, unobstructed cell.
pub const FREE_COST: u8 = 1;

/// Default cost that marks a cell impassable.
pub const DEFAULT_IMPASSABLE: u8 = 255;

/// Step cost for a cardinal move.
pub const CARDINAL_STEP: u32 = 10;

/// Step cost for a diagonal move (10·√2 rounded).
pub const DIAGONAL_STEP: u32 = 14;

/// Direction offsets for 8-directional movement, clockwise from north.
pub const NEIGHBORS: [(i32, i32); 8] = [
    (0, -1),  // North
    (1, -1),  // Northeast
    (1, 0),   // East
    (1, 1),   // Southeast
    (0, 1),   // South
    (-1, 1),  // Southwest
    (-1, 0),  // West
    (-1, -1), // Northwest
];

/// Per-cell movement cost over the map.
///
/// Cell `(x, y)` covers `[x·s, (x+1)·s) × [y·s, (y+1)·s)` in world units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostGrid {
    width: u32,
    height: u32,
    #[serde(with = "fixed_serde")]
    cell_size: Fixed,
    impassable: u8,
    costs: Vec<u8>,
}

impl CostGrid {
    /// Create a grid with every cell free.
    ///
    /// Zero dimensions are raised to one cell; the cell size to one world unit.
    #[must_use]
    pub fn new(width: u32, height: u32, cell_size: Fixed, impassable: u8) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            cell_size: cell_size.max(Fixed::ONE),
            impassable: impassable.max(FREE_COST + 1),
            costs: vec![FREE_COST; (width as usize) * (height as usize)],
        }
    }

    /// Create a grid covering a `map_width × map_height` world.
    #[must_use]
    pub fn for_map(map_width: Fixed, map_height: Fixed, cell_size: Fixed, impassable: u8) -> Self {
        let cell_size = cell_size.max(Fixed::ONE);
        let cols = (map_width / cell_size).ceil().to_num::<i64>().max(1) as u32;
        let rows = (map_height / cell_size).ceil().to_num::<i64>().max(1) as u32;
        Self::new(cols, rows, cell_size, impassable)
    }

    /// Grid width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Cell size in world units.
    #[must_use]
    pub const fn cell_size(&self) -> Fixed {
        self.cell_size
    }

    /// The cost value treated as impassable.
    #[must_use]
    pub const fn impassable(&self) -> u8 {
        self.impassable
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.costs.len()
    }

    /// A grid always has at least one cell.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    #[inline]
    pub(crate) fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    #[inline]
    pub(crate) fn coords(&self, index: usize) -> (u32, u32) {
        let w = self.width as usize;
        ((index % w) as u32, (index / w) as u32)
    }

    /// Check if coordinates are within grid bounds.
    #[must_use]
    pub fn in_bounds(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    /// Cost at coordinates, `None` if out of bounds.
    #[must_use]
    pub fn cost(&self, x: u32, y: u32) -> Option<u8> {
        self.in_bounds(x, y).then(|| self.costs[self.index(x, y)])
    }

    /// Set the cost at coordinates. Returns `false` if out of bounds.
    pub fn set_cost(&mut self, x: u32, y: u32, cost: u8) -> bool {
        if self.in_bounds(x, y) {
            let index = self.index(x, y);
            self.costs[index] = cost.max(FREE_COST);
            true
        } else {
            false
        }
    }

    /// Check if a cell is in bounds and below the impassable cost.
    #[must_use]
    pub fn is_walkable(&self, x: u32, y: u32) -> bool {
        self.cost(x, y).is_some_and(|c| c < self.impassable)
    }

    /// Signed variant of [`Self::is_walkable`] for neighbour arithmetic.
    #[must_use]
    pub fn is_walkable_i(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x <= i64::from(u32::MAX) && y <= i64::from(u32::MAX) && self.is_walkable(x as u32, y as u32)
    }

    /// Convert world position to grid coordinates, `None` outside the grid.
    #[must_use]
    pub fn world_to_grid(&self, pos: Vec2Fixed) -> Option<(u32, u32)> {
        if pos.x < Fixed::ZERO || pos.y < Fixed::ZERO {
            return None;
        }
        let x = (pos.x / self.cell_size).to_num::<i64>();
        let y = (pos.y / self.cell_size).to_num::<i64>();
        if x < i64::from(self.width) && y < i64::from(self.height) {
            Some((x as u32, y as u32))
        } else {
            None
        }
    }

    /// Like [`Self::world_to_grid`] but clamps to the grid edge.
    #[must_use]
    pub fn world_to_grid_clamped(&self, pos: Vec2Fixed) -> (u32, u32) {
        let x = (pos.x / self.cell_size).floor().to_num::<i64>();
        let y = (pos.y / self.cell_size).floor().to_num::<i64>();
        (
            x.clamp(0, i64::from(self.width) - 1) as u32,
            y.clamp(0, i64::from(self.height) - 1) as u32,
        )
    }

    /// Center of a cell in world units.
    #[must_use]
    pub fn grid_to_world(&self, x: u32, y: u32) -> Vec2Fixed {
        let half = self.cell_size / Fixed::from_num(2);
        Vec2Fixed::new(
            Fixed::from_num(x) * self.cell_size + half,
            Fixed::from_num(y) * self.cell_size + half,
        )
    }

    /// Check if the cell containing a world position is walkable.
    ///
    /// Positions outside the grid are not walkable.
    #[must_use]
    pub fn is_world_walkable(&self, pos: Vec2Fixed) -> bool {
        self.world_to_grid(pos).is_some_and(|(x, y)| self.is_walkable(x, y))
    }

    /// Range of cells whose area overlaps `rect` (touching edges excluded).
    ///
    /// Returns `None` when the rectangle misses the grid entirely.
    #[must_use]
    pub fn cells_overlapping(&self, rect: &Rect) -> Option<(u32, u32, u32, u32)> {
        let min_x = (rect.min.x / self.cell_size).floor().to_num::<i64>();
        let min_y = (rect.min.y / self.cell_size).floor().to_num::<i64>();
        let max_x = (rect.max.x / self.cell_size).ceil().to_num::<i64>() - 1;
        let max_y = (rect.max.y / self.cell_size).ceil().to_num::<i64>() - 1;
        let max_x = max_x.max(min_x);
        let max_y = max_y.max(min_y);
        if max_x < 0 || max_y < 0 || min_x >= i64::from(self.width) || min_y >= i64::from(self.height) {
            return None;
        }
        Some((
            min_x.max(0) as u32,
            min_y.max(0) as u32,
            max_x.min(i64::from(self.width) - 1) as u32,
            max_y.min(i64::from(self.height) - 1) as u32,
        ))
    }

    /// Mark every cell under `rect` impassable.
    pub fn block_rect(&mut self, rect: &Rect) {
        let Some((min_x, min_y, max_x, max_y)) = self.cells_overlapping(rect) else {
            return;
        };
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let index = self.index(x, y);
                self.costs[index] = self.impassable;
            }
        }
    }

    /// Check that every cell under `rect` is walkable.
    #[must_use]
    pub fn is_rect_free(&self, rect: &Rect) -> bool {
        let Some((min_x, min_y, max_x, max_y)) = self.cells_overlapping(rect) else {
            return false;
        };
        (min_y..=max_y).all(|y| (min_x..=max_x).all(|x| self.is_walkable(x, y)))
    }

    /// Recompute every cell from the current entity set.
    ///
    /// Cells under a live, solid, non-unit entity's footprint become
    /// impassable; everything else is reset to free. Units never block.
    pub fn rebuild_costs<'a>(&mut self, entities: impl IntoIterator<Item = &'a Entity>) {
        self.costs.fill(FREE_COST);
        for entity in entities {
            if entity.blocks_pathing() {
                self.block_rect(&entity.rect());
            }
        }
    }

    /// Cost of stepping from `(x, y)` by `(dx, dy)`.
    ///
    /// `None` when the destination is blocked or out of bounds, or when a
    /// diagonal step would cut the corner of a blocked cell.
    #[must_use]
    pub fn step_cost(&self, x: u32, y: u32, dx: i32, dy: i32) -> Option<u32> {
        let nx = i64::from(x) + i64::from(dx);
        let ny = i64::from(y) + i64::from(dy);
        if !self.is_walkable_i(nx, ny) {
            return None;
        }
        let base = if dx != 0 && dy != 0 {
            if !self.is_walkable_i(nx, i64::from(y)) || !self.is_walkable_i(i64::from(x), ny) {
                return None;
            }
            DIAGONAL_STEP
        } else {
            CARDINAL_STEP
        };
        let cell = self.costs[self.index(nx as u32, ny as u32)];
        Some(base * u32::from(cell))
    }

    /// Nearest walkable cell to `(x, y)`, searching outward ring by ring.
    ///
    /// Within a ring the closest cell by squared distance wins; ties go to
    /// the lowest `(y, x)`.
    #[must_use]
    pub fn nearest_walkable(&self, x: u32, y: u32) -> Option<(u32, u32)> {
        if self.is_walkable(x, y) {
            return Some((x, y));
        }
        let max_ring = i64::from(self.width.max(self.height));
        let (cx, cy) = (i64::from(x), i64::from(y));
        for ring in 1..=max_ring {
            let mut best: Option<(i64, (u32, u32))> = None;
            for oy in -ring..=ring {
                for ox in -ring..=ring {
                    if ox.abs() != ring && oy.abs() != ring {
                        continue;
                    }
                    let (nx, ny) = (cx + ox, cy + oy);
                    if !self.is_walkable_i(nx, ny) {
                        continue;
                    }
                    let d = ox * ox + oy * oy;
                    if best.map_or(true, |(bd, _)| d < bd) {
                        best = Some((d, (nx as u32, ny as u32)));
                    }
                }
            }
            if let Some((_, cell)) = best {
                return Some(cell);
            }
        }
        None
    }

    /// Check for a clear straight line between two world positions.
    ///
    /// Steps through cells Bresenham-style and refuses to squeeze between two
    /// diagonally adjacent blocked cells.
    #[must_use]
    pub fn has_line_of_sight(&self, start: Vec2Fixed, end: Vec2Fixed) -> bool {
        let Some((x0, y0)) = self.world_to_grid(start) else {
            return false;
        };
        let Some((x1, y1)) = self.world_to_grid(end) else {
            return false;
        };

        let (x0, y0, x1, y1) = (i64::from(x0), i64::from(y0), i64::from(x1), i64::from(y1));
        let dx = (x1 - x0).abs();
        let dy = (y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx - dy;
        let (mut x, mut y) = (x0, y0);

        loop {
            if !self.is_walkable_i(x, y) {
                return false;
            }
            if x == x1 && y == y1 {
                return true;
            }
            let e2 = 2 * err;
            if e2 > -dy && e2 < dx && (!self.is_walkable_i(x + sx, y) || !self.is_walkable_i(x, y + sy)) {
                return false;
            }
            if e2 > -dy {
                err -= dy;
                x += sx;
            }
            if e2 < dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Line of sight for a square body of half-size `clearance`.
    ///
    /// The center and all four corners must each see their counterpart at
    /// `end`. Corners sit just inside the body so that touching a blocked
    /// cell's edge does not count.
    #[must_use]
    pub fn has_clear_line(&self, start: Vec2Fixed, end: Vec2Fixed, clearance: Fixed) -> bool {
        let c = clearance - Fixed::DELTA;
        if c <= Fixed::ZERO {
            return self.has_line_of_sight(start, end);
        }
        [(Fixed::ZERO, Fixed::ZERO), (-c, -c), (c, -c), (-c, c), (c, c)]
            .iter()
            .all(|&(dx, dy)| {
                let offset = Vec2Fixed::new(dx, dy);
                self.has_line_of_sight(start + offset, end + offset)
            })
    }
}
