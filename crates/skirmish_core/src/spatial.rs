//! Uniform-grid spatial index.
//!
//! Two parallel grids share one cell size: a static grid for buildings and
//! obstacles (changed only on insert/remove or an explicit rebuild) and a
//! dynamic grid for units (rebuilt from scratch every tick). Queries write
//! into a caller-owned buffer so the per-tick hot path does not allocate.
//!
//! Queries are conservative: every entity whose center is within
//! `cell_radius × cell_size` of the query center is returned, possibly along
//! with some that are farther away. Callers filter by exact distance.

use std::collections::HashMap;

use crate::components::EntityId;
use crate::math::{Fixed, Rect, Vec2Fixed};

/// Default cell edge length in world units.
pub const DEFAULT_CELL_SIZE: i32 = 150;

/// Grid-bucketed index of entity ids.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: Fixed,
    cols: u32,
    rows: u32,
    static_cells: Vec<Vec<EntityId>>,
    dynamic_cells: Vec<Vec<EntityId>>,
    static_rects: HashMap<EntityId, Rect>,
}

impl SpatialIndex {
    /// Create an index covering `[0, width] × [0, height]`.
    ///
    /// Positions outside the map are bucketed into the nearest edge cell.
    #[must_use]
    pub fn new(width: Fixed, height: Fixed, cell_size: Fixed) -> Self {
        let cell_size = cell_size.max(Fixed::ONE);
        let cols = (width / cell_size).ceil().to_num::<i64>().max(1) as u32;
        let rows = (height / cell_size).ceil().to_num::<i64>().max(1) as u32;
        let cells = (cols * rows) as usize;
        Self {
            cell_size,
            cols,
            rows,
            static_cells: vec![Vec::new(); cells],
            dynamic_cells: vec![Vec::new(); cells],
            static_rects: HashMap::new(),
        }
    }

    /// Cell edge length.
    #[must_use]
    pub const fn cell_size(&self) -> Fixed {
        self.cell_size
    }

    /// Grid dimensions in cells.
    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.cols, self.rows)
    }

    /// Cell coordinates of a world position, clamped to the grid.
    #[must_use]
    pub fn cell_of(&self, p: Vec2Fixed) -> (u32, u32) {
        let cx = (p.x / self.cell_size).floor().to_num::<i64>();
        let cy = (p.y / self.cell_size).floor().to_num::<i64>();
        (
            cx.clamp(0, i64::from(self.cols) - 1) as u32,
            cy.clamp(0, i64::from(self.rows) - 1) as u32,
        )
    }

    fn index(&self, cx: u32, cy: u32) -> usize {
        (cy * self.cols + cx) as usize
    }

    /// Insert a static entity into every cell its rectangle overlaps.
    ///
    /// Re-inserting an id first removes its previous cells.
    pub fn insert_static(&mut self, id: EntityId, rect: Rect) {
        self.remove_static(id);
        let (min_x, min_y) = self.cell_of(rect.min);
        let (max_x, max_y) = self.cell_of(rect.max);
        for cy in min_y..=max_y {
            for cx in min_x..=max_x {
                let idx = self.index(cx, cy);
                self.static_cells[idx].push(id);
            }
        }
        self.static_rects.insert(id, rect);
    }

    /// Remove a static entity. Unknown ids are ignored.
    pub fn remove_static(&mut self, id: EntityId) {
        let Some(rect) = self.static_rects.remove(&id) else {
            return;
        };
        let (min_x, min_y) = self.cell_of(rect.min);
        let (max_x, max_y) = self.cell_of(rect.max);
        for cy in min_y..=max_y {
            for cx in min_x..=max_x {
                let idx = self.index(cx, cy);
                self.static_cells[idx].retain(|&other| other != id);
            }
        }
    }

    /// Replace the whole static grid.
    pub fn rebuild_static(&mut self, statics: impl IntoIterator<Item = (EntityId, Rect)>) {
        for cell in &mut self.static_cells {
            cell.clear();
        }
        self.static_rects.clear();
        for (id, rect) in statics {
            self.insert_static(id, rect);
        }
    }

    /// Replace the whole dynamic grid. Each entity lands in its center cell.
    ///
    /// Cell vectors keep their capacity across rebuilds.
    pub fn rebuild_dynamic(&mut self, dynamics: impl IntoIterator<Item = (EntityId, Vec2Fixed)>) {
        for cell in &mut self.dynamic_cells {
            cell.clear();
        }
        for (id, position) in dynamics {
            let (cx, cy) = self.cell_of(position);
            let idx = self.index(cx, cy);
            self.dynamic_cells[idx].push(id);
        }
    }

    /// Collect every entity in the `(2r+1)²` cells around `center`'s cell.
    pub fn query_near(&self, center: Vec2Fixed, cell_radius: u32, out: &mut Vec<EntityId>) {
        let (cx, cy) = self.cell_of(center);
        let min_x = cx.saturating_sub(cell_radius);
        let min_y = cy.saturating_sub(cell_radius);
        let max_x = cx.saturating_add(cell_radius).min(self.cols - 1);
        let max_y = cy.saturating_add(cell_radius).min(self.rows - 1);
        self.collect(min_x, min_y, max_x, max_y, out);
    }

    /// Collect every entity in the cells overlapped by `rect`.
    pub fn query_rect(&self, rect: Rect, out: &mut Vec<EntityId>) {
        let (min_x, min_y) = self.cell_of(rect.min);
        let (max_x, max_y) = self.cell_of(rect.max);
        self.collect(min_x, min_y, max_x, max_y, out);
    }

    /// Cell radius needed to cover a world-space distance.
    #[must_use]
    pub fn cells_for_distance(&self, distance: Fixed) -> u32 {
        let cells = (distance.max(Fixed::ZERO) / self.cell_size).ceil();
        cells.to_num::<i64>().clamp(0, i64::from(u32::MAX)) as u32
    }

    fn collect(&self, min_x: u32, min_y: u32, max_x: u32, max_y: u32, out: &mut Vec<EntityId>) {
        out.clear();
        for cy in min_y..=max_y {
            for cx in min_x..=max_x {
                let idx = self.index(cx, cy);
                out.extend_from_slice(&self.static_cells[idx]);
                out.extend_from_slice(&self.dynamic_cells[idx]);
            }
        }
        // Statics span several cells; sort keeps iteration order deterministic.
        out.sort_unstable();
        out.dedup();
    }
}
