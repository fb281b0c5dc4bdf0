//! Per-team fog of war.
//!
//! A coarse boolean grid per team, rebuilt from scratch every tick from the
//! [`Vision`](crate::components::Vision) of live entities. There is no
//! "explored" memory: a cell is either seen this tick or it is not.

use std::collections::BTreeMap;

use crate::components::{Entity, Team};
use crate::math::{Fixed, Vec2Fixed};

/// Visibility grids keyed by team.
#[derive(Debug, Clone)]
pub struct FogOfWar {
    enabled: bool,
    cell_size: Fixed,
    width: u32,
    height: u32,
    visible: BTreeMap<Team, Vec<bool>>,
}

impl FogOfWar {
    /// Create fog covering a `map_width × map_height` world.
    ///
    /// When `enabled` is false every position is visible to every team.
    #[must_use]
    pub fn new(map_width: Fixed, map_height: Fixed, cell_size: Fixed, enabled: bool) -> Self {
        let cell_size = cell_size.max(Fixed::ONE);
        let cells = |extent: Fixed| (extent / cell_size).ceil().to_num::<i64>().max(1) as u32;
        Self {
            enabled,
            cell_size,
            width: cells(map_width),
            height: cells(map_height),
            visible: BTreeMap::new(),
        }
    }

    /// Whether fog is in effect.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Recompute every team's visibility.
    pub fn rebuild<'a>(&mut self, entities: impl IntoIterator<Item = &'a Entity>) {
        if !self.enabled {
            return;
        }
        for grid in self.visible.values_mut() {
            grid.fill(false);
        }
        let len = (self.width * self.height) as usize;
        for entity in entities {
            let Some(vision) = entity.vision else {
                continue;
            };
            if !entity.is_alive() || entity.team.is_neutral() {
                continue;
            }
            let grid = self
                .visible
                .entry(entity.team)
                .or_insert_with(|| vec![false; len]);
            reveal(grid, self.width, self.height, self.cell_size, entity.position, vision.range);
        }
    }

    /// Whether `team` can currently see `position`.
    #[must_use]
    pub fn is_visible(&self, team: Team, position: Vec2Fixed) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(grid) = self.visible.get(&team) else {
            return false;
        };
        let (x, y) = self.cell_of(position);
        grid[(y * self.width + x) as usize]
    }

    /// Number of cells `team` can see.
    #[must_use]
    pub fn visible_cells(&self, team: Team) -> usize {
        self.visible
            .get(&team)
            .map_or(0, |grid| grid.iter().filter(|&&v| v).count())
    }

    fn cell_of(&self, p: Vec2Fixed) -> (u32, u32) {
        let clamp = |v: Fixed, max: u32| {
            (v / self.cell_size)
                .floor()
                .to_num::<i64>()
                .clamp(0, i64::from(max) - 1) as u32
        };
        (clamp(p.x, self.width), clamp(p.y, self.height))
    }
}

fn reveal(grid: &mut [bool], width: u32, height: u32, cell: Fixed, center: Vec2Fixed, range: Fixed) {
    let to_cell = |v: Fixed, max: u32| (v / cell).floor().to_num::<i64>().clamp(0, i64::from(max) - 1);
    let min_x = to_cell(center.x - range, width);
    let max_x = to_cell(center.x + range, width);
    let min_y = to_cell(center.y - range, height);
    let max_y = to_cell(center.y + range, height);
    let range_sq = range * range;
    let half = cell / Fixed::from_num(2);

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let cell_center = Vec2Fixed::new(
                Fixed::from_num(x) * cell + half,
                Fixed::from_num(y) * cell + half,
            );
            if cell_center.distance_squared(center) <= range_sq {
                grid[(y as u32 * width + x as u32) as usize] = true;
            }
        }
    }
}
