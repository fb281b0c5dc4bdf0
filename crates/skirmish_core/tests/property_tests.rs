//! Property tests over the spatial, pathing and damage primitives.

use proptest::prelude::*;

use skirmish_core::combat::{DamageMatrix, MIN_DAMAGE};
use skirmish_core::components::{ArmorType, AttackType, EntityId, Health};
use skirmish_core::math::{Fixed, Vec2Fixed};
use skirmish_core::pathfinding::{CostGrid, Direction, FlowField, FlowScratch, DEFAULT_IMPASSABLE};
use skirmish_core::spatial::SpatialIndex;
use skirmish_test_utils::determinism::strategies::{
    arb_blocked_cells, arb_damage, arb_health, arb_position, arb_rect,
};

const GRID_SIDE: u32 = 16;

const ATTACKS: [AttackType; 4] = [AttackType::Normal, AttackType::Pierce, AttackType::Siege, AttackType::Magic];
const ARMORS: [ArmorType; 5] = [
    ArmorType::Unarmored,
    ArmorType::Light,
    ArmorType::Medium,
    ArmorType::Heavy,
    ArmorType::Fortified,
];

fn blocked_grid(blocked: &[(u32, u32)]) -> CostGrid {
    let mut grid = CostGrid::new(GRID_SIDE, GRID_SIDE, Fixed::from_num(32), DEFAULT_IMPASSABLE);
    for &(x, y) in blocked {
        grid.set_cost(x, y, DEFAULT_IMPASSABLE);
    }
    grid
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_rect_query_finds_every_contained_point(
        rect in arb_rect(1400, 200),
        points in proptest::collection::vec(arb_position(1500), 1..40),
    ) {
        let mut index = SpatialIndex::new(Fixed::from_num(1500), Fixed::from_num(1500), Fixed::from_num(150));
        index.rebuild_dynamic(points.iter().enumerate().map(|(i, &p)| (i as EntityId, p)));

        let mut found = Vec::new();
        index.query_rect(rect, &mut found);
        for (i, p) in points.iter().enumerate() {
            if rect.contains(*p) {
                prop_assert!(found.contains(&(i as EntityId)), "point {:?} inside {:?} was missed", p, rect);
            }
        }
    }

    #[test]
    fn prop_flow_directions_step_downhill_onto_walkable_cells(
        blocked in arb_blocked_cells(GRID_SIDE, GRID_SIDE, 80),
        goal in (0..GRID_SIDE, 0..GRID_SIDE),
    ) {
        let grid = blocked_grid(&blocked);
        let field = FlowField::compute(&grid, goal, &mut FlowScratch::default());
        prop_assert!(field.is_complete());

        for y in 0..GRID_SIDE {
            for x in 0..GRID_SIDE {
                if !grid.is_walkable(x, y) {
                    continue;
                }
                let direction = field.direction_at(x, y);
                prop_assert!(direction.is_some(), "complete field has no entry at ({}, {})", x, y);
                let Some(direction) = direction.filter(|d| *d != Direction::None) else {
                    continue;
                };
                let (dx, dy) = direction.offset();
                let nx = (i64::from(x) + i64::from(dx)) as u32;
                let ny = (i64::from(y) + i64::from(dy)) as u32;
                prop_assert!(grid.is_walkable(nx, ny), "({}, {}) points into blocked ({}, {})", x, y, nx, ny);
                prop_assert!(field.cost_at(nx, ny) < field.cost_at(x, y));
            }
        }
    }

    #[test]
    fn prop_damage_never_overdraws_health(max in arb_health(), amount in arb_damage()) {
        let mut health = Health::new(max);
        let dealt = health.apply_damage(amount);

        prop_assert_eq!(dealt, amount.min(max));
        prop_assert_eq!(health.current, max - dealt);
        prop_assert_eq!(health.is_dead(), amount >= max);
    }

    #[test]
    fn prop_matrix_damage_is_floored_and_bounded(base in arb_damage()) {
        let uniform = DamageMatrix::uniform();
        let matrix = DamageMatrix::default();
        for attack in ATTACKS {
            for armor in ARMORS {
                prop_assert_eq!(uniform.calculate_damage(base, attack, armor), base);

                let damage = matrix.calculate_damage(base, attack, armor);
                if base == 0 {
                    prop_assert_eq!(damage, 0);
                } else {
                    prop_assert!(damage >= MIN_DAMAGE);
                    prop_assert!(damage <= base * 2);
                }
            }
        }
    }
}

#[test]
fn test_flow_field_routes_around_blocked_column() {
    let blocked: Vec<(u32, u32)> = (0..GRID_SIDE - 1).map(|y| (8, y)).collect();
    let grid = blocked_grid(&blocked);
    let field = FlowField::compute(&grid, (15, 0), &mut FlowScratch::default());

    let mut cell = (0u32, 0u32);
    for _ in 0..(GRID_SIDE * GRID_SIDE) {
        let Some(direction) = field.direction_at(cell.0, cell.1) else {
            break;
        };
        if direction == Direction::None {
            break;
        }
        let (dx, dy) = direction.offset();
        cell = ((i64::from(cell.0) + i64::from(dx)) as u32, (i64::from(cell.1) + i64::from(dy)) as u32);
        assert!(grid.is_walkable(cell.0, cell.1));
    }
    assert_eq!(cell, (15, 0));
    assert_eq!(Vec2Fixed::from_ints(496, 16), grid.grid_to_world(15, 0));
}
