//! Simulation benchmarks for skirmish_core.
//!
//! Run with: `cargo bench -p skirmish_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use skirmish_core::components::Team;
use skirmish_core::math::Fixed;
use skirmish_core::pathfinding::{CostGrid, FlowField, FlowScratch, DEFAULT_IMPASSABLE};
use skirmish_core::simulation::Simulation;
use skirmish_test_utils::fixtures::{skirmish, stat_table, two_team_config};

/// One tick of two 100-unit armies, marching and after contact.
pub fn crowded_tick(c: &mut Criterion) {
    c.bench_function("tick_200_units_marching", |b| {
        let mut sim = skirmish(42, 100);
        b.iter(|| black_box(sim.tick()));
    });

    let mut engaged = skirmish(42, 100);
    for _ in 0..900 {
        engaged.tick();
    }
    let snapshot = engaged.snapshot();
    c.bench_function("tick_200_units_engaged", |b| {
        b.iter_batched(
            || Simulation::restore(two_team_config(42), stat_table(), &snapshot),
            |sim| {
                if let Ok(mut sim) = sim {
                    black_box(sim.tick());
                }
            },
            BatchSize::LargeInput,
        );
    });

    c.bench_function("state_hash_engaged", |b| {
        b.iter(|| black_box(engaged.state_hash()));
    });
}

/// Full flow-field integration over the default map grid.
pub fn flow_field(c: &mut Criterion) {
    let grid = CostGrid::for_map(
        Fixed::from_num(2048),
        Fixed::from_num(2048),
        Fixed::from_num(32),
        DEFAULT_IMPASSABLE,
    );
    let mut scratch = FlowScratch::default();
    c.bench_function("flow_field_64x64", |b| {
        b.iter(|| black_box(FlowField::compute(&grid, (60, 32), &mut scratch)));
    });
}

/// Spawning through the production path.
pub fn spawn(c: &mut Criterion) {
    c.bench_function("spawn_unit", |b| {
        b.iter_batched(
            || skirmish(1, 0),
            |mut sim| black_box(sim.spawn_unit("footman", Team(1))),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, crowded_tick, flow_field, spawn);
criterion_main!(benches);
