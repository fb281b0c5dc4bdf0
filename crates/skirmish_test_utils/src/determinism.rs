//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the simulation
//! produces identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! Sources of non-determinism the harness is meant to catch:
//!
//! - **Floating-point math**: all tick math uses
//!   [`skirmish_core::math::Fixed`].
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Entities are always processed in sorted id order.
//!
//! - **Randomness**: the only RNG is the simulation's seeded one.
//!
//! - **Background flow fields**: publication timing depends on thread
//!   scheduling. Fixtures use inline dispatch.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use skirmish_core::simulation::Simulation;
use skirmish_core::snapshot::SimulationSnapshot;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the simulation was deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the simulation produced different hashes across runs.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a simulation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the simulation
/// * `ticks` - Number of ticks to simulate per run
/// * `setup` - Function to create initial simulation state
/// * `step` - Function to advance simulation by one tick
/// * `hash` - Function to compute state hash
///
/// # Example
///
/// ```
/// use skirmish_test_utils::determinism::verify_determinism;
/// use skirmish_test_utils::fixtures::skirmish;
///
/// let result = verify_determinism(
///     3,
///     30,
///     || skirmish(9, 6),
///     |sim| {
///         sim.tick();
///     },
///     |sim| sim.state_hash(),
/// );
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Run two identical simulations and compare their final hashes.
pub fn verify_simulation_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Simulation,
{
    verify_determinism(
        2,
        num_ticks,
        &setup_fn,
        |sim| {
            sim.tick();
        },
        Simulation::state_hash,
    )
    .is_deterministic
}

/// Run `num_sims` simulations on scoped threads and collect final hashes.
///
/// Catches non-determinism that only shows up under thread scheduling or
/// memory layout differences.
///
/// # Panics
///
/// Panics if a simulation thread panics.
#[must_use]
pub fn run_parallel_simulations<F>(setup_fn: F, num_sims: usize, num_ticks: u64) -> DeterminismResult
where
    F: Fn() -> Simulation + Sync,
{
    let hashes: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| {
                    let mut sim = setup_fn();
                    for _ in 0..num_ticks {
                        sim.tick();
                    }
                    sim.state_hash()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().expect("simulation thread panicked"))
            .collect()
    });

    DeterminismResult {
        is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
        hashes,
        ticks: num_ticks,
    }
}

/// Compare two simulation runs tick-by-tick, finding first divergence.
///
/// # Returns
///
/// `None` if simulations are deterministic, `Some(tick)` if they diverge
/// at that tick.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: u64) -> Option<u64>
where
    F: Fn() -> Simulation,
{
    let mut sim1 = setup_fn();
    let mut sim2 = setup_fn();

    if sim1.state_hash() != sim2.state_hash() {
        return Some(0);
    }

    for tick in 1..=num_ticks {
        sim1.tick();
        sim2.tick();

        if sim1.state_hash() != sim2.state_hash() {
            return Some(tick);
        }
    }

    None
}

/// Snapshot a simulation after `num_ticks`, encode, decode and restore it,
/// then check the restored snapshot matches the original.
pub fn verify_snapshot_round_trip<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Simulation,
{
    let mut sim = setup_fn();
    for _ in 0..num_ticks {
        sim.tick();
    }
    let before = sim.snapshot();

    let Ok(bytes) = before.to_bytes() else {
        return false;
    };
    let Ok(decoded) = SimulationSnapshot::from_bytes(&bytes) else {
        return false;
    };
    let Ok(restored) = Simulation::restore(sim.config().clone(), sim.stats().clone(), &decoded) else {
        return false;
    };

    restored.snapshot() == before
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for simulation inputs.
pub mod strategies {
    use proptest::prelude::*;
    use skirmish_core::components::Order;
    use skirmish_core::math::{Fixed, Rect, Vec2Fixed};

    /// A coordinate inside a `size`-wide map, in whole units.
    pub fn arb_coordinate(size: i32) -> impl Strategy<Value = Fixed> {
        (0..size).prop_map(Fixed::from_num)
    }

    /// A position inside a `size × size` map.
    pub fn arb_position(size: i32) -> impl Strategy<Value = Vec2Fixed> {
        (arb_coordinate(size), arb_coordinate(size)).prop_map(|(x, y)| Vec2Fixed::new(x, y))
    }

    /// A rectangle inside a `size × size` map, at most `max_side` wide.
    pub fn arb_rect(size: i32, max_side: i32) -> impl Strategy<Value = Rect> {
        (arb_position(size), 1..max_side, 1..max_side).prop_map(|(corner, w, h)| {
            Rect::from_corners(corner, corner + Vec2Fixed::from_ints(w, h))
        })
    }

    /// A point-targeted order (move or attack-move) or a stop.
    pub fn arb_point_order(size: i32) -> impl Strategy<Value = Order> {
        prop_oneof![
            arb_position(size).prop_map(Order::Move),
            arb_position(size).prop_map(Order::AttackMove),
            Just(Order::Stop),
        ]
    }

    /// A sequence of `(order, queued)` pairs.
    pub fn arb_order_sequence(size: i32, max_len: usize) -> impl Strategy<Value = Vec<(Order, bool)>> {
        proptest::collection::vec((arb_point_order(size), any::<bool>()), 0..max_len)
    }

    /// Blocked cells on a `width × height` grid.
    pub fn arb_blocked_cells(width: u32, height: u32, max: usize) -> impl Strategy<Value = Vec<(u32, u32)>> {
        proptest::collection::vec((0..width, 0..height), 0..max)
    }

    /// Health values.
    pub fn arb_health() -> impl Strategy<Value = u32> {
        1u32..2000
    }

    /// Base damage values.
    pub fn arb_damage() -> impl Strategy<Value = u32> {
        0u32..500
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{duel, skirmish};
    use proptest::prelude::*;

    #[test]
    fn test_verify_determinism_counts_runs() {
        let result = verify_determinism(4, 10, || 0u64, |n| *n += 3, |n| *n);
        assert!(result.is_deterministic);
        assert_eq!(result.hashes, vec![30; 4]);
        assert_eq!(result.unique_hashes().len(), 1);
    }

    #[test]
    fn test_verify_determinism_detects_divergence() {
        let counter = std::cell::Cell::new(0u64);
        let result = verify_determinism(
            3,
            1,
            || {
                counter.set(counter.get() + 1);
                counter.get()
            },
            |_| {},
            |n| *n,
        );
        assert!(!result.is_deterministic);
        assert_eq!(result.unique_hashes().len(), 3);
    }

    #[test]
    #[should_panic(expected = "non-deterministic")]
    fn test_assert_deterministic_panics() {
        DeterminismResult {
            is_deterministic: false,
            hashes: vec![1, 2],
            ticks: 5,
        }
        .assert_deterministic();
    }

    #[test]
    fn test_skirmish_is_deterministic() {
        assert!(verify_simulation_determinism(|| skirmish(3, 20), 240));
    }

    #[test]
    fn test_no_divergence_in_duel() {
        assert_eq!(find_first_divergence(|| duel("footman", "archer", 200).0, 300), None);
    }

    #[test]
    fn test_parallel_runs_agree() {
        run_parallel_simulations(|| skirmish(11, 10), 4, 120).assert_deterministic();
    }

    #[test]
    fn test_snapshot_round_trip_mid_battle() {
        assert!(verify_snapshot_round_trip(|| skirmish(5, 10), 90));
    }

    #[test]
    fn test_compute_hash_stable() {
        assert_eq!(compute_hash(&(1u8, "a")), compute_hash(&(1u8, "a")));
        assert_ne!(compute_hash(&1u32), compute_hash(&2u32));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_random_orders_stay_deterministic(
            orders in strategies::arb_order_sequence(2048, 6),
            seed in 0u64..1000,
        ) {
            let setup = || {
                let mut sim = skirmish(seed, 4);
                let ids = sim.entities().sorted_ids();
                for (i, &(order, queued)) in orders.iter().enumerate() {
                    let id = ids[i % ids.len()];
                    sim.issue_order(id, order, queued).expect("point orders are always valid");
                }
                sim
            };
            prop_assert!(verify_simulation_determinism(setup, 60));
        }
    }
}
