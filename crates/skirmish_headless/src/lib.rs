//! Headless scenario runner for balance checks and CI verification.
//!
//! Loads a RON [`Scenario`], drives a [`skirmish_core::simulation::Simulation`]
//! through its clock without any presentation, and reports the outcome:
//!
//! - **stdout**: a JSON [`RunSummary`] or [`VerifyReport`]
//! - **stderr**: logs (human-readable)
//!
//! # Example
//!
//! ```bash
//! # Run a scenario
//! cargo run -p skirmish_headless -- run crates/skirmish_headless/scenarios/border_clash.ron
//!
//! # Verify determinism over five runs
//! cargo run -p skirmish_headless -- verify crates/skirmish_headless/scenarios/border_clash.ron --runs 5
//! ```

pub mod runner;
pub mod scenario;

pub use runner::{verify, Outcome, RunSummary, ScenarioRunner, TeamSummary, VerifyReport};
pub use scenario::{Scenario, ScenarioError};
