//! Scenario runner.
//!
//! Builds a [`Simulation`] from a [`Scenario`], feeds the clock a synthetic
//! frame delta, applies scripted commands as their tick comes due and
//! tallies the event stream into a [`RunSummary`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::Receiver;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use skirmish_core::components::{Entity, EntityId, EntityKind, Footprint, Team};
use skirmish_core::events::SimEvent;
use skirmish_core::pathfinding::FlowDispatch;
use skirmish_core::simulation::Simulation;

use crate::scenario::{world_point, Command, Scenario, ScenarioError, ScriptedCommand, Selection};

/// Frames in a row that may pass without a tick before the run is abandoned.
const MAX_IDLE_FRAMES: u32 = 10_000;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// At most one team has live entities left.
    Elimination {
        /// Last team standing, if any.
        winner: Option<Team>,
    },
    /// The tick limit was reached.
    TimeLimit,
    /// The clock stopped producing ticks (time scale of zero).
    Stalled,
}

/// Per-team results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSummary {
    /// Live units at the end.
    pub units: usize,
    /// Live buildings at the end.
    pub buildings: usize,
    /// Entities of this team that died.
    pub deaths: u32,
    /// Damage dealt by this team's entities.
    pub damage_dealt: u64,
    /// Health restored by this team's healers.
    pub healed: u64,
    /// Resources left.
    pub resources: u32,
    /// Population at the end.
    pub population: u32,
}

/// Result of one scenario run, printed as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Scenario name.
    pub scenario: String,
    /// Seed used.
    pub seed: u64,
    /// Ticks simulated.
    pub ticks: u64,
    /// How the run ended.
    pub outcome: Outcome,
    /// Results keyed by team number.
    pub teams: BTreeMap<u8, TeamSummary>,
    /// Projectiles launched by anyone.
    pub projectiles_fired: u64,
    /// Scripted commands the simulation refused.
    pub rejected_commands: u32,
    /// Final [`Simulation::state_hash`].
    pub final_hash: u64,
}

/// Runs one scenario to completion.
pub struct ScenarioRunner {
    name: String,
    sim: Simulation,
    events: Receiver<SimEvent>,
    labels: BTreeMap<String, Vec<EntityId>>,
    owners: BTreeMap<EntityId, Team>,
    script: Vec<ScriptedCommand>,
    next_command: usize,
    max_ticks: u64,
    frame_dt: f64,
    stop_on_elimination: bool,
    contested: bool,
    teams: BTreeMap<u8, TeamSummary>,
    projectiles_fired: u64,
    rejected_commands: u32,
}

impl ScenarioRunner {
    /// Build the simulation and the starting layout.
    pub fn new(scenario: Scenario) -> Result<Self, ScenarioError> {
        let Scenario {
            name,
            config,
            stats,
            max_ticks,
            frame_dt,
            stop_on_elimination,
            units,
            buildings,
            obstacles,
            mut script,
            ..
        } = scenario;
        if frame_dt.is_nan() || frame_dt <= 0.0 {
            return Err(ScenarioError::InvalidFrameDelta(frame_dt));
        }

        let seed = config.seed;
        let mut sim = Simulation::new(config, stats);
        let events = sim.subscribe();
        let mut labels: BTreeMap<String, Vec<EntityId>> = BTreeMap::new();

        for obstacle in &obstacles {
            let size = world_point(obstacle.size)?;
            let position = world_point(obstacle.position)?;
            sim.insert_entity(Entity::obstacle(position, Footprint::new(size.x, size.y)));
        }
        for placement in &buildings {
            let building = sim.create_building(&placement.kind, placement.team, world_point(placement.position)?)?;
            let id = sim.insert_entity(building);
            if let Some(label) = &placement.label {
                labels.entry(label.clone()).or_default().push(id);
            }
        }
        for placement in &units {
            let (x, y) = placement.position;
            for i in 0..placement.count {
                let position = world_point((x + f64::from(i) * placement.spacing, y))?;
                let unit = sim.create_unit(&placement.key, placement.team, position)?;
                let id = sim.insert_entity(unit);
                if let Some(label) = &placement.label {
                    labels.entry(label.clone()).or_default().push(id);
                }
            }
        }

        // Stable: commands sharing a tick keep file order.
        script.sort_by_key(|c| c.tick);

        let contested = live_teams(&sim).len() > 1;
        info!(
            scenario = %name,
            seed,
            entities = sim.entities().len(),
            commands = script.len(),
            max_ticks,
            "scenario loaded"
        );

        let mut runner = Self {
            name,
            sim,
            events,
            labels,
            owners: BTreeMap::new(),
            script,
            next_command: 0,
            max_ticks,
            frame_dt,
            stop_on_elimination,
            contested,
            teams: BTreeMap::new(),
            projectiles_fired: 0,
            rejected_commands: 0,
        };
        runner.drain_events();
        Ok(runner)
    }

    /// The simulation being driven.
    #[must_use]
    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// Run until the tick limit, an elimination or a stalled clock.
    pub fn run(mut self) -> RunSummary {
        let background = self.sim.config().flow_dispatch == FlowDispatch::Background;
        let mut idle_frames = 0;

        let outcome = loop {
            if self.sim.current_tick() >= self.max_ticks {
                break Outcome::TimeLimit;
            }
            self.apply_due_commands();
            if background {
                // Publication then depends only on tick order, not on scheduling.
                self.sim.block_until_paths_ready();
            }

            let batches = self.sim.advance(self.frame_dt);
            self.drain_events();

            if batches.is_empty() {
                idle_frames += 1;
                if idle_frames >= MAX_IDLE_FRAMES {
                    warn!(tick = self.sim.current_tick(), "clock stalled");
                    break Outcome::Stalled;
                }
                continue;
            }
            idle_frames = 0;

            if self.stop_on_elimination && self.contested {
                let alive = live_teams(&self.sim);
                if alive.len() <= 1 {
                    break Outcome::Elimination {
                        winner: alive.into_iter().next(),
                    };
                }
            }
        };

        info!(tick = self.sim.current_tick(), ?outcome, "run finished");
        self.summary(outcome)
    }

    fn apply_due_commands(&mut self) {
        let tick = self.sim.current_tick();
        while let Some(scripted) = self.script.get(self.next_command) {
            if scripted.tick > tick {
                break;
            }
            let command = scripted.command.clone();
            self.next_command += 1;
            if let Err(e) = self.apply(&command) {
                self.rejected_commands += 1;
                debug!(tick, ?command, error = %e, "scripted command rejected");
            }
        }
    }

    fn apply(&mut self, command: &Command) -> Result<(), ScenarioError> {
        match command {
            Command::Order { select, order, queued } => {
                let order = order.to_order(|label| self.first_live(label))?;
                let units = self.select(select)?;
                // One refusal rejects the command, but the rest of the selection is still ordered.
                let mut refused = None;
                for id in units {
                    if let Err(e) = self.sim.issue_order(id, order, *queued) {
                        refused = Some(e);
                    }
                }
                refused.map_or(Ok(()), |e| Err(e.into()))
            }
            Command::Spawn { key, team, label } => {
                let id = self.sim.spawn_unit(key, *team)?;
                if let Some(label) = label {
                    self.labels.entry(label.clone()).or_default().push(id);
                }
                Ok(())
            }
            Command::Build { kind, team, position } => {
                self.sim.place_building(kind, *team, world_point(*position)?)?;
                Ok(())
            }
            Command::TimeScale(scale) => {
                self.sim.set_time_scale(*scale);
                Ok(())
            }
        }
    }

    fn select(&self, selection: &Selection) -> Result<Vec<EntityId>, ScenarioError> {
        match selection {
            Selection::Label(label) => {
                let ids = self
                    .labels
                    .get(label)
                    .ok_or_else(|| ScenarioError::UnknownLabel(label.clone()))?;
                Ok(ids.iter().copied().filter(|&id| self.is_live(id)).collect())
            }
            Selection::Team(team) => Ok(self
                .sim
                .entities()
                .iter()
                .filter(|e| e.team == *team && e.kind == EntityKind::Unit && e.is_alive() && e.control.is_some())
                .map(|e| e.id)
                .collect()),
        }
    }

    fn first_live(&self, label: &str) -> Option<EntityId> {
        self.labels.get(label)?.iter().copied().find(|&id| self.is_live(id))
    }

    fn is_live(&self, id: EntityId) -> bool {
        self.sim.get_entity(id).is_some_and(Entity::is_alive)
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SimEvent::EntitySpawned { entity, team, .. } => {
                    self.owners.insert(entity, team);
                }
                SimEvent::EntityDied { team, .. } => {
                    self.teams.entry(team.0).or_default().deaths += 1;
                }
                SimEvent::DamageDealt { attacker, amount, .. } => {
                    if let Some(team) = self.owners.get(&attacker) {
                        self.teams.entry(team.0).or_default().damage_dealt += u64::from(amount);
                    }
                }
                SimEvent::Healed { source, amount, .. } => {
                    if let Some(team) = self.owners.get(&source) {
                        self.teams.entry(team.0).or_default().healed += u64::from(amount);
                    }
                }
                SimEvent::ProjectileFired { .. } => self.projectiles_fired += 1,
                _ => {}
            }
        }
    }

    fn summary(mut self, outcome: Outcome) -> RunSummary {
        for (team, state) in self.sim.teams() {
            let entry = self.teams.entry(team.0).or_default();
            entry.resources = state.resources;
            entry.population = state.population;
        }
        for entity in self.sim.entities().iter().filter(|e| e.is_alive() && !e.team.is_neutral()) {
            let entry = self.teams.entry(entity.team.0).or_default();
            match entity.kind {
                EntityKind::Unit => entry.units += 1,
                EntityKind::Building => entry.buildings += 1,
                EntityKind::Obstacle => {}
            }
        }
        self.teams.remove(&Team::NEUTRAL.0);

        RunSummary {
            scenario: self.name,
            seed: self.sim.config().seed,
            ticks: self.sim.current_tick(),
            outcome,
            teams: self.teams,
            projectiles_fired: self.projectiles_fired,
            rejected_commands: self.rejected_commands,
            final_hash: self.sim.state_hash(),
        }
    }
}

fn live_teams(sim: &Simulation) -> BTreeSet<Team> {
    sim.entities()
        .iter()
        .filter(|e| e.is_alive() && !e.team.is_neutral())
        .map(|e| e.team)
        .collect()
}

/// Outcome of running the same scenario several times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Scenario name.
    pub scenario: String,
    /// Seed used.
    pub seed: u64,
    /// Final hash of each run.
    pub hashes: Vec<u64>,
    /// Ticks of each run.
    pub ticks: Vec<u64>,
    /// Whether every run agreed.
    pub deterministic: bool,
}

/// Run `scenario` `runs` times and compare final hashes.
pub fn verify(scenario: &Scenario, runs: usize) -> Result<VerifyReport, ScenarioError> {
    let mut hashes = Vec::with_capacity(runs);
    let mut ticks = Vec::with_capacity(runs);
    for run in 0..runs {
        let summary = ScenarioRunner::new(scenario.clone())?.run();
        debug!(run, hash = summary.final_hash, ticks = summary.ticks, "verification run");
        hashes.push(summary.final_hash);
        ticks.push(summary.ticks);
    }
    let deterministic = hashes.windows(2).all(|w| w[0] == w[1]) && ticks.windows(2).all(|w| w[0] == w[1]);
    if !deterministic {
        warn!(scenario = %scenario.name, ?hashes, "runs diverged");
    }
    Ok(VerifyReport {
        scenario: scenario.name.clone(),
        seed: scenario.config.seed,
        hashes,
        ticks,
        deterministic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{ScriptOrder, UnitPlacement};

    const DUEL: &str = r#"
        Scenario(
            name: "Duel",
            stats: (
                units: {
                    "knight": (
                        speed: 60.0,
                        health: 100,
                        armor: Heavy,
                        width: 16.0,
                        height: 16.0,
                        cost: 40,
                        vision_range: 300.0,
                        attack: Some((damage: 25, attack_type: Normal, role: Melee, range: 10.0, cooldown_ticks: 30)),
                    ),
                    "squire": (speed: 50.0, health: 30, width: 12.0, height: 12.0, cost: 10, vision_range: 200.0),
                },
            ),
            config: (
                seed: 5,
                fog_enabled: false,
                flow_dispatch: Inline,
                teams: [
                    (team: Team(1), spawn_point: (200.0, 1000.0), resources: 100, population_cap: 10),
                    (team: Team(2), spawn_point: (1800.0, 1000.0), resources: 0, population_cap: 10),
                ],
            ),
            max_ticks: 2000,
            units: [
                (key: "knight", team: Team(1), position: (600.0, 1000.0), label: Some("hero")),
                (key: "squire", team: Team(2), position: (900.0, 1000.0), count: 2, label: Some("victims")),
            ],
            script: [
                (tick: 0, command: Order(select: Label("hero"), order: AttackMove((1200.0, 1000.0)))),
                (tick: 5, command: Spawn(key: "knight", team: Team(2))),
                (tick: 5, command: Order(select: Label("nobody"), order: Stop)),
            ],
        )
    "#;

    fn duel() -> Scenario {
        Scenario::from_ron_str(DUEL).expect("parse")
    }

    #[test]
    fn test_layout_and_labels() {
        let runner = ScenarioRunner::new(duel()).expect("runner");
        assert_eq!(runner.simulation().entities().len(), 3);
        assert_eq!(runner.labels.get("victims").map(Vec::len), Some(2));
        assert!(runner.contested);
    }

    #[test]
    fn test_run_tallies_events() {
        let summary = ScenarioRunner::new(duel()).expect("runner").run();

        // Team 2 cannot afford a knight and the "nobody" label does not exist.
        assert_eq!(summary.rejected_commands, 2);
        assert_eq!(summary.outcome, Outcome::Elimination { winner: Some(Team(1)) });
        let attackers = &summary.teams[&1];
        let defenders = &summary.teams[&2];
        assert_eq!(defenders.deaths, 2);
        assert_eq!(defenders.units, 0);
        assert_eq!(attackers.units, 1);
        assert_eq!(attackers.damage_dealt, 60);
        assert_eq!(defenders.population, 0);
        assert!(summary.ticks < 2000);
    }

    #[test]
    fn test_time_limit() {
        let summary = ScenarioRunner::new(duel().with_max_ticks(10)).expect("runner").run();
        assert_eq!(summary.outcome, Outcome::TimeLimit);
        assert_eq!(summary.ticks, 10);
    }

    #[test]
    fn test_zero_time_scale_stalls() {
        let mut scenario = duel();
        scenario.script.push(ScriptedCommand {
            tick: 3,
            command: Command::TimeScale(0.0),
        });
        let summary = ScenarioRunner::new(scenario).expect("runner").run();
        assert_eq!(summary.outcome, Outcome::Stalled);
        assert_eq!(summary.ticks, 3);
    }

    #[test]
    fn test_invalid_frame_delta() {
        let mut scenario = duel();
        scenario.frame_dt = 0.0;
        assert!(matches!(
            ScenarioRunner::new(scenario),
            Err(ScenarioError::InvalidFrameDelta(_))
        ));
    }

    #[test]
    fn test_unknown_unit_in_layout() {
        let mut scenario = duel();
        scenario.units.push(UnitPlacement {
            key: "dragon".to_string(),
            team: Team(1),
            position: (100.0, 100.0),
            count: 1,
            spacing: 24.0,
            label: None,
        });
        assert!(matches!(ScenarioRunner::new(scenario), Err(ScenarioError::Rejected(_))));
    }

    #[test]
    fn test_team_selection_orders_every_unit() {
        let mut scenario = duel();
        scenario.script = vec![ScriptedCommand {
            tick: 0,
            command: Command::Order {
                select: Selection::Team(Team(2)),
                order: ScriptOrder::Move((900.0, 1400.0)),
                queued: false,
            },
        }];
        let summary = ScenarioRunner::new(scenario.with_max_ticks(1)).expect("runner").run();
        assert_eq!(summary.rejected_commands, 0);
    }

    #[test]
    fn test_verify_agrees() {
        let report = verify(&duel().with_max_ticks(300), 3).expect("verify");
        assert!(report.deterministic);
        assert_eq!(report.hashes.len(), 3);
        assert_eq!(report.seed, 5);
    }
}
