//! Save and restore of simulation state.
//!
//! A snapshot keeps what is needed to rebuild the battlefield: tick, team
//! economies, and per entity its id, stat key, team, position, health and
//! orders. Everything else (capabilities, spatial grids, cost grid, flow
//! fields) is re-derived from the stat table on restore. Projectiles in
//! flight and dead entities are not saved.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::components::{Entity, EntityId, EntityKind, Footprint, Health, Order, Team};
use crate::config::SimConfig;
use crate::data::StatTable;
use crate::error::{GameError, Result};
use crate::math::Vec2Fixed;
use crate::simulation::{Simulation, TeamState};

/// Snapshot format version. Bump on incompatible layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Saved state of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Entity id, kept across restore.
    pub id: EntityId,
    /// Kind tag.
    pub kind: EntityKind,
    /// Stat-table key.
    pub key: String,
    /// Owner.
    pub team: Team,
    /// Center position.
    pub position: Vec2Fixed,
    /// Footprint (only used for obstacles, which have no stat entry).
    pub footprint: Footprint,
    /// Health at save time.
    pub health: Health,
    /// Order being executed.
    pub order: Option<Order>,
    /// Orders queued behind the current one.
    pub queued: Vec<Order>,
    /// Where the current order was heading: its point, or the target's
    /// position for attack orders.
    pub target: Option<Vec2Fixed>,
}

/// Saved state of a whole simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    /// Format version.
    pub version: u32,
    /// Tick at save time.
    pub tick: u64,
    /// Team economies.
    pub teams: Vec<(Team, TeamState)>,
    /// Live entities in ascending id order.
    pub entities: Vec<EntitySnapshot>,
}

impl SimulationSnapshot {
    /// Encode with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| GameError::Snapshot(format!("encode failed: {e}")))
    }

    /// Decode with bincode, rejecting other format versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self =
            bincode::deserialize(bytes).map_err(|e| GameError::Snapshot(format!("decode failed: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(GameError::Snapshot(format!(
                "version mismatch: expected {SNAPSHOT_VERSION}, got {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }
}

impl Simulation {
    /// Capture the current state.
    #[must_use]
    pub fn snapshot(&self) -> SimulationSnapshot {
        let entities = self
            .entities()
            .iter()
            .filter(|e| e.is_alive())
            .map(|e| self.entity_snapshot(e))
            .collect();
        SimulationSnapshot {
            version: SNAPSHOT_VERSION,
            tick: self.current_tick(),
            teams: self.teams().map(|(team, state)| (team, *state)).collect(),
            entities,
        }
    }

    fn entity_snapshot(&self, entity: &Entity) -> EntitySnapshot {
        let control = entity.control.as_ref();
        let order = control.and_then(|c| c.orders.current().copied());
        let queued = control.map_or_else(Vec::new, |c| c.orders.pending().copied().collect());
        let target = order.and_then(|order| match order {
            Order::Attack(id) => self.get_entity(id).map(|t| t.position),
            other => other.target_point(),
        });
        EntitySnapshot {
            id: entity.id,
            kind: entity.kind,
            key: entity.key.clone(),
            team: entity.team,
            position: entity.position,
            footprint: entity.footprint,
            health: entity.health,
            order,
            queued,
            target,
        }
    }

    /// Rebuild a simulation from a snapshot.
    ///
    /// Entities keep their saved ids, positions and health; team economies
    /// are taken from the snapshot rather than recounted. Attack orders
    /// whose target was not saved are dropped.
    pub fn restore(config: SimConfig, stats: StatTable, snapshot: &SimulationSnapshot) -> Result<Self> {
        let mut sim = Self::new(config, stats);

        for saved in &snapshot.entities {
            let mut entity = match saved.kind {
                EntityKind::Unit => sim.create_unit(&saved.key, saved.team, saved.position)?,
                EntityKind::Building => sim.create_building(&saved.key, saved.team, saved.position)?,
                EntityKind::Obstacle => Entity::obstacle(saved.position, saved.footprint),
            };
            entity.health = Health::with_current(saved.health.current, saved.health.max);
            sim.insert_restored(saved.id, entity);
        }
        sim.finish_restore(snapshot.tick, snapshot.teams.iter().copied());

        for saved in &snapshot.entities {
            let orders = saved.order.iter().chain(saved.queued.iter());
            for (i, &order) in orders.enumerate() {
                sim.restore_order(saved.id, order, i > 0);
            }
        }

        debug!(entities = snapshot.entities.len(), "snapshot entities restored");
        info!(tick = snapshot.tick, "simulation restored");
        Ok(sim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_rejected() {
        let snapshot = SimulationSnapshot {
            version: SNAPSHOT_VERSION + 1,
            tick: 3,
            teams: vec![],
            entities: vec![],
        };
        let bytes = bincode::serialize(&snapshot).expect("encode");
        assert!(matches!(
            SimulationSnapshot::from_bytes(&bytes),
            Err(GameError::Snapshot(_))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(SimulationSnapshot::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_empty_round_trip() {
        let sim = Simulation::new(SimConfig::default(), StatTable::default());
        let snapshot = sim.snapshot();
        let bytes = snapshot.to_bytes().expect("encode");
        assert_eq!(SimulationSnapshot::from_bytes(&bytes).ok(), Some(snapshot));
    }
}
