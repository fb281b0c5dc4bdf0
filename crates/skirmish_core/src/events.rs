//! Simulation events for audio, VFX and other observers.
//!
//! The simulation owns one [`EventBus`]. Observers call
//! [`EventBus::subscribe`] and drain their receiver whenever they like;
//! a dropped receiver is forgotten on the next publish.

use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};

use crate::components::{AttackType, EntityId, EntityKind, Order, Team};
use crate::math::Vec2Fixed;

/// Something observable happened during a tick or a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimEvent {
    /// An entity entered the world.
    EntitySpawned {
        /// New entity.
        entity: EntityId,
        /// Its kind.
        kind: EntityKind,
        /// Owning team.
        team: Team,
        /// Spawn position.
        position: Vec2Fixed,
    },
    /// A building was placed.
    BuildingPlaced {
        /// New building.
        entity: EntityId,
        /// Building kind.
        kind: String,
        /// Owning team.
        team: Team,
    },
    /// A unit accepted an order.
    OrderAcknowledged {
        /// Ordered unit.
        unit: EntityId,
        /// The order.
        order: Order,
        /// Whether it was appended to the queue.
        queued: bool,
    },
    /// Damage landed on a target.
    DamageDealt {
        /// Entity that dealt the damage.
        attacker: EntityId,
        /// Entity that received damage.
        target: EntityId,
        /// Damage after the matrix multiplier.
        amount: u32,
        /// Attack type used.
        attack_type: AttackType,
    },
    /// A target was healed.
    Healed {
        /// Healer.
        source: EntityId,
        /// Healed ally.
        target: EntityId,
        /// Health restored.
        amount: u32,
    },
    /// A projectile left its launcher.
    ProjectileFired {
        /// Projectile id.
        projectile: u64,
        /// Launcher.
        source: EntityId,
        /// Intended target.
        target: EntityId,
    },
    /// A projectile reached a live target.
    ProjectileHit {
        /// Projectile id.
        projectile: u64,
        /// Target that was hit.
        target: EntityId,
    },
    /// A projectile's target died before it landed.
    ProjectileMissed {
        /// Projectile id.
        projectile: u64,
        /// Where it came down.
        position: Vec2Fixed,
    },
    /// An entity reached zero health.
    EntityDied {
        /// The dead entity.
        entity: EntityId,
        /// Its kind.
        kind: EntityKind,
        /// Its team.
        team: Team,
    },
}

/// Events produced by one call to `Simulation::tick`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickEvents {
    /// Tick number these events belong to.
    pub tick: u64,
    /// Events in the order they happened.
    pub events: Vec<SimEvent>,
}

impl TickEvents {
    /// Number of deaths this tick.
    #[must_use]
    pub fn deaths(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SimEvent::EntityDied { .. }))
            .count()
    }
}

/// Fan-out of [`SimEvent`]s to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<SimEvent>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. The channel is unbounded.
    pub fn subscribe(&mut self) -> Receiver<SimEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Number of live subscribers, as of the last publish.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Send `event` to every subscriber, dropping disconnected ones.
    pub fn publish(&mut self, event: &SimEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
