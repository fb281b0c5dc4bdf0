//! Error types for the game simulation.
//!
//! Commands coming in from the input layer are validated and rejected with
//! one of these variants. A rejected command never changes simulation state,
//! so callers are free to ignore the error.

use thiserror::Error;

use crate::components::{EntityId, Team};

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Top-level error type for all game simulation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// Unit key not present in the stat table.
    #[error("Unknown unit key: {0}")]
    UnknownUnitKey(String),

    /// Building kind not present in the stat table.
    #[error("Unknown building kind: {0}")]
    UnknownBuildingKind(String),

    /// Invalid entity reference.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// The entity exists but cannot take orders (building, obstacle, dead unit).
    #[error("Entity {0} cannot accept orders")]
    NotCommandable(EntityId),

    /// Team has not got enough resources.
    #[error("Insufficient resources for team {team}: need {required}, have {available}")]
    InsufficientResources {
        /// Team that issued the request.
        team: Team,
        /// Amount required.
        required: u32,
        /// Amount available.
        available: u32,
    },

    /// Team is at its population cap.
    #[error("Population cap reached for team {team}: {population}/{cap}, unit needs {required}")]
    PopulationCapReached {
        /// Team that issued the request.
        team: Team,
        /// Current population.
        population: u32,
        /// Current cap.
        cap: u32,
        /// Population the unit would use.
        required: u32,
    },

    /// Building footprint cannot be placed at the requested position.
    #[error("Invalid placement for {kind}: {reason}")]
    InvalidPlacement {
        /// Building kind.
        kind: String,
        /// Why placement failed.
        reason: String,
    },

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),

    /// Snapshot encoding or decoding failed.
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}
