//! Error types for the synchronization core.

use crate::grid::CellIndex;
use crate::player::PlayerId;
use thiserror::Error;

/// Grid membership and lookup faults.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    /// A player was expected in a cell's occupant set but was not there.
    #[error("player {player} missing from occupant set of cell {cell}")]
    MissingOccupant { player: PlayerId, cell: CellIndex },

    #[error("cell {0} is outside the grid")]
    OutOfBounds(CellIndex),

    #[error("no accessible cell left to spawn in")]
    NoSpawnPoint,
}

/// Session registry faults.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("player {0} already has an active session")]
    Duplicate(PlayerId),
}

/// Reasons a bomb placement is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BombError {
    #[error("player {0} is not alive")]
    Dead(PlayerId),

    #[error("player {0} is still cooling down")]
    CoolingDown(PlayerId),

    #[error("cell {0} already holds a bomb")]
    CellArmed(CellIndex),

    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Per-connection outbound faults.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The writer task is gone; the connection is dead.
    #[error("outbound connection closed")]
    Closed,

    /// The outbound queue is full; the frame was dropped.
    #[error("outbound queue full")]
    Lagging,
}

/// Failures while registering a new session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Grid(#[from] GridError),
}
