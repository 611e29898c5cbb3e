//! Per-player mutable state and the movement rule.

use crate::config::PlayerConfig;
use crate::error::BombError;
use crate::grid::{CellIndex, SpatialGrid};
use protocol::{Direction, PlayerSnapshot, Position};
use std::fmt;
use std::time::{Duration, Instant};

/// Stable numeric player identity.
pub type PlayerId = u64;

/// An authenticated identity handed over by the connection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: PlayerId,
    pub name: String,
}

impl User {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// A cell boundary crossing produced by an accepted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellChange {
    pub from: CellIndex,
    pub to: CellIndex,
}

/// The bomber controlled by one session.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Current position in world units.
    pub position: Position,
    /// Position at the last completed grid membership update.
    pub previous: Position,
    pub bomb_radius: u32,
    pub bomb_fuse: Duration,
    pub last_bomb_placed: Option<Instant>,
    pub alive: bool,
}

impl Player {
    pub fn new(user: &User, position: Position, config: &PlayerConfig) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            position,
            previous: position,
            bomb_radius: config.bomb_radius,
            bomb_fuse: config.bomb_fuse(),
            last_bomb_placed: None,
            alive: true,
        }
    }

    /// Value copy of the public state.
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            name: self.name.clone(),
            x: self.position.x,
            y: self.position.y,
            bomb_radius: self.bomb_radius,
            alive: self.alive,
        }
    }

    /// Try to move one step. Returns whether the step was applied.
    ///
    /// A blocked step leaves the position untouched.
    pub fn step(&mut self, grid: &SpatialGrid, direction: Direction, step_size: i32) -> bool {
        let target = self.position + direction.delta(step_size);
        if !grid.can_enter(target) {
            return false;
        }
        self.position = target;
        true
    }

    /// Cell change between the settled and the current position, if any.
    pub fn pending_cell_change(&self, grid: &SpatialGrid) -> Option<CellChange> {
        let from = grid.cell_of(self.previous);
        let to = grid.cell_of(self.position);
        (from != to).then_some(CellChange { from, to })
    }

    /// Mark the grid membership as up to date with the position.
    pub fn settle(&mut self) {
        self.previous = self.position;
    }

    /// Check liveness and cooldown, and start a new cooldown on success.
    pub fn arm_bomb(&mut self, now: Instant, cooldown: Duration) -> Result<(), BombError> {
        if !self.alive {
            return Err(BombError::Dead(self.id));
        }
        if let Some(last) = self.last_bomb_placed {
            if now.saturating_duration_since(last) < cooldown {
                return Err(BombError::CoolingDown(self.id));
            }
        }
        self.last_bomb_placed = Some(now);
        Ok(())
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bomber {{ {} | {} | {} | {} }}",
            self.id, self.name, self.position.x, self.position.y
        )
    }
}
