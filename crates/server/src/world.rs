//! World context shared by every task.
//!
//! Built once at startup (grid first, then the registry) and handed to the
//! listener, every input loop and the broadcast loop. Lives for the whole
//! process.

use crate::bomb::{self, Bomb, BombSubsystem, FuseBombs};
use crate::config::Config;
use crate::error::{BombError, GridError, JoinError};
use crate::grid::{CellIndex, Slot, SpatialGrid, Tile};
use crate::player::{Player, PlayerId, User};
use crate::server::registry::SessionRegistry;
use crate::server::session::{Outbound, Session, SessionState};
use protocol::Position;
use rand::seq::IndexedRandom;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Static terrain description handed to browser clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layout {
    #[serde(rename = "CellSize")]
    pub cell_size: i32,
    #[serde(rename = "Columns")]
    pub columns: usize,
    #[serde(rename = "Rows")]
    pub rows: usize,
    #[serde(rename = "Walls")]
    pub walls: Vec<[i32; 2]>,
    #[serde(rename = "Blocks")]
    pub blocks: Vec<[i32; 2]>,
}

pub struct World {
    config: Config,
    grid: Arc<SpatialGrid>,
    registry: SessionRegistry,
    bombs: Arc<dyn BombSubsystem>,
    next_id: AtomicU64,
}

impl World {
    /// Build the world described by `config`, with a random block layout.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let grid = SpatialGrid::from_config(&config.world, &mut rand::rng());
        Self::with_grid(config, grid)
    }

    /// Build a world around an existing grid, using [`FuseBombs`].
    ///
    /// Fails if `config` is invalid or does not describe `grid`.
    pub fn with_grid(config: Config, grid: SpatialGrid) -> anyhow::Result<Self> {
        config.validate()?;
        anyhow::ensure!(
            (grid.cell_size(), grid.columns(), grid.rows())
                == (config.world.cell_size, config.world.columns, config.world.rows),
            "grid of {}x{} cells of {} does not match the world config",
            grid.columns(),
            grid.rows(),
            grid.cell_size()
        );

        let grid = Arc::new(grid);
        info!(
            "Grid ready: {}x{} cells of {} units",
            grid.columns(),
            grid.rows(),
            grid.cell_size()
        );
        Ok(Self {
            bombs: Arc::new(FuseBombs::new(Arc::clone(&grid))),
            config,
            grid,
            registry: SessionRegistry::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Replace the bomb subsystem.
    pub fn with_bomb_subsystem(mut self, bombs: Arc<dyn BombSubsystem>) -> Self {
        self.bombs = bombs;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Allocate a fresh player identity.
    pub fn allocate_id(&self) -> PlayerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Current terrain of every cell.
    pub fn layout(&self) -> Layout {
        let mut layout = Layout {
            cell_size: self.grid.cell_size(),
            columns: self.grid.columns(),
            rows: self.grid.rows(),
            walls: Vec::new(),
            blocks: Vec::new(),
        };
        for index in self.grid.indices() {
            match self.grid.tile(index, Slot::Terrain) {
                Ok(Tile::Wall) => layout.walls.push([index.x, index.y]),
                Ok(Tile::Block) => layout.blocks.push([index.x, index.y]),
                _ => {}
            }
        }
        layout
    }

    /// Top-left corner of a random accessible cell.
    pub fn spawn_point(&self) -> Result<Position, GridError> {
        let cells = self.grid.accessible_cells();
        let cell = cells.choose(&mut rand::rng()).ok_or(GridError::NoSpawnPoint)?;
        Ok(self.grid.origin_of(*cell))
    }

    /// Create and register a session for `user` at a random spawn point.
    pub fn register_session(
        &self,
        user: User,
        remote: Option<SocketAddr>,
        outbound: Outbound,
    ) -> Result<Arc<Session>, JoinError> {
        let position = self.spawn_point()?;
        self.register_session_at(user, remote, outbound, position)
    }

    /// Create and register a session for `user` standing at `position`.
    ///
    /// The bomber is placed in its cell before the session becomes visible
    /// in the registry. Fails without side effects if `user` already has a
    /// session.
    pub fn register_session_at(
        &self,
        user: User,
        remote: Option<SocketAddr>,
        outbound: Outbound,
        position: Position,
    ) -> Result<Arc<Session>, JoinError> {
        let id = user.id;
        let session = self.registry.insert_with(id, || -> Result<Arc<Session>, JoinError> {
            let cell = self.grid.cell_of(position);
            if !self.grid.contains(cell) {
                return Err(GridError::OutOfBounds(cell).into());
            }
            let player = Player::new(&user, position, &self.config.player);
            self.grid.add_occupant(id, cell)?;
            let session = Arc::new(Session::new(user, player, outbound, remote));
            session.set_state(SessionState::Active);
            Ok(session)
        })?;
        info!("{} joined", session);
        debug!("{}", self.registry.describe());
        Ok(session)
    }

    /// Remove a session from the registry and its bomber from the grid.
    pub fn deregister(&self, session: &Session) {
        let id = session.id();
        if self.registry.remove(id).is_none() {
            debug!("Player {} was already deregistered", id);
            return;
        }

        let cell = self.grid.cell_of(session.player().previous);
        if let Err(e) = self.grid.remove_occupant(id, cell) {
            warn!("Grid cleanup for player {}: {}", id, e);
        }
        session.set_state(SessionState::Closed);
        let remote = session.remote().map_or_else(|| "local".to_string(), |addr| addr.to_string());
        info!(
            "Player {} ({}, {}) left after {:?}",
            id,
            session.user().name,
            remote,
            session.connected_for()
        );
        debug!("{}", self.registry.describe());
    }

    /// Arm a bomb at the bomber's current cell and hand it to the bomb
    /// subsystem on a background task.
    pub fn place_bomb(&self, session: &Session) -> Result<JoinHandle<()>, BombError> {
        let bomb = {
            let mut player = session.player_mut();
            let cell = self.grid.cell_of(player.position);
            if !self.grid.contains(cell) {
                return Err(GridError::OutOfBounds(cell).into());
            }
            player.arm_bomb(Instant::now(), self.config.player.bomb_cooldown())?;
            Bomb {
                owner: player.id,
                cell,
                radius: player.bomb_radius,
                fuse: player.bomb_fuse,
            }
        };
        debug!("Player {} placed a bomb at {}", bomb.owner, bomb.cell);
        Ok(bomb::spawn_supervised(Arc::clone(&self.bombs), bomb))
    }
}
