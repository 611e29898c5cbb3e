//! Bomb placement seam.
//!
//! The core only hands bombs over to a [`BombSubsystem`] and never waits for
//! them. Explosion damage and terrain destruction live behind the trait.

use crate::error::BombError;
use crate::grid::{CellIndex, Slot, SpatialGrid, Tile};
use crate::player::PlayerId;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A freshly placed bomb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bomb {
    pub owner: PlayerId,
    pub cell: CellIndex,
    pub radius: u32,
    pub fuse: Duration,
}

/// Receiver of bomb placements.
///
/// `place` must return quickly; all waiting belongs in the returned future,
/// which runs on its own task.
pub trait BombSubsystem: Send + Sync + 'static {
    fn place(&self, bomb: Bomb) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// How often a bomb whose cell is still occupied retries marking it.
const ARM_POLL: Duration = Duration::from_millis(20);

/// Default subsystem: occupies the bomb slot for the length of the fuse.
///
/// The slot is only marked once the cell is vacant, so a bomber is never
/// trapped on its own bomb. Until then the bomb is tracked as armed and a
/// second bomb in the same cell is refused.
#[derive(Debug, Clone)]
pub struct FuseBombs {
    grid: Arc<SpatialGrid>,
    armed: Arc<Mutex<HashSet<CellIndex>>>,
}

impl FuseBombs {
    pub fn new(grid: Arc<SpatialGrid>) -> Self {
        Self {
            grid,
            armed: Arc::default(),
        }
    }
}

/// Releases an armed cell when the fuse future finishes or is dropped.
struct ArmedCell {
    armed: Arc<Mutex<HashSet<CellIndex>>>,
    cell: CellIndex,
}

impl Drop for ArmedCell {
    fn drop(&mut self) {
        self.armed.lock().remove(&self.cell);
    }
}

impl BombSubsystem for FuseBombs {
    fn place(&self, bomb: Bomb) -> BoxFuture<'static, anyhow::Result<()>> {
        let grid = Arc::clone(&self.grid);
        let armed = Arc::clone(&self.armed);
        async move {
            if !armed.lock().insert(bomb.cell) {
                return Err(BombError::CellArmed(bomb.cell).into());
            }
            let _release = ArmedCell {
                armed,
                cell: bomb.cell,
            };
            debug!("Bomb of player {} armed at {}", bomb.owner, bomb.cell);

            let deadline = Instant::now() + bomb.fuse;
            let mut marked = false;
            while Instant::now() < deadline {
                if grid.replace_tile_if_vacant(bomb.cell, Slot::Bomb, Tile::Empty, Tile::Bomb)? {
                    marked = true;
                    break;
                }
                tokio::time::sleep(ARM_POLL.min(deadline.saturating_duration_since(Instant::now()))).await;
            }
            tokio::time::sleep_until(deadline).await;

            if marked {
                grid.set_tile(bomb.cell, Slot::Bomb, Tile::Empty)?;
            }
            info!(
                "Bomb of player {} detonated at {} (radius {})",
                bomb.owner, bomb.cell, bomb.radius
            );
            Ok(())
        }
        .boxed()
    }
}

/// Run a placement on its own task, supervised by a second task that logs
/// its outcome. Errors and panics stop there.
pub fn spawn_supervised(bombs: Arc<dyn BombSubsystem>, bomb: Bomb) -> JoinHandle<()> {
    let work = tokio::spawn(bombs.place(bomb));
    tokio::spawn(async move {
        match work.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Bomb of player {} at {} failed: {}", bomb.owner, bomb.cell, e),
            Err(e) if e.is_panic() => error!("Bomb task of player {} panicked", bomb.owner),
            Err(e) => debug!("Bomb task of player {} cancelled: {}", bomb.owner, e),
        }
    })
}
