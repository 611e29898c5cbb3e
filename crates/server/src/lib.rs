//! gridblast game server library.

pub mod bomb;
pub mod config;
pub mod error;
pub mod grid;
pub mod player;
pub mod server;
pub mod world;

// Re-export commonly used types
pub use config::Config;
pub use error::{BombError, GridError, JoinError, RegistryError, SendError};
pub use grid::{CellIndex, Slot, SpatialGrid, Tile};
pub use player::{Player, PlayerId, User};
pub use server::{Session, SessionRegistry, run, serve};
pub use world::{Layout, World};
