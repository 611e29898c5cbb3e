//! Shared protocol crate for gridblast.
//!
//! This crate contains:
//! - Control commands parsed from inbound text frames
//! - Player snapshots and the outbound state payload
//! - Shared types (Position, Direction)

mod command;
mod error;
mod snapshot;

pub use command::{Command, Direction};
pub use error::ProtocolError;
pub use snapshot::{decode_snapshot, encode_snapshot, PlayerSnapshot};

/// Integer world position in pixel-like units.
pub type Position = glam::IVec2;
