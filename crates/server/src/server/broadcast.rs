//! Periodic world snapshot broadcast.

use super::registry::SessionRegistry;
use crate::error::SendError;
use crate::world::World;
use protocol::{PlayerSnapshot, ProtocolError, encode_snapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace, warn};

/// Delivery statistics for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Players in the snapshot.
    pub players: usize,
    /// Sessions the payload was queued for.
    pub delivered: usize,
    /// Sessions whose queue was full; they miss this tick.
    pub lagging: usize,
    /// Sessions whose connection is gone.
    pub closed: usize,
}

/// Run one broadcast tick.
///
/// Takes a registry snapshot, copies every bomber, encodes the copies once
/// and queues the payload for each session in snapshot order. A fault on
/// one session never affects delivery to the others.
pub fn broadcast_tick(registry: &SessionRegistry) -> Result<TickReport, ProtocolError> {
    let sessions = registry.snapshot();
    let players: Vec<PlayerSnapshot> = sessions.iter().map(|session| session.snapshot()).collect();
    let payload: Arc<str> = encode_snapshot(&players)?.into();

    let mut report = TickReport {
        players: players.len(),
        ..TickReport::default()
    };
    for session in &sessions {
        match session.outbound().try_send(Arc::clone(&payload)) {
            Ok(()) => report.delivered += 1,
            Err(SendError::Lagging) => {
                trace!("Player {} is lagging, frame dropped", session.id());
                report.lagging += 1;
            }
            Err(SendError::Closed) => {
                debug!("Player {} connection closed during broadcast", session.id());
                report.closed += 1;
            }
        }
    }
    Ok(report)
}

/// Broadcast snapshots every `period` for the lifetime of the process.
pub async fn run_broadcast_loop(world: Arc<World>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    // Skip missed ticks: a late snapshot is superseded by the next one.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        // Nothing to do without players
        if world.registry().is_empty() {
            continue;
        }

        if let Err(e) = broadcast_tick(world.registry()) {
            warn!("Broadcast tick skipped: {}", e);
        }
    }
}
