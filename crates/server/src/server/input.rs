//! Per-connection input loop.
//!
//! `Connecting -> Active` happens in [`World::register_session`]. While
//! active the loop waits for the next frame and applies it. Any read
//! failure, malformed frame or dead writer moves the session to `Closed`,
//! which always deregisters it.

use super::session::{Outbound, Session, pump_outbound};
use crate::error::{BombError, JoinError};
use crate::player::User;
use crate::world::World;
use futures_util::{Sink, Stream, StreamExt};
use protocol::{Command, Direction, ProtocolError};
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a closed session's writer may take to flush before it is aborted.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// A frame received from a connection, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Binary payload of the given length.
    Binary(usize),
    /// Ping, pong and other control traffic.
    Control,
    Close,
}

/// Why an input loop ended.
#[derive(Debug)]
pub enum Exit {
    /// The peer sent a close frame.
    PeerClosed,
    /// The inbound stream ended.
    StreamEnded,
    /// Reading from the transport failed.
    ReadFailed(String),
    /// The peer sent a frame outside the protocol.
    Malformed(ProtocolError),
    /// The writer task died after a failed write.
    WriterGone,
}

/// Result of applying one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Moved { cell_changed: bool },
    Blocked,
    BombPlaced,
    BombRefused,
    Ignored,
}

/// Deregisters its session when dropped, on every exit path.
struct CloseGuard<'a> {
    world: &'a World,
    session: &'a Session,
}

impl Drop for CloseGuard<'_> {
    fn drop(&mut self) {
        self.world.deregister(self.session);
    }
}

/// Apply one control command to a session's bomber.
pub fn apply_command(world: &World, session: &Session, command: Command) -> Outcome {
    match command {
        Command::Move(direction) => apply_move(world, session, direction),
        Command::PlaceBomb => match world.place_bomb(session) {
            Ok(_) => Outcome::BombPlaced,
            Err(e @ (BombError::CoolingDown(_) | BombError::Dead(_))) => {
                debug!("Bomb refused: {}", e);
                Outcome::BombRefused
            }
            Err(e) => {
                warn!("Bomb refused: {}", e);
                Outcome::BombRefused
            }
        },
        Command::Unknown => Outcome::Ignored,
    }
}

fn apply_move(world: &World, session: &Session, direction: Direction) -> Outcome {
    let grid = world.grid();
    let mut player = session.player_mut();
    if !player.step(grid, direction, world.config().player.step_size) {
        return Outcome::Blocked;
    }

    let change = player.pending_cell_change(grid);
    if let Some(change) = change {
        if let Err(e) = grid.move_occupant(player.id, change.from, change.to) {
            warn!("Grid membership out of sync: {}", e);
        }
    }
    player.settle();
    Outcome::Moved {
        cell_changed: change.is_some(),
    }
}

/// Process frames for a registered session until it closes.
pub async fn run_input_loop<S, E>(world: Arc<World>, session: Arc<Session>, mut frames: S) -> Exit
where
    S: Stream<Item = Result<Inbound, E>> + Unpin,
    E: Display,
{
    let _guard = CloseGuard {
        world: &world,
        session: &session,
    };
    let id = session.id();

    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(Inbound::Text(text))) => {
                    let command = Command::parse(&text);
                    let outcome = apply_command(&world, &session, command);
                    debug!("Player {} {:?} -> {:?}", id, command, outcome);
                }
                Some(Ok(Inbound::Binary(len))) => {
                    return Exit::Malformed(ProtocolError::UnexpectedBinary(len));
                }
                Some(Ok(Inbound::Control)) => {}
                Some(Ok(Inbound::Close)) => return Exit::PeerClosed,
                Some(Err(e)) => return Exit::ReadFailed(e.to_string()),
                None => return Exit::StreamEnded,
            },
            _ = session.outbound().closed() => return Exit::WriterGone,
        }
    }
}

/// Drive one connection from registration to close.
///
/// Spawns the writer task that drains the session's outbound queue into
/// `sink`, runs the input loop on `frames`, and waits briefly for the
/// writer once the session is closed.
pub async fn run_session<R, E, W, M, F>(
    world: Arc<World>,
    user: User,
    remote: Option<SocketAddr>,
    frames: R,
    sink: W,
    encode: F,
) -> Result<Exit, JoinError>
where
    R: Stream<Item = Result<Inbound, E>> + Unpin,
    E: Display,
    W: Sink<M> + Unpin + Send + 'static,
    W::Error: Display + Send,
    M: Send + 'static,
    F: Fn(Arc<str>) -> M + Send + 'static,
{
    let (outbound, queue) = Outbound::channel(world.config().server.outbound_buffer);
    let session = world.register_session(user, remote, outbound)?;
    let id = session.id();

    let writer = tokio::spawn(async move {
        if let Err(e) = pump_outbound(queue, sink, encode).await {
            debug!("Writer for player {} stopped: {}", id, e);
        }
    });
    let abort = writer.abort_handle();

    let exit = run_input_loop(Arc::clone(&world), session, frames).await;
    info!("Player {} closed: {:?}", id, exit);

    if tokio::time::timeout(WRITER_GRACE, writer).await.is_err() {
        abort.abort();
    }
    Ok(exit)
}
