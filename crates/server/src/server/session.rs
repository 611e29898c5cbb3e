//! Client session state.

use crate::error::SendError;
use crate::player::{Player, PlayerId, User};
use futures_util::{Sink, SinkExt};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use protocol::PlayerSnapshot;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Lifecycle of a session's input loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Created, not yet registered.
    Connecting = 0,
    /// Registered; its input loop is running.
    Active = 1,
    /// Deregistered. Terminal.
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Active,
            _ => SessionState::Closed,
        }
    }
}

/// Sending half of a session's outbound queue.
///
/// The receiving half is drained by a writer task that owns the socket, so
/// senders never touch the network.
#[derive(Debug)]
pub struct Outbound {
    tx: mpsc::Sender<Arc<str>>,
}

impl Outbound {
    /// Create a queue holding up to `capacity` frames.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: Arc<str>) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Lagging,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Resolves once the writer task has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Drain an outbound queue into a socket sink until the queue's sender is
/// dropped or a write fails.
pub async fn pump_outbound<S, M, F>(
    mut frames: mpsc::Receiver<Arc<str>>,
    mut sink: S,
    encode: F,
) -> Result<(), S::Error>
where
    S: Sink<M> + Unpin,
    F: Fn(Arc<str>) -> M,
{
    while let Some(frame) = frames.recv().await {
        sink.send(encode(frame)).await?;
    }
    sink.close().await
}

/// A connected player: identity, bomber and outbound connection.
pub struct Session {
    user: User,
    player: RwLock<Player>,
    outbound: Outbound,
    remote: Option<SocketAddr>,
    /// Point when the player joined.
    joined_at: SystemTime,
    joined: Instant,
    state: AtomicU8,
}

impl Session {
    pub fn new(user: User, player: Player, outbound: Outbound, remote: Option<SocketAddr>) -> Self {
        Self {
            user,
            player: RwLock::new(player),
            outbound,
            remote,
            joined_at: SystemTime::now(),
            joined: Instant::now(),
            state: AtomicU8::new(SessionState::Connecting as u8),
        }
    }

    #[inline]
    pub fn id(&self) -> PlayerId {
        self.user.id
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Time since the player joined.
    pub fn connected_for(&self) -> std::time::Duration {
        self.joined.elapsed()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Shared access to the bomber. Held only for the duration of a copy.
    pub fn player(&self) -> RwLockReadGuard<'_, Player> {
        self.player.read()
    }

    /// Exclusive access to the bomber, used by the owning input loop.
    pub fn player_mut(&self) -> RwLockWriteGuard<'_, Player> {
        self.player.write()
    }

    /// Value copy of the bomber for broadcasting.
    pub fn snapshot(&self) -> PlayerSnapshot {
        self.player.read().snapshot()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .joined_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        write!(f, "Session {{ {} | {} | ", self.user.name, *self.player.read())?;
        match self.remote {
            Some(addr) => write!(f, "{}", addr)?,
            None => write!(f, "local")?,
        }
        write!(f, " | joined {} | {:?} }}", joined, self.state())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.user.id)
            .field("remote", &self.remote)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use protocol::Position;

    fn session(id: PlayerId) -> (Session, mpsc::Receiver<Arc<str>>) {
        let user = User::new(id, format!("p{id}"));
        let player = Player::new(&user, Position::new(10, 20), &PlayerConfig::default());
        let (outbound, rx) = Outbound::channel(2);
        (Session::new(user, player, outbound, None), rx)
    }

    #[test]
    fn test_outbound_faults() {
        let (session, rx) = session(1);
        assert!(session.outbound().try_send("a".into()).is_ok());
        assert!(session.outbound().try_send("b".into()).is_ok());
        assert_eq!(session.outbound().try_send("c".into()), Err(SendError::Lagging));

        drop(rx);
        assert!(session.outbound().is_closed());
        assert_eq!(session.outbound().try_send("d".into()), Err(SendError::Closed));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let (session, _rx) = session(4);
        let before = session.snapshot();
        session.player_mut().position = Position::new(90, 90);

        assert_eq!((before.x, before.y), (10, 20));
        assert_eq!(session.snapshot().x, 90);
    }

    #[test]
    fn test_display_and_state() {
        let (session, _rx) = session(3);
        assert_eq!(session.state(), SessionState::Connecting);
        session.set_state(SessionState::Active);
        let text = session.to_string();
        assert!(text.contains("p3"));
        assert!(text.contains("local"));
        assert!(text.contains("Active"));
    }

    #[tokio::test]
    async fn test_pump_stops_when_sender_dropped() {
        let (outbound, rx) = Outbound::channel(4);
        let (tx, mut written) = mpsc::unbounded_channel::<String>();
        let sink = Box::pin(futures_util::sink::unfold(tx, |tx, frame: String| async move {
            tx.send(frame).map_err(|_| "reader gone")?;
            Ok::<_, &'static str>(tx)
        }));
        let writer = tokio::spawn(pump_outbound(rx, sink, |frame: Arc<str>| frame.to_string()));

        outbound.try_send("hello".into()).unwrap();
        drop(outbound);
        writer.await.unwrap().unwrap();

        assert_eq!(written.recv().await.as_deref(), Some("hello"));
        assert_eq!(written.recv().await, None);
    }
}
