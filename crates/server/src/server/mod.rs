//! Game server implementation.

use crate::config::Config;
use crate::player::User;
use crate::world::World;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{error, info, warn};

pub mod broadcast;
pub mod input;
pub mod registry;
pub mod session;

pub use broadcast::{TickReport, broadcast_tick, run_broadcast_loop};
pub use input::{Exit, Inbound, Outcome, apply_command, run_input_loop, run_session};
pub use registry::SessionRegistry;
pub use session::{Outbound, Session, SessionState};

/// Connection tracking state (shared across connection handlers).
#[derive(Debug, Default)]
pub struct ConnectionState {
    /// Number of connections per IP address.
    ip_connections: HashMap<IpAddr, usize>,
    /// Total number of connections.
    total_connections: usize,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to add a connection, returns true if allowed.
    pub fn try_add_connection(&mut self, ip: IpAddr, max_total: usize, max_per_ip: usize) -> bool {
        // Check total connections
        if self.total_connections >= max_total {
            return false;
        }

        // Check per-IP limit
        let current = self.ip_connections.get(&ip).copied().unwrap_or(0);
        if current >= max_per_ip {
            return false;
        }

        *self.ip_connections.entry(ip).or_insert(0) += 1;
        self.total_connections += 1;
        true
    }

    /// Remove a connection.
    pub fn remove_connection(&mut self, ip: IpAddr) {
        if let Some(count) = self.ip_connections.get_mut(&ip) {
            if *count > 0 {
                *count -= 1;
                self.total_connections = self.total_connections.saturating_sub(1);
            }
            if *count == 0 {
                self.ip_connections.remove(&ip);
            }
        }
    }

    pub fn total(&self) -> usize {
        self.total_connections
    }

    /// Take a connection slot for `ip`, released when the slot is dropped.
    pub fn acquire(
        state: &Arc<Mutex<Self>>,
        ip: IpAddr,
        max_total: usize,
        max_per_ip: usize,
    ) -> Option<ConnectionSlot> {
        state
            .lock()
            .try_add_connection(ip, max_total, max_per_ip)
            .then(|| ConnectionSlot {
                state: Arc::clone(state),
                ip,
            })
    }
}

/// An admitted connection. Dropping it frees the slot on every path,
/// including a handshake that never completes.
#[derive(Debug)]
pub struct ConnectionSlot {
    state: Arc<Mutex<ConnectionState>>,
    ip: IpAddr,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.lock().remove_connection(self.ip);
    }
}

/// Extract and decode the `name` parameter from a query string.
pub fn name_from_query(query: Option<&str>) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "name")
        .map(|(_, value)| value.into_owned())
}

/// Clean up a requested display name, falling back to `Player <id>`.
pub fn player_name(requested: Option<&str>, id: u64, max_len: usize) -> String {
    let name: String = requested
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .take(max_len)
        .collect();
    let name = name.trim();
    if name.is_empty() {
        format!("Player {}", id)
    } else {
        name.to_string()
    }
}

/// Map a tungstenite message onto the transport-independent frame type.
fn inbound(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Text(text.as_str().to_owned()),
        Message::Binary(data) => Inbound::Binary(data.len()),
        Message::Close(_) => Inbound::Close,
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Control,
    }
}

/// Run the game server.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on ws://{}", addr);

    serve(listener, Arc::new(World::new(config)?)).await
}

/// Accept WebSocket connections on `listener` until it fails.
///
/// Starts the broadcast loop for `world` and one task per connection.
pub async fn serve(listener: TcpListener, world: Arc<World>) -> anyhow::Result<()> {
    let conn_state = Arc::new(Mutex::new(ConnectionState::new()));

    let broadcast_world = Arc::clone(&world);
    let period = world.config().server.tick_interval();
    tokio::spawn(async move {
        run_broadcast_loop(broadcast_world, period).await;
    });

    // Connection limits
    let max_connections = world.config().server.max_connections;
    let ip_limit = world.config().server.ip_limit;

    loop {
        let (stream, addr) = listener.accept().await?;
        let Some(slot) = ConnectionState::acquire(&conn_state, addr.ip(), max_connections, ip_limit) else {
            warn!("Connection rejected (limit reached): {}", addr);
            continue;
        };

        let world = Arc::clone(&world);
        tokio::spawn(async move {
            let result = handle_connection(stream, addr, world).await;
            drop(slot);

            if let Err(e) = result {
                error!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, world: Arc<World>) -> anyhow::Result<()> {
    let mut requested = None;
    let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        requested = name_from_query(request.uri().query());
        Ok(response)
    })
    .await?;

    let id = world.allocate_id();
    let name = player_name(requested.as_deref(), id, world.config().player.max_name_length);
    info!("New connection from {} as {:?}", addr, name);

    let (write, read) = ws_stream.split();
    let frames = read.map(|message| message.map(inbound));

    run_session(world, User::new(id, name), Some(addr), frames, write, |frame| {
        Message::text(frame.to_string())
    })
    .await?;
    Ok(())
}
