//! gridblast - game server with embedded browser client.

use axum::{
    Json, Router,
    extract::{
        ConnectInfo, RawQuery, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::StreamExt;
use server::server::{ConnectionSlot, ConnectionState, Inbound, name_from_query, player_name, run_broadcast_loop, run_session};
use server::{User, World};
use std::net::SocketAddr;
use std::sync::Arc;
use parking_lot::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// Embedded static assets
#[derive(rust_embed::RustEmbed)]
#[folder = "web"]
struct Assets;

#[derive(Clone)]
struct AppState {
    world: Arc<World>,
    conn_state: Arc<Mutex<ConnectionState>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,server=debug")),
        )
        .init();

    info!("gridblast v{}", env!("CARGO_PKG_VERSION"));

    // Load server configuration
    let config = server::Config::load()?;
    info!("Loaded configuration");
    info!("  Port: {}", config.server.port);
    info!("  Grid: {}x{} cells of {}", config.world.columns, config.world.rows, config.world.cell_size);
    info!("  Tick: {}ms", config.server.tick_interval_ms);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let world = Arc::new(World::new(config)?);

    // Start the broadcast loop
    let broadcast_world = Arc::clone(&world);
    let period = world.config().server.tick_interval();
    tokio::spawn(async move {
        run_broadcast_loop(broadcast_world, period).await;
    });

    let state = AppState {
        world,
        conn_state: Arc::new(Mutex::new(ConnectionState::new())),
    };

    // Build the axum router
    let app = Router::new()
        // WebSocket game endpoint
        .route("/game", get(websocket_handler))
        // Terrain for the canvas client
        .route("/layout", get(serve_layout))
        // Static file serving
        .route("/", get(serve_index))
        .route("/index.html", get(serve_index))
        .fallback(static_handler)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server running on http://{}", addr);
    info!("Game WebSocket endpoint: ws://{}/game", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

/// Handle WebSocket upgrades for the game
async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    RawQuery(query): RawQuery,
    State(state): State<AppState>,
) -> Response {
    let limits = &state.world.config().server;
    // The slot moves into the upgrade callback; a failed upgrade drops it.
    let Some(slot) = ConnectionState::acquire(&state.conn_state, addr.ip(), limits.max_connections, limits.ip_limit)
    else {
        warn!("Connection rejected (limit reached): {}", addr);
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    };

    let requested = name_from_query(query.as_deref());
    ws.on_upgrade(move |socket| handle_websocket(socket, addr, requested, state.world, slot))
}

/// Run one game connection; its connection slot is released on return
async fn handle_websocket(
    socket: WebSocket,
    addr: SocketAddr,
    requested: Option<String>,
    world: Arc<World>,
    _slot: ConnectionSlot,
) {
    let id = world.allocate_id();
    let name = player_name(requested.as_deref(), id, world.config().player.max_name_length);
    info!("New game connection from {} as {:?}", addr, name);

    let (write, read) = socket.split();
    let frames = read.map(|message| message.map(inbound));

    let result = run_session(world, User::new(id, name), Some(addr), frames, write, |frame| {
        Message::Text(frame.to_string().into())
    })
    .await;

    if let Err(e) = result {
        error!("Connection error from {}: {}", addr, e);
    }
}

/// Map an axum WebSocket message onto the server's frame type.
fn inbound(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Text(text.as_str().to_owned()),
        Message::Binary(data) => Inbound::Binary(data.len()),
        Message::Close(_) => Inbound::Close,
        Message::Ping(_) | Message::Pong(_) => Inbound::Control,
    }
}

async fn serve_layout(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.world.layout())
}

async fn serve_index(headers: HeaderMap) -> Response {
    let host = headers
        .get("host")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .map(|proto| if proto.eq_ignore_ascii_case("https") { "wss" } else { "ws" })
        .unwrap_or("ws");

    let connection_url = match host {
        Some(host) => format!("{}://{}/game", scheme, host.trim_end_matches('/')),
        None => "/game".to_string(),
    };

    match Assets::get("index.html") {
        Some(content) => {
            let page = String::from_utf8_lossy(&content.data).replace(
                "// GRIDBLAST_CONNECTION_INJECT_POINT",
                &format!("window.GRIDBLAST_CONNECTION = '{}';", connection_url),
            );
            (StatusCode::OK, [(header::CONTENT_TYPE, "text/html; charset=utf-8")], page).into_response()
        }
        None => not_found("index.html"),
    }
}

/// Handle static file requests
async fn static_handler(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');

    match Assets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                content.data.into_owned(),
            )
                .into_response()
        }
        None => not_found(path),
    }
}

fn not_found(path: &str) -> Response {
    warn!("Static file not found: {}", path);
    (StatusCode::NOT_FOUND, "404 Not Found").into_response()
}
