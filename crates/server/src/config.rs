//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

impl Config {
    /// Load configuration from `config.toml` or use defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    /// Load configuration from `path`, writing the defaults there if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let config: Self = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            info!("No {} found, creating default config", path.display());
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            default_config
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the grid and movement rules cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let world = &self.world;
        let player = &self.player;
        anyhow::ensure!(world.cell_size > 0, "world.cell_size must be positive");
        anyhow::ensure!(world.columns > 0 && world.rows > 0, "world grid must have at least one cell");
        anyhow::ensure!(
            world.width().is_some() && world.height().is_some(),
            "world of {}x{} cells of {} units does not fit in i32 coordinates",
            world.columns,
            world.rows,
            world.cell_size
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&world.block_density),
            "world.block_density must be within 0.0..=1.0"
        );
        anyhow::ensure!(player.step_size > 0, "player.step_size must be positive");
        anyhow::ensure!(
            player.step_size <= world.cell_size,
            "player.step_size ({}) must not exceed world.cell_size ({})",
            player.step_size,
            world.cell_size
        );
        anyhow::ensure!(self.server.tick_interval_ms > 0, "server.tick_interval_ms must be positive");
        anyhow::ensure!(self.server.outbound_buffer > 0, "server.outbound_buffer must be positive");
        Ok(())
    }
}

/// Server networking and scheduling settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Connections per IP limit.
    #[serde(default = "default_ip_limit")]
    pub ip_limit: usize,
    /// Broadcast tick period in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Frames a session may have queued before broadcast frames are dropped for it.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl ServerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_connections: default_max_connections(),
            ip_limit: default_ip_limit(),
            tick_interval_ms: default_tick_interval(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

fn default_port() -> u16 {
    8080
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    100
}
fn default_ip_limit() -> usize {
    10
}
fn default_tick_interval() -> u64 {
    5
}
fn default_outbound_buffer() -> usize {
    64
}

/// Grid dimensions and layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorldConfig {
    /// Edge length of one cell in world units.
    #[serde(default = "default_cell_size")]
    pub cell_size: i32,
    /// Number of cells along X.
    #[serde(default = "default_grid_dimension")]
    pub columns: usize,
    /// Number of cells along Y.
    #[serde(default = "default_grid_dimension")]
    pub rows: usize,
    /// Place indestructible walls on every odd/odd cell.
    #[serde(default = "default_pillars")]
    pub pillars: bool,
    /// Fraction of free cells seeded with destructible blocks.
    #[serde(default)]
    pub block_density: f64,
}

impl WorldConfig {
    /// World width in units, if it fits in world coordinates.
    pub fn width(&self) -> Option<i32> {
        i32::try_from(self.columns).ok()?.checked_mul(self.cell_size)
    }

    /// World height in units, if it fits in world coordinates.
    pub fn height(&self) -> Option<i32> {
        i32::try_from(self.rows).ok()?.checked_mul(self.cell_size)
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            columns: default_grid_dimension(),
            rows: default_grid_dimension(),
            pillars: default_pillars(),
            block_density: 0.0,
        }
    }
}

fn default_cell_size() -> i32 {
    50
}
fn default_grid_dimension() -> usize {
    20
}
fn default_pillars() -> bool {
    true
}

/// Player movement and bomb settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    /// Distance covered by one movement command.
    #[serde(default = "default_step_size")]
    pub step_size: i32,
    #[serde(default = "default_bomb_radius")]
    pub bomb_radius: u32,
    #[serde(default = "default_bomb_fuse")]
    pub bomb_fuse_ms: u64,
    /// Minimum time between two bombs from the same player.
    #[serde(default = "default_bomb_cooldown")]
    pub bomb_cooldown_ms: u64,
    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,
}

impl PlayerConfig {
    pub fn bomb_fuse(&self) -> Duration {
        Duration::from_millis(self.bomb_fuse_ms)
    }

    pub fn bomb_cooldown(&self) -> Duration {
        Duration::from_millis(self.bomb_cooldown_ms)
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            step_size: default_step_size(),
            bomb_radius: default_bomb_radius(),
            bomb_fuse_ms: default_bomb_fuse(),
            bomb_cooldown_ms: default_bomb_cooldown(),
            max_name_length: default_max_name_length(),
        }
    }
}

fn default_step_size() -> i32 {
    10
}
fn default_bomb_radius() -> u32 {
    3
}
fn default_bomb_fuse() -> u64 {
    3000
}
fn default_bomb_cooldown() -> u64 {
    1000
}
fn default_max_name_length() -> usize {
    24
}
