use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_ROOM: &str = "default-room";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8082";
pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_ENGINE_TIMEOUT_MS: u64 = 10_000;

/// Multi-room WebRTC signaling relay.
#[derive(Debug, Clone, Parser)]
#[command(name = "webrtc-relay", version, about)]
pub struct RelayConfig {
    /// Address to accept WebSocket connections on
    #[arg(long, env = "RELAY_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// Request path clients must upgrade on
    #[arg(long, env = "RELAY_WS_PATH", default_value = DEFAULT_WS_PATH)]
    pub ws_path: String,

    /// Room used when a join does not name one
    #[arg(long, env = "RELAY_DEFAULT_ROOM", default_value = DEFAULT_ROOM)]
    pub default_room: String,

    /// Comma-separated STUN/TURN URLs handed to every negotiation engine
    #[arg(
        long = "stun",
        env = "RELAY_STUN_SERVERS",
        value_delimiter = ',',
        default_value = DEFAULT_STUN_SERVER
    )]
    pub stun_servers: Vec<String>,

    /// Upper bound for a single engine call in milliseconds (0 = unbounded)
    #[arg(long, env = "RELAY_ENGINE_TIMEOUT_MS", default_value_t = DEFAULT_ENGINE_TIMEOUT_MS)]
    pub engine_timeout_ms: u64,
}

impl RelayConfig {
    pub fn engine_timeout(&self) -> Option<Duration> {
        match self.engine_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8082)),
            ws_path: DEFAULT_WS_PATH.to_string(),
            default_room: DEFAULT_ROOM.to_string(),
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            engine_timeout_ms: DEFAULT_ENGINE_TIMEOUT_MS,
        }
    }
}
