//! Runtime configuration for the relay server.
//!
//! Values come from the command line, with the listening port also read
//! from the `PORT` environment variable the way hosting platforms expect.

use crate::client_manager::DEFAULT_OUTBOUND_QUEUE;
use clap::Parser;
use shared::ACTION_WINDOW_MS;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum number of simultaneously connected players
    #[arg(short = 'm', long, default_value = "64")]
    pub max_clients: usize,

    /// Seconds between server pings
    #[arg(long, default_value = "25")]
    pub heartbeat_secs: u64,

    /// Seconds of silence after which a connection is dropped
    #[arg(long, default_value = "60")]
    pub timeout_secs: u64,

    /// How long an attack keeps a player flagged as attacking
    #[arg(long, default_value_t = ACTION_WINDOW_MS)]
    pub action_window_ms: u64,

    /// Frames a client may fall behind before it is disconnected
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_QUEUE)]
    pub outbound_queue: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_clients: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub action_window: Duration,
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            max_clients: 64,
            heartbeat_interval: Duration::from_secs(25),
            client_timeout: Duration::from_secs(60),
            action_window: Duration::from_millis(ACTION_WINDOW_MS),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: format!("{}:{}", args.host, args.port),
            max_clients: args.max_clients,
            heartbeat_interval: Duration::from_secs(args.heartbeat_secs.max(1)),
            client_timeout: Duration::from_secs(args.timeout_secs.max(1)),
            action_window: Duration::from_millis(args.action_window_ms),
            outbound_queue: args.outbound_queue.max(1),
        }
    }
}
