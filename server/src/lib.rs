//! # Relay Server Library
//!
//! This library provides the server side of a lightweight multiplayer
//! state relay. Clients report their own position, attacks, projectiles and
//! hits; the server keeps a registry of who is connected, tracks each
//! player's health and attack state, and fans events out to everyone else.
//!
//! ## Core Responsibilities
//!
//! ### Session Registry
//! Owns the record of every connected player:
//! - Position, facing, stance and animation label
//! - Health, with an immediate reset when it reaches zero
//! - A short "attacking" flag cleared by a timer
//!
//! ### Event Routing
//! Each inbound message maps to a fixed set of outbound messages and
//! recipients. Movement and attacks go to everyone but the sender, damage
//! notifications go to the two players involved, and departures go to
//! everyone still connected.
//!
//! ### Connection Management
//! Handles the transport lifecycle of each WebSocket:
//! - Identifier assignment and capacity limits
//! - Per-connection encoding (JSON text or bincode binary frames)
//! - Heartbeat pings and silent-connection timeouts
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! Socket reader tasks never touch game state. They decode frames and
//! push events into one channel, and a single loop applies them in order.
//! Handlers therefore never interleave, a disconnect is processed after
//! everything its connection sent before it, and attack timers expire
//! through the same channel.
//!
//! ### Trusting Clients
//! The server does not simulate anything. Positions and hits are accepted
//! as reported once they pass shape validation (finite numbers, known
//! message types, non-negative damage).
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Player records, damage resolution and attack-window bookkeeping.
//!
//! ### Router Module (`router`)
//! Turns client messages into outbound deliveries and arms attack timers.
//!
//! ### Client Manager Module (`client_manager`)
//! Connection table, id generation, unicast and broadcast delivery.
//!
//! ### Codec Module (`codec`)
//! WebSocket frame decoding and encoding in either wire format.
//!
//! ### Network Module (`network`)
//! Listener, per-connection tasks and the main loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:3000".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     // Runs until a ServerEvent::Shutdown arrives on server.event_sender()
//!     let server = Server::bind(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod registry;
pub mod router;
