//! Connection table for the relay server
//!
//! This module tracks the transport side of every connected client:
//! - Connection lifecycle (accept, close, timeout)
//! - The outbound channel feeding each connection's socket writer
//! - The wire encoding each client last used
//! - Capacity enforcement and liveness monitoring
//! - Backpressure: a client whose outbound queue fills up is marked
//!   stalled and the owner disconnects it
//!
//! Game state lives in the session registry. The client manager only knows
//! how to reach a connection, never what the player is doing.

use crate::codec::{self, Encoding};
use crate::router::Outbound;
use log::{error, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::{PlayerId, ServerMessage};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;

const ID_SUFFIX_LEN: usize = 12;

/// Frames a connection may have queued before it counts as stalled
pub const DEFAULT_OUTBOUND_QUEUE: usize = 1024;

/// Hands out connection identifiers that are never reused.
///
/// Each id is a hex counter joined to a random suffix, so ids are unique
/// within the process and hard to guess across restarts.
#[derive(Debug)]
pub struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> PlayerId {
        let counter = self.next;
        self.next += 1;

        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_SUFFIX_LEN)
            .map(char::from)
            .collect();

        PlayerId(format!("{:x}-{}", counter, suffix))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// A live connection and the channel that reaches its socket writer
#[derive(Debug)]
pub struct Client {
    pub id: PlayerId,
    pub addr: SocketAddr,
    /// Last time any frame arrived from this client
    pub last_seen: Instant,
    /// Encoding of the last decoded message; replies use the same one
    pub encoding: Encoding,
    sender: mpsc::Sender<Message>,
}

impl Client {
    pub fn new(id: PlayerId, addr: SocketAddr, sender: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            encoding: Encoding::default(),
            sender,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Queues a frame without waiting for the socket writer.
    pub(crate) fn push(&self, frame: Message) -> Result<(), TrySendError<Message>> {
        self.sender.try_send(frame)
    }
}

/// Records a full queue in `stalled`; returns whether the frame was queued.
fn record_push(
    stalled: &mut Vec<PlayerId>,
    id: &PlayerId,
    result: Result<(), TrySendError<Message>>,
) -> bool {
    match result {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            if !stalled.contains(id) {
                stalled.push(id.clone());
            }
            false
        }
        // Writer already gone; its reader reports the disconnect
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Manages all live connections and fan-out delivery
pub struct ClientManager {
    clients: HashMap<PlayerId, Client>,
    max_clients: usize,
    stalled: Vec<PlayerId>,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
            stalled: Vec::new(),
        }
    }

    /// Adds a connection if there is room and the id is unused.
    pub fn add_client(&mut self, client: Client) -> Result<(), Client> {
        if self.clients.len() >= self.max_clients {
            warn!(
                "Server full ({} clients), refusing {}",
                self.max_clients, client.addr
            );
            return Err(client);
        }
        if self.clients.contains_key(&client.id) {
            warn!("Connection id {} already in use", client.id);
            return Err(client);
        }

        info!("Client {} connected from {}", client.id, client.addr);
        self.clients.insert(client.id.clone(), client);
        Ok(())
    }

    /// Drops the connection. Its writer closes the socket once the
    /// channel is gone.
    pub fn remove_client(&mut self, id: &PlayerId) -> bool {
        if let Some(client) = self.clients.remove(id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn get(&self, id: &PlayerId) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Records activity, switching the reply encoding when one is given.
    pub fn touch(&mut self, id: &PlayerId, encoding: Option<Encoding>) -> bool {
        match self.clients.get_mut(id) {
            Some(client) => {
                client.last_seen = Instant::now();
                if let Some(encoding) = encoding {
                    client.encoding = encoding;
                }
                true
            }
            None => false,
        }
    }

    pub fn send_to(&mut self, id: &PlayerId, message: &ServerMessage) -> bool {
        let Some(client) = self.clients.get(id) else {
            return false;
        };

        match codec::encode(message, client.encoding) {
            Ok(frame) => record_push(&mut self.stalled, id, client.push(frame)),
            Err(e) => {
                error!("Failed to encode message for {}: {}", id, e);
                false
            }
        }
    }

    /// Sends to every client except `exclude`. Returns how many were reached.
    pub fn broadcast(&mut self, message: &ServerMessage, exclude: Option<&PlayerId>) -> usize {
        let mut json = None;
        let mut binary = None;
        let mut delivered = 0;

        for (id, client) in &self.clients {
            if Some(id) == exclude {
                continue;
            }

            let slot = match client.encoding {
                Encoding::Json => &mut json,
                Encoding::Binary => &mut binary,
            };
            if slot.is_none() {
                match codec::encode(message, client.encoding) {
                    Ok(frame) => *slot = Some(frame),
                    Err(e) => {
                        error!("Failed to encode broadcast: {}", e);
                        continue;
                    }
                }
            }

            if let Some(frame) = slot {
                if record_push(&mut self.stalled, id, client.push(frame.clone())) {
                    delivered += 1;
                }
            }
        }

        delivered
    }

    pub fn deliver(&mut self, outbound: &Outbound) {
        match outbound {
            Outbound::Send { to, message } => {
                self.send_to(to, message);
            }
            Outbound::Broadcast { message, exclude } => {
                self.broadcast(message, exclude.as_ref());
            }
        }
    }

    pub fn ping_all(&mut self) {
        for (id, client) in &self.clients {
            record_push(&mut self.stalled, id, client.push(Message::Ping(Vec::new())));
        }
    }

    /// Next client whose queue overflowed since the last call, if any.
    pub fn take_stalled(&mut self) -> Option<PlayerId> {
        self.stalled.pop()
    }

    /// Removes clients silent for longer than `timeout` and returns their ids.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<PlayerId> {
        let timed_out: Vec<PlayerId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &timed_out {
            warn!("Client {} timed out", id);
            self.remove_client(id);
        }

        timed_out
    }

    /// Drops every connection, closing all sockets.
    pub fn clear(&mut self) {
        self.clients.clear();
        self.stalled.clear();
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
