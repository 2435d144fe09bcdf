//! Server network layer: WebSocket transport and the serial event loop
//!
//! Every connection gets a reader task and a writer task. Readers forward
//! [`ServerEvent`]s into one channel; the main loop drains that channel and
//! is the only code that touches game state, so handlers for different
//! connections never interleave.

use crate::client_manager::{Client, ClientManager, IdGenerator};
use crate::codec::{self, Encoding};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::router::{EventRouter, Outbound};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientMessage, PlayerId, ServerMessage};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Capacity of the channel feeding the main loop
pub const EVENT_QUEUE: usize = 1024;

/// Events delivered to the main loop, in arrival order
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        id: PlayerId,
        addr: SocketAddr,
        sender: mpsc::Sender<Message>,
    },
    MessageReceived {
        id: PlayerId,
        message: ClientMessage,
        encoding: Encoding,
    },
    /// A control frame arrived; only refreshes liveness.
    Activity {
        id: PlayerId,
    },
    Disconnected {
        id: PlayerId,
    },
    ActionExpired {
        id: PlayerId,
        generation: u64,
    },
    Shutdown,
}

impl ServerEvent {
    fn connection_id(&self) -> Option<&PlayerId> {
        match self {
            ServerEvent::Connected { id, .. }
            | ServerEvent::MessageReceived { id, .. }
            | ServerEvent::Activity { id }
            | ServerEvent::Disconnected { id }
            | ServerEvent::ActionExpired { id, .. } => Some(id),
            ServerEvent::Shutdown => None,
        }
    }
}

/// Owner of all mutable server state: connections plus the session registry.
pub struct Relay {
    clients: ClientManager,
    router: EventRouter,
    client_timeout: Duration,
}

impl Relay {
    pub fn new(config: &ServerConfig, events: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            clients: ClientManager::new(config.max_clients),
            router: EventRouter::new(events, config.action_window),
            client_timeout: config.client_timeout,
        }
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected { id, addr, sender } => {
                let client = Client::new(id.clone(), addr, sender);
                if let Err(refused) = self.clients.add_client(client) {
                    Self::reject(refused, "Server full");
                    return;
                }
                let outbound = self.router.connect(&id);
                self.dispatch(outbound);
            }
            ServerEvent::MessageReceived {
                id,
                message,
                encoding,
            } => {
                if !self.clients.touch(&id, Some(encoding)) {
                    debug!(
                        "Dropping {} from unregistered connection {}",
                        message.name(),
                        id
                    );
                    return;
                }
                debug!("{} from {}", message.name(), id);
                let outbound = self.router.handle(&id, message);
                self.dispatch(outbound);
            }
            ServerEvent::Activity { id } => {
                self.clients.touch(&id, None);
            }
            ServerEvent::Disconnected { id } => {
                self.drop_connection(&id);
            }
            ServerEvent::ActionExpired { id, generation } => {
                self.router.expire_action(&id, generation);
            }
            ServerEvent::Shutdown => {}
        }
    }

    /// Handles one event; a panic drops only the connection it came from.
    pub fn process(&mut self, event: ServerEvent) {
        let origin = event.connection_id().cloned();
        self.isolate(origin, |relay| relay.handle_event(event));
    }

    fn isolate<F>(&mut self, origin: Option<PlayerId>, handler: F)
    where
        F: FnOnce(&mut Self),
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(self)));
        if outcome.is_err() {
            if let Some(id) = origin {
                error!("Handler for {} panicked, dropping connection", id);
                self.drop_connection(&id);
            }
        }
    }

    /// Pings every connection and drops the ones that went silent.
    pub fn heartbeat(&mut self) {
        for id in self.clients.check_timeouts(self.client_timeout) {
            let outbound = self.router.disconnect(&id);
            self.dispatch(outbound);
        }
        self.clients.ping_all();
        self.drop_stalled();
    }

    /// Forgets a connection and announces the departure if it had a player.
    pub fn drop_connection(&mut self, id: &PlayerId) {
        self.clients.remove_client(id);
        let outbound = self.router.disconnect(id);
        self.dispatch(outbound);
    }

    pub fn shutdown(&mut self) {
        self.clients.clear();
    }

    fn dispatch(&mut self, outbound: Vec<Outbound>) {
        for item in &outbound {
            self.clients.deliver(item);
        }
        self.drop_stalled();
    }

    /// Disconnects every client whose outbound queue overflowed. Each
    /// departure is itself broadcast, which may stall further clients.
    fn drop_stalled(&mut self) {
        while let Some(id) = self.clients.take_stalled() {
            warn!("Client {} is not draining its queue, disconnecting", id);
            self.clients.remove_client(&id);
            for item in &self.router.disconnect(&id) {
                self.clients.deliver(item);
            }
        }
    }

    fn reject(client: Client, reason: &str) {
        let message = ServerMessage::Rejected {
            reason: reason.to_string(),
        };
        match codec::encode(&message, client.encoding) {
            Ok(frame) => {
                let _ = client.push(frame);
            }
            Err(e) => error!("Failed to encode rejection for {}: {}", client.addr, e),
        }
    }
}

/// Main server coordinating the transport and the relay state
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    relay: Relay,
    event_tx: mpsc::Sender<ServerEvent>,
    event_rx: mpsc::Receiver<ServerEvent>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let relay = Relay::new(&config, event_tx.clone());

        Ok(Server {
            listener,
            config,
            relay,
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Channel into the main loop; send [`ServerEvent::Shutdown`] to stop it.
    pub fn event_sender(&self) -> mpsc::Sender<ServerEvent> {
        self.event_tx.clone()
    }

    /// Spawns the task that accepts sockets and starts a session for each
    fn spawn_acceptor(
        listener: TcpListener,
        events: mpsc::Sender<ServerEvent>,
        outbound_queue: usize,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ids = IdGenerator::new();

            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let id = ids.next_id();
                        let events = events.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, addr, id, events, outbound_queue).await
                            {
                                warn!("Connection from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Main server loop; returns once a shutdown event arrives
    pub async fn run(self) -> Result<(), ServerError> {
        let Server {
            listener,
            config,
            mut relay,
            event_tx,
            mut event_rx,
        } = self;

        let acceptor = Self::spawn_acceptor(listener, event_tx, config.outbound_queue);

        let mut heartbeat = interval(config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately
        heartbeat.tick().await;

        info!("Server started successfully");

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(ServerEvent::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                        Some(event) => relay.process(event),
                    }
                },

                _ = heartbeat.tick() => {
                    relay.heartbeat();
                    debug!("Heartbeat: {} clients", relay.clients().len());
                },
            }
        }

        acceptor.abort();
        relay.shutdown();
        Ok(())
    }
}

/// Per-connection session: handshake, writer task, then the read loop.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    id: PlayerId,
    events: mpsc::Sender<ServerEvent>,
    outbound_queue: usize,
) -> Result<(), ServerError> {
    let ws_stream = accept_async(stream).await?;

    let (mut sink, mut source) = ws_stream.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<Message>(outbound_queue);

    if events
        .send(ServerEvent::Connected {
            id: id.clone(),
            addr,
            sender: frame_tx,
        })
        .await
        .is_err()
    {
        return Ok(());
    }

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if sink.send(frame).await.is_err() {
                return;
            }
        }
        // Channel closed by the server: finish with a close handshake
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            frame = source.next() => {
                let event = match frame {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Connection {} read error: {}", id, e);
                        break;
                    }
                    Some(Ok(frame)) => match codec::decode(&frame) {
                        Ok(Some((message, encoding))) => ServerEvent::MessageReceived {
                            id: id.clone(),
                            message,
                            encoding,
                        },
                        Ok(None) => ServerEvent::Activity { id: id.clone() },
                        Err(e) => {
                            warn!("Rejected frame from {}: {}", id, e);
                            continue;
                        }
                    },
                };
                if events.send(event).await.is_err() {
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    writer.abort();
    let _ = events.send(ServerEvent::Disconnected { id }).await;
    Ok(())
}
