//! Connection Manager
//!
//! Owns the listening endpoint. Every accepted connection gets the next
//! integer client id (never reused within one manager's lifetime), a
//! [`ServerChannel`], and a registry entry; connect and disconnect surface
//! as events on the manager's bus. Shutdown is cooperative: a broadcast
//! signal unblocks the accept loop instead of leaving it parked, and a
//! second `stop` is a no-op.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};

use crate::event::EventBus;
use crate::network::channel::{ChannelEvent, ServerChannel};
use crate::network::protocol::{ClientId, ServerMessage};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], crate::DEFAULT_PORT)),
            max_connections: 64,
        }
    }
}

/// Connection manager errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listening endpoint.
    #[error("bind failed: {0}")]
    Bind(#[from] std::io::Error),
    /// No live connection with that id.
    #[error("no client with id {0}")]
    NotFound(ClientId),
    /// The manager was already stopped.
    #[error("manager already stopped")]
    Stopped,
}

/// Connection lifecycle notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    /// A connection completed its handshake and was registered.
    ClientConnected(ClientId),
    /// A connection went away and was unregistered.
    ClientDisconnected(ClientId),
}

type Registry = Arc<RwLock<BTreeMap<ClientId, ServerChannel>>>;

/// Accepts connections and owns their channels.
pub struct ConnectionManager {
    config: ServerConfig,
    clients: Registry,
    next_client_id: AtomicU32,
    events: Arc<EventBus<ServerEvent>>,
    shutdown_tx: broadcast::Sender<()>,
    stopped: AtomicBool,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl ConnectionManager {
    /// Create a manager; call [`ConnectionManager::start`] to listen.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            next_client_id: AtomicU32::new(0),
            events: Arc::new(EventBus::new()),
            shutdown_tx,
            stopped: AtomicBool::new(false),
            local_addr: RwLock::new(None),
        }
    }

    /// Bind the listening endpoint and spawn the accept loop. Returns the
    /// bound address (useful with an ephemeral port).
    pub async fn start(self: Arc<Self>) -> Result<SocketAddr, ServerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ServerError::Stopped);
        }
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.write().expect("local addr lock poisoned") = Some(addr);
        info!("listening on {addr}");

        tokio::spawn(async move { self.accept_loop(listener).await });
        Ok(addr)
    }

    async fn accept_loop(&self, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        if self.connection_count() >= self.config.max_connections {
                            warn!("connection limit reached, rejecting {addr}");
                            continue;
                        }
                        self.handle_connection(stream, addr);
                    }
                    Err(e) => {
                        // One failed accept must not take the listener down.
                        error!("accept error: {e}");
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("accept loop shutting down");
                    break;
                }
            }
        }
        // Dropping the listener here closes the endpoint.
    }

    /// Handshake and register one inbound connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = Arc::clone(&self.clients);
        let events = Arc::clone(&self.events);
        let id = self.next_client_id.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("handshake failed for {addr}: {e}");
                    return;
                }
            };
            info!("client {id} connected from {addr}");

            let channel = ServerChannel::spawn(ws);
            clients
                .write()
                .expect("registry lock poisoned")
                .insert(id, channel.clone());

            // Unregister on the channel's one disconnect notification. The
            // registry removal is the idempotence pivot: whoever removes
            // the entry publishes the event.
            {
                let clients = Arc::clone(&clients);
                let events = Arc::clone(&events);
                channel.subscribe(move |event: &ChannelEvent<_>| {
                    if matches!(event, ChannelEvent::Disconnected) {
                        unregister(&clients, &events, id);
                    }
                });
            }
            events.publish(&ServerEvent::ClientConnected(id));

            // The channel may have died between spawn and subscribe; sweep
            // so the registry cannot hold a dead entry forever.
            if channel.is_closed() {
                unregister(&clients, &events, id);
            }
        });
    }

    /// The channel for a live connection, or `NotFound` once it is absent
    /// or disconnected.
    pub fn client(&self, id: ClientId) -> Result<ServerChannel, ServerError> {
        self.clients
            .read()
            .expect("registry lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(ServerError::NotFound(id))
    }

    /// Ids of all live connections, ascending.
    pub fn connected_clients(&self) -> Vec<ClientId> {
        self.clients
            .read()
            .expect("registry lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.clients.read().expect("registry lock poisoned").len()
    }

    /// This manager's event bus.
    pub fn events(&self) -> &Arc<EventBus<ServerEvent>> {
        &self.events
    }

    /// The bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().expect("local addr lock poisoned")
    }

    /// Send a message to every live connection. One connection's failure
    /// never disturbs the others.
    pub fn broadcast(&self, message: &ServerMessage) {
        let channels: Vec<(ClientId, ServerChannel)> = {
            let clients = self.clients.read().expect("registry lock poisoned");
            clients.iter().map(|(id, ch)| (*id, ch.clone())).collect()
        };
        for (id, channel) in channels {
            if let Err(e) = channel.send(message) {
                debug!("broadcast to client {id} failed: {e}");
            }
        }
    }

    /// Stop the manager: unblock the accept loop, close the endpoint and
    /// every live channel. Idempotent; a second call does nothing.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping connection manager");
        let _ = self.shutdown_tx.send(());

        let channels: Vec<ServerChannel> = {
            let clients = self.clients.read().expect("registry lock poisoned");
            clients.values().cloned().collect()
        };
        for channel in channels {
            channel.close();
        }
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Remove a connection from the registry; only the caller that actually
/// removed the entry publishes the disconnect, so the event fires once.
fn unregister(clients: &Registry, events: &Arc<EventBus<ServerEvent>>, id: ClientId) {
    let removed = clients
        .write()
        .expect("registry lock poisoned")
        .remove(&id)
        .is_some();
    if removed {
        info!("client {id} disconnected");
        events.publish(&ServerEvent::ClientDisconnected(id));
    }
}
