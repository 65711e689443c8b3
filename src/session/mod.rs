//! Session Coordination
//!
//! Binds a game to one of its two authority models. [`HostSession`] owns
//! the authoritative [`Simulation`]: a tick interval drives `step()`,
//! inbound client commands are queued into it, and every published game
//! event is relayed to every connected channel. [`ReplicaSession`] is the
//! other side: it never simulates, it applies the received event stream to
//! a world mirror in receipt order and re-publishes locally.
//!
//! Either way the session task is the single writer of game state; channel
//! and manager callbacks only forward into its queue.
//!
//! For single-player, drive a [`Simulation`] directly from the UI timer; no
//! session is involved.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::behaviour::ChaseBehaviour;
use crate::game::entity::{EntityId, EntityKind, PlayerState};
use crate::game::events::GameEvent;
use crate::game::game::{Game, GameSettings, GameType};
use crate::game::map::{Map, Position};
use crate::game::replica::Replica;
use crate::game::sim::{Command, Simulation};
use crate::game::world::World;
use crate::network::channel::{ChannelEvent, ClientChannel, ConnectionError};
use crate::network::client;
use crate::network::protocol::{
    ClientId, ClientMessage, ErrorCode, ErrorInfo, GameStartInfo, ParticipantInfo, ServerMessage,
};
use crate::network::server::{ConnectionManager, ServerError, ServerEvent};

/// Session-level failures.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Channel-level failure.
    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),
    /// Connection-manager failure.
    #[error("server: {0}")]
    Server(#[from] ServerError),
}

/// One lobby member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    /// Display name.
    pub name: String,
    /// Ready to start.
    pub ready: bool,
}

/// Connection-id keyed roster. Lives from hosting start to session end.
#[derive(Clone, Debug, Default)]
pub struct Lobby {
    participants: BTreeMap<ClientId, Participant>,
}

impl Lobby {
    /// Create an empty lobby.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a wire roster.
    pub fn from_infos(infos: Vec<ParticipantInfo>) -> Self {
        let participants = infos
            .into_iter()
            .map(|p| {
                (
                    p.client_id,
                    Participant {
                        name: p.name,
                        ready: p.ready,
                    },
                )
            })
            .collect();
        Self { participants }
    }

    /// Add or rename a participant. New joiners start not ready.
    pub fn join(&mut self, id: ClientId, name: String) {
        self.participants
            .entry(id)
            .and_modify(|p| p.name = name.clone())
            .or_insert(Participant { name, ready: false });
    }

    /// Remove a participant.
    pub fn remove(&mut self, id: ClientId) -> Option<Participant> {
        self.participants.remove(&id)
    }

    /// Set a participant's readiness. Returns whether the id was known.
    pub fn set_ready(&mut self, id: ClientId, ready: bool) -> bool {
        match self.participants.get_mut(&id) {
            Some(p) => {
                p.ready = ready;
                true
            }
            None => false,
        }
    }

    /// Whether the lobby is non-empty and everyone is ready.
    pub fn all_ready(&self) -> bool {
        !self.participants.is_empty() && self.participants.values().all(|p| p.ready)
    }

    /// Number of participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether the lobby is empty.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Iterate in ascending connection-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &Participant)> {
        self.participants.iter()
    }

    /// The wire roster.
    pub fn infos(&self) -> Vec<ParticipantInfo> {
        self.participants
            .iter()
            .map(|(id, p)| ParticipantInfo {
                client_id: *id,
                name: p.name.clone(),
                ready: p.ready,
            })
            .collect()
    }
}

/// Host-side configuration.
#[derive(Clone, Debug)]
pub struct HostConfig {
    /// Settings the game starts under (clients may change them in lobby).
    pub settings: GameSettings,
    /// Minimum participants before readiness can start the game.
    pub min_players: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            settings: GameSettings::default(),
            min_players: 1,
        }
    }
}

enum SessionInput {
    Connected(ClientId),
    Disconnected(ClientId),
    Message(ClientId, ClientMessage),
}

/// The authoritative coordinator: lobby flow, world build, tick loop,
/// event relay.
pub struct HostSession {
    manager: Arc<ConnectionManager>,
    config: HostConfig,
    settings: GameSettings,
    session_id: Uuid,
    lobby: Lobby,
    sim: Option<Simulation>,
    entity_by_client: BTreeMap<ClientId, EntityId>,
}

impl HostSession {
    /// Create a host session over a connection manager.
    pub fn new(manager: Arc<ConnectionManager>, config: HostConfig) -> Self {
        let settings = config.settings.clone();
        Self {
            manager,
            config,
            settings,
            session_id: Uuid::new_v4(),
            lobby: Lobby::new(),
            sim: None,
            entity_by_client: BTreeMap::new(),
        }
    }

    /// The session identifier.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The running game, once started.
    pub fn game(&self) -> Option<&Game> {
        self.sim.as_ref().map(Simulation::game)
    }

    /// Start listening and run the session to completion: lobby phase,
    /// then the tick loop until the game ends or the manager stops.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let (input_tx, mut input_rx) = mpsc::unbounded_channel();
        {
            let tx = input_tx.clone();
            self.manager.events().subscribe(move |event: &ServerEvent| {
                let forwarded = match *event {
                    ServerEvent::ClientConnected(id) => SessionInput::Connected(id),
                    ServerEvent::ClientDisconnected(id) => SessionInput::Disconnected(id),
                };
                let _ = tx.send(forwarded);
            });
        }
        let addr = Arc::clone(&self.manager).start().await?;
        info!("session {} hosting on {addr}", self.session_id);

        let mut ticker = session_interval(self.settings.tick_interval_ms);
        loop {
            tokio::select! {
                Some(input) = input_rx.recv() => {
                    let interval_before = self.settings.tick_interval_ms;
                    self.handle_input(input, &input_tx);
                    if self.settings.tick_interval_ms != interval_before {
                        ticker = session_interval(self.settings.tick_interval_ms);
                    }
                }
                _ = ticker.tick() => {
                    if self.on_tick() {
                        break;
                    }
                }
            }
        }

        info!("session {} over", self.session_id);
        self.manager.stop();
        Ok(())
    }

    /// Advance the game one tick. Returns true once the session is done.
    fn on_tick(&mut self) -> bool {
        match self.sim.as_mut() {
            Some(sim) if sim.game().has_ended() => true,
            Some(sim) => {
                sim.step();
                false
            }
            None => false,
        }
    }

    fn handle_input(&mut self, input: SessionInput, input_tx: &mpsc::UnboundedSender<SessionInput>) {
        match input {
            SessionInput::Connected(id) => self.on_connected(id, input_tx),
            SessionInput::Disconnected(id) => self.on_disconnected(id),
            SessionInput::Message(id, message) => self.on_message(id, message),
        }
    }

    fn on_connected(&mut self, id: ClientId, input_tx: &mpsc::UnboundedSender<SessionInput>) {
        let Ok(channel) = self.manager.client(id) else {
            // Already gone again; the disconnect input will follow.
            return;
        };
        let tx = input_tx.clone();
        channel.subscribe(move |event: &ChannelEvent<ClientMessage>| {
            if let ChannelEvent::Message(message) = event {
                let _ = tx.send(SessionInput::Message(id, message.clone()));
            }
        });

        let _ = channel.send(&ServerMessage::Welcome {
            client_id: id,
            server_version: crate::VERSION.to_string(),
        });
        let _ = channel.send(&ServerMessage::LobbyState {
            participants: self.lobby.infos(),
        });
        channel.open();
    }

    fn on_disconnected(&mut self, id: ClientId) {
        if self.lobby.remove(id).is_some() {
            self.manager
                .broadcast(&ServerMessage::PlayerLeft { client_id: id });
        }
        if let Some(entity) = self.entity_by_client.remove(&id) {
            if let Some(sim) = self.sim.as_mut() {
                sim.queue_command(Command::Despawn {
                    id: entity,
                    reason: "disconnected".to_string(),
                });
            }
        }
    }

    fn on_message(&mut self, id: ClientId, message: ClientMessage) {
        match message {
            ClientMessage::Join { name } => {
                if self.sim.is_some() {
                    self.reject(id, ErrorCode::GameInProgress, "game already started");
                    return;
                }
                info!("client {id} joined as {name:?}");
                self.lobby.join(id, name.clone());
                self.manager
                    .broadcast(&ServerMessage::PlayerJoined { client_id: id, name });
            }
            ClientMessage::SetReady { ready } => {
                if self.sim.is_some() {
                    return;
                }
                if self.lobby.set_ready(id, ready) {
                    self.manager
                        .broadcast(&ServerMessage::ReadyChanged { client_id: id, ready });
                    if self.lobby.len() >= self.config.min_players && self.lobby.all_ready() {
                        self.start_game();
                    }
                }
            }
            ClientMessage::ChangeSettings(settings) => {
                if self.sim.is_some() {
                    self.reject(id, ErrorCode::GameInProgress, "game already started");
                    return;
                }
                info!("client {id} changed settings: {settings:?}");
                self.settings = settings.clone();
                self.manager
                    .broadcast(&ServerMessage::SettingsChanged(settings));
            }
            ClientMessage::Move { position, angle } => {
                let (Some(sim), Some(entity)) =
                    (self.sim.as_mut(), self.entity_by_client.get(&id))
                else {
                    debug!("move from client {id} outside a running game");
                    return;
                };
                sim.queue_command(Command::Move {
                    id: *entity,
                    position,
                    angle,
                });
            }
            ClientMessage::UseAbility { kind } => {
                let (Some(sim), Some(entity)) =
                    (self.sim.as_mut(), self.entity_by_client.get(&id))
                else {
                    debug!("ability from client {id} outside a running game");
                    return;
                };
                sim.queue_command(Command::UseAbility { id: *entity, kind });
            }
            ClientMessage::Ping { timestamp } => {
                if let Ok(channel) = self.manager.client(id) {
                    let _ = channel.send(&ServerMessage::Pong { timestamp });
                }
            }
            ClientMessage::Leave => {
                if self.lobby.remove(id).is_some() {
                    self.manager
                        .broadcast(&ServerMessage::PlayerLeft { client_id: id });
                }
                if let Some(entity) = self.entity_by_client.remove(&id) {
                    if let Some(sim) = self.sim.as_mut() {
                        sim.queue_command(Command::Despawn {
                            id: entity,
                            reason: "left the game".to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Build the world, bind the engine, relay its events, and tell every
    /// participant the game is on.
    fn start_game(&mut self) {
        let settings = self.settings.clone();
        let mut world = World::new(Map::generate_default());

        let ghost_spawns = Map::default_ghost_spawns();
        for i in 0..settings.ghost_count as usize {
            world.add_entity(
                EntityKind::Ghost,
                ghost_spawns[i % ghost_spawns.len()],
                Some(Box::new(ChaseBehaviour::new(settings.ghost_pace))),
            );
        }

        let player_spawns = Map::default_player_spawns();
        let mut entity_by_client = BTreeMap::new();
        for (i, (client_id, participant)) in self.lobby.iter().enumerate() {
            let entity = world.add_entity(
                EntityKind::Player(PlayerState::new(participant.name.clone())),
                player_spawns[i % player_spawns.len()],
                None,
            );
            entity_by_client.insert(*client_id, entity);
        }

        let snapshot = world.snapshot();
        let game = Game::new(world, settings.clone(), GameType::MultiplayerServer, None);

        // Relay every simulation event to every connected channel, in
        // publish order.
        {
            let manager = Arc::clone(&self.manager);
            game.events().subscribe(move |event: &GameEvent| {
                manager.broadcast(&ServerMessage::Event(event.clone()));
            });
        }

        for (client_id, entity) in &entity_by_client {
            if let Ok(channel) = self.manager.client(*client_id) {
                let _ = channel.send(&ServerMessage::GameStart(GameStartInfo {
                    session_id: self.session_id,
                    world: snapshot.clone(),
                    your_entity: *entity,
                    settings: settings.clone(),
                }));
            }
        }

        info!(
            "session {} started with {} players, {} ghosts",
            self.session_id,
            entity_by_client.len(),
            settings.ghost_count
        );
        self.entity_by_client = entity_by_client;
        self.sim = Some(Simulation::new(game));
    }

    fn reject(&self, id: ClientId, code: ErrorCode, message: &str) {
        if let Ok(channel) = self.manager.client(id) {
            let _ = channel.send(&ServerMessage::Error(ErrorInfo {
                code,
                message: message.to_string(),
            }));
        }
    }
}

fn session_interval(ms: u64) -> Interval {
    let mut ticker = interval(Duration::from_millis(ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// The replica coordinator: joins a server, restores the world snapshot at
/// game start, and applies the event stream in receipt order.
pub struct ReplicaSession {
    channel: ClientChannel,
    name: String,
    client_id: Option<ClientId>,
    lobby: Lobby,
    settings: GameSettings,
    replica: Option<Replica>,
}

impl ReplicaSession {
    /// Connect to a host at `host:port`.
    pub async fn connect(addr: &str, name: impl Into<String>) -> Result<Self, SessionError> {
        let channel = client::connect(addr).await?;
        Ok(Self {
            channel,
            name: name.into(),
            client_id: None,
            lobby: Lobby::new(),
            settings: GameSettings::default(),
            replica: None,
        })
    }

    /// The connection to the server.
    pub fn channel(&self) -> &ClientChannel {
        &self.channel
    }

    /// Our server-assigned connection id, after the welcome.
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    /// The lobby roster as last heard.
    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    /// The mirrored game, once started.
    pub fn game(&self) -> Option<&Game> {
        self.replica.as_ref().map(Replica::game)
    }

    /// The entity this client controls, once the game started.
    pub fn local_entity(&self) -> Option<EntityId> {
        self.game().and_then(Game::local_player)
    }

    /// Announce ourselves to the lobby.
    pub fn join(&self) -> Result<(), ConnectionError> {
        self.channel.send(&ClientMessage::Join {
            name: self.name.clone(),
        })
    }

    /// Toggle readiness.
    pub fn set_ready(&self, ready: bool) -> Result<(), ConnectionError> {
        self.channel.send(&ClientMessage::SetReady { ready })
    }

    /// Send a movement command for the controlled player.
    pub fn send_move(&self, position: Position, angle: f64) -> Result<(), ConnectionError> {
        self.channel.send(&ClientMessage::Move { position, angle })
    }

    /// Fire an ability on the controlled player.
    pub fn use_ability(&self, kind: crate::game::entity::AbilityKind) -> Result<(), ConnectionError> {
        self.channel.send(&ClientMessage::UseAbility { kind })
    }

    /// Apply one server message. Must be called in receipt order; `run`
    /// does so automatically.
    pub fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome {
                client_id,
                server_version,
            } => {
                debug!("welcome from server {server_version}, we are client {client_id}");
                self.client_id = Some(client_id);
            }
            ServerMessage::LobbyState { participants } => {
                self.lobby = Lobby::from_infos(participants);
            }
            ServerMessage::PlayerJoined { client_id, name } => {
                self.lobby.join(client_id, name);
            }
            ServerMessage::PlayerLeft { client_id } => {
                self.lobby.remove(client_id);
            }
            ServerMessage::ReadyChanged { client_id, ready } => {
                self.lobby.set_ready(client_id, ready);
            }
            ServerMessage::SettingsChanged(settings) => {
                self.settings = settings;
            }
            ServerMessage::GameStart(info) => {
                info!(
                    "game {} starting, controlling entity {}",
                    info.session_id, info.your_entity
                );
                let world = World::from_snapshot(&info.world);
                self.settings = info.settings.clone();
                let game = Game::new(
                    world,
                    info.settings,
                    GameType::MultiplayerClient,
                    Some(info.your_entity),
                );
                self.replica = Some(Replica::new(game));
            }
            ServerMessage::Event(event) => match self.replica.as_mut() {
                Some(replica) => replica.apply(event),
                None => warn!("event before game start, dropping"),
            },
            ServerMessage::Pong { .. } => {}
            ServerMessage::Error(info) => {
                warn!("server rejected a request: {:?}: {}", info.code, info.message);
            }
            ServerMessage::Shutdown { reason } => {
                info!("server shutting down: {reason}");
                self.channel.close();
            }
        }
    }

    /// Drive the session: apply server messages in receipt order until the
    /// connection goes away. Join and ready-up first via [`Self::join`] and
    /// [`Self::set_ready`]; messages that arrived in the meantime are
    /// buffered and replayed in order.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.channel
            .subscribe(move |event: &ChannelEvent<ServerMessage>| {
                let _ = tx.send(event.clone());
            });
        self.channel.open();

        while let Some(event) = rx.recv().await {
            match event {
                ChannelEvent::Message(message) => self.handle_message(message),
                ChannelEvent::Disconnected => {
                    info!("disconnected from server");
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::game::events::GameOutcome;
    use crate::network::server::ServerConfig;

    const WAIT: Duration = Duration::from_secs(10);

    #[test]
    fn lobby_roster_round_trip() {
        let mut lobby = Lobby::new();
        lobby.join(3, "ada".into());
        lobby.join(5, "bob".into());
        lobby.set_ready(3, true);

        let rebuilt = Lobby::from_infos(lobby.infos());
        assert_eq!(rebuilt.len(), 2);
        assert!(!rebuilt.all_ready());

        assert!(rebuilt.iter().any(|(id, p)| *id == 3 && p.ready));
    }

    #[test]
    fn lobby_all_ready_requires_members() {
        let mut lobby = Lobby::new();
        assert!(!lobby.all_ready());

        lobby.join(1, "ada".into());
        assert!(!lobby.all_ready());
        lobby.set_ready(1, true);
        assert!(lobby.all_ready());

        assert!(!lobby.set_ready(9, true), "unknown ids are reported");
    }

    fn test_manager() -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }))
    }

    /// Full round trip: a client joins, readies up, the host starts the
    /// game, relays events, ghosts eat the idle player, and the replica
    /// ends with the authoritative outcome.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn replica_follows_a_hosted_game_to_its_end() {
        let manager = test_manager();
        let config = HostConfig {
            settings: GameSettings {
                ghost_count: 3,
                ghost_pace: 1,
                tick_interval_ms: 5,
            },
            min_players: 1,
        };
        let session = HostSession::new(Arc::clone(&manager), config);

        let host = tokio::spawn(session.run());

        // Wait for the listener to come up.
        let addr = {
            let mut addr = manager.local_addr();
            for _ in 0..100 {
                if addr.is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                addr = manager.local_addr();
            }
            addr.expect("manager did not start")
        };

        let mut replica = ReplicaSession::connect(&addr.to_string(), "ada")
            .await
            .unwrap();
        replica.join().unwrap();
        replica.set_ready(true).unwrap();

        // The idle player gets eaten; the session then stops the manager,
        // which disconnects us and ends run().
        timeout(WAIT, replica.run()).await.unwrap().unwrap();

        let game = replica.game().expect("game never started");
        assert!(game.has_ended());
        assert_eq!(game.outcome(), Some(&GameOutcome::GhostsWon));
        assert_eq!(game.world().player_count(), 0);
        assert!(replica.local_entity().is_some());

        timeout(WAIT, host).await.unwrap().unwrap().unwrap();
    }
}
