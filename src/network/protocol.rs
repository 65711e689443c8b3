//! Protocol Messages
//!
//! Wire format for client/server communication over WebSocket. Messages
//! travel as JSON text frames for debugging ease, with binary (bincode)
//! helpers for production. Ordering comes from the underlying stream; the
//! payload enums below carry the semantics.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::game::entity::{AbilityKind, EntityId};
use crate::game::events::GameEvent;
use crate::game::game::GameSettings;
use crate::game::map::Position;
use crate::game::world::WorldSnapshot;

/// Server-local connection identifier. Monotonic, never reused within one
/// manager's lifetime; not globally unique.
pub type ClientId = u32;

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the lobby under a display name.
    Join {
        /// Display name.
        name: String,
    },
    /// Toggle readiness in the lobby.
    SetReady {
        /// New readiness.
        ready: bool,
    },
    /// Propose new game settings while in the lobby.
    ChangeSettings(GameSettings),
    /// Move the controlled player.
    Move {
        /// Target cell.
        position: Position,
        /// New facing angle in degrees.
        angle: f64,
    },
    /// Fire an ability.
    UseAbility {
        /// Which ability.
        kind: AbilityKind,
    },
    /// Latency probe.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
    /// Leave the session.
    Leave,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message after connecting.
    Welcome {
        /// The connection's server-local id.
        client_id: ClientId,
        /// Server version string.
        server_version: String,
    },
    /// Full lobby roster, sent on join.
    LobbyState {
        /// Everyone currently in the lobby.
        participants: Vec<ParticipantInfo>,
    },
    /// A participant joined the lobby.
    PlayerJoined {
        /// Their connection id.
        client_id: ClientId,
        /// Their display name.
        name: String,
    },
    /// A participant left the lobby.
    PlayerLeft {
        /// Their connection id.
        client_id: ClientId,
    },
    /// A participant's readiness changed.
    ReadyChanged {
        /// Their connection id.
        client_id: ClientId,
        /// New readiness.
        ready: bool,
    },
    /// The host accepted new game settings.
    SettingsChanged(GameSettings),
    /// The game is starting; carries the full world snapshot.
    GameStart(GameStartInfo),
    /// One relayed simulation event.
    Event(GameEvent),
    /// Latency probe reply.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
    },
    /// A request was rejected.
    Error(ErrorInfo),
    /// The server is going away.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// One lobby roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// Connection id.
    pub client_id: ClientId,
    /// Display name.
    pub name: String,
    /// Readiness.
    pub ready: bool,
}

/// Everything a client needs to build its world mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStartInfo {
    /// Session identifier.
    pub session_id: Uuid,
    /// The world at tick zero.
    pub world: WorldSnapshot,
    /// The entity this client controls.
    pub your_entity: EntityId,
    /// The settings the game runs under.
    pub settings: GameSettings,
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The message could not be parsed or made no sense here.
    InvalidMessage,
    /// Lobby-phase message after the game started.
    GameInProgress,
    /// Game-phase message before the game started.
    NotStarted,
    /// Something went wrong server-side.
    Internal,
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

/// Encoding/decoding failures at the wire boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON encode/decode failure.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// Binary encode/decode failure.
    #[error("binary: {0}")]
    Binary(#[from] bincode::Error),
}

/// JSON and bincode helpers shared by both message directions.
pub trait WireMessage: Serialize + DeserializeOwned + Sized {
    /// Encode as a JSON text frame.
    fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from a JSON text frame.
    fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a binary frame.
    fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from a binary frame.
    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl WireMessage for ClientMessage {}
impl WireMessage for ServerMessage {}
