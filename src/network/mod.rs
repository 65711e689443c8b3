//! Network Layer
//!
//! WebSocket transport for multiplayer sessions. This layer is
//! non-deterministic; all game logic lives in `game/` and only ever sees
//! ordered message streams.

pub mod channel;
pub mod client;
pub mod protocol;
pub mod server;

pub use channel::{Channel, ChannelEvent, ClientChannel, ConnectionError, ServerChannel};
pub use protocol::{ClientId, ClientMessage, ServerMessage, WireMessage};
pub use server::{ConnectionManager, ServerConfig, ServerError, ServerEvent};
