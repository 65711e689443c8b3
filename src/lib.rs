//! # Pellet Rush
//!
//! Tick-driven multiplayer arena game: players race to eat the maze's food
//! pellets while AI ghosts hunt them down. This crate is the game's core,
//! the authoritative simulation plus the connection/replication layer, and
//! is fully drivable headless; rendering, audio and menus live in the UI
//! collaborator, which only calls the simulation API and subscribes to the
//! event bus.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        PELLET RUSH                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  event.rs        - Synchronous typed pub/sub bus            │
//! │                                                             │
//! │  game/           - Game logic (deterministic)               │
//! │  ├── map.rs      - Grid, cells, default arena               │
//! │  ├── entity.rs   - Players, ghosts, abilities               │
//! │  ├── behaviour.rs- Pluggable per-tick strategies            │
//! │  ├── world.rs    - Entity registry, movement arbitration    │
//! │  ├── sim.rs      - Authoritative tick engine                │
//! │  ├── replica.rs  - Applies remote events to a mirror        │
//! │  └── hash.rs     - State digests for verification           │
//! │                                                             │
//! │  network/        - Networking (non-deterministic)           │
//! │  ├── channel.rs  - Ordered duplex WebSocket link            │
//! │  ├── server.rs   - Connection manager                       │
//! │  ├── client.rs   - Outbound connection                      │
//! │  └── protocol.rs - Message types                            │
//! │                                                             │
//! │  session/        - Host and replica coordinators            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority model
//!
//! A game is either **authoritative** (a [`game::Simulation`] owns it and
//! `step()` is the only way state changes; a server relays every event to
//! its clients) or a **replica** (a [`game::Replica`] applies the received
//! event stream to a world mirror, never computing state locally). The
//! mode is fixed when the game is created. Identical inputs produce
//! identical outcomes: the simulation iterates entities in ascending-id
//! order and never reads the clock.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod event;
pub mod game;
pub mod network;
pub mod session;

pub use event::{EventBus, Subscription};
pub use game::{
    Game, GameEvent, GameOutcome, GameSettings, GameType, Map, Position, Replica, Simulation,
    World,
};
pub use network::{Channel, ChannelEvent, ClientChannel, ConnectionManager, ServerChannel};
pub use session::{HostConfig, HostSession, Lobby, ReplicaSession};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default simulation tick interval in milliseconds.
pub const TICK_INTERVAL_MS: u64 = 250;

/// Well-known server port.
pub const DEFAULT_PORT: u16 = 8091;
