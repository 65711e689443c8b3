//! Game Logic
//!
//! The deterministic half of the crate: world model, behaviours, the
//! authoritative simulation and its replica counterpart. Iteration always
//! runs in ascending entity-id order and nothing here reads the clock, so
//! identical inputs give identical outcomes on every host.
//!
//! - `map`: grid, cells, default arena
//! - `entity`: entity records, player state, abilities
//! - `behaviour`: pluggable per-tick strategies (ghost pursuit)
//! - `world`: entity registry and movement arbitration
//! - `events`: the event vocabulary observers and replicas consume
//! - `game`: the per-game wrapper owning world, settings, bus
//! - `sim`: authoritative tick engine
//! - `replica`: applies remote events to a world mirror
//! - `hash`: state digests for verification

pub mod behaviour;
pub mod entity;
pub mod events;
#[allow(clippy::module_inception)]
pub mod game;
pub mod hash;
pub mod map;
pub mod replica;
pub mod sim;
pub mod world;

pub use entity::{AbilityKind, Entity, EntityId, EntityKind, PlayerState};
pub use events::{GameEvent, GameOutcome};
pub use game::{Game, GameSettings, GameType};
pub use map::{Cell, CellState, Map, Position};
pub use replica::Replica;
pub use sim::{Command, Simulation};
pub use world::{World, WorldSnapshot};
