//! Game Wrapper
//!
//! A `Game` binds a world to an immutable settings snapshot, an authority
//! tag, an ended flag that transitions exactly once, and its own event bus.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::event::EventBus;
use crate::game::entity::EntityId;
use crate::game::events::{GameEvent, GameOutcome};
use crate::game::world::World;

/// Which authority model a game runs under. Fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    /// Local authority, no networking.
    SinglePlayer,
    /// Remote replica: state changes arrive as events, never computed here.
    MultiplayerClient,
    /// Local authority relayed to connected clients.
    MultiplayerServer,
}

/// Immutable per-game settings, agreed in the lobby.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameSettings {
    /// How many ghosts the server spawns.
    pub ghost_count: u8,
    /// Ghost pace in ticks per move.
    pub ghost_pace: u32,
    /// Simulation tick interval in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            ghost_count: 3,
            ghost_pace: 4,
            tick_interval_ms: crate::TICK_INTERVAL_MS,
        }
    }
}

/// A running (or finished) game.
pub struct Game {
    world: World,
    settings: GameSettings,
    game_type: GameType,
    local_player: Option<EntityId>,
    tick: u64,
    ended: bool,
    outcome: Option<GameOutcome>,
    events: Arc<EventBus<GameEvent>>,
}

impl Game {
    /// Create a game over a prepared world. `local_player` is the locally
    /// controlled entity, absent on a pure server.
    pub fn new(
        world: World,
        settings: GameSettings,
        game_type: GameType,
        local_player: Option<EntityId>,
    ) -> Self {
        Self {
            world,
            settings,
            game_type,
            local_player,
            tick: 0,
            ended: false,
            outcome: None,
            events: Arc::new(EventBus::new()),
        }
    }

    /// The world.
    pub fn world(&self) -> &World {
        &self.world
    }

    pub(crate) fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// The settings snapshot.
    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    /// The authority tag.
    pub fn game_type(&self) -> GameType {
        self.game_type
    }

    /// The locally controlled player, if any.
    pub fn local_player(&self) -> Option<EntityId> {
        self.local_player
    }

    /// This game's event bus.
    pub fn events(&self) -> &Arc<EventBus<GameEvent>> {
        &self.events
    }

    /// Ticks completed so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub(crate) fn advance_tick(&mut self) {
        self.tick += 1;
    }

    pub(crate) fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    /// Whether the game has ended.
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// The outcome once ended.
    pub fn outcome(&self) -> Option<&GameOutcome> {
        self.outcome.as_ref()
    }

    /// Transition to ended. Returns true only on the first call; the flag
    /// never resets, which is what makes "game ended" idempotent no matter
    /// how many checks trigger in one tick.
    pub(crate) fn set_ended(&mut self, outcome: GameOutcome) -> bool {
        if self.ended {
            return false;
        }
        self.ended = true;
        self.outcome = Some(outcome);
        true
    }
}
