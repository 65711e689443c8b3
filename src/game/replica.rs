//! Replica Engine
//!
//! The client-side counterpart of `sim`: it never computes state locally.
//! Events received from the authoritative side are applied to the world
//! mirror in receipt order, without reordering or coalescing, and then
//! re-published verbatim on the local bus so local observers react exactly
//! as the authoritative side's observers did.

use std::sync::Arc;

use tracing::warn;

use crate::event::EventBus;
use crate::game::events::GameEvent;
use crate::game::game::{Game, GameType};

/// The replica engine bound to one mirrored game.
pub struct Replica {
    game: Game,
    events: Arc<EventBus<GameEvent>>,
}

impl Replica {
    /// Bind the engine to a mirrored game.
    ///
    /// # Panics
    ///
    /// Panics unless the game is tagged [`GameType::MultiplayerClient`];
    /// applying remote events to an authoritative game would fork its
    /// state.
    pub fn new(game: Game) -> Self {
        assert!(
            game.game_type() == GameType::MultiplayerClient,
            "replica engine bound to an authoritative game"
        );
        let events = Arc::clone(game.events());
        Self { game, events }
    }

    /// The mirrored game.
    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Apply one authoritative event to the mirror, then re-publish it
    /// locally. Must be called in receipt order.
    pub fn apply(&mut self, event: GameEvent) {
        match &event {
            GameEvent::CellChanged { position, state } => {
                self.game.world_mut().map_mut().set_state(*position, *state);
            }
            GameEvent::DotEaten {
                id, dots_eaten, ..
            } => {
                match self
                    .game
                    .world_mut()
                    .entity_mut(*id)
                    .and_then(|e| e.as_player_mut())
                {
                    Some(player) => player.dots_eaten = *dots_eaten,
                    None => warn!("dot eaten for unknown player {id}"),
                }
            }
            GameEvent::EntityMoved {
                id,
                position,
                angle,
            } => {
                if !self.game.world_mut().apply_position(*id, *position) {
                    warn!("move for unknown entity {id}");
                }
                if let Some(player) = self
                    .game
                    .world_mut()
                    .entity_mut(*id)
                    .and_then(|e| e.as_player_mut())
                {
                    player.angle = *angle;
                }
            }
            GameEvent::EntityRemoved { id, reason } => {
                if let Some(player) = self
                    .game
                    .world_mut()
                    .entity_mut(*id)
                    .and_then(|e| e.as_player_mut())
                {
                    player.death_reason = reason.clone();
                }
                if self.game.world_mut().remove_entity(*id).is_none() {
                    warn!("removal for unknown entity {id}");
                }
            }
            GameEvent::AbilityUsed { id, kind } => {
                if *kind == crate::game::entity::AbilityKind::Shield {
                    if let Some(player) = self
                        .game
                        .world_mut()
                        .entity_mut(*id)
                        .and_then(|e| e.as_player_mut())
                    {
                        player.shielded = true;
                    }
                }
            }
            GameEvent::ShieldAbsorbed { id } => {
                if let Some(player) = self
                    .game
                    .world_mut()
                    .entity_mut(*id)
                    .and_then(|e| e.as_player_mut())
                {
                    player.shielded = false;
                }
            }
            GameEvent::WorldInvalidated { tick } => {
                self.game.set_tick(*tick);
            }
            GameEvent::GameEnded { outcome } => {
                self.game.set_ended(outcome.clone());
            }
        }

        self.events.publish(&event);
    }
}
