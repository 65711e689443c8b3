//! Game Events
//!
//! Everything observers need to mirror or render the game. On a server the
//! session relays these verbatim to every connected channel; a replica
//! applies them to its world mirror and re-publishes them locally, so both
//! sides' observers see the identical sequence.

use serde::{Deserialize, Serialize};

use crate::game::entity::{AbilityKind, EntityId};
use crate::game::map::{CellState, Position};

/// How a finished game ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOutcome {
    /// Every player was eaten.
    GhostsWon,
    /// Food ran out with a unique dots-eaten leader.
    PlayerWon {
        /// The winning player's entity id.
        winner: EntityId,
    },
    /// Food ran out with several players tied on dots eaten.
    Tie {
        /// The tied leaders, ascending id.
        winners: Vec<EntityId>,
    },
}

/// A state change published on a Game's event bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEvent {
    /// A cell changed state. Consumed for redraw bookkeeping only.
    CellChanged {
        /// The cell that changed.
        position: Position,
        /// Its new state.
        state: CellState,
    },
    /// A player consumed a food pellet. Published after the cell flip and
    /// before the corresponding move, so observers never see food at the
    /// mover's destination.
    DotEaten {
        /// The eating player.
        id: EntityId,
        /// Where the pellet was.
        position: Position,
        /// The player's new dots-eaten total.
        dots_eaten: u32,
    },
    /// An entity moved or turned in place.
    EntityMoved {
        /// The entity.
        id: EntityId,
        /// Its position after the move.
        position: Position,
        /// Its facing angle in degrees (0 for ghosts).
        angle: f64,
    },
    /// An entity left the world.
    EntityRemoved {
        /// The removed entity.
        id: EntityId,
        /// Death reason, for players.
        reason: Option<String>,
    },
    /// A player fired an ability.
    AbilityUsed {
        /// The player.
        id: EntityId,
        /// Which ability.
        kind: AbilityKind,
    },
    /// A banked shield absorbed a ghost catch.
    ShieldAbsorbed {
        /// The surviving player.
        id: EntityId,
    },
    /// The tick finished; observers should redraw.
    WorldInvalidated {
        /// The tick that just completed.
        tick: u64,
    },
    /// The game ended. Published exactly once per game.
    GameEnded {
        /// The outcome.
        outcome: GameOutcome,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_round_trip_through_json() {
        let events = vec![
            GameEvent::CellChanged {
                position: Position::new(3, 4),
                state: CellState::Empty,
            },
            GameEvent::DotEaten {
                id: 1,
                position: Position::new(3, 4),
                dots_eaten: 9,
            },
            GameEvent::EntityMoved {
                id: 1,
                position: Position::new(3, 4),
                angle: 90.0,
            },
            GameEvent::GameEnded {
                outcome: GameOutcome::Tie { winners: vec![1, 2] },
            },
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: GameEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
        }
    }
}
