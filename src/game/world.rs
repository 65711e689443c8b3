//! World Model
//!
//! The world owns the map and the entity registry. It is pure data with
//! invariants: mutators validate and report outcomes, and the engines
//! (`sim`, `replica`) publish the resulting events. The registry is a
//! `BTreeMap` so every iteration runs in ascending-id order, which keeps
//! tick outcomes reproducible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::game::behaviour::Behaviour;
use crate::game::entity::{Entity, EntityId, EntityKind, PlayerState};
use crate::game::map::{CellState, Map, Position};

/// Successful move details.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Whether the mover consumed a food pellet at the destination.
    pub ate_dot: bool,
    /// The mover's dots-eaten total after the move (0 for ghosts).
    pub dots_eaten: u32,
}

/// Why a move did not happen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    /// Destination is off the grid or an obstacle.
    #[error("destination not occupiable")]
    Blocked,
    /// No entity with that id (it may have been removed this tick).
    #[error("unknown entity")]
    UnknownEntity,
}

/// The game world: map plus entity registry.
pub struct World {
    map: Map,
    entities: BTreeMap<EntityId, Entity>,
    next_entity_id: EntityId,
}

impl World {
    /// Create a world over the given map with no entities.
    pub fn new(map: Map) -> Self {
        Self {
            map,
            entities: BTreeMap::new(),
            next_entity_id: 0,
        }
    }

    /// The map.
    pub fn map(&self) -> &Map {
        &self.map
    }

    /// Mutable map access (redraw-flag clearing, replica application).
    pub fn map_mut(&mut self) -> &mut Map {
        &mut self.map
    }

    /// Whether an entity may occupy the position. The world is the sole
    /// arbiter of occupiability.
    pub fn is_occupiable(&self, pos: Position) -> bool {
        self.map.is_occupiable(pos)
    }

    /// Insert an entity at a spawn position, assigning the next id. Ids are
    /// monotonically increasing and never reused while this world is alive.
    ///
    /// Placement is not a move: food under the spawn cell stays until a
    /// player later steps onto it.
    ///
    /// # Panics
    ///
    /// Panics if the spawn position is not occupiable; spawning into a wall
    /// is a setup bug, not a gameplay rejection.
    pub fn add_entity(
        &mut self,
        kind: EntityKind,
        position: Position,
        behaviour: Option<Box<dyn Behaviour>>,
    ) -> EntityId {
        assert!(
            self.is_occupiable(position),
            "spawn position {position} is not occupiable"
        );
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        self.entities
            .insert(id, Entity::new(id, Some(position), kind, behaviour));
        id
    }

    /// Remove an entity, returning it. `None` if the id is absent.
    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// The entity with the given id.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Mutable entity access.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// All entity ids, ascending.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// All entities in ascending-id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Player entities in ascending-id order.
    pub fn players(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities
            .iter()
            .filter(|(_, e)| e.is_player())
            .map(|(id, e)| (*id, e))
    }

    /// Ghost entities in ascending-id order.
    pub fn ghosts(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities
            .iter()
            .filter(|(_, e)| e.is_ghost())
            .map(|(id, e)| (*id, e))
    }

    /// Number of player entities.
    pub fn player_count(&self) -> usize {
        self.players().count()
    }

    /// Number of ghost entities.
    pub fn ghost_count(&self) -> usize {
        self.ghosts().count()
    }

    /// Move an entity, enforcing occupiability. A player moving onto a food
    /// cell consumes it atomically with the move: the cell flips to empty
    /// and the counter increments before the caller can observe the new
    /// position.
    pub fn move_entity(&mut self, id: EntityId, dest: Position) -> Result<MoveOutcome, MoveError> {
        if !self.map.is_occupiable(dest) {
            // Report before touching the entity so a rejected move leaves
            // the prior position untouched.
            if !self.entities.contains_key(&id) {
                return Err(MoveError::UnknownEntity);
            }
            return Err(MoveError::Blocked);
        }
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(MoveError::UnknownEntity)?;

        let mut outcome = MoveOutcome {
            ate_dot: false,
            dots_eaten: 0,
        };
        if let EntityKind::Player(player) = entity.kind_mut() {
            if self.map.state(dest) == Some(CellState::Food) {
                self.map.set_state(dest, CellState::Empty);
                player.dots_eaten += 1;
                outcome.ate_dot = true;
            }
            outcome.dots_eaten = player.dots_eaten;
        }
        entity.set_position(dest);
        Ok(outcome)
    }

    /// Set a position without arbitration, for replica application of
    /// already-arbitrated authoritative moves. Debug builds still assert
    /// the invariant.
    pub(crate) fn apply_position(&mut self, id: EntityId, pos: Position) -> bool {
        debug_assert!(
            self.is_occupiable(pos),
            "replicated move onto non-occupiable cell {pos}"
        );
        match self.entities.get_mut(&id) {
            Some(entity) => {
                entity.set_position(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn take_behaviour(&mut self, id: EntityId) -> Option<Box<dyn Behaviour>> {
        self.entities.get_mut(&id)?.take_behaviour()
    }

    pub(crate) fn put_behaviour(&mut self, id: EntityId, behaviour: Box<dyn Behaviour>) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.put_behaviour(behaviour);
        }
    }

    /// Capture the replicated world state.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            width: self.map.width(),
            height: self.map.height(),
            cells: self.map.states(),
            entities: self
                .entities
                .values()
                .map(EntitySnapshot::capture)
                .collect(),
            next_entity_id: self.next_entity_id,
        }
    }

    /// Rebuild a world mirror from a snapshot. Restored entities carry no
    /// behaviour; a replica never runs AI locally.
    pub fn from_snapshot(snapshot: &WorldSnapshot) -> Self {
        let map = Map::from_states(snapshot.width, snapshot.height, &snapshot.cells);
        let mut entities = BTreeMap::new();
        for entry in &snapshot.entities {
            entities.insert(entry.id, entry.restore());
        }
        Self {
            map,
            entities,
            next_entity_id: snapshot.next_entity_id,
        }
    }
}

/// Serializable image of one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Entity id.
    pub id: EntityId,
    /// Position, if one was ever set.
    pub position: Option<Position>,
    /// Kind plus replicated per-kind state.
    pub kind: EntityKindSnapshot,
}

/// Serializable image of an entity's kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKindSnapshot {
    /// A player.
    Player {
        /// Display name.
        name: String,
        /// Facing angle in degrees.
        angle: f64,
        /// Pellets eaten.
        dots_eaten: u32,
        /// Whether a shield absorb is banked.
        shielded: bool,
    },
    /// A ghost.
    Ghost,
}

impl EntitySnapshot {
    fn capture(entity: &Entity) -> Self {
        let kind = match entity.kind() {
            EntityKind::Player(p) => EntityKindSnapshot::Player {
                name: p.name.clone(),
                angle: p.angle,
                dots_eaten: p.dots_eaten,
                shielded: p.shielded,
            },
            EntityKind::Ghost => EntityKindSnapshot::Ghost,
        };
        Self {
            id: entity.id(),
            position: entity.position_opt(),
            kind,
        }
    }

    fn restore(&self) -> Entity {
        let kind = match &self.kind {
            EntityKindSnapshot::Player {
                name,
                angle,
                dots_eaten,
                shielded,
            } => {
                let mut player = PlayerState::new(name.clone());
                player.angle = *angle;
                player.dots_eaten = *dots_eaten;
                player.shielded = *shielded;
                EntityKind::Player(player)
            }
            EntityKindSnapshot::Ghost => EntityKind::Ghost,
        };
        Entity::new(self.id, self.position, kind, None)
    }
}

/// Serializable image of the whole world, sent at game start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Map width in columns.
    pub width: u32,
    /// Map height in rows.
    pub height: u32,
    /// Cell states, row-major.
    pub cells: Vec<CellState>,
    /// Entity registry.
    pub entities: Vec<EntitySnapshot>,
    /// Next id the authoritative world would assign.
    pub next_entity_id: EntityId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::hash::world_hash;
    use crate::game::map::Map;

    fn world_with_player() -> (World, EntityId) {
        let mut world = World::new(Map::generate_default());
        let id = world.add_entity(
            EntityKind::Player(PlayerState::new("ada")),
            Position::new(6, 0),
            None,
        );
        (world, id)
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut world = World::new(Map::generate_default());
        let a = world.add_entity(EntityKind::Ghost, Position::new(1, 1), None);
        let b = world.add_entity(EntityKind::Ghost, Position::new(1, 2), None);
        assert_eq!((a, b), (0, 1));

        world.remove_entity(a);
        let c = world.add_entity(EntityKind::Ghost, Position::new(1, 3), None);
        assert_eq!(c, 2, "removed ids must not be reused");
    }

    #[test]
    fn move_onto_obstacle_is_rejected_and_position_unchanged() {
        let (mut world, id) = world_with_player();
        let before = world.entity(id).unwrap().position();

        let result = world.move_entity(id, Position::new(2, 2));
        assert_eq!(result, Err(MoveError::Blocked));
        assert_eq!(world.entity(id).unwrap().position(), before);
    }

    #[test]
    fn move_onto_food_consumes_it_atomically() {
        let (mut world, id) = world_with_player();
        let dest = Position::new(6, 1);
        assert_eq!(world.map().state(dest), Some(CellState::Food));

        let outcome = world.move_entity(id, dest).unwrap();
        assert_eq!(
            outcome,
            MoveOutcome {
                ate_dot: true,
                dots_eaten: 1
            }
        );
        assert_eq!(world.map().state(dest), Some(CellState::Empty));
        assert_eq!(world.entity(id).unwrap().position(), dest);

        // Stepping back onto the now-empty cell eats nothing.
        world.move_entity(id, Position::new(6, 0)).unwrap();
        let outcome = world.move_entity(id, dest).unwrap();
        assert!(!outcome.ate_dot);
        assert_eq!(outcome.dots_eaten, 2); // (6, 0) held a pellet too
    }

    #[test]
    fn ghosts_never_consume_food() {
        let mut world = World::new(Map::generate_default());
        let ghost = world.add_entity(EntityKind::Ghost, Position::new(1, 1), None);
        let before = world.map().food_remaining();

        let outcome = world.move_entity(ghost, Position::new(1, 2)).unwrap();
        assert!(!outcome.ate_dot);
        assert_eq!(world.map().food_remaining(), before);
    }

    #[test]
    fn move_unknown_entity_fails_softly() {
        let mut world = World::new(Map::generate_default());
        let result = world.move_entity(42, Position::new(0, 0));
        assert_eq!(result, Err(MoveError::UnknownEntity));
    }

    #[test]
    #[should_panic(expected = "not occupiable")]
    fn spawning_into_a_wall_panics() {
        let mut world = World::new(Map::generate_default());
        world.add_entity(EntityKind::Ghost, Position::new(2, 2), None);
    }

    #[test]
    fn snapshot_round_trip_preserves_state_hash() {
        let (mut world, id) = world_with_player();
        world.add_entity(EntityKind::Ghost, Position::new(1, 1), None);
        world.move_entity(id, Position::new(6, 1)).unwrap();

        let snapshot = world.snapshot();
        let restored = World::from_snapshot(&snapshot);
        assert_eq!(world_hash(&restored), world_hash(&world));
        assert_eq!(restored.entity_ids(), world.entity_ids());
    }
}
