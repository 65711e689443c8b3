//! World State Hashing
//!
//! Deterministic SHA-256 digest of replicated world state, used to verify
//! that two worlds agree: determinism tests, replica fidelity checks, and
//! snapshot round-trips. Field update order is fixed; changing it changes
//! every hash.

use sha2::{Digest, Sha256};

use crate::game::entity::EntityKind;
use crate::game::map::{CellState, Position};
use crate::game::world::World;

/// Hash output type (256 bits).
pub type StateHash = [u8; 32];

/// Deterministic hasher with helpers for the game's field types.
pub struct WorldHasher {
    hasher: Sha256,
}

impl WorldHasher {
    /// Create a hasher with a domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create the hasher used for world state.
    pub fn for_world() -> Self {
        Self::new(b"PELLET_RUSH_STATE_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i32 value (little-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an f64 value via its bit pattern.
    #[inline]
    pub fn update_f64(&mut self, value: f64) {
        self.hasher.update(value.to_bits().to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with a position.
    #[inline]
    pub fn update_position(&mut self, pos: Position) {
        self.update_i32(pos.row);
        self.update_i32(pos.col);
    }

    /// Update with a length-prefixed string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.update_bytes(value.as_bytes());
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

fn cell_tag(state: CellState) -> u8 {
    match state {
        CellState::Empty => 0,
        CellState::Food => 1,
        CellState::Obstacle => 2,
    }
}

/// Digest the replicated state of a world: map cells plus the entity
/// registry in ascending-id order. Redraw flags and ability charges are
/// host-local and excluded.
pub fn world_hash(world: &World) -> StateHash {
    let mut hasher = WorldHasher::for_world();

    hasher.update_u32(world.map().width());
    hasher.update_u32(world.map().height());
    for (_, cell) in world.map().iter() {
        hasher.update_u8(cell_tag(cell.state()));
    }

    for entity in world.entities() {
        hasher.update_u32(entity.id());
        match entity.position_opt() {
            Some(pos) => {
                hasher.update_bool(true);
                hasher.update_position(pos);
            }
            None => hasher.update_bool(false),
        }
        match entity.kind() {
            EntityKind::Player(p) => {
                hasher.update_u8(1);
                hasher.update_str(&p.name);
                hasher.update_f64(p.angle);
                hasher.update_u32(p.dots_eaten);
                hasher.update_bool(p.shielded);
            }
            EntityKind::Ghost => hasher.update_u8(2),
        }
    }

    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{EntityKind, PlayerState};
    use crate::game::map::Map;

    fn sample_world() -> World {
        let mut world = World::new(Map::generate_default());
        world.add_entity(
            EntityKind::Player(PlayerState::new("ada")),
            Position::new(6, 0),
            None,
        );
        world.add_entity(EntityKind::Ghost, Position::new(1, 1), None);
        world
    }

    #[test]
    fn identical_worlds_hash_identically() {
        assert_eq!(world_hash(&sample_world()), world_hash(&sample_world()));
    }

    #[test]
    fn state_changes_change_the_hash() {
        let base = world_hash(&sample_world());

        let mut moved = sample_world();
        moved.move_entity(1, Position::new(1, 2)).unwrap();
        assert_ne!(world_hash(&moved), base);

        let mut eaten = sample_world();
        eaten.map_mut().set_state(Position::new(0, 0), CellState::Empty);
        assert_ne!(world_hash(&eaten), base);
    }

    #[test]
    fn redraw_flags_do_not_affect_the_hash() {
        let base = world_hash(&sample_world());

        let mut flagged = sample_world();
        let state = flagged.map().state(Position::new(0, 0)).unwrap();
        flagged.map_mut().set_state(Position::new(0, 0), state);
        assert_eq!(world_hash(&flagged), base);
    }
}
