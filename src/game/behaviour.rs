//! Entity Behaviours
//!
//! A behaviour decides an entity's next action from read-only world state.
//! Human-controlled entities carry no behaviour; their moves arrive as
//! commands. Everything here must stay deterministic: fixed neighbour
//! order, no wall-clock time, no unseeded randomness.

use std::collections::{HashMap, VecDeque};

use crate::game::entity::EntityId;
use crate::game::map::Position;
use crate::game::world::World;

/// Grid steps in fixed exploration order: up, down, left, right.
const STEPS: [(i32, i32); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Decides an entity's next move each tick.
pub trait Behaviour: Send {
    /// The cell to move to this tick, or `None` to stay put.
    fn decide(&mut self, world: &World, me: EntityId) -> Option<Position>;
}

/// Ghost pursuit: breadth-first search to the nearest player, one grid step
/// per activation, pacing controlled by a ticks-per-move counter (a pace of
/// 4 moves on every fourth tick).
pub struct ChaseBehaviour {
    ticks_per_move: u32,
    cooldown: u32,
}

impl ChaseBehaviour {
    /// Create a chase behaviour with the given pace. A pace of zero moves
    /// every tick.
    pub fn new(ticks_per_move: u32) -> Self {
        Self {
            ticks_per_move,
            cooldown: 0,
        }
    }
}

impl Behaviour for ChaseBehaviour {
    fn decide(&mut self, world: &World, me: EntityId) -> Option<Position> {
        if self.cooldown > 0 {
            self.cooldown -= 1;
            return None;
        }

        let origin = world.entity(me)?.position_opt()?;
        let step = first_step_towards_nearest_player(world, origin)?;
        self.cooldown = self.ticks_per_move.saturating_sub(1);
        Some(step)
    }
}

/// BFS over occupiable cells from `origin`; returns the first step of a
/// shortest path to the nearest cell holding a player. Ties resolve by the
/// fixed expansion order, so outcomes are reproducible.
fn first_step_towards_nearest_player(world: &World, origin: Position) -> Option<Position> {
    let targets: Vec<Position> = world
        .players()
        .filter_map(|(_, e)| e.position_opt())
        .collect();
    if targets.is_empty() || targets.contains(&origin) {
        return None;
    }

    let mut parents: HashMap<Position, Position> = HashMap::new();
    let mut queue = VecDeque::new();
    queue.push_back(origin);
    parents.insert(origin, origin);

    while let Some(current) = queue.pop_front() {
        if targets.contains(&current) {
            return Some(backtrack_first_step(&parents, origin, current));
        }
        for (d_row, d_col) in STEPS {
            let next = current.offset(d_row, d_col);
            if world.is_occupiable(next) && !parents.contains_key(&next) {
                parents.insert(next, current);
                queue.push_back(next);
            }
        }
    }

    None
}

fn backtrack_first_step(
    parents: &HashMap<Position, Position>,
    origin: Position,
    target: Position,
) -> Position {
    let mut step = target;
    while parents[&step] != origin {
        step = parents[&step];
    }
    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{EntityKind, PlayerState};
    use crate::game::map::{CellState, Map};

    fn open_world(size: u32) -> World {
        World::new(Map::new(size, size, CellState::Empty))
    }

    #[test]
    fn chase_steps_towards_nearest_player() {
        let mut world = open_world(7);
        let ghost = world.add_entity(EntityKind::Ghost, Position::new(0, 0), None);
        world.add_entity(
            EntityKind::Player(PlayerState::new("prey")),
            Position::new(0, 3),
            None,
        );

        let mut chase = ChaseBehaviour::new(1);
        let step = chase.decide(&world, ghost);
        assert_eq!(step, Some(Position::new(0, 1)));
    }

    #[test]
    fn chase_routes_around_obstacles() {
        let mut map = Map::new(3, 3, CellState::Empty);
        // Wall off the direct column: ghost at (0,0), player at (2,0).
        map.set_state(Position::new(1, 0), CellState::Obstacle);
        let mut world = World::new(map);

        let ghost = world.add_entity(EntityKind::Ghost, Position::new(0, 0), None);
        world.add_entity(
            EntityKind::Player(PlayerState::new("prey")),
            Position::new(2, 0),
            None,
        );

        let mut chase = ChaseBehaviour::new(1);
        let step = chase.decide(&world, ghost);
        assert_eq!(step, Some(Position::new(0, 1)));
    }

    #[test]
    fn pace_skips_ticks_between_moves() {
        let mut world = open_world(5);
        let ghost = world.add_entity(EntityKind::Ghost, Position::new(0, 0), None);
        world.add_entity(
            EntityKind::Player(PlayerState::new("prey")),
            Position::new(0, 4),
            None,
        );

        let mut chase = ChaseBehaviour::new(3);
        assert!(chase.decide(&world, ghost).is_some());
        assert!(chase.decide(&world, ghost).is_none());
        assert!(chase.decide(&world, ghost).is_none());
        assert!(chase.decide(&world, ghost).is_some());
    }

    #[test]
    fn no_players_means_no_move() {
        let mut world = open_world(5);
        let ghost = world.add_entity(EntityKind::Ghost, Position::new(2, 2), None);

        let mut chase = ChaseBehaviour::new(1);
        assert_eq!(chase.decide(&world, ghost), None);
    }

    #[test]
    fn caught_player_means_no_move() {
        let mut world = open_world(5);
        let ghost = world.add_entity(EntityKind::Ghost, Position::new(2, 2), None);
        world.add_entity(
            EntityKind::Player(PlayerState::new("prey")),
            Position::new(2, 2),
            None,
        );

        let mut chase = ChaseBehaviour::new(1);
        assert_eq!(chase.decide(&world, ghost), None);
    }

    #[test]
    fn decisions_are_deterministic() {
        let build = || {
            let mut world = open_world(9);
            let ghost = world.add_entity(EntityKind::Ghost, Position::new(4, 4), None);
            world.add_entity(
                EntityKind::Player(PlayerState::new("a")),
                Position::new(0, 4),
                None,
            );
            world.add_entity(
                EntityKind::Player(PlayerState::new("b")),
                Position::new(8, 4),
                None,
            );
            (world, ghost)
        };

        let (world_a, ghost_a) = build();
        let (world_b, ghost_b) = build();
        let mut chase_a = ChaseBehaviour::new(1);
        let mut chase_b = ChaseBehaviour::new(1);

        // Equidistant players: the tie must break identically every run.
        assert_eq!(
            chase_a.decide(&world_a, ghost_a),
            chase_b.decide(&world_b, ghost_b)
        );
    }
}
