//! Authoritative Simulation
//!
//! Advances a game one tick at a time. `step()` is the only mutation path:
//! inbound commands are queued and drained inside the tick, entity
//! behaviours run in ascending-id order, ghost catches resolve after the
//! full pass, and ending conditions are evaluated at every stage with the
//! game's single ended transition as the idempotence guard.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info};

use crate::event::EventBus;
use crate::game::entity::{AbilityKind, EntityId};
use crate::game::events::{GameEvent, GameOutcome};
use crate::game::game::{Game, GameType};
use crate::game::map::{CellState, Position};
use crate::game::world::MoveError;

/// Reason recorded when a ghost catches a player.
const EATEN_REASON: &str = "eaten by a ghost";

/// A deferred state change, applied in arrival order inside `step()`.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Move a player and update its facing angle.
    Move {
        /// The entity to move.
        id: EntityId,
        /// Target cell.
        position: Position,
        /// New facing angle in degrees.
        angle: f64,
    },
    /// Fire an ability.
    UseAbility {
        /// The acting player.
        id: EntityId,
        /// Which ability.
        kind: AbilityKind,
    },
    /// Remove an entity (player left the session).
    Despawn {
        /// The entity to remove.
        id: EntityId,
        /// Death reason recorded on players.
        reason: String,
    },
}

/// The authoritative engine bound to one game.
pub struct Simulation {
    game: Game,
    events: Arc<EventBus<GameEvent>>,
    pending: VecDeque<Command>,
}

impl Simulation {
    /// Bind the engine to a game.
    ///
    /// # Panics
    ///
    /// Panics if the game is tagged [`GameType::MultiplayerClient`]; a
    /// replica must never run authoritative logic.
    pub fn new(game: Game) -> Self {
        assert!(
            game.game_type() != GameType::MultiplayerClient,
            "authoritative engine bound to a replica game"
        );
        let events = Arc::clone(game.events());
        Self {
            game,
            events,
            pending: VecDeque::new(),
        }
    }

    /// The game this engine drives.
    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Queue a command for the next tick.
    pub fn queue_command(&mut self, command: Command) {
        self.pending.push_back(command);
    }

    /// Advance the game by one tick. A no-op once the game has ended.
    pub fn step(&mut self) {
        if self.game.has_ended() {
            return;
        }
        self.game.advance_tick();

        let pending: Vec<Command> = self.pending.drain(..).collect();
        for command in pending {
            if self.game.has_ended() {
                break;
            }
            self.apply_command(command);
        }
        self.check_ending_conditions();

        if !self.game.has_ended() {
            for id in self.game.world().entity_ids() {
                if self.game.has_ended() {
                    break;
                }
                self.update_entity(id);
                self.check_ending_conditions();
            }
        }

        if !self.game.has_ended() {
            self.resolve_caught_players();
            self.check_ending_conditions();
        }

        self.events.publish(&GameEvent::WorldInvalidated {
            tick: self.game.tick(),
        });
    }

    /// Move an entity, enforcing occupiability. Returns false for a
    /// rejected move and leaves the prior position untouched. Food at the
    /// destination is consumed before the move event is published.
    pub fn set_position(&mut self, id: EntityId, dest: Position) -> bool {
        if self.game.has_ended() {
            return false;
        }
        match self.game.world_mut().move_entity(id, dest) {
            Ok(outcome) => {
                if outcome.ate_dot {
                    self.events.publish(&GameEvent::CellChanged {
                        position: dest,
                        state: CellState::Empty,
                    });
                    self.events.publish(&GameEvent::DotEaten {
                        id,
                        position: dest,
                        dots_eaten: outcome.dots_eaten,
                    });
                }
                let angle = self
                    .game
                    .world()
                    .entity(id)
                    .and_then(|e| e.as_player())
                    .map_or(0.0, |p| p.angle);
                self.events.publish(&GameEvent::EntityMoved {
                    id,
                    position: dest,
                    angle,
                });
                true
            }
            Err(MoveError::Blocked) => false,
            Err(MoveError::UnknownEntity) => {
                debug!("move for unknown entity {id}");
                false
            }
        }
    }

    /// Turn a player in place, publishing the new facing.
    pub fn set_angle(&mut self, id: EntityId, angle: f64) -> bool {
        if self.game.has_ended() || !self.apply_angle(id, angle) {
            return false;
        }
        let Some(position) = self
            .game
            .world()
            .entity(id)
            .and_then(|e| e.position_opt())
        else {
            return false;
        };
        self.events
            .publish(&GameEvent::EntityMoved { id, position, angle });
        true
    }

    /// Fire an ability if its charge is full. Returns whether it fired.
    pub fn use_ability(&mut self, id: EntityId, kind: AbilityKind) -> bool {
        if self.game.has_ended() {
            return false;
        }
        match kind {
            AbilityKind::Shield => self.fire_shield(id),
            AbilityKind::Laser => self.fire_laser(id),
        }
    }

    /// Evaluate every ending condition. The game's single ended transition
    /// keeps repeated triggers in one tick from publishing twice.
    pub fn check_ending_conditions(&mut self) {
        if self.game.has_ended() {
            return;
        }
        if self.game.world().player_count() == 0 {
            self.end_game(GameOutcome::GhostsWon);
        }
        if !self.game.has_ended()
            && self.game.world().player_count() > 0
            && self.game.world().map().food_remaining() == 0
        {
            let winners = self.leading_players();
            let outcome = if winners.len() == 1 {
                GameOutcome::PlayerWon { winner: winners[0] }
            } else {
                GameOutcome::Tie { winners }
            };
            self.end_game(outcome);
        }
    }

    fn apply_command(&mut self, command: Command) {
        match command {
            Command::Move {
                id,
                position,
                angle,
            } => {
                let turned = self.apply_angle(id, angle);
                let moved = self.set_position(id, position);
                if turned && !moved {
                    // Rejected move, but the turn is still observable.
                    if let Some(current) = self
                        .game
                        .world()
                        .entity(id)
                        .and_then(|e| e.position_opt())
                    {
                        self.events.publish(&GameEvent::EntityMoved {
                            id,
                            position: current,
                            angle,
                        });
                    }
                }
            }
            Command::UseAbility { id, kind } => {
                self.use_ability(id, kind);
            }
            Command::Despawn { id, reason } => {
                self.despawn(id, reason);
            }
        }
    }

    /// Set the facing angle without publishing. Returns whether it changed.
    fn apply_angle(&mut self, id: EntityId, angle: f64) -> bool {
        match self
            .game
            .world_mut()
            .entity_mut(id)
            .and_then(|e| e.as_player_mut())
        {
            Some(player) if player.angle != angle => {
                player.angle = angle;
                true
            }
            _ => false,
        }
    }

    fn update_entity(&mut self, id: EntityId) {
        if self.game.world().entity(id).is_none() {
            return;
        }
        // Behaviours get read-only world access; their moves then go
        // through the same arbitration as any other.
        if let Some(mut behaviour) = self.game.world_mut().take_behaviour(id) {
            let target = behaviour.decide(self.game.world(), id);
            self.game.world_mut().put_behaviour(id, behaviour);
            if let Some(dest) = target {
                self.set_position(id, dest);
            }
        }
        if let Some(player) = self
            .game
            .world_mut()
            .entity_mut(id)
            .and_then(|e| e.as_player_mut())
        {
            let banked = player.shielded;
            player.abilities.tick(banked);
        }
    }

    /// Collect every player sharing a cell with a ghost and resolve them in
    /// one pass: shielded players spend the absorb, the rest are removed.
    fn resolve_caught_players(&mut self) {
        let ghost_cells: BTreeSet<Position> = self
            .game
            .world()
            .ghosts()
            .filter_map(|(_, g)| g.position_opt())
            .collect();
        if ghost_cells.is_empty() {
            return;
        }
        let caught: Vec<EntityId> = self
            .game
            .world()
            .players()
            .filter(|(_, e)| {
                e.position_opt()
                    .is_some_and(|pos| ghost_cells.contains(&pos))
            })
            .map(|(id, _)| id)
            .collect();

        for id in caught {
            let shielded = self
                .game
                .world()
                .entity(id)
                .and_then(|e| e.as_player())
                .is_some_and(|p| p.shielded);
            if shielded {
                if let Some(player) = self
                    .game
                    .world_mut()
                    .entity_mut(id)
                    .and_then(|e| e.as_player_mut())
                {
                    player.shielded = false;
                }
                self.events.publish(&GameEvent::ShieldAbsorbed { id });
            } else {
                self.despawn(id, EATEN_REASON.to_string());
            }
        }
    }

    fn despawn(&mut self, id: EntityId, reason: String) {
        let world = self.game.world_mut();
        let Some(entity) = world.entity_mut(id) else {
            return;
        };
        let reason = match entity.as_player_mut() {
            Some(player) => {
                player.death_reason = Some(reason.clone());
                Some(reason)
            }
            None => None,
        };
        world.remove_entity(id);
        self.events.publish(&GameEvent::EntityRemoved { id, reason });
    }

    fn fire_shield(&mut self, id: EntityId) -> bool {
        let Some(player) = self
            .game
            .world_mut()
            .entity_mut(id)
            .and_then(|e| e.as_player_mut())
        else {
            return false;
        };
        if player.shielded || !player.abilities.shield_mut().fire() {
            return false;
        }
        player.shielded = true;
        self.events.publish(&GameEvent::AbilityUsed {
            id,
            kind: AbilityKind::Shield,
        });
        true
    }

    fn fire_laser(&mut self, id: EntityId) -> bool {
        let (origin, angle) = {
            let Some(entity) = self.game.world().entity(id) else {
                return false;
            };
            let (Some(position), Some(player)) = (entity.position_opt(), entity.as_player())
            else {
                return false;
            };
            (position, player.angle)
        };
        {
            let Some(player) = self
                .game
                .world_mut()
                .entity_mut(id)
                .and_then(|e| e.as_player_mut())
            else {
                return false;
            };
            if !player.abilities.laser_mut().fire() {
                return false;
            }
        }
        self.events.publish(&GameEvent::AbilityUsed {
            id,
            kind: AbilityKind::Laser,
        });
        if let Some(victim) = self.first_ghost_in_line(origin, angle) {
            self.game.world_mut().remove_entity(victim);
            self.events.publish(&GameEvent::EntityRemoved {
                id: victim,
                reason: None,
            });
        }
        true
    }

    /// Scan cells along the facing direction until the edge or an obstacle;
    /// the lowest-id ghost on the first occupied cell is hit.
    fn first_ghost_in_line(&self, origin: Position, angle: f64) -> Option<EntityId> {
        let (d_row, d_col) = facing_step(angle);
        let world = self.game.world();
        let mut cell = origin.offset(d_row, d_col);
        while world.is_occupiable(cell) {
            let hit = world
                .ghosts()
                .filter(|(_, g)| g.position_opt() == Some(cell))
                .map(|(ghost_id, _)| ghost_id)
                .min();
            if hit.is_some() {
                return hit;
            }
            cell = cell.offset(d_row, d_col);
        }
        None
    }

    fn leading_players(&self) -> Vec<EntityId> {
        let world = self.game.world();
        let max_dots = world
            .players()
            .filter_map(|(_, e)| e.as_player())
            .map(|p| p.dots_eaten)
            .max()
            .unwrap_or(0);
        world
            .players()
            .filter(|(_, e)| e.as_player().is_some_and(|p| p.dots_eaten == max_dots))
            .map(|(id, _)| id)
            .collect()
    }

    fn end_game(&mut self, outcome: GameOutcome) {
        if self.game.set_ended(outcome.clone()) {
            info!("game ended after {} ticks: {:?}", self.game.tick(), outcome);
            self.events.publish(&GameEvent::GameEnded { outcome });
        }
    }
}

/// Quantize a facing angle to a grid step. 0 degrees faces right, 90 faces
/// down, matching the renderer's screen-space convention.
fn facing_step(angle: f64) -> (i32, i32) {
    let a = angle.rem_euclid(360.0);
    if (45.0..135.0).contains(&a) {
        (1, 0)
    } else if (135.0..225.0).contains(&a) {
        (0, -1)
    } else if (225.0..315.0).contains(&a) {
        (-1, 0)
    } else {
        (0, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::game::behaviour::ChaseBehaviour;
    use crate::game::entity::{EntityKind, PlayerState};
    use crate::game::game::GameSettings;
    use crate::game::hash::world_hash;
    use crate::game::map::Map;
    use crate::game::world::World;

    fn single_player_sim(world: World) -> Simulation {
        Simulation::new(Game::new(
            world,
            GameSettings::default(),
            GameType::SinglePlayer,
            None,
        ))
    }

    fn record_events(sim: &Simulation) -> Arc<Mutex<Vec<GameEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        sim.game()
            .events()
            .subscribe(move |e: &GameEvent| sink.lock().unwrap().push(e.clone()));
        log
    }

    /// Two players and a chasing ghost on the default arena.
    fn arena_world() -> World {
        let mut world = World::new(Map::generate_default());
        world.add_entity(
            EntityKind::Player(PlayerState::new("ada")),
            Position::new(6, 0),
            None,
        );
        world.add_entity(
            EntityKind::Player(PlayerState::new("bob")),
            Position::new(8, 14),
            None,
        );
        world.add_entity(
            EntityKind::Ghost,
            Position::new(1, 1),
            Some(Box::new(ChaseBehaviour::new(2))),
        );
        world
    }

    #[test]
    fn identical_inputs_produce_identical_state() {
        let mut sim_a = single_player_sim(arena_world());
        let mut sim_b = single_player_sim(arena_world());

        for tick in 0..50u32 {
            for sim in [&mut sim_a, &mut sim_b] {
                if tick % 3 == 0 {
                    sim.queue_command(Command::Move {
                        id: 0,
                        position: Position::new(6, (tick as i32 / 3 % 5) + 1),
                        angle: 0.0,
                    });
                }
                sim.step();
            }
        }

        assert_eq!(
            world_hash(sim_a.game().world()),
            world_hash(sim_b.game().world())
        );
        assert_eq!(sim_a.game().tick(), sim_b.game().tick());
        assert_eq!(sim_a.game().has_ended(), sim_b.game().has_ended());
    }

    /// Empty 5x5 map with one pellet left, so food exhaustion stays out of
    /// the way of catch scenarios.
    fn small_map_with_food() -> Map {
        let mut map = Map::new(5, 5, CellState::Empty);
        map.set_state(Position::new(0, 0), CellState::Food);
        map
    }

    #[test]
    fn two_ghosts_on_one_player_remove_it_exactly_once() {
        let mut world = World::new(small_map_with_food());
        let prey = world.add_entity(
            EntityKind::Player(PlayerState::new("prey")),
            Position::new(2, 2),
            None,
        );
        world.add_entity(EntityKind::Ghost, Position::new(2, 2), None);
        world.add_entity(EntityKind::Ghost, Position::new(2, 2), None);

        let mut sim = single_player_sim(world);
        let log = record_events(&sim);
        sim.step();

        assert!(sim.game().world().entity(prey).is_none());
        let removals = log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, GameEvent::EntityRemoved { id, .. } if *id == prey))
            .count();
        assert_eq!(removals, 1);
        assert_eq!(sim.game().outcome(), Some(&GameOutcome::GhostsWon));
    }

    #[test]
    fn food_exhaustion_with_tied_leaders_is_a_tie() {
        let mut world = World::new(Map::new(5, 5, CellState::Empty));
        let ids: Vec<EntityId> = [("a", 5), ("b", 5), ("c", 3)]
            .iter()
            .enumerate()
            .map(|(i, (name, dots))| {
                let id = world.add_entity(
                    EntityKind::Player(PlayerState::new(*name)),
                    Position::new(0, i as i32),
                    None,
                );
                world
                    .entity_mut(id)
                    .unwrap()
                    .as_player_mut()
                    .unwrap()
                    .dots_eaten = *dots;
                id
            })
            .collect();

        let mut sim = single_player_sim(world);
        sim.step();

        assert_eq!(
            sim.game().outcome(),
            Some(&GameOutcome::Tie {
                winners: vec![ids[0], ids[1]]
            })
        );
    }

    #[test]
    fn food_exhaustion_with_unique_leader_crowns_it() {
        let mut world = World::new(Map::new(5, 5, CellState::Empty));
        for (i, (name, dots)) in [("a", 7), ("b", 5), ("c", 3)].iter().enumerate() {
            let id = world.add_entity(
                EntityKind::Player(PlayerState::new(*name)),
                Position::new(0, i as i32),
                None,
            );
            world
                .entity_mut(id)
                .unwrap()
                .as_player_mut()
                .unwrap()
                .dots_eaten = *dots;
        }

        let mut sim = single_player_sim(world);
        sim.step();

        assert_eq!(sim.game().outcome(), Some(&GameOutcome::PlayerWon { winner: 0 }));
    }

    #[test]
    fn ghosts_win_once_and_steps_after_end_are_noops() {
        let mut world = World::new(small_map_with_food());
        world.add_entity(
            EntityKind::Player(PlayerState::new("prey")),
            Position::new(1, 1),
            None,
        );
        world.add_entity(EntityKind::Ghost, Position::new(1, 1), None);

        let mut sim = single_player_sim(world);
        let log = record_events(&sim);

        sim.step();
        assert!(sim.game().has_ended());
        assert_eq!(sim.game().outcome(), Some(&GameOutcome::GhostsWon));

        let after_end = log.lock().unwrap().len();
        sim.step();
        sim.check_ending_conditions();
        assert_eq!(log.lock().unwrap().len(), after_end, "ended game stays silent");

        let ended_events = log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, GameEvent::GameEnded { .. }))
            .count();
        assert_eq!(ended_events, 1);
    }

    #[test]
    fn move_legality_and_event_order() {
        let mut world = World::new(Map::generate_default());
        let id = world.add_entity(
            EntityKind::Player(PlayerState::new("ada")),
            Position::new(6, 0),
            None,
        );
        let mut sim = single_player_sim(world);
        let log = record_events(&sim);

        // Obstacle target: rejected, position untouched, nothing published.
        assert!(!sim.set_position(id, Position::new(2, 2)));
        assert_eq!(
            sim.game().world().entity(id).unwrap().position(),
            Position::new(6, 0)
        );
        assert!(log.lock().unwrap().is_empty());

        // Food target: cell flips and the counter increments before the
        // move event goes out.
        let dest = Position::new(6, 1);
        assert!(sim.set_position(id, dest));
        let events = log.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                GameEvent::CellChanged {
                    position: dest,
                    state: CellState::Empty
                },
                GameEvent::DotEaten {
                    id,
                    position: dest,
                    dots_eaten: 1
                },
                GameEvent::EntityMoved {
                    id,
                    position: dest,
                    angle: 0.0
                },
            ]
        );
    }

    #[test]
    fn laser_removes_first_ghost_in_line() {
        let mut world = World::new(Map::new(7, 7, CellState::Empty));
        let shooter = world.add_entity(
            EntityKind::Player(PlayerState::new("ada")),
            Position::new(3, 1),
            None,
        );
        let near = world.add_entity(EntityKind::Ghost, Position::new(3, 3), None);
        let far = world.add_entity(EntityKind::Ghost, Position::new(3, 5), None);

        let mut sim = single_player_sim(world);
        // Facing right (angle 0).
        assert!(sim.use_ability(shooter, AbilityKind::Laser));
        assert!(sim.game().world().entity(near).is_none());
        assert!(sim.game().world().entity(far).is_some());

        // Charge was spent.
        assert!(!sim.use_ability(shooter, AbilityKind::Laser));
    }

    #[test]
    fn laser_is_stopped_by_obstacles() {
        let mut map = Map::new(7, 7, CellState::Empty);
        map.set_state(Position::new(3, 2), CellState::Obstacle);
        let mut world = World::new(map);
        let shooter = world.add_entity(
            EntityKind::Player(PlayerState::new("ada")),
            Position::new(3, 1),
            None,
        );
        let hidden = world.add_entity(EntityKind::Ghost, Position::new(3, 4), None);

        let mut sim = single_player_sim(world);
        assert!(sim.use_ability(shooter, AbilityKind::Laser));
        assert!(sim.game().world().entity(hidden).is_some());
    }

    #[test]
    fn shield_absorbs_one_catch() {
        let mut world = World::new(small_map_with_food());
        let prey = world.add_entity(
            EntityKind::Player(PlayerState::new("prey")),
            Position::new(2, 2),
            None,
        );
        world.add_entity(EntityKind::Ghost, Position::new(2, 2), None);

        let mut sim = single_player_sim(world);
        assert!(sim.use_ability(prey, AbilityKind::Shield));
        let log = record_events(&sim);

        sim.step();
        assert!(sim.game().world().entity(prey).is_some(), "absorbed");
        assert!(log
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, GameEvent::ShieldAbsorbed { id } if *id == prey)));

        // Absorb is spent; the next catch removes the player.
        sim.step();
        assert!(sim.game().world().entity(prey).is_none());
    }

    #[test]
    fn chasing_ghost_eventually_eats_an_idle_player() {
        let mut sim = single_player_sim(arena_world());
        for _ in 0..600 {
            sim.step();
            if sim.game().has_ended() {
                break;
            }
        }
        assert_eq!(sim.game().outcome(), Some(&GameOutcome::GhostsWon));
    }

    #[test]
    fn random_walk_stays_on_occupiable_cells() {
        use rand::prelude::*;

        let mut rng = StdRng::seed_from_u64(7);
        let mut sim = single_player_sim(arena_world());

        for _ in 0..300 {
            let current = match sim.game().world().entity(0) {
                Some(e) => e.position(),
                None => break, // eaten
            };
            let (d_row, d_col) = [(-1, 0), (1, 0), (0, -1), (0, 1)]
                .choose(&mut rng)
                .copied()
                .unwrap();
            sim.queue_command(Command::Move {
                id: 0,
                position: current.offset(d_row, d_col),
                angle: 0.0,
            });
            sim.step();
            if sim.game().has_ended() {
                break;
            }
            if let Some(entity) = sim.game().world().entity(0) {
                assert!(sim.game().world().is_occupiable(entity.position()));
            }
        }
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

        /// Two engines fed the identical command stream always agree.
        #[test]
        fn determinism_under_arbitrary_command_streams(
            moves in proptest::collection::vec((0i32..15, 0i32..15), 0..60)
        ) {
            let mut sim_a = single_player_sim(arena_world());
            let mut sim_b = single_player_sim(arena_world());

            for (row, col) in &moves {
                for sim in [&mut sim_a, &mut sim_b] {
                    sim.queue_command(Command::Move {
                        id: 0,
                        position: Position::new(*row, *col),
                        angle: 0.0,
                    });
                    sim.step();
                }
            }

            proptest::prop_assert_eq!(
                world_hash(sim_a.game().world()),
                world_hash(sim_b.game().world())
            );
            proptest::prop_assert_eq!(sim_a.game().outcome(), sim_b.game().outcome());
        }
    }

    #[test]
    #[should_panic(expected = "replica game")]
    fn replica_game_rejects_the_authoritative_engine() {
        let world = World::new(Map::generate_default());
        let game = Game::new(
            world,
            GameSettings::default(),
            GameType::MultiplayerClient,
            None,
        );
        let _ = Simulation::new(game);
    }
}
