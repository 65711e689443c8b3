//! Entities
//!
//! A single entity record covers players and ghosts; what an entity *does*
//! each tick comes from its pluggable [`Behaviour`](crate::game::behaviour::Behaviour)
//! strategy, so AI versus human control is a wiring choice, not a type.

use serde::{Deserialize, Serialize};

use crate::game::behaviour::Behaviour;
use crate::game::map::Position;

/// Unique entity identifier. Assigned once at insertion into the World and
/// never reused while that World is alive.
pub type EntityId = u32;

/// The two player abilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityKind {
    /// Banks one absorb against a ghost catch.
    Shield,
    /// Removes the first ghost along the facing direction.
    Laser,
}

/// Ticks for a laser to recharge fully.
pub const LASER_FULL_CHARGE: u32 = 20;
/// Ticks for a shield to recharge fully.
pub const SHIELD_FULL_CHARGE: u32 = 40;

/// One ability's charge counter. Starts full; firing drains it; it regains
/// one point per tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ability {
    charge: u32,
    full: u32,
}

impl Ability {
    fn new(full: u32) -> Self {
        Self { charge: full, full }
    }

    /// Whether the ability can fire.
    pub fn is_ready(&self) -> bool {
        self.charge >= self.full
    }

    /// Current charge, for display.
    pub fn charge(&self) -> u32 {
        self.charge
    }

    /// Consume the charge if ready. Returns whether it fired.
    pub fn fire(&mut self) -> bool {
        if self.is_ready() {
            self.charge = 0;
            true
        } else {
            false
        }
    }

    fn recharge(&mut self) {
        if self.charge < self.full {
            self.charge += 1;
        }
    }
}

/// A player's ability pair with independent charge counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbilitySet {
    shield: Ability,
    laser: Ability,
}

impl AbilitySet {
    fn new() -> Self {
        Self {
            shield: Ability::new(SHIELD_FULL_CHARGE),
            laser: Ability::new(LASER_FULL_CHARGE),
        }
    }

    /// The shield charge counter.
    pub fn shield(&self) -> &Ability {
        &self.shield
    }

    /// The laser charge counter.
    pub fn laser(&self) -> &Ability {
        &self.laser
    }

    /// Mutable shield access, for firing.
    pub fn shield_mut(&mut self) -> &mut Ability {
        &mut self.shield
    }

    /// Mutable laser access, for firing.
    pub fn laser_mut(&mut self) -> &mut Ability {
        &mut self.laser
    }

    /// Advance both counters by one tick. The shield stops recharging while
    /// an absorb is banked.
    pub fn tick(&mut self, shield_banked: bool) {
        self.laser.recharge();
        if !shield_banked {
            self.shield.recharge();
        }
    }
}

impl Default for AbilitySet {
    fn default() -> Self {
        Self::new()
    }
}

/// Player-specific entity state.
#[derive(Clone, Debug)]
pub struct PlayerState {
    /// Display name.
    pub name: String,
    /// Facing angle in degrees.
    pub angle: f64,
    /// Food pellets eaten so far.
    pub dots_eaten: u32,
    /// Whether one shield absorb is banked.
    pub shielded: bool,
    /// Ability charge counters.
    pub abilities: AbilitySet,
    /// Why the player left the world, set when removed.
    pub death_reason: Option<String>,
}

impl PlayerState {
    /// Create a fresh player record.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            angle: 0.0,
            dots_eaten: 0,
            shielded: false,
            abilities: AbilitySet::new(),
            death_reason: None,
        }
    }
}

/// What an entity is.
pub enum EntityKind {
    /// A player, human- or AI-controlled.
    Player(PlayerState),
    /// A pursuer, AI-controlled only.
    Ghost,
}

impl EntityKind {
    /// Short tag for logs and hashing.
    pub fn tag(&self) -> &'static str {
        match self {
            EntityKind::Player(_) => "player",
            EntityKind::Ghost => "ghost",
        }
    }
}

/// One world entity: id, position, kind, and an optional behaviour strategy
/// that decides its action each tick.
pub struct Entity {
    id: EntityId,
    position: Option<Position>,
    kind: EntityKind,
    behaviour: Option<Box<dyn Behaviour>>,
}

impl Entity {
    pub(crate) fn new(
        id: EntityId,
        position: Option<Position>,
        kind: EntityKind,
        behaviour: Option<Box<dyn Behaviour>>,
    ) -> Self {
        Self {
            id,
            position,
            kind,
            behaviour,
        }
    }

    /// The entity's id.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The entity's position.
    ///
    /// # Panics
    ///
    /// Panics if no position has ever been set; reading an unplaced entity's
    /// position is a programming error, not a recoverable condition.
    pub fn position(&self) -> Position {
        self.position.unwrap_or_else(|| {
            panic!(
                "position read before set for {} entity {}",
                self.kind.tag(),
                self.id
            )
        })
    }

    /// The position if one has been set.
    pub fn position_opt(&self) -> Option<Position> {
        self.position
    }

    /// Whether a position has been set.
    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    pub(crate) fn set_position(&mut self, pos: Position) {
        self.position = Some(pos);
    }

    /// The entity's kind.
    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut EntityKind {
        &mut self.kind
    }

    /// Whether this is a player.
    pub fn is_player(&self) -> bool {
        matches!(self.kind, EntityKind::Player(_))
    }

    /// Whether this is a ghost.
    pub fn is_ghost(&self) -> bool {
        matches!(self.kind, EntityKind::Ghost)
    }

    /// Player state, if this is a player.
    pub fn as_player(&self) -> Option<&PlayerState> {
        match &self.kind {
            EntityKind::Player(p) => Some(p),
            EntityKind::Ghost => None,
        }
    }

    /// Mutable player state, if this is a player.
    pub fn as_player_mut(&mut self) -> Option<&mut PlayerState> {
        match &mut self.kind {
            EntityKind::Player(p) => Some(p),
            EntityKind::Ghost => None,
        }
    }

    pub(crate) fn take_behaviour(&mut self) -> Option<Box<dyn Behaviour>> {
        self.behaviour.take()
    }

    pub(crate) fn put_behaviour(&mut self, behaviour: Box<dyn Behaviour>) {
        self.behaviour = Some(behaviour);
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("kind", &self.kind.tag())
            .field("position", &self.position)
            .finish()
    }
}
