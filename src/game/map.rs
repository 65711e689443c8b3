//! Maze Map
//!
//! Grid of cells plus the default arena layout. Pure data: mutation sets a
//! redraw dirty flag and nothing else; the simulation engine publishes the
//! corresponding events.

use serde::{Deserialize, Serialize};

/// A grid coordinate, row-major. Value equality; `Ord` for deterministic
/// iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Row index (0 at the top).
    pub row: i32,
    /// Column index (0 at the left).
    pub col: i32,
}

impl Position {
    /// Create a position.
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    /// This position shifted by a row/column delta.
    pub const fn offset(self, d_row: i32, d_col: i32) -> Self {
        Self {
            row: self.row + d_row,
            col: self.col + d_col,
        }
    }

    /// Manhattan distance to another position.
    pub fn manhattan_distance(self, other: Position) -> u32 {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// State of one grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    /// Walkable, nothing to eat.
    Empty,
    /// Walkable, holds one food pellet.
    Food,
    /// Wall; entities can never occupy it.
    Obstacle,
}

impl CellState {
    /// Whether an entity may stand on a cell in this state.
    pub fn is_occupiable(self) -> bool {
        !matches!(self, CellState::Obstacle)
    }
}

/// One grid slot. The dirty flag is redraw bookkeeping for the renderer
/// collaborator and never feeds gameplay logic.
#[derive(Clone, Debug)]
pub struct Cell {
    state: CellState,
    needs_redraw: bool,
}

impl Cell {
    fn new(state: CellState) -> Self {
        Self {
            state,
            needs_redraw: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> CellState {
        self.state
    }

    /// Whether the cell changed since the flag was last cleared.
    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    /// Clear the redraw flag after drawing.
    pub fn clear_needs_redraw(&mut self) {
        self.needs_redraw = false;
    }

    fn set_state(&mut self, state: CellState) {
        self.state = state;
        self.needs_redraw = true;
    }
}

/// Side length of the default arena.
pub const DEFAULT_MAP_SIZE: u32 = 15;

/// The maze grid.
#[derive(Clone, Debug)]
pub struct Map {
    width: u32,
    height: u32,
    cells: Vec<Cell>,
}

impl Map {
    /// Create a map with every cell in the given state.
    pub fn new(width: u32, height: u32, fill: CellState) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::new(fill); (width * height) as usize],
        }
    }

    /// Generate the default arena: food everywhere, with obstacle pillars on
    /// interior even/even coordinates. Spawn points stay clear of pillars.
    pub fn generate_default() -> Self {
        let size = DEFAULT_MAP_SIZE;
        let mut map = Self::new(size, size, CellState::Food);
        for row in 1..(size as i32 - 1) {
            for col in 1..(size as i32 - 1) {
                if row % 2 == 0 && col % 2 == 0 {
                    map.set_state(Position::new(row, col), CellState::Obstacle);
                }
            }
        }
        map
    }

    /// Fixed ghost spawn points on the default arena.
    pub fn default_ghost_spawns() -> [Position; 3] {
        [
            Position::new(1, 1),
            Position::new(1, 13),
            Position::new(13, 13),
        ]
    }

    /// Fixed player spawn points on the default arena.
    pub fn default_player_spawns() -> [Position; 4] {
        [
            Position::new(6, 0),
            Position::new(8, 14),
            Position::new(0, 6),
            Position::new(14, 8),
        ]
    }

    /// Grid width in columns.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in rows.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether a position lies on the grid.
    pub fn in_bounds(&self, pos: Position) -> bool {
        pos.row >= 0
            && pos.col >= 0
            && (pos.row as u32) < self.height
            && (pos.col as u32) < self.width
    }

    fn index(&self, pos: Position) -> Option<usize> {
        self.in_bounds(pos)
            .then(|| (pos.row as u32 * self.width + pos.col as u32) as usize)
    }

    /// The cell at a position, if on the grid.
    pub fn cell(&self, pos: Position) -> Option<&Cell> {
        self.index(pos).map(|i| &self.cells[i])
    }

    /// Mutable cell access, for redraw-flag clearing by the renderer.
    pub fn cell_mut(&mut self, pos: Position) -> Option<&mut Cell> {
        self.index(pos).map(move |i| &mut self.cells[i])
    }

    /// The state at a position, if on the grid.
    pub fn state(&self, pos: Position) -> Option<CellState> {
        self.cell(pos).map(|c| c.state())
    }

    /// Set the state at a position.
    ///
    /// # Panics
    ///
    /// Panics if the position is off the grid; callers are expected to have
    /// resolved bounds beforehand.
    pub fn set_state(&mut self, pos: Position, state: CellState) {
        let idx = self
            .index(pos)
            .unwrap_or_else(|| panic!("cell write out of bounds at {pos}"));
        self.cells[idx].set_state(state);
    }

    /// Whether an entity may occupy the position: on the grid and not an
    /// obstacle.
    pub fn is_occupiable(&self, pos: Position) -> bool {
        self.state(pos).is_some_and(CellState::is_occupiable)
    }

    /// Number of cells still holding food.
    pub fn food_remaining(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| c.state() == CellState::Food)
            .count()
    }

    /// Iterate every cell with its position, row-major.
    pub fn iter(&self) -> impl Iterator<Item = (Position, &Cell)> {
        let width = self.width;
        self.cells.iter().enumerate().map(move |(i, cell)| {
            let pos = Position::new((i as u32 / width) as i32, (i as u32 % width) as i32);
            (pos, cell)
        })
    }

    /// Cell states row-major, for snapshots.
    pub fn states(&self) -> Vec<CellState> {
        self.cells.iter().map(|c| c.state()).collect()
    }

    /// Rebuild a map from snapshot data.
    ///
    /// # Panics
    ///
    /// Panics if `states` does not match `width * height` entries; snapshots
    /// are produced by [`Map::states`] and must stay consistent.
    pub fn from_states(width: u32, height: u32, states: &[CellState]) -> Self {
        assert_eq!(
            states.len(),
            (width * height) as usize,
            "snapshot cell count does not match {width}x{height}"
        );
        Self {
            width,
            height,
            cells: states.iter().map(|s| Cell::new(*s)).collect(),
        }
    }
}
