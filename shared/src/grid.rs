//! Destructible 13x15 arena grid and tile coordinate helpers.

use crate::protocol::{MapPayload, ProtocolError};
use crate::{GRID_COLS, GRID_ROWS, PLAYER_SIZE, TILE_OFFSET, TILE_SIZE};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Chance that a free, non-spawn cell gets a destructible block.
const BLOCK_DENSITY: f64 = 0.6;
/// Side of the square kept clear around each spawn corner.
const SPAWN_SAFE_DISTANCE: i32 = 3;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Cell {
    #[default]
    Empty,
    Wall,
    Block,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tile {
    pub row: i32,
    pub col: i32,
}

impl Tile {
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    pub fn offset(self, d_row: i32, d_col: i32) -> Self {
        Self::new(self.row + d_row, self.col + d_col)
    }
}

/// The four spawn corners, indexed by `playerIndex`.
pub const SPAWN_POSITIONS: [Tile; 4] = [
    Tile::new(1, 1),
    Tile::new(1, GRID_COLS as i32 - 2),
    Tile::new(GRID_ROWS as i32 - 2, 1),
    Tile::new(GRID_ROWS as i32 - 2, GRID_COLS as i32 - 2),
];

pub fn spawn_for(player_index: usize) -> Tile {
    SPAWN_POSITIONS
        .get(player_index)
        .copied()
        .unwrap_or(SPAWN_POSITIONS[0])
}

/// Top-left pixel of a sprite centered in `tile`.
pub fn tile_to_pixels(tile: Tile) -> (f32, f32) {
    (
        tile.col as f32 * TILE_SIZE + TILE_OFFSET,
        tile.row as f32 * TILE_SIZE + TILE_OFFSET,
    )
}

/// Tile containing the center of a sprite whose top-left is at `(x, y)`.
pub fn pixels_to_tile(x: f32, y: f32) -> Tile {
    let center_x = x + PLAYER_SIZE / 2.0;
    let center_y = y + PLAYER_SIZE / 2.0;
    Tile::new(
        (center_y / TILE_SIZE).floor() as i32,
        (center_x / TILE_SIZE).floor() as i32,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    cells: Vec<Vec<Cell>>,
}

impl Grid {
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self {
            cells: vec![vec![Cell::Empty; cols]; rows],
        }
    }

    /// Standard arena: border walls, pillars on even coordinates, random blocks,
    /// clear spawn corners.
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let mut grid = Self::empty(GRID_ROWS, GRID_COLS);
        for row in 0..GRID_ROWS as i32 {
            for col in 0..GRID_COLS as i32 {
                let tile = Tile::new(row, col);
                let cell = if grid.is_border(tile) {
                    Cell::Wall
                } else if grid.is_spawn_area(tile) {
                    Cell::Empty
                } else if row % 2 == 0 && col % 2 == 0 {
                    Cell::Wall
                } else if rng.gen_bool(BLOCK_DENSITY) {
                    Cell::Block
                } else {
                    Cell::Empty
                };
                grid.set(tile, cell);
            }
        }
        grid
    }

    pub fn from_payload(payload: &MapPayload) -> Result<Self, ProtocolError> {
        let rows = payload.data.len();
        let cols = payload.data.first().map_or(0, Vec::len);
        if rows == 0
            || cols == 0
            || rows != payload.rows
            || cols != payload.cols
            || payload.data.iter().any(|row| row.len() != cols)
        {
            return Err(ProtocolError::InvalidMap {
                rows: payload.rows,
                cols: payload.cols,
            });
        }
        Ok(Self {
            cells: payload.data.clone(),
        })
    }

    pub fn to_payload(&self) -> MapPayload {
        MapPayload {
            data: self.cells.clone(),
            rows: self.rows(),
            cols: self.cols(),
        }
    }

    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    pub fn cols(&self) -> usize {
        self.cells.first().map_or(0, Vec::len)
    }

    pub fn in_bounds(&self, tile: Tile) -> bool {
        tile.row >= 0
            && tile.col >= 0
            && (tile.row as usize) < self.rows()
            && (tile.col as usize) < self.cols()
    }

    /// Cell at `tile`, or `None` outside the grid.
    pub fn get(&self, tile: Tile) -> Option<Cell> {
        if !self.in_bounds(tile) {
            return None;
        }
        Some(self.cells[tile.row as usize][tile.col as usize])
    }

    /// Returns false (and does nothing) outside the grid.
    pub fn set(&mut self, tile: Tile, cell: Cell) -> bool {
        if !self.in_bounds(tile) {
            return false;
        }
        self.cells[tile.row as usize][tile.col as usize] = cell;
        true
    }

    fn is_border(&self, tile: Tile) -> bool {
        tile.row == 0
            || tile.col == 0
            || tile.row == self.rows() as i32 - 1
            || tile.col == self.cols() as i32 - 1
    }

    fn is_spawn_area(&self, tile: Tile) -> bool {
        let last_row = self.rows() as i32 - 1;
        let last_col = self.cols() as i32 - 1;
        let top = tile.row <= SPAWN_SAFE_DISTANCE;
        let bottom = tile.row >= last_row - SPAWN_SAFE_DISTANCE;
        let left = tile.col <= SPAWN_SAFE_DISTANCE;
        let right = tile.col >= last_col - SPAWN_SAFE_DISTANCE;
        (top || bottom) && (left || right)
    }
}
