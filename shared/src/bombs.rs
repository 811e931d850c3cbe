//! Bomb placement and explosion propagation.
//!
//! The engine is pure over a grid, a bomb set, and the players it is told
//! about. It is run by whichever party is authoritative for a bomb; peers that
//! replay someone else's explosion use [`apply_remote_blast`] with the tile list
//! they received so that no drop is rolled twice.

use crate::grid::{Cell, Grid, Tile};
use crate::powerups::{Powerup, PowerupManager};
use crate::{DamageResult, Player, BOMB_FUSE_MS};
use log::{debug, info};
use std::collections::HashSet;
use thiserror::Error;

const DIRECTIONS: [(i32, i32); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

pub type BombId = u64;

/// Local match status as far as bomb placement is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    Running,
    TimeUp,
    Lost,
    Ended,
}

impl MatchState {
    pub fn is_over(self) -> bool {
        !matches!(self, MatchState::Running)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaceBombError {
    #[error("match is over")]
    MatchOver,
    #[error("bomb limit of {0} reached")]
    LimitReached(u32),
    #[error("a bomb already occupies [{}, {}]", .0.row, .0.col)]
    Occupied(Tile),
    #[error("cannot place a bomb inside a wall")]
    Wall,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bomb {
    pub id: BombId,
    pub owner_id: String,
    pub row: i32,
    pub col: i32,
    pub range: u32,
    /// Absolute time (ms) at which the fuse runs out.
    pub explodes_at: u64,
    pub exploded: bool,
}

impl Bomb {
    pub fn tile(&self) -> Tile {
        Tile::new(self.row, self.col)
    }
}

/// Everything one detonation (including its chain) changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplosionOutcome {
    /// Union of all blast tiles, in first-hit order.
    pub tiles: Vec<Tile>,
    pub detonated: Vec<BombId>,
    pub destroyed_blocks: Vec<Tile>,
    pub spawned: Vec<Powerup>,
    pub damaged: Vec<(String, DamageResult)>,
}

impl ExplosionOutcome {
    fn push_tile(&mut self, tile: Tile) {
        if !self.tiles.contains(&tile) {
            self.tiles.push(tile);
        }
    }
}

/// Tiles hit by a blast of `range` centered on `origin`: the origin itself,
/// then outward per direction, stopping before walls and the grid edge, and
/// stopping on (but including) the first destructible block.
pub fn blast_tiles(origin: Tile, range: u32, grid: &Grid) -> Vec<Tile> {
    let mut tiles = vec![origin];
    for (d_row, d_col) in DIRECTIONS {
        for step in 1..=range as i32 {
            let tile = origin.offset(d_row * step, d_col * step);
            match grid.get(tile) {
                None | Some(Cell::Wall) => break,
                Some(Cell::Block) => {
                    tiles.push(tile);
                    break;
                }
                Some(Cell::Empty) => tiles.push(tile),
            }
        }
    }
    tiles
}

/// Applies a blast computed by another party: blocks on the listed tiles are
/// cleared, nothing is rolled. Returns the tiles that held a block.
pub fn apply_remote_blast(grid: &mut Grid, tiles: &[Tile]) -> Vec<Tile> {
    let mut destroyed = Vec::new();
    for &tile in tiles {
        if grid.get(tile) == Some(Cell::Block) {
            grid.set(tile, Cell::Empty);
            destroyed.push(tile);
        }
    }
    destroyed
}

#[derive(Debug, Default)]
pub struct BombManager {
    bombs: Vec<Bomb>,
    next_id: BombId,
}

impl BombManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bombs(&self) -> &[Bomb] {
        &self.bombs
    }

    pub fn bomb_at(&self, tile: Tile) -> Option<&Bomb> {
        self.bombs.iter().find(|b| b.tile() == tile && !b.exploded)
    }

    pub fn live_count(&self, owner_id: &str) -> usize {
        self.bombs
            .iter()
            .filter(|b| b.owner_id == owner_id && !b.exploded)
            .count()
    }

    /// Places a bomb on the player's tile. Checks, in order: match over, bomb
    /// limit, occupied tile, wall.
    pub fn place_bomb(
        &mut self,
        player: &Player,
        grid: &Grid,
        match_state: MatchState,
        now: u64,
    ) -> Result<Bomb, PlaceBombError> {
        if match_state.is_over() {
            return Err(PlaceBombError::MatchOver);
        }
        if self.live_count(&player.id) >= player.max_bombs as usize {
            return Err(PlaceBombError::LimitReached(player.max_bombs));
        }
        let tile = player.tile();
        if self.bomb_at(tile).is_some() {
            return Err(PlaceBombError::Occupied(tile));
        }
        if grid.get(tile) == Some(Cell::Wall) {
            return Err(PlaceBombError::Wall);
        }

        self.next_id += 1;
        let bomb = Bomb {
            id: self.next_id,
            owner_id: player.id.clone(),
            row: tile.row,
            col: tile.col,
            range: player.bomb_range,
            explodes_at: now + BOMB_FUSE_MS,
            exploded: false,
        };
        debug!("Bomb {} dropped at [{}, {}]", bomb.id, bomb.row, bomb.col);
        self.bombs.push(bomb.clone());
        Ok(bomb)
    }

    /// Records a bomb placed by a peer so local chain reactions can find it.
    pub fn track_remote(&mut self, owner_id: &str, tile: Tile, range: u32, now: u64) -> BombId {
        self.next_id += 1;
        self.bombs.push(Bomb {
            id: self.next_id,
            owner_id: owner_id.to_string(),
            row: tile.row,
            col: tile.col,
            range,
            explodes_at: now + BOMB_FUSE_MS,
            exploded: false,
        });
        self.next_id
    }

    /// Ids of bombs whose fuse has run out, oldest first.
    pub fn due_bombs(&self, now: u64) -> Vec<BombId> {
        self.bombs
            .iter()
            .filter(|b| !b.exploded && b.explodes_at <= now)
            .map(|b| b.id)
            .collect()
    }

    pub fn remove(&mut self, id: BombId) -> Option<Bomb> {
        let index = self.bombs.iter().position(|b| b.id == id)?;
        Some(self.bombs.remove(index))
    }

    /// Removes the live bomb on `tile` without running its blast (used when a
    /// peer reports the explosion).
    pub fn remove_at(&mut self, tile: Tile) -> Option<Bomb> {
        let index = self.bombs.iter().position(|b| b.tile() == tile)?;
        Some(self.bombs.remove(index))
    }

    /// Removes every bomb standing on one of `tiles`. A peer's blast already
    /// set them off, so they must not go off again here.
    pub fn retire_on(&mut self, tiles: &[Tile]) -> Vec<Bomb> {
        let (retired, kept): (Vec<Bomb>, Vec<Bomb>) = std::mem::take(&mut self.bombs)
            .into_iter()
            .partition(|b| tiles.contains(&b.tile()));
        self.bombs = kept;
        retired
    }

    /// Replays a peer's blast that arrived without a tile list: the blast from
    /// `origin` plus every tracked bomb it chains into. Reached bombs are removed.
    /// The grid is left alone and nothing is rolled.
    pub fn retire_chain(&mut self, origin: Tile, range: u32, grid: &Grid) -> Vec<Tile> {
        self.remove_at(origin);
        let mut tiles: Vec<Tile> = Vec::new();
        let mut pending = vec![(origin, range)];
        while let Some((center, range)) = pending.pop() {
            for tile in blast_tiles(center, range, grid) {
                if tiles.contains(&tile) {
                    continue;
                }
                tiles.push(tile);
                if let Some(bomb) = self.remove_at(tile) {
                    debug!("Bomb {} chained by a peer's blast", bomb.id);
                    pending.push((tile, bomb.range));
                }
            }
        }
        tiles
    }

    pub fn clear(&mut self) {
        self.bombs.clear();
    }

    /// Detonates a bomb and everything its blast reaches. Returns `None` when the
    /// bomb is unknown or already exploded.
    pub fn detonate(
        &mut self,
        id: BombId,
        grid: &mut Grid,
        players: &mut [Player],
        powerups: &mut PowerupManager,
    ) -> Option<ExplosionOutcome> {
        let mut outcome = ExplosionOutcome::default();
        let mut hit_players = HashSet::new();
        if !self.detonate_inner(id, grid, players, powerups, &mut outcome, &mut hit_players) {
            return None;
        }
        info!(
            "Explosion: {} bomb(s), {} tile(s), {} block(s) destroyed",
            outcome.detonated.len(),
            outcome.tiles.len(),
            outcome.destroyed_blocks.len()
        );
        Some(outcome)
    }

    fn detonate_inner(
        &mut self,
        id: BombId,
        grid: &mut Grid,
        players: &mut [Player],
        powerups: &mut PowerupManager,
        outcome: &mut ExplosionOutcome,
        hit_players: &mut HashSet<String>,
    ) -> bool {
        let Some(bomb) = self.bombs.iter_mut().find(|b| b.id == id) else {
            return false;
        };
        if bomb.exploded {
            return false;
        }
        bomb.exploded = true;
        let (origin, range) = (bomb.tile(), bomb.range);
        outcome.detonated.push(id);

        let tiles = blast_tiles(origin, range, grid);
        for &tile in &tiles {
            outcome.push_tile(tile);
        }

        // Chain reactions resolve before this blast clears its own blocks.
        let chained: Vec<BombId> = self
            .bombs
            .iter()
            .filter(|b| !b.exploded && tiles.contains(&b.tile()))
            .map(|b| b.id)
            .collect();
        for chained_id in chained {
            self.detonate_inner(chained_id, grid, players, powerups, outcome, hit_players);
        }

        for &tile in &tiles {
            if grid.get(tile) == Some(Cell::Block) {
                grid.set(tile, Cell::Empty);
                outcome.destroyed_blocks.push(tile);
                if let Some(powerup) = powerups.roll_drop(tile) {
                    outcome.spawned.push(powerup);
                }
            }
        }

        for player in players.iter_mut() {
            if player.dead || hit_players.contains(&player.id) || !tiles.contains(&player.tile()) {
                continue;
            }
            hit_players.insert(player.id.clone());
            let result = player.apply_damage(1);
            outcome.damaged.push((player.id.clone(), result));
        }

        self.bombs.retain(|b| b.id != id);
        true
    }
}
