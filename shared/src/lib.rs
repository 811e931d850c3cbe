use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod bombs;
pub mod grid;
pub mod powerups;
pub mod protocol;

pub use bombs::{Bomb, BombManager, ExplosionOutcome, MatchState, PlaceBombError};
pub use grid::{Cell, Grid, Tile};
pub use powerups::{ActiveEffect, Powerup, PowerupKind, PowerupManager};
pub use protocol::{decode, encode, GameEvent, LobbyPhase, MapPayload, Message, ProtocolError};

pub const GRID_ROWS: usize = 13;
pub const GRID_COLS: usize = 15;
pub const TILE_SIZE: f32 = 40.0;
pub const PLAYER_SIZE: f32 = 32.0;
pub const TILE_OFFSET: f32 = (TILE_SIZE - PLAYER_SIZE) / 2.0;

pub const BOMB_FUSE_MS: u64 = 3000;
pub const DEFAULT_LIVES: u8 = 3;
pub const DEFAULT_MAX_BOMBS: u32 = 1;
pub const DEFAULT_BOMB_RANGE: u32 = 1;
pub const DEFAULT_SPEED: f32 = 1.0;

pub const MAX_NICKNAME_LEN: usize = 32;
pub const MAX_CLIENT_ID_LEN: usize = 64;
pub const CHAT_HISTORY_CAP: usize = 100;
pub const MAX_PLAYERS: usize = 4;

/// Current wall clock in milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Truncates to at most `max` characters without splitting a code point.
pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Sprite facing, encoded on the wire as 0..=3.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(into = "u8", from = "u8")]
pub enum Facing {
    #[default]
    Down,
    Left,
    Right,
    Up,
}

impl From<u8> for Facing {
    fn from(value: u8) -> Self {
        match value {
            1 => Facing::Left,
            2 => Facing::Right,
            3 => Facing::Up,
            _ => Facing::Down,
        }
    }
}

impl From<Facing> for u8 {
    fn from(value: Facing) -> Self {
        match value {
            Facing::Down => 0,
            Facing::Left => 1,
            Facing::Right => 2,
            Facing::Up => 3,
        }
    }
}

/// What a single damage unit did to a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageResult {
    Ignored,
    Respawned,
    Died,
}

/// Gameplay stats for one player as seen by the party simulating it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Player {
    pub id: String,
    pub row: i32,
    pub col: i32,
    pub x: f32,
    pub y: f32,
    pub facing: Facing,
    pub spawn: Tile,
    pub lives: u8,
    pub max_bombs: u32,
    pub bomb_range: u32,
    pub speed: f32,
    pub dead: bool,
}

impl Player {
    pub fn new(id: impl Into<String>, spawn: Tile) -> Self {
        let (x, y) = grid::tile_to_pixels(spawn);
        Self {
            id: id.into(),
            row: spawn.row,
            col: spawn.col,
            x,
            y,
            facing: Facing::Down,
            spawn,
            lives: DEFAULT_LIVES,
            max_bombs: DEFAULT_MAX_BOMBS,
            bomb_range: DEFAULT_BOMB_RANGE,
            speed: DEFAULT_SPEED,
            dead: false,
        }
    }

    pub fn tile(&self) -> Tile {
        Tile::new(self.row, self.col)
    }

    /// Moves to absolute pixel coordinates and recomputes the grid cell from
    /// the sprite center.
    pub fn set_position(&mut self, x: f32, y: f32) {
        self.x = x;
        self.y = y;
        let tile = grid::pixels_to_tile(x, y);
        self.row = tile.row;
        self.col = tile.col;
    }

    pub fn respawn_at_spawn(&mut self) {
        let (x, y) = grid::tile_to_pixels(self.spawn);
        self.row = self.spawn.row;
        self.col = self.spawn.col;
        self.x = x;
        self.y = y;
    }

    /// Drops every powerup upgrade back to the defaults.
    pub fn reset_powerups(&mut self) {
        self.max_bombs = DEFAULT_MAX_BOMBS;
        self.bomb_range = DEFAULT_BOMB_RANGE;
        self.speed = DEFAULT_SPEED;
    }

    /// Applies damage. A surviving player loses their upgrades and is sent back
    /// to their spawn corner.
    pub fn apply_damage(&mut self, amount: u8) -> DamageResult {
        if self.dead {
            return DamageResult::Ignored;
        }
        self.lives = self.lives.saturating_sub(amount);
        self.reset_powerups();
        if self.lives == 0 {
            self.dead = true;
            DamageResult::Died
        } else {
            self.respawn_at_spawn();
            DamageResult::Respawned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_player_creation() {
        let player = Player::new("p1", Tile::new(1, 13));
        assert_eq!(player.id, "p1");
        assert_eq!(player.row, 1);
        assert_eq!(player.col, 13);
        assert_approx_eq!(player.x, 13.0 * TILE_SIZE + TILE_OFFSET);
        assert_approx_eq!(player.y, TILE_SIZE + TILE_OFFSET);
        assert_eq!(player.lives, DEFAULT_LIVES);
        assert!(!player.dead);
    }

    #[test]
    fn test_set_position_uses_sprite_center() {
        let mut player = Player::new("p1", Tile::new(1, 1));
        player.set_position(2.0 * TILE_SIZE + 20.0, 3.0 * TILE_SIZE + 2.0);
        assert_eq!(player.tile(), Tile::new(3, 2));
    }

    #[test]
    fn test_damage_respawns_and_resets_powerups() {
        let mut player = Player::new("p1", Tile::new(1, 1));
        player.max_bombs = 3;
        player.bomb_range = 2;
        player.speed = 1.44;
        player.set_position(200.0, 200.0);

        assert_eq!(player.apply_damage(1), DamageResult::Respawned);
        assert_eq!(player.lives, 2);
        assert_eq!(player.tile(), Tile::new(1, 1));
        assert_eq!(player.max_bombs, DEFAULT_MAX_BOMBS);
        assert_eq!(player.bomb_range, DEFAULT_BOMB_RANGE);
        assert_approx_eq!(player.speed, DEFAULT_SPEED);
    }

    #[test]
    fn test_damage_kills_at_zero_lives() {
        let mut player = Player::new("p1", Tile::new(1, 1));
        player.apply_damage(1);
        player.apply_damage(1);
        assert_eq!(player.apply_damage(1), DamageResult::Died);
        assert!(player.dead);
        assert_eq!(player.apply_damage(1), DamageResult::Ignored);
        assert_eq!(player.lives, 0);
    }

    #[test]
    fn test_facing_wire_encoding() {
        assert_eq!(serde_json::to_string(&Facing::Up).unwrap(), "3");
        let facing: Facing = serde_json::from_str("1").unwrap();
        assert_eq!(facing, Facing::Left);
        let fallback: Facing = serde_json::from_str("9").unwrap();
        assert_eq!(fallback, Facing::Down);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("żółw", 2), "żó");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }
}
