//! Powerup drops, collection, and timed effects.
//!
//! All randomness for drops lives in the manager's injected RNG so a test (or
//! a replaying peer) can pin the outcome with a seed.

use crate::grid::Tile;
use crate::{Player, DEFAULT_BOMB_RANGE, DEFAULT_MAX_BOMBS, DEFAULT_SPEED};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub const POWERUP_DROP_CHANCE: f64 = 0.3;
pub const POWERUP_DURATION_MS: u64 = 30_000;
/// How long an expired effect stays listed (disabled) before it is dropped.
pub const EFFECT_FADE_MS: u64 = 3_000;
const SPEED_FACTOR: f32 = 1.2;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PowerupKind {
    Bombs,
    Flames,
    Speed,
}

impl PowerupKind {
    pub const ALL: [PowerupKind; 3] = [PowerupKind::Bombs, PowerupKind::Flames, PowerupKind::Speed];

    pub fn label(self) -> &'static str {
        match self {
            PowerupKind::Bombs => "Bombs",
            PowerupKind::Flames => "Flames",
            PowerupKind::Speed => "Speed",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Powerup {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: PowerupKind,
    pub row: i32,
    pub col: i32,
}

impl Powerup {
    pub fn tile(&self) -> Tile {
        Tile::new(self.row, self.col)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveEffect {
    pub id: u64,
    pub player_id: String,
    pub kind: PowerupKind,
    pub expires_at: u64,
    /// Set once the effect has run out; the entry lingers for `EFFECT_FADE_MS`.
    pub disabled: bool,
}

pub struct PowerupManager {
    rng: StdRng,
    powerups: Vec<Powerup>,
    effects: Vec<ActiveEffect>,
    next_id: u64,
}

impl PowerupManager {
    pub fn new(rng: StdRng) -> Self {
        Self {
            rng,
            powerups: Vec::new(),
            effects: Vec::new(),
            next_id: 1,
        }
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn powerups(&self) -> &[Powerup] {
        &self.powerups
    }

    pub fn effects(&self) -> &[ActiveEffect] {
        &self.effects
    }

    pub fn effects_for<'a>(&'a self, player_id: &'a str) -> impl Iterator<Item = &'a ActiveEffect> {
        self.effects.iter().filter(move |e| e.player_id == player_id)
    }

    pub fn powerup_at(&self, tile: Tile) -> Option<&Powerup> {
        self.powerups.iter().find(|p| p.tile() == tile)
    }

    /// Rolls the drop for a destroyed block. This is the only place drop
    /// randomness is consumed.
    pub fn roll_drop(&mut self, tile: Tile) -> Option<Powerup> {
        if !self.rng.gen_bool(POWERUP_DROP_CHANCE) {
            return None;
        }
        let kind = PowerupKind::ALL[self.rng.gen_range(0..PowerupKind::ALL.len())];
        Some(self.spawn_at(tile, kind))
    }

    /// Adds a powerup whose kind was decided elsewhere (a peer's notification).
    /// A tile holds at most one powerup; an existing one is returned unchanged.
    pub fn spawn_at(&mut self, tile: Tile, kind: PowerupKind) -> Powerup {
        if let Some(existing) = self.powerup_at(tile) {
            return existing.clone();
        }
        let powerup = Powerup {
            id: format!("powerup-{}", self.next_id),
            kind,
            row: tile.row,
            col: tile.col,
        };
        self.next_id += 1;
        debug!("Powerup {:?} spawned at [{}, {}]", kind, tile.row, tile.col);
        self.powerups.push(powerup.clone());
        powerup
    }

    pub fn remove_at(&mut self, tile: Tile) -> Option<Powerup> {
        let index = self.powerups.iter().position(|p| p.tile() == tile)?;
        Some(self.powerups.remove(index))
    }

    /// Picks up the powerup under the player, applying its effect for
    /// `POWERUP_DURATION_MS`.
    pub fn collect(&mut self, player: &mut Player, now: u64) -> Option<Powerup> {
        let powerup = self.remove_at(player.tile())?;
        match powerup.kind {
            PowerupKind::Bombs => player.max_bombs += 1,
            PowerupKind::Flames => player.bomb_range += 1,
            PowerupKind::Speed => player.speed *= SPEED_FACTOR,
        }
        self.effects.push(ActiveEffect {
            id: self.next_id,
            player_id: player.id.clone(),
            kind: powerup.kind,
            expires_at: now + POWERUP_DURATION_MS,
            disabled: false,
        });
        self.next_id += 1;
        Some(powerup)
    }

    /// Reverts effects that ran out and drops faded ones. Returns the kinds that
    /// expired during this call.
    pub fn expire(&mut self, player: &mut Player, now: u64) -> Vec<PowerupKind> {
        let mut expired = Vec::new();
        for effect in self
            .effects
            .iter_mut()
            .filter(|e| e.player_id == player.id && !e.disabled && e.expires_at <= now)
        {
            effect.disabled = true;
            match effect.kind {
                PowerupKind::Bombs => {
                    player.max_bombs = player.max_bombs.saturating_sub(1).max(DEFAULT_MAX_BOMBS)
                }
                PowerupKind::Flames => {
                    player.bomb_range = player.bomb_range.saturating_sub(1).max(DEFAULT_BOMB_RANGE)
                }
                PowerupKind::Speed => player.speed = (player.speed / SPEED_FACTOR).max(DEFAULT_SPEED),
            }
            expired.push(effect.kind);
        }
        self.effects
            .retain(|e| !(e.disabled && e.expires_at + EFFECT_FADE_MS <= now));
        expired
    }

    /// Forgets every effect of a player (their stats are reset by the caller).
    pub fn clear_for(&mut self, player_id: &str) {
        self.effects.retain(|e| e.player_id != player_id);
    }

    pub fn clear(&mut self) {
        self.powerups.clear();
        self.effects.clear();
    }
}
