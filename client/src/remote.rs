//! Proxies for the other players in the session.
//!
//! A proxy is created the first time an id shows up (lobby list, snapshot,
//! relayed action) and only goes away on an explicit `playerLeft` or `died`.
//! A player missing from one list is not a reason to drop them. A player that
//! died stays gone until the next match starts.

use log::{debug, info};
use shared::grid::{spawn_for, tile_to_pixels};
use shared::protocol::PlayerSummary;
use shared::{Facing, Player, Tile};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub id: String,
    pub nickname: Option<String>,
    pub client_id: Option<String>,
    pub player: Player,
}

impl RemotePlayer {
    fn new(id: &str, nickname: Option<String>, client_id: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            nickname,
            client_id,
            player: Player::new(id, spawn_for(0)),
        }
    }

    pub fn tile(&self) -> Tile {
        self.player.tile()
    }
}

#[derive(Debug, Default)]
pub struct RemotePlayers {
    players: HashMap<String, RemotePlayer>,
    dead: HashSet<String>,
    local_id: Option<String>,
    local_client_id: Option<String>,
}

impl RemotePlayers {
    pub fn new(local_client_id: Option<String>) -> Self {
        Self {
            local_client_id,
            ..Self::default()
        }
    }

    /// Records the connection id the server gave us. A proxy that was created
    /// for it before `joined` arrived is dropped.
    pub fn set_local_id(&mut self, id: &str) {
        self.players.remove(id);
        self.local_id = Some(id.to_string());
    }

    fn is_local(&self, id: &str, client_id: Option<&str>) -> bool {
        self.local_id.as_deref() == Some(id)
            || (client_id.is_some() && client_id == self.local_client_id.as_deref())
    }

    /// Creates a proxy on first sighting. Returns true if one was created.
    pub fn sight(&mut self, id: &str, nickname: Option<&str>, client_id: Option<&str>) -> bool {
        if id.is_empty() || self.is_local(id, client_id) || self.dead.contains(id) {
            return false;
        }
        if let Some(existing) = self.players.get_mut(id) {
            if existing.nickname.is_none() {
                existing.nickname = nickname.map(str::to_string);
            }
            if existing.client_id.is_none() {
                existing.client_id = client_id.map(str::to_string);
            }
            return false;
        }

        // A reconnected player shows up under a new id but the same client id.
        if let Some(client_id) = client_id {
            let stale: Vec<String> = self
                .players
                .values()
                .filter(|p| p.client_id.as_deref() == Some(client_id))
                .map(|p| p.id.clone())
                .collect();
            for old in stale {
                debug!("Proxy {} replaced by {} (client {})", old, id, client_id);
                self.players.remove(&old);
            }
        }

        let proxy = RemotePlayer::new(
            id,
            nickname.map(str::to_string),
            client_id.map(str::to_string),
        );
        info!(
            "Remote player {} ({}) appeared",
            proxy.nickname.as_deref().unwrap_or("?"),
            id
        );
        self.players.insert(id.to_string(), proxy);
        true
    }

    /// Sights every entry of a lobby list. Newly created proxies are placed at
    /// their spawn corner.
    pub fn apply_lobby(&mut self, players: &[PlayerSummary]) {
        for summary in players {
            let created = self.sight(
                &summary.id,
                Some(&summary.nickname),
                summary.client_id.as_deref(),
            );
            if created {
                let index = summary.join_index.unwrap_or(summary.player_index);
                self.place_at_spawn(&summary.id, index as usize);
            }
        }
    }

    pub fn place_at_spawn(&mut self, id: &str, player_index: usize) {
        if let Some(proxy) = self.players.get_mut(id) {
            let spawn = spawn_for(player_index);
            proxy.player.spawn = spawn;
            proxy.player.respawn_at_spawn();
        }
    }

    /// Moves a proxy, creating it if this is the first we hear of `id`.
    /// Without pixel coordinates the sprite is centered on the tile.
    pub fn apply_move(
        &mut self,
        id: &str,
        row: i32,
        col: i32,
        x: Option<f32>,
        y: Option<f32>,
        direction: Option<Facing>,
    ) {
        self.sight(id, None, None);
        let Some(proxy) = self.players.get_mut(id) else {
            return;
        };
        let (tile_x, tile_y) = tile_to_pixels(Tile::new(row, col));
        proxy.player.x = x.unwrap_or(tile_x);
        proxy.player.y = y.unwrap_or(tile_y);
        proxy.player.row = row;
        proxy.player.col = col;
        if let Some(direction) = direction {
            proxy.player.facing = direction;
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<RemotePlayer> {
        let removed = self.players.remove(id);
        if let Some(proxy) = &removed {
            info!(
                "Remote player {} ({}) removed",
                proxy.nickname.as_deref().unwrap_or("?"),
                id
            );
        }
        removed
    }

    /// Removes the proxy and refuses to sight `id` again this match.
    pub fn mark_dead(&mut self, id: &str) -> Option<RemotePlayer> {
        self.dead.insert(id.to_string());
        self.remove(id)
    }

    pub fn is_dead(&self, id: &str) -> bool {
        self.dead.contains(id)
    }

    /// Forgets this match's deaths.
    pub fn reset_match(&mut self) {
        self.dead.clear();
    }

    pub fn get(&self, id: &str) -> Option<&RemotePlayer> {
        self.players.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{TILE_OFFSET, TILE_SIZE};

    fn summary(id: &str, client_id: &str, player_index: u8, join_index: Option<u8>) -> PlayerSummary {
        PlayerSummary {
            id: id.to_string(),
            nickname: id.to_uppercase(),
            client_id: Some(client_id.to_string()),
            in_lobby: true,
            player_index,
            join_index,
        }
    }

    #[test]
    fn test_local_player_is_never_proxied() {
        let mut remotes = RemotePlayers::new(Some("mine".to_string()));
        remotes.set_local_id("me");
        assert!(!remotes.sight("me", Some("Me"), None));
        assert!(!remotes.sight("old-me", Some("Me"), Some("mine")));
        assert!(remotes.is_empty());
    }

    #[test]
    fn test_proxy_created_once() {
        let mut remotes = RemotePlayers::new(None);
        assert!(remotes.sight("a", Some("Ann"), Some("c1")));
        assert!(!remotes.sight("a", Some("Ann"), Some("c1")));
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes.get("a").unwrap().nickname.as_deref(), Some("Ann"));
    }

    #[test]
    fn test_same_client_id_replaces_proxy() {
        let mut remotes = RemotePlayers::new(None);
        remotes.sight("a", Some("Ann"), Some("c1"));
        remotes.sight("b", Some("Ben"), Some("c2"));
        remotes.sight("a2", Some("Ann"), Some("c1"));
        assert!(remotes.get("a").is_none());
        assert!(remotes.get("a2").is_some());
        assert_eq!(remotes.len(), 2);
    }

    #[test]
    fn test_lobby_sighting_places_at_join_slot() {
        let mut remotes = RemotePlayers::new(None);
        remotes.apply_lobby(&[summary("a", "c1", 0, Some(3)), summary("b", "c2", 1, None)]);

        assert_eq!(remotes.get("a").unwrap().tile(), spawn_for(3));
        assert_eq!(remotes.get("b").unwrap().tile(), spawn_for(1));

        // Missing from a later list does not remove anyone.
        remotes.apply_lobby(&[summary("b", "c2", 0, None)]);
        assert_eq!(remotes.len(), 2);
    }

    #[test]
    fn test_move_without_pixels_centers_on_tile() {
        let mut remotes = RemotePlayers::new(None);
        remotes.apply_move("a", 3, 5, None, None, Some(Facing::Up));
        let proxy = remotes.get("a").unwrap();
        assert_approx_eq!(proxy.player.x, 5.0 * TILE_SIZE + TILE_OFFSET);
        assert_approx_eq!(proxy.player.y, 3.0 * TILE_SIZE + TILE_OFFSET);
        assert_eq!(proxy.player.facing, Facing::Up);

        remotes.apply_move("a", 3, 6, Some(241.5), Some(124.0), None);
        let proxy = remotes.get("a").unwrap();
        assert_approx_eq!(proxy.player.x, 241.5);
        assert_eq!(proxy.tile(), Tile::new(3, 6));
        assert_eq!(proxy.player.facing, Facing::Up);
    }

    #[test]
    fn test_dead_player_stays_gone_until_next_match() {
        let mut remotes = RemotePlayers::new(None);
        remotes.sight("a", Some("Ann"), Some("c1"));
        assert!(remotes.mark_dead("a").is_some());

        assert!(!remotes.sight("a", Some("Ann"), Some("c1")));
        remotes.apply_move("a", 3, 5, None, None, None);
        remotes.apply_lobby(&[summary("a", "c1", 0, None)]);
        assert!(remotes.is_empty());
        assert!(remotes.is_dead("a"));

        remotes.reset_match();
        remotes.apply_move("a", 3, 5, None, None, None);
        assert_eq!(remotes.get("a").unwrap().tile(), Tile::new(3, 5));
    }

    #[test]
    fn test_set_local_id_drops_early_proxy() {
        let mut remotes = RemotePlayers::new(None);
        remotes.sight("me", None, None);
        remotes.set_local_id("me");
        assert!(remotes.is_empty());
    }
}
