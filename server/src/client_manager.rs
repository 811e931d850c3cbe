//! Session roster and player identity reconciliation
//!
//! Every joined connection owns one [`PlayerEntry`]. A join that matches an
//! existing entry (same persistent client id, or the same nickname from the
//! same network origin when no client id is sent) is treated as a reconnect:
//! the stale entry is replaced and the player keeps their nickname and slot.
//! Otherwise the requested nickname is made unique within the session.

use log::info;
use shared::protocol::PlayerSummary;
use shared::{truncate_chars, MAX_CLIENT_ID_LEN, MAX_NICKNAME_LEN, MAX_PLAYERS};
use std::collections::HashSet;

const DEFAULT_NICKNAME: &str = "Player";
const MAX_SUFFIX_ATTEMPTS: usize = 1000;

/// A joined connection and the identity it claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEntry {
    /// Server-generated connection id
    pub id: String,
    /// Unique (case-insensitive) within the session
    pub nickname: String,
    /// Persistent id the client keeps across reconnects
    pub client_id: Option<String>,
    /// Remote address the connection came from
    pub origin: Option<String>,
    /// False while the player is on a screen other than the lobby
    pub in_lobby: bool,
    /// Spawn slot assigned at join
    pub player_index: u8,
}

#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub nickname: String,
    pub client_id: Option<String>,
    pub origin: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub entry: PlayerEntry,
    /// Entry this join took over, when it was a reconnect.
    pub replaced: Option<PlayerEntry>,
}

/// Joined players of one session, in join order.
#[derive(Debug, Default)]
pub struct ClientManager {
    entries: Vec<PlayerEntry>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `conn_id` under the identity in `request`.
    pub fn join(&mut self, conn_id: &str, request: JoinRequest) -> JoinOutcome {
        let requested = sanitize_nickname(&request.nickname);
        let client_id = request
            .client_id
            .map(|id| truncate_chars(&id, MAX_CLIENT_ID_LEN))
            .filter(|id| !id.is_empty());

        let replaced = self
            .find_reconnect(conn_id, client_id.as_deref(), &requested, request.origin.as_deref())
            .map(|index| self.entries.remove(index));

        let (nickname, player_index) = match &replaced {
            Some(previous) => (previous.nickname.clone(), previous.player_index),
            None => (self.unique_nickname(&requested), self.next_player_index()),
        };

        let entry = PlayerEntry {
            id: conn_id.to_string(),
            nickname,
            client_id,
            origin: request.origin,
            in_lobby: true,
            player_index,
        };

        match &replaced {
            Some(previous) if previous.id != conn_id => info!(
                "Player {} reconnected as {} (was {})",
                entry.nickname, entry.id, previous.id
            ),
            Some(_) => info!("Player {} ({}) re-sent join", entry.nickname, entry.id),
            None => info!(
                "Player joined: {} ({}) | Index: {} | Total: {}",
                entry.nickname,
                entry.id,
                entry.player_index,
                self.entries.len() + 1
            ),
        }

        self.entries.push(entry.clone());
        JoinOutcome { entry, replaced }
    }

    fn find_reconnect(
        &self,
        conn_id: &str,
        client_id: Option<&str>,
        nickname: &str,
        origin: Option<&str>,
    ) -> Option<usize> {
        if let Some(index) = self.entries.iter().position(|e| e.id == conn_id) {
            return Some(index);
        }
        if let Some(client_id) = client_id {
            return self
                .entries
                .iter()
                .position(|e| e.client_id.as_deref() == Some(client_id));
        }
        let origin = origin?;
        self.entries
            .iter()
            .position(|e| e.nickname == nickname && e.origin.as_deref() == Some(origin))
    }

    /// Join-order slot, moved to the lowest free slot if an occupant holds it.
    fn next_player_index(&self) -> u8 {
        let last = MAX_PLAYERS as u8 - 1;
        let preferred = (self.entries.len() as u8).min(last);
        let taken: HashSet<u8> = self.entries.iter().map(|e| e.player_index).collect();
        if !taken.contains(&preferred) {
            return preferred;
        }
        (0..=last).find(|i| !taken.contains(i)).unwrap_or(preferred)
    }

    /// Appends " (n)" to `requested` until no occupant holds the name,
    /// ignoring case.
    pub fn unique_nickname(&self, requested: &str) -> String {
        let taken: HashSet<String> = self.entries.iter().map(|e| e.nickname.to_lowercase()).collect();
        let base = sanitize_nickname(requested);
        let mut candidate = base.clone();
        let mut suffix = 1;
        while taken.contains(&candidate.to_lowercase()) && suffix <= MAX_SUFFIX_ATTEMPTS {
            suffix += 1;
            let tail = format!(" ({})", suffix);
            let room = MAX_NICKNAME_LEN.saturating_sub(tail.chars().count());
            candidate = format!("{}{}", truncate_chars(&base, room), tail);
        }
        candidate
    }

    pub fn remove(&mut self, conn_id: &str) -> Option<PlayerEntry> {
        let index = self.entries.iter().position(|e| e.id == conn_id)?;
        Some(self.entries.remove(index))
    }

    pub fn get(&self, conn_id: &str) -> Option<&PlayerEntry> {
        self.entries.iter().find(|e| e.id == conn_id)
    }

    pub fn contains(&self, conn_id: &str) -> bool {
        self.get(conn_id).is_some()
    }

    /// Returns false when the connection never joined.
    pub fn set_in_lobby(&mut self, conn_id: &str, in_lobby: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.id == conn_id) {
            Some(entry) => {
                entry.in_lobby = in_lobby;
                true
            }
            None => false,
        }
    }

    /// Players counted towards starting a match.
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.in_lobby).count()
    }

    pub fn entries(&self) -> &[PlayerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Players shown in the lobby: one row per client id (or connection), only
    /// those on the lobby screen, with display slots renumbered in list order.
    pub fn presence_list(&self) -> Vec<PlayerSummary> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|e| e.in_lobby)
            .filter(|e| seen.insert(e.client_id.clone().unwrap_or_else(|| e.id.clone())))
            .enumerate()
            .map(|(position, e)| PlayerSummary {
                id: e.id.clone(),
                nickname: e.nickname.clone(),
                client_id: e.client_id.clone(),
                in_lobby: true,
                player_index: position.min(MAX_PLAYERS - 1) as u8,
                join_index: Some(e.player_index),
            })
            .collect()
    }
}

fn sanitize_nickname(requested: &str) -> String {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        DEFAULT_NICKNAME.to_string()
    } else {
        truncate_chars(trimmed, MAX_NICKNAME_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(nickname: &str, client_id: Option<&str>, origin: Option<&str>) -> JoinRequest {
        JoinRequest {
            nickname: nickname.to_string(),
            client_id: client_id.map(str::to_string),
            origin: origin.map(str::to_string),
        }
    }

    #[test]
    fn test_first_join_gets_slot_zero() {
        let mut roster = ClientManager::new();
        let outcome = roster.join("aaaaaaa", request("Ann", Some("c1"), None));
        assert_eq!(outcome.entry.player_index, 0);
        assert_eq!(outcome.entry.nickname, "Ann");
        assert!(outcome.replaced.is_none());
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_duplicate_nicknames_get_suffix() {
        let mut roster = ClientManager::new();
        roster.join("a", request("Bob", Some("c1"), None));
        let second = roster.join("b", request("bob", Some("c2"), None));
        let third = roster.join("c", request("BOB", Some("c3"), None));
        assert_eq!(second.entry.nickname, "bob (2)");
        assert_eq!(third.entry.nickname, "BOB (3)");
    }

    #[test]
    fn test_nickname_sanitizing() {
        let mut roster = ClientManager::new();
        let blank = roster.join("a", request("   ", Some("c1"), None));
        assert_eq!(blank.entry.nickname, "Player");

        let long = "x".repeat(40);
        let first = roster.join("b", request(&long, Some("c2"), None));
        let second = roster.join("c", request(&long, Some("c3"), None));
        assert_eq!(first.entry.nickname.chars().count(), MAX_NICKNAME_LEN);
        assert_eq!(second.entry.nickname.chars().count(), MAX_NICKNAME_LEN);
        assert!(second.entry.nickname.ends_with(" (2)"));
        assert_ne!(first.entry.nickname, second.entry.nickname);
    }

    #[test]
    fn test_reconnect_by_client_id_keeps_identity() {
        let mut roster = ClientManager::new();
        roster.join("a", request("Ann", Some("c1"), None));
        roster.join("b", request("Ben", Some("c2"), None));

        let outcome = roster.join("z", request("Somebody else", Some("c1"), None));
        assert_eq!(outcome.entry.nickname, "Ann");
        assert_eq!(outcome.entry.player_index, 0);
        assert_eq!(outcome.replaced.unwrap().id, "a");
        assert_eq!(roster.len(), 2);
        assert!(!roster.contains("a"));
        assert!(roster.contains("z"));
    }

    #[test]
    fn test_origin_fallback_only_without_client_id() {
        let mut roster = ClientManager::new();
        roster.join("a", request("Ann", None, Some("10.0.0.1")));

        let same = roster.join("b", request("Ann", None, Some("10.0.0.1")));
        assert_eq!(same.replaced.map(|e| e.id), Some("a".to_string()));

        let with_id = roster.join("c", request("Ann", Some("c9"), Some("10.0.0.1")));
        assert!(with_id.replaced.is_none());
        assert_eq!(with_id.entry.nickname, "Ann (2)");

        let other_origin = roster.join("d", request("Ann", None, Some("10.0.0.2")));
        assert!(other_origin.replaced.is_none());
        assert_eq!(other_origin.entry.nickname, "Ann (3)");
    }

    #[test]
    fn test_player_indices_stay_unique() {
        let mut roster = ClientManager::new();
        roster.join("a", request("A", Some("1"), None));
        roster.join("b", request("B", Some("2"), None));
        roster.join("c", request("C", Some("3"), None));
        roster.remove("a");

        // Join order gives slot 2, which "c" still holds.
        let outcome = roster.join("d", request("D", Some("4"), None));
        assert_eq!(outcome.entry.player_index, 0);

        let indices: HashSet<u8> = roster.entries().iter().map(|e| e.player_index).collect();
        assert_eq!(indices.len(), roster.len());
        assert!(indices.iter().all(|i| *i <= 3));
    }

    #[test]
    fn test_presence_list_dedupes_and_excludes() {
        let mut roster = ClientManager::new();
        roster.join("a", request("A", Some("1"), None));
        roster.join("b", request("B", Some("2"), None));
        roster.join("c", request("C", Some("3"), None));
        roster.set_in_lobby("a", false);

        let list = roster.presence_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "b");
        assert_eq!(list[0].player_index, 0);
        assert_eq!(list[0].join_index, Some(1));
        assert_eq!(list[1].player_index, 1);
        assert_eq!(roster.active_count(), 2);
    }

    #[test]
    fn test_set_in_lobby_unknown_connection() {
        let mut roster = ClientManager::new();
        assert!(!roster.set_in_lobby("ghost", false));
    }
}
