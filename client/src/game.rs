//! Client-side match state and reconciliation.
//!
//! Each client is authoritative for its own player and its own bombs: it runs
//! the fuse, the blast, the drop rolls and its own damage, then tells everyone
//! what happened. Everything a peer reports is applied as given. Snapshots
//! from the server only move remote proxies, and are ordered by the mirror
//! sequence number so a stale one never undoes a newer relayed action.

use crate::remote::RemotePlayers;
use log::{debug, info, warn};
use shared::bombs::apply_remote_blast;
use shared::grid::spawn_for;
use shared::protocol::{
    ActionPayload, ExplosionCenter, JoinedPayload, LobbyStatePayload, PauseAction, PlayerSummary,
    SnapshotView,
};
use shared::{
    BombManager, Cell, DamageResult, Facing, GameEvent, Grid, LobbyPhase, MapPayload, MatchState,
    Message, PlaceBombError, Player, PowerupManager, Tile, DEFAULT_BOMB_RANGE,
};
use std::collections::VecDeque;
use thiserror::Error;

/// Length of a match once the server starts it.
pub const MATCH_DURATION_MS: u64 = 120_000;
/// A peer's bomb is forgotten this long after its fuse if its owner never
/// reported the explosion.
const REMOTE_BOMB_GRACE_MS: u64 = 2_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("no match is running")]
    NotPlaying,
    #[error("the game is paused")]
    Paused,
    #[error("tile [{}, {}] is blocked", .0.row, .0.col)]
    Blocked(Tile),
    #[error(transparent)]
    Bomb(#[from] PlaceBombError),
}

pub struct ClientGameState {
    grid: Grid,
    local: Player,
    player_index: u8,
    remotes: RemotePlayers,
    bombs: BombManager,
    powerups: PowerupManager,
    phase: LobbyPhase,
    match_state: MatchState,
    paused: bool,
    victory: bool,
    /// Highest mirror sequence number applied so far.
    last_seq: u64,
    /// Local explosions sent but not yet seen back from the server.
    pending_echoes: usize,
    deferred_snapshot: Option<serde_json::Value>,
    chat: VecDeque<String>,
}

impl ClientGameState {
    pub fn new(grid: Grid, powerups: PowerupManager, client_id: Option<String>) -> Self {
        Self {
            grid,
            local: Player::new(String::new(), spawn_for(0)),
            player_index: 0,
            remotes: RemotePlayers::new(client_id),
            bombs: BombManager::new(),
            powerups,
            phase: LobbyPhase::Lobby,
            match_state: MatchState::Running,
            paused: false,
            victory: false,
            last_seq: 0,
            pending_echoes: 0,
            deferred_snapshot: None,
            chat: VecDeque::new(),
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn local(&self) -> &Player {
        &self.local
    }

    pub fn local_id(&self) -> &str {
        &self.local.id
    }

    pub fn player_index(&self) -> u8 {
        self.player_index
    }

    pub fn remotes(&self) -> &RemotePlayers {
        &self.remotes
    }

    pub fn bombs(&self) -> &BombManager {
        &self.bombs
    }

    pub fn powerups(&self) -> &PowerupManager {
        &self.powerups
    }

    pub fn phase(&self) -> &LobbyPhase {
        &self.phase
    }

    pub fn match_state(&self) -> MatchState {
        self.match_state
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn victory(&self) -> bool {
        self.victory
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn pending_echoes(&self) -> usize {
        self.pending_echoes
    }

    pub fn has_deferred_snapshot(&self) -> bool {
        self.deferred_snapshot.is_some()
    }

    fn is_playing(&self) -> bool {
        self.phase.is_playing() && !self.match_state.is_over()
    }

    /// Applies one server message and returns what should be sent in reply.
    pub fn handle_message(&mut self, message: Message, now: u64) -> Vec<Message> {
        match message {
            Message::Joined(joined) => self.on_joined(&joined),
            Message::LobbyState(state) => {
                self.apply_lobby(&state);
                Vec::new()
            }
            Message::StateSync(snapshot) => {
                self.apply_snapshot(snapshot);
                Vec::new()
            }
            Message::MapSync(map) => {
                self.apply_map(&map);
                Vec::new()
            }
            Message::Action(action) => self.apply_action(action, now),
            Message::PlayerJoined(summary) => {
                self.on_player_joined(&summary);
                Vec::new()
            }
            Message::PlayerLeft(left) => {
                self.remotes.remove(&left.id);
                self.check_victory();
                Vec::new()
            }
            Message::Chat(chat) => {
                let line = format!("{}: {}", chat.author.as_deref().unwrap_or("?"), chat.text);
                info!("[chat] {}", line);
                self.push_chat(line);
                Vec::new()
            }
            Message::ChatHistory(history) => {
                debug!("Received {} chat line(s) of history", history.len());
                for chat in history {
                    let author = chat.author.as_deref().unwrap_or("?");
                    self.push_chat(format!("{}: {}", author, chat.text));
                }
                Vec::new()
            }
            Message::Pause(pause) => {
                self.paused = pause.action == PauseAction::Pause;
                info!(
                    "Game {} by {}",
                    if self.paused { "paused" } else { "resumed" },
                    pause.player_id.as_deref().unwrap_or("?")
                );
                Vec::new()
            }
            Message::Join(_) | Message::Presence(_) => {
                debug!("Ignoring client-only message from server");
                Vec::new()
            }
        }
    }

    fn push_chat(&mut self, line: String) {
        self.chat.push_back(line);
        while self.chat.len() > shared::CHAT_HISTORY_CAP {
            self.chat.pop_front();
        }
    }

    pub fn chat_lines(&self) -> impl Iterator<Item = &String> {
        self.chat.iter()
    }

    /// Takes on the identity the server assigned and offers our map as the
    /// session's shared map.
    pub fn on_joined(&mut self, joined: &JoinedPayload) -> Vec<Message> {
        info!(
            "Joined as {} ({}) in slot {}",
            joined.nickname, joined.id, joined.player_index
        );
        self.local.id = joined.id.clone();
        self.remotes.set_local_id(&joined.id);
        self.player_index = joined.player_index;
        self.local.spawn = spawn_for(joined.player_index as usize);
        self.local.respawn_at_spawn();
        // The new socket may land in another session with its own sequence.
        // Nothing sent on the old one will be echoed.
        self.pending_echoes = 0;
        self.deferred_snapshot = None;
        self.last_seq = 0;
        vec![Message::MapSync(self.grid.to_payload())]
    }

    fn on_player_joined(&mut self, summary: &PlayerSummary) {
        let created = self.remotes.sight(
            &summary.id,
            Some(&summary.nickname),
            summary.client_id.as_deref(),
        );
        if created {
            let index = summary.join_index.unwrap_or(summary.player_index);
            self.remotes.place_at_spawn(&summary.id, index as usize);
        }
    }

    pub fn apply_lobby(&mut self, state: &LobbyStatePayload) {
        // Deaths only count within the match they happened in.
        if !(self.phase.is_playing() && state.game_state.is_playing()) {
            self.remotes.reset_match();
        }
        self.remotes.apply_lobby(&state.players);
        if let Some(me) = state.players.iter().find(|p| p.id == self.local.id) {
            if let Some(index) = me.join_index {
                self.player_index = index;
            }
        }

        let starting = state.game_state.is_playing() && !self.phase.is_playing();
        self.phase = state.game_state.clone();
        if starting {
            self.start_match();
        }
    }

    fn start_match(&mut self) {
        info!("Match started with {} opponent(s)", self.remotes.len());
        self.local.spawn = spawn_for(self.player_index as usize);
        self.local.lives = shared::DEFAULT_LIVES;
        self.local.dead = false;
        self.local.reset_powerups();
        self.local.respawn_at_spawn();
        self.bombs.clear();
        self.powerups.clear();
        self.match_state = MatchState::Running;
        self.paused = false;
        self.victory = false;
    }

    /// Replaces the local grid with the session's shared map.
    pub fn apply_map(&mut self, map: &MapPayload) -> bool {
        match Grid::from_payload(map) {
            Ok(grid) => {
                debug!("Applied shared map {}x{}", grid.rows(), grid.cols());
                self.grid = grid;
                true
            }
            Err(e) => {
                warn!("Ignoring shared map: {}", e);
                false
            }
        }
    }

    /// Moves the local player to absolute pixel coordinates.
    pub fn move_to(&mut self, x: f32, y: f32, facing: Facing) -> Result<Message, ActionError> {
        self.ensure_can_act()?;
        let target = shared::grid::pixels_to_tile(x, y);
        match self.grid.get(target) {
            Some(Cell::Empty) => {}
            _ => return Err(ActionError::Blocked(target)),
        }
        self.local.set_position(x, y);
        self.local.facing = facing;
        Ok(self.local_move_message())
    }

    fn local_move_message(&self) -> Message {
        Message::Action(ActionPayload::new(GameEvent::Move {
            row: self.local.row,
            col: self.local.col,
            x: Some(self.local.x),
            y: Some(self.local.y),
            direction: Some(self.local.facing),
        }))
    }

    fn ensure_can_act(&self) -> Result<(), ActionError> {
        if !self.phase.is_playing() || self.local.dead {
            return Err(ActionError::NotPlaying);
        }
        if self.paused {
            return Err(ActionError::Paused);
        }
        Ok(())
    }

    /// Drops a bomb under the local player.
    pub fn place_bomb(&mut self, now: u64) -> Result<Message, ActionError> {
        self.ensure_can_act()?;
        let bomb = self
            .bombs
            .place_bomb(&self.local, &self.grid, self.match_state, now)?;
        Ok(Message::Action(ActionPayload::new(GameEvent::PlaceBomb {
            row: bomb.row,
            col: bomb.col,
            range: Some(bomb.range),
        })))
    }

    /// Advances local timers: our own fuses, powerup pickup and expiry, and the
    /// match clock. Returns the notifications peers need.
    pub fn step(&mut self, now: u64) -> Vec<Message> {
        let mut outgoing = Vec::new();

        let local_id = self.local.id.clone();
        let due: Vec<_> = self
            .bombs
            .bombs()
            .iter()
            .filter(|b| !b.exploded && b.explodes_at <= now && b.owner_id == local_id)
            .map(|b| b.id)
            .collect();
        for id in due {
            self.detonate_local(id, &mut outgoing);
        }

        let stale: Vec<_> = self
            .bombs
            .due_bombs(now.saturating_sub(REMOTE_BOMB_GRACE_MS))
            .into_iter()
            .filter(|id| {
                self.bombs
                    .bombs()
                    .iter()
                    .any(|b| b.id == *id && b.owner_id != local_id)
            })
            .collect();
        for id in stale {
            debug!("Dropping unreported remote bomb {}", id);
            self.bombs.remove(id);
        }

        if self.is_playing() && !self.local.dead {
            if let Some(powerup) = self.powerups.collect(&mut self.local, now) {
                info!("Collected {} powerup", powerup.kind.label());
                let mut action = ActionPayload::new(GameEvent::PowerupCollected {
                    row: powerup.row,
                    col: powerup.col,
                });
                action.timestamp = Some(now);
                outgoing.push(Message::Action(action));
            }
        }
        for kind in self.powerups.expire(&mut self.local, now) {
            debug!("{} powerup expired", kind.label());
        }

        if let LobbyPhase::Playing { started_at } = self.phase {
            if self.match_state == MatchState::Running && now >= started_at + MATCH_DURATION_MS {
                info!("Time is up");
                self.match_state = MatchState::TimeUp;
            }
        }

        outgoing
    }

    fn detonate_local(&mut self, id: shared::bombs::BombId, outgoing: &mut Vec<Message>) {
        let Some(bomb) = self.bombs.bombs().iter().find(|b| b.id == id).cloned() else {
            return;
        };
        let Some(outcome) = self.bombs.detonate(
            id,
            &mut self.grid,
            std::slice::from_mut(&mut self.local),
            &mut self.powerups,
        ) else {
            return;
        };

        for powerup in &outcome.spawned {
            outgoing.push(Message::Action(ActionPayload::new(GameEvent::PowerupSpawned {
                row: powerup.row,
                col: powerup.col,
                powerup_type: powerup.kind,
            })));
        }
        outgoing.push(Message::Action(ActionPayload::new(GameEvent::Explode {
            row: bomb.row,
            col: bomb.col,
            range: Some(bomb.range),
            affected_tiles: Some(outcome.tiles.clone()),
        })));
        outgoing.push(Message::Action(ActionPayload::new(GameEvent::MapUpdate {
            affected_tiles: outcome.tiles.clone(),
            map_data: Some(self.grid.to_payload().data),
            explosion_center: ExplosionCenter {
                row: bomb.row,
                col: bomb.col,
                range: bomb.range,
            },
        })));
        self.pending_echoes += 1;

        for (player_id, result) in &outcome.damaged {
            if *player_id == self.local.id {
                self.after_local_damage(*result, outgoing);
            }
        }
    }

    fn after_local_damage(&mut self, result: DamageResult, outgoing: &mut Vec<Message>) {
        match result {
            DamageResult::Ignored => {}
            DamageResult::Respawned => {
                self.powerups.clear_for(&self.local.id);
                info!("Hit! {} live(s) left", self.local.lives);
                outgoing.push(self.local_move_message());
            }
            DamageResult::Died => {
                self.powerups.clear_for(&self.local.id);
                self.match_state = MatchState::Lost;
                info!("You died");
                outgoing.push(Message::Action(ActionPayload::new(GameEvent::Died)));
            }
        }
    }

    /// Applies an action relayed by the server.
    pub fn apply_action(&mut self, action: ActionPayload, now: u64) -> Vec<Message> {
        if let Some(seq) = action.seq {
            self.last_seq = self.last_seq.max(seq);
        }
        let Some(sender) = action.player_id.clone() else {
            debug!("Dropping action without sender");
            return Vec::new();
        };

        if sender == self.local.id {
            if matches!(action.event, GameEvent::Explode { .. }) {
                self.on_explosion_echo();
            }
            return Vec::new();
        }

        let mut outgoing = Vec::new();
        match action.event {
            GameEvent::Move {
                row,
                col,
                x,
                y,
                direction,
            } => self.remotes.apply_move(&sender, row, col, x, y, direction),
            GameEvent::PlaceBomb { row, col, range } => {
                let tile = Tile::new(row, col);
                if self.bombs.bomb_at(tile).is_none() {
                    self.bombs
                        .track_remote(&sender, tile, range.unwrap_or(DEFAULT_BOMB_RANGE), now);
                }
            }
            GameEvent::Explode {
                row,
                col,
                range,
                affected_tiles,
            } => {
                let origin = Tile::new(row, col);
                let tiles = match affected_tiles {
                    Some(tiles) => {
                        self.bombs.remove_at(origin);
                        self.bombs.retire_on(&tiles);
                        tiles
                    }
                    None => self.bombs.retire_chain(
                        origin,
                        range.unwrap_or(DEFAULT_BOMB_RANGE),
                        &self.grid,
                    ),
                };
                apply_remote_blast(&mut self.grid, &tiles);
                self.damage_local_if_hit(&tiles, &mut outgoing);
            }
            // The sender's full grid can lag behind blasts we already applied,
            // so only the tiles it lists are cleared.
            GameEvent::MapUpdate {
                affected_tiles,
                map_data: _,
                explosion_center,
            } => {
                apply_remote_blast(&mut self.grid, &affected_tiles);
                self.bombs
                    .remove_at(Tile::new(explosion_center.row, explosion_center.col));
                self.bombs.retire_on(&affected_tiles);
            }
            GameEvent::PowerupSpawned {
                row,
                col,
                powerup_type,
            } => {
                self.powerups.spawn_at(Tile::new(row, col), powerup_type);
            }
            GameEvent::PowerupCollected { row, col } => {
                self.powerups.remove_at(Tile::new(row, col));
            }
            GameEvent::Died => {
                self.remotes.mark_dead(&sender);
                self.check_victory();
            }
        }
        outgoing
    }

    fn damage_local_if_hit(&mut self, tiles: &[Tile], outgoing: &mut Vec<Message>) {
        if !self.is_playing() || self.local.dead || !tiles.contains(&self.local.tile()) {
            return;
        }
        let result = self.local.apply_damage(1);
        self.after_local_damage(result, outgoing);
    }

    fn on_explosion_echo(&mut self) {
        self.pending_echoes = self.pending_echoes.saturating_sub(1);
        if self.pending_echoes == 0 {
            if let Some(snapshot) = self.deferred_snapshot.take() {
                debug!("Applying deferred snapshot");
                self.apply_snapshot(snapshot);
            }
        }
    }

    /// Applies a server snapshot to the remote proxies. Returns false when it
    /// was ignored as stale or held back until our explosions are echoed.
    pub fn apply_snapshot(&mut self, snapshot: serde_json::Value) -> bool {
        let view = SnapshotView::from_value(&snapshot);
        let seq = view.seq.unwrap_or(0);
        if seq < self.last_seq {
            debug!("Ignoring stale snapshot {} (have {})", seq, self.last_seq);
            return false;
        }
        if self.pending_echoes > 0 {
            debug!("Deferring snapshot {} until local explosions are echoed", seq);
            self.deferred_snapshot = Some(snapshot);
            return false;
        }

        self.last_seq = seq;
        for (id, entry) in view.players.into_entries() {
            if id == self.local.id {
                continue;
            }
            self.remotes
                .sight(&id, entry.nickname.as_deref(), entry.client_id.as_deref());
            if let (Some(row), Some(col)) = (entry.row, entry.col) {
                self.remotes
                    .apply_move(&id, row, col, entry.x, entry.y, entry.direction);
            }
        }
        true
    }

    /// Declares a local win once nobody else is left standing.
    fn check_victory(&mut self) {
        if self.victory || !self.is_playing() || self.local.dead || !self.remotes.is_empty() {
            return;
        }
        self.victory = true;
        self.match_state = MatchState::Ended;
        info!("Victory! Last player standing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::protocol::PlayerLeftPayload;
    use shared::{PowerupKind, BOMB_FUSE_MS, DEFAULT_LIVES};
    use tokio_test::assert_ok;

    const START: u64 = 1_000_000;

    fn summary(id: &str, index: u8) -> PlayerSummary {
        PlayerSummary {
            id: id.to_string(),
            nickname: id.to_uppercase(),
            client_id: Some(format!("client-{id}")),
            in_lobby: true,
            player_index: index,
            join_index: Some(index),
        }
    }

    /// A joined local player "me" in slot 0 with one opponent "rival", match
    /// running on an open grid.
    fn playing_state() -> ClientGameState {
        let mut state =
            ClientGameState::new(Grid::empty(13, 15), PowerupManager::seeded(7), Some("client-me".into()));
        state.on_joined(&JoinedPayload {
            id: "me".to_string(),
            nickname: "Me".to_string(),
            player_index: 0,
        });
        state.apply_lobby(&LobbyStatePayload {
            players: vec![summary("me", 0), summary("rival", 1)],
            game_state: LobbyPhase::Playing { started_at: START },
        });
        state
    }

    fn remote(event: GameEvent, sender: &str, seq: u64) -> ActionPayload {
        let mut action = ActionPayload::new(event);
        action.player_id = Some(sender.to_string());
        action.seq = Some(seq);
        action
    }

    fn explode_from(sender: &str, tiles: Vec<Tile>, seq: u64) -> ActionPayload {
        remote(
            GameEvent::Explode {
                row: tiles[0].row,
                col: tiles[0].col,
                range: Some(1),
                affected_tiles: Some(tiles),
            },
            sender,
            seq,
        )
    }

    fn action_types(messages: &[Message]) -> Vec<String> {
        messages
            .iter()
            .map(|m| match m {
                Message::Action(a) => serde_json::to_value(&a.event).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string(),
                other => format!("{other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_joined_offers_map_and_sets_spawn() {
        let mut state = ClientGameState::new(Grid::empty(13, 15), PowerupManager::seeded(1), None);
        let replies = state.on_joined(&JoinedPayload {
            id: "me".to_string(),
            nickname: "Me".to_string(),
            player_index: 3,
        });
        assert!(matches!(replies.as_slice(), [Message::MapSync(_)]));
        assert_eq!(state.local().tile(), spawn_for(3));
        assert_eq!(state.local_id(), "me");
    }

    #[test]
    fn test_actions_refused_outside_match() {
        let mut state = ClientGameState::new(Grid::empty(13, 15), PowerupManager::seeded(1), None);
        assert_eq!(state.place_bomb(START), Err(ActionError::NotPlaying));

        let mut state = playing_state();
        state.handle_message(
            Message::Pause(shared::protocol::PausePayload {
                action: PauseAction::Pause,
                player_id: Some("rival".into()),
            }),
            START,
        );
        assert_eq!(state.place_bomb(START), Err(ActionError::Paused));
    }

    #[test]
    fn test_local_bomb_explodes_and_notifies_peers() {
        let mut grid = Grid::empty(13, 15);
        grid.set(Tile::new(1, 3), Cell::Block);
        let mut state = ClientGameState::new(grid, PowerupManager::seeded(3), None);
        state.on_joined(&JoinedPayload {
            id: "me".into(),
            nickname: "Me".into(),
            player_index: 0,
        });
        state.apply_lobby(&LobbyStatePayload {
            players: vec![summary("me", 0), summary("rival", 1)],
            game_state: LobbyPhase::Playing { started_at: START },
        });
        state.local.bomb_range = 2;

        let placed = assert_ok!(state.place_bomb(START));
        let Message::Action(action) = placed else {
            panic!("expected an action");
        };
        assert_eq!(
            action.event,
            GameEvent::PlaceBomb {
                row: 1,
                col: 1,
                range: Some(2)
            }
        );
        assert!(state.step(START + BOMB_FUSE_MS - 1).is_empty());

        let sent = state.step(START + BOMB_FUSE_MS);
        let types = action_types(&sent);
        assert!(types.contains(&"explode".to_string()));
        assert!(types.contains(&"mapUpdate".to_string()));
        assert_eq!(state.grid().get(Tile::new(1, 3)), Some(Cell::Empty));
        assert_eq!(state.pending_echoes(), 1);
        // Standing on our own bomb costs a life.
        assert_eq!(state.local().lives, DEFAULT_LIVES - 1);
        assert!(state.bombs().bombs().is_empty());
    }

    #[test]
    fn test_remote_bombs_do_not_tick_locally() {
        let mut state = playing_state();
        state.apply_action(
            remote(GameEvent::PlaceBomb { row: 5, col: 5, range: Some(2) }, "rival", 1),
            START,
        );
        assert_eq!(state.bombs().bombs().len(), 1);
        assert!(state.step(START + BOMB_FUSE_MS).is_empty());
        assert_eq!(state.bombs().bombs().len(), 1);
        state.step(START + BOMB_FUSE_MS + REMOTE_BOMB_GRACE_MS);
        assert!(state.bombs().bombs().is_empty());
    }

    #[test]
    fn test_remote_explosion_applies_tiles_verbatim() {
        let mut state = playing_state();
        state.grid.set(Tile::new(5, 6), Cell::Block);
        state.grid.set(Tile::new(5, 8), Cell::Block);
        state.apply_action(
            remote(GameEvent::PlaceBomb { row: 5, col: 5, range: Some(1) }, "rival", 1),
            START,
        );

        state.apply_action(explode_from("rival", vec![Tile::new(5, 5), Tile::new(5, 8)], 2), START);
        // Only the listed tiles are touched, whatever the local blast would be.
        assert_eq!(state.grid().get(Tile::new(5, 6)), Some(Cell::Block));
        assert_eq!(state.grid().get(Tile::new(5, 8)), Some(Cell::Empty));
        assert!(state.bombs().bomb_at(Tile::new(5, 5)).is_none());
        assert!(state.powerups().powerups().is_empty());
    }

    #[test]
    fn test_remote_explosion_without_tiles_is_recomputed() {
        let mut state = playing_state();
        state.grid.set(Tile::new(5, 6), Cell::Block);
        state.apply_action(
            remote(
                GameEvent::Explode {
                    row: 5,
                    col: 5,
                    range: Some(3),
                    affected_tiles: None,
                },
                "rival",
                1,
            ),
            START,
        );
        assert_eq!(state.grid().get(Tile::new(5, 6)), Some(Cell::Empty));
    }

    #[test]
    fn test_remote_explosion_damages_local_player() {
        let mut state = playing_state();
        let here = state.local().tile();
        let sent = state.apply_action(explode_from("rival", vec![here], 1), START);
        assert_eq!(state.local().lives, DEFAULT_LIVES - 1);
        assert_eq!(action_types(&sent), vec!["move".to_string()]);

        state.apply_action(explode_from("rival", vec![here], 2), START);
        let sent = state.apply_action(explode_from("rival", vec![here], 3), START);
        assert!(state.local().dead);
        assert_eq!(state.match_state(), MatchState::Lost);
        assert_eq!(action_types(&sent), vec!["died".to_string()]);
    }

    #[test]
    fn test_remote_explosion_retires_our_chained_bomb() {
        let mut state = playing_state();
        assert_ok!(state.place_bomb(START));

        let sent = state.apply_action(
            explode_from("rival", vec![Tile::new(1, 2), Tile::new(1, 1)], 1),
            START + 500,
        );
        assert_eq!(action_types(&sent), vec!["move".to_string()]);
        assert!(state.bombs().bombs().is_empty());

        // The bomb already went off in the rival's chain.
        assert!(state.step(START + BOMB_FUSE_MS).is_empty());
        assert_eq!(state.pending_echoes(), 0);
        assert_eq!(state.local().lives, DEFAULT_LIVES - 1);
    }

    #[test]
    fn test_remote_explosion_without_tiles_chains_tracked_bombs() {
        let mut state = playing_state();
        state.grid.set(Tile::new(5, 7), Cell::Block);
        state.apply_action(
            remote(GameEvent::PlaceBomb { row: 5, col: 5, range: Some(2) }, "rival", 1),
            START,
        );
        state.apply_action(
            remote(
                GameEvent::Explode {
                    row: 5,
                    col: 3,
                    range: Some(2),
                    affected_tiles: None,
                },
                "rival",
                2,
            ),
            START + 100,
        );
        assert_eq!(state.grid().get(Tile::new(5, 7)), Some(Cell::Empty));
        assert!(state.bombs().bombs().is_empty());
        assert!(state.powerups().powerups().is_empty());
    }

    #[test]
    fn test_map_update_clears_only_listed_tiles() {
        let mut state = playing_state();
        state.grid.set(Tile::new(1, 3), Cell::Block);
        state.grid.set(Tile::new(5, 6), Cell::Block);
        state.local.bomb_range = 2;
        assert_ok!(state.place_bomb(START));
        state.step(START + BOMB_FUSE_MS);
        assert_eq!(state.grid().get(Tile::new(1, 3)), Some(Cell::Empty));

        // The rival's grid predates our blast and still shows the block.
        let mut data = Grid::empty(13, 15).to_payload().data;
        data[1][3] = Cell::Block;
        data[2][2] = Cell::Wall;
        let events = [
            GameEvent::Explode {
                row: 5,
                col: 5,
                range: Some(1),
                affected_tiles: Some(vec![Tile::new(5, 5), Tile::new(5, 6)]),
            },
            GameEvent::MapUpdate {
                affected_tiles: vec![Tile::new(5, 5), Tile::new(5, 6)],
                map_data: Some(data),
                explosion_center: ExplosionCenter { row: 5, col: 5, range: 1 },
            },
        ];
        for (seq, event) in events.into_iter().enumerate() {
            state.apply_action(remote(event, "rival", seq as u64 + 1), START + BOMB_FUSE_MS);
        }

        assert_eq!(state.grid().get(Tile::new(1, 3)), Some(Cell::Empty));
        assert_eq!(state.grid().get(Tile::new(5, 6)), Some(Cell::Empty));
        assert_eq!(state.grid().get(Tile::new(2, 2)), Some(Cell::Empty));
    }

    #[test]
    fn test_powerup_notifications() {
        let mut state = playing_state();
        state.apply_action(
            remote(
                GameEvent::PowerupSpawned {
                    row: 3,
                    col: 3,
                    powerup_type: PowerupKind::Flames,
                },
                "rival",
                1,
            ),
            START,
        );
        assert!(state.powerups().powerup_at(Tile::new(3, 3)).is_some());
        state.apply_action(remote(GameEvent::PowerupCollected { row: 3, col: 3 }, "rival", 2), START);
        assert!(state.powerups().powerups().is_empty());
    }

    #[test]
    fn test_walking_onto_powerup_collects_it() {
        let mut state = playing_state();
        let here = state.local().tile();
        state.powerups.spawn_at(here, PowerupKind::Bombs);
        let sent = state.step(START);
        assert_eq!(action_types(&sent), vec!["powerupCollected".to_string()]);
        assert_eq!(state.local().max_bombs, 2);
    }

    #[test]
    fn test_died_removes_proxy_and_declares_victory_once() {
        let mut state = playing_state();
        assert!(state.remotes().get("rival").is_some());
        state.apply_action(remote(GameEvent::Died, "rival", 1), START);
        assert!(state.remotes().is_empty());
        assert!(state.victory());
        assert_eq!(state.match_state(), MatchState::Ended);

        state.handle_message(Message::PlayerLeft(PlayerLeftPayload { id: "rival".into() }), START);
        assert!(state.victory());
    }

    #[test]
    fn test_snapshot_does_not_revive_dead_player() {
        let mut state = playing_state();
        state.apply_lobby(&LobbyStatePayload {
            players: vec![summary("me", 0), summary("rival", 1), summary("third", 2)],
            game_state: LobbyPhase::Playing { started_at: START },
        });
        assert_eq!(state.remotes().len(), 2);

        state.apply_action(remote(GameEvent::Died, "rival", 1), START);
        assert!(!state.victory());
        assert!(state.apply_snapshot(json!({
            "seq": 2,
            "players": {
                "rival": {"id": "rival", "row": 11, "col": 13},
                "third": {"id": "third", "row": 1, "col": 13}
            }
        })));
        assert!(state.remotes().get("rival").is_none());
        state.apply_action(
            remote(
                GameEvent::Move { row: 10, col: 13, x: None, y: None, direction: None },
                "rival",
                3,
            ),
            START,
        );
        assert!(state.remotes().get("rival").is_none());

        state.apply_action(remote(GameEvent::Died, "third", 4), START);
        assert!(state.remotes().is_empty());
        assert!(state.victory());
    }

    #[test]
    fn test_new_match_forgets_deaths() {
        let mut state = playing_state();
        state.apply_action(remote(GameEvent::Died, "rival", 1), START);
        assert!(state.victory());

        state.apply_lobby(&LobbyStatePayload {
            players: vec![summary("me", 0), summary("rival", 1)],
            game_state: LobbyPhase::Lobby,
        });
        state.apply_lobby(&LobbyStatePayload {
            players: vec![summary("me", 0), summary("rival", 1)],
            game_state: LobbyPhase::Playing { started_at: START + 200_000 },
        });
        assert!(state.remotes().get("rival").is_some());
        assert!(!state.victory());
    }

    #[test]
    fn test_no_victory_in_lobby() {
        let mut state = ClientGameState::new(Grid::empty(13, 15), PowerupManager::seeded(1), None);
        state.on_joined(&JoinedPayload {
            id: "me".into(),
            nickname: "Me".into(),
            player_index: 0,
        });
        state.apply_lobby(&LobbyStatePayload {
            players: vec![summary("me", 0), summary("rival", 1)],
            game_state: LobbyPhase::Lobby,
        });
        state.handle_message(Message::PlayerLeft(PlayerLeftPayload { id: "rival".into() }), START);
        assert!(!state.victory());
    }

    #[test]
    fn test_snapshot_never_removes_proxies() {
        let mut state = playing_state();
        assert!(state.apply_snapshot(json!({"seq": 1, "players": {}})));
        assert!(state.remotes().get("rival").is_some());

        state.apply_snapshot(json!({
            "seq": 2,
            "players": {"rival": {"id": "rival", "row": 4, "col": 7, "direction": 1}}
        }));
        let rival = state.remotes().get("rival").unwrap();
        assert_eq!(rival.tile(), Tile::new(4, 7));
        assert_eq!(rival.player.facing, Facing::Left);
    }

    #[test]
    fn test_stale_snapshot_ignored() {
        let mut state = playing_state();
        state.apply_action(
            remote(
                GameEvent::Move {
                    row: 6,
                    col: 6,
                    x: None,
                    y: None,
                    direction: None,
                },
                "rival",
                10,
            ),
            START,
        );
        let applied = state.apply_snapshot(json!({
            "seq": 9,
            "players": {"rival": {"row": 1, "col": 13}}
        }));
        assert!(!applied);
        assert_eq!(state.remotes().get("rival").unwrap().tile(), Tile::new(6, 6));
        assert_eq!(state.last_seq(), 10);
    }

    #[test]
    fn test_snapshot_deferred_until_explosion_echoed() {
        let mut state = playing_state();
        assert_ok!(state.place_bomb(START));
        state.step(START + BOMB_FUSE_MS);
        assert_eq!(state.pending_echoes(), 1);

        let applied = state.apply_snapshot(json!({
            "seq": 5,
            "players": {"rival": {"row": 9, "col": 9}}
        }));
        assert!(!applied);
        assert!(state.has_deferred_snapshot());

        let echo = explode_from("me", vec![spawn_for(0)], 6);
        state.apply_action(echo, START + BOMB_FUSE_MS);
        assert_eq!(state.pending_echoes(), 0);
        // The deferred snapshot is older than the echo and is dropped.
        assert!(!state.has_deferred_snapshot());
        assert_ne!(state.remotes().get("rival").unwrap().tile(), Tile::new(9, 9));

        assert!(state.apply_snapshot(json!({
            "seq": 7,
            "players": {"rival": {"row": 9, "col": 9}}
        })));
        assert_eq!(state.remotes().get("rival").unwrap().tile(), Tile::new(9, 9));
    }

    #[test]
    fn test_rejoin_drops_unechoed_explosions() {
        let mut state = playing_state();
        state.apply_action(
            remote(GameEvent::Move { row: 2, col: 1, x: None, y: None, direction: None }, "rival", 40),
            START,
        );
        assert_ok!(state.place_bomb(START));
        state.step(START + BOMB_FUSE_MS);
        assert_eq!(state.pending_echoes(), 1);
        assert!(!state.apply_snapshot(json!({"seq": 41, "players": {}})));
        assert!(state.has_deferred_snapshot());

        // Reconnect: the new session numbers its snapshots from scratch.
        state.on_joined(&JoinedPayload {
            id: "me-again".to_string(),
            nickname: "Me".to_string(),
            player_index: 0,
        });
        assert_eq!(state.pending_echoes(), 0);
        assert!(!state.has_deferred_snapshot());
        assert_eq!(state.last_seq(), 0);

        assert!(state.apply_snapshot(json!({
            "seq": 3,
            "players": {"rival": {"row": 9, "col": 9}}
        })));
        assert_eq!(state.remotes().get("rival").unwrap().tile(), Tile::new(9, 9));
    }

    #[test]
    fn test_match_clock_runs_out() {
        let mut state = playing_state();
        state.step(START + MATCH_DURATION_MS - 1);
        assert_eq!(state.match_state(), MatchState::Running);
        state.step(START + MATCH_DURATION_MS);
        assert_eq!(state.match_state(), MatchState::TimeUp);
        assert_eq!(
            state.place_bomb(START + MATCH_DURATION_MS),
            Err(ActionError::Bomb(PlaceBombError::MatchOver))
        );
    }

    #[test]
    fn test_move_into_block_refused() {
        let mut state = playing_state();
        state.grid.set(Tile::new(1, 2), Cell::Block);
        let (x, y) = shared::grid::tile_to_pixels(Tile::new(1, 2));
        assert_eq!(
            state.move_to(x, y, Facing::Right),
            Err(ActionError::Blocked(Tile::new(1, 2)))
        );
        let (x, y) = shared::grid::tile_to_pixels(Tile::new(2, 1));
        assert_ok!(state.move_to(x, y, Facing::Down));
        assert_eq!(state.local().tile(), Tile::new(2, 1));
    }
}
