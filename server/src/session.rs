//! One lobby and the match it turns into.
//!
//! A session owns its roster, the outbound queues of its connections, the
//! chat history, the state mirror, the shared map and its timers. All of it
//! is mutated from the server's single main loop.

use crate::client_manager::{ClientManager, PlayerEntry};
use crate::config::SessionConfig;
use crate::game::GameState;
use crate::scheduler::{Scheduler, TimerFired, TimerKind};
use log::{debug, error, info, warn};
use shared::protocol::{ChatMessage, LobbyStatePayload, PlayerLeftPayload};
use shared::{encode, now_millis, LobbyPhase, MapPayload, Message, CHAT_HISTORY_CAP};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Outbound side of a client socket.
#[derive(Debug, Clone)]
pub struct Connection {
    pub outbound: mpsc::Sender<String>,
    /// Remote address, used to recognise reconnects without a client id.
    pub origin: Option<String>,
}

pub struct Session {
    name: String,
    pub(crate) config: SessionConfig,
    phase: LobbyPhase,
    countdown_remaining: u32,
    pub(crate) roster: ClientManager,
    connections: HashMap<String, Connection>,
    pub(crate) chat: VecDeque<ChatMessage>,
    pub(crate) mirror: GameState,
    pub(crate) shared_map: Option<MapPayload>,
    scheduler: Scheduler,
}

impl Session {
    pub fn new(
        name: impl Into<String>,
        config: SessionConfig,
        timers: mpsc::UnboundedSender<TimerFired>,
    ) -> Self {
        let name = name.into();
        Self {
            scheduler: Scheduler::new(name.clone(), timers),
            name,
            config,
            phase: LobbyPhase::Lobby,
            countdown_remaining: 0,
            roster: ClientManager::new(),
            connections: HashMap::new(),
            chat: VecDeque::new(),
            mirror: GameState::new(),
            shared_map: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> &LobbyPhase {
        &self.phase
    }

    pub fn roster(&self) -> &ClientManager {
        &self.roster
    }

    pub fn mirror(&self) -> &GameState {
        &self.mirror
    }

    pub fn shared_map(&self) -> Option<&MapPayload> {
        self.shared_map.as_ref()
    }

    pub fn chat_history(&self) -> impl Iterator<Item = &ChatMessage> {
        self.chat.iter()
    }

    pub fn has_timer(&self, kind: TimerKind) -> bool {
        self.scheduler.is_scheduled(kind)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// True when no socket is attached, joined or not.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub(crate) fn connection(&self, conn_id: &str) -> Option<&Connection> {
        self.connections.get(conn_id)
    }

    pub fn attach(&mut self, conn_id: &str, connection: Connection) {
        self.connections.insert(conn_id.to_string(), connection);
    }

    /// Drops a socket. A joined player is removed from the roster and the
    /// mirror and everyone is told. Does not re-evaluate the phase.
    pub fn detach(&mut self, conn_id: &str) -> Option<PlayerEntry> {
        self.connections.remove(conn_id);
        let entry = self.roster.remove(conn_id)?;
        self.mirror.remove_player(conn_id);

        self.broadcast_lobby_state();
        self.broadcast(&Message::PlayerLeft(PlayerLeftPayload {
            id: conn_id.to_string(),
        }));
        self.schedule_state_sync(self.config.leave_sync_debounce);

        info!(
            "[{}] Player left: {} ({}) | Total: {}",
            self.name,
            entry.nickname,
            entry.id,
            self.roster.len()
        );
        Some(entry)
    }

    /// Queues a message for one connection. Never blocks; a full or closed
    /// queue drops the message.
    pub fn send_to(&self, conn_id: &str, message: &Message) {
        match encode(message) {
            Ok(text) => self.deliver(conn_id, text),
            Err(e) => error!("Failed to encode message for {}: {}", conn_id, e),
        }
    }

    /// Queues a message for every joined player.
    pub fn broadcast(&self, message: &Message) {
        self.fan_out(message, None);
    }

    /// Queues a message for every joined player except `skip`.
    pub fn broadcast_except(&self, skip: &str, message: &Message) {
        self.fan_out(message, Some(skip));
    }

    fn fan_out(&self, message: &Message, skip: Option<&str>) {
        let text = match encode(message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode broadcast for {}: {}", self.name, e);
                return;
            }
        };
        for entry in self.roster.entries() {
            if skip == Some(entry.id.as_str()) {
                continue;
            }
            self.deliver(&entry.id, text.clone());
        }
    }

    fn deliver(&self, conn_id: &str, text: String) {
        let Some(connection) = self.connections.get(conn_id) else {
            return;
        };
        if connection.outbound.is_closed() {
            debug!("Skipping closed connection {}", conn_id);
            return;
        }
        if let Err(e) = connection.outbound.try_send(text) {
            warn!("Failed to send to client {}: {}", conn_id, e);
        }
    }

    pub fn lobby_state(&self) -> LobbyStatePayload {
        LobbyStatePayload {
            players: self.roster.presence_list(),
            game_state: self.phase.clone(),
        }
    }

    pub fn broadcast_lobby_state(&self) {
        self.broadcast(&Message::LobbyState(self.lobby_state()));
    }

    pub fn snapshot(&self) -> serde_json::Value {
        self.mirror.snapshot(&self.phase)
    }

    pub fn broadcast_snapshot(&self) {
        self.broadcast(&Message::StateSync(self.snapshot()));
    }

    /// Coalesces snapshot broadcasts: a pending one is left as is.
    pub fn schedule_state_sync(&mut self, delay: Duration) {
        if !self.scheduler.is_scheduled(TimerKind::StateSync) {
            self.scheduler.schedule(TimerKind::StateSync, delay);
        }
    }

    fn phase_timer_running(&self) -> bool {
        self.scheduler.is_scheduled(TimerKind::Wait)
            || self.scheduler.is_scheduled(TimerKind::CountdownTick)
    }

    fn cancel_phase_timers(&mut self) {
        self.scheduler.cancel(TimerKind::Wait);
        self.scheduler.cancel(TimerKind::CountdownTick);
    }

    fn set_phase(&mut self, phase: LobbyPhase) {
        if self.phase != phase {
            debug!("[{}] {:?} -> {:?}", self.name, self.phase, phase);
        }
        self.phase = phase;
    }

    /// Moves the lobby forward or back according to how many players are on
    /// the lobby screen. Safe to call any number of times; a match that has
    /// started is never interrupted.
    pub fn evaluate(&mut self) {
        if self.phase.is_playing() {
            return;
        }
        let present = self.roster.active_count();

        if present >= self.config.max_players {
            self.start_countdown();
            return;
        }

        if present >= self.config.min_players {
            if !self.phase_timer_running() {
                let wait = self.config.wait_duration;
                self.scheduler.schedule(TimerKind::Wait, wait);
                self.set_phase(LobbyPhase::Waiting {
                    wait_ends_at: now_millis() + wait.as_millis() as u64,
                });
                info!("[{}] Waiting {}s for more players", self.name, wait.as_secs());
                self.broadcast_lobby_state();
            }
            return;
        }

        if self.phase_timer_running() || self.phase != LobbyPhase::Lobby {
            self.cancel_phase_timers();
            self.set_phase(LobbyPhase::Lobby);
            info!("[{}] Not enough players, back to lobby", self.name);
            self.broadcast_lobby_state();
        }
    }

    /// Starts the countdown unless one is already running or the match began.
    pub fn start_countdown(&mut self) {
        if self.phase.is_playing() || self.scheduler.is_scheduled(TimerKind::CountdownTick) {
            return;
        }
        self.scheduler.cancel(TimerKind::Wait);
        self.countdown_remaining = self.config.countdown_secs();
        if self.countdown_remaining == 0 {
            self.start_game();
            return;
        }

        info!("[{}] Countdown started ({}s)", self.name, self.countdown_remaining);
        self.set_phase(LobbyPhase::Starting {
            countdown: self.countdown_remaining,
        });
        self.broadcast_lobby_state();
        self.scheduler.schedule(TimerKind::CountdownTick, COUNTDOWN_TICK);
    }

    fn countdown_tick(&mut self) {
        self.countdown_remaining = self.countdown_remaining.saturating_sub(1);
        if self.countdown_remaining == 0 {
            self.start_game();
            return;
        }
        self.set_phase(LobbyPhase::Starting {
            countdown: self.countdown_remaining,
        });
        self.broadcast_lobby_state();
        self.scheduler.schedule(TimerKind::CountdownTick, COUNTDOWN_TICK);
    }

    fn start_game(&mut self) {
        self.cancel_phase_timers();
        self.set_phase(LobbyPhase::Playing {
            started_at: now_millis(),
        });
        info!("[{}] Match started with {} players", self.name, self.roster.len());
        self.broadcast_lobby_state();
        if let Some(map) = &self.shared_map {
            self.broadcast(&Message::MapSync(map.clone()));
        }
    }

    /// Runs a fired timer if its ticket is still current.
    pub fn on_timer(&mut self, kind: TimerKind, ticket: u64) {
        if !self.scheduler.take(kind, ticket) {
            return;
        }
        match kind {
            TimerKind::Wait => self.start_countdown(),
            TimerKind::CountdownTick => self.countdown_tick(),
            TimerKind::StateSync => self.broadcast_snapshot(),
        }
    }

    pub fn push_chat(&mut self, message: ChatMessage) {
        self.chat.push_back(message);
        while self.chat.len() > CHAT_HISTORY_CAP {
            self.chat.pop_front();
        }
    }

    /// Cancels every timer, including a pending snapshot.
    pub fn shutdown(&mut self) {
        self.scheduler.cancel_all();
    }
}
