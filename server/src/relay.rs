//! Message handling: decodes client frames and applies them to the sender's
//! session. Frames that do not decode, or that only the server may send, are
//! dropped without a reply.

use crate::client_manager::JoinRequest;
use crate::session::Session;
use crate::session_manager::SessionManager;
use log::{debug, info};
use shared::protocol::{
    ActionPayload, ChatMessage, JoinPayload, JoinedPayload, PausePayload, PlayerLeftPayload,
};
use shared::{decode, now_millis, Grid, MapPayload, Message};

impl SessionManager {
    /// Entry point for every text frame received from `conn_id`.
    pub fn handle_text(&mut self, conn_id: &str, text: &str) {
        let message = match decode(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping frame from {}: {}", conn_id, e);
                return;
            }
        };
        let Some(session) = self.session_of_mut(conn_id) else {
            debug!("Dropping frame from unassigned connection {}", conn_id);
            return;
        };
        session.handle_message(conn_id, message);
    }
}

impl Session {
    pub fn handle_message(&mut self, conn_id: &str, message: Message) {
        match message {
            Message::Join(payload) => self.handle_join(conn_id, payload),
            Message::Presence(payload) => self.handle_presence(conn_id, payload.in_lobby),
            Message::Chat(payload) => self.handle_chat(conn_id, payload),
            Message::Pause(payload) => self.handle_pause(conn_id, payload),
            Message::Action(payload) => self.handle_action(conn_id, payload),
            Message::StateSync(snapshot) => self.handle_state_sync(snapshot),
            Message::MapSync(map) => self.handle_map_sync(conn_id, map),
            other => debug!("Ignoring server-only message from {}: {:?}", conn_id, other),
        }
    }

    fn handle_join(&mut self, conn_id: &str, payload: JoinPayload) {
        if payload.nickname.is_empty() {
            debug!("Ignoring join without nickname from {}", conn_id);
            return;
        }
        let origin = self.connection(conn_id).and_then(|c| c.origin.clone());
        let outcome = self.roster.join(
            conn_id,
            JoinRequest {
                nickname: payload.nickname,
                client_id: payload.client_id,
                origin,
            },
        );

        if let Some(previous) = outcome.replaced.filter(|p| p.id != conn_id) {
            self.mirror.remove_player(&previous.id);
            self.broadcast(&Message::PlayerLeft(PlayerLeftPayload { id: previous.id }));
        }

        let entry = outcome.entry;
        self.send_to(
            conn_id,
            &Message::Joined(JoinedPayload {
                id: entry.id.clone(),
                nickname: entry.nickname.clone(),
                player_index: entry.player_index,
            }),
        );
        self.send_to(conn_id, &Message::StateSync(self.snapshot()));
        if !self.chat.is_empty() {
            let history = self.chat.iter().cloned().collect();
            self.send_to(conn_id, &Message::ChatHistory(history));
        }

        self.broadcast_lobby_state();
        self.evaluate();
    }

    fn handle_presence(&mut self, conn_id: &str, in_lobby: bool) {
        if !self.roster.set_in_lobby(conn_id, in_lobby) {
            debug!("Presence from unjoined connection {}", conn_id);
            return;
        }
        self.broadcast_lobby_state();
        self.evaluate();
    }

    fn handle_chat(&mut self, conn_id: &str, mut chat: ChatMessage) {
        if chat.author.as_deref().map_or(true, str::is_empty) {
            chat.author = Some(
                self.roster
                    .get(conn_id)
                    .map(|e| e.nickname.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
            );
        }
        chat.ts = chat.ts.or_else(|| Some(now_millis()));
        chat.id = Some(conn_id.to_string());

        self.push_chat(chat.clone());
        self.broadcast(&Message::Chat(chat));
    }

    fn handle_pause(&mut self, conn_id: &str, mut pause: PausePayload) {
        pause.player_id = Some(conn_id.to_string());
        self.broadcast(&Message::Pause(pause));
    }

    fn handle_action(&mut self, conn_id: &str, mut action: ActionPayload) {
        action.player_id = Some(conn_id.to_string());
        let seq = self.mirror.apply_action(conn_id, &action, now_millis());
        action.seq = Some(seq);

        self.broadcast(&Message::Action(action));
        self.schedule_state_sync(self.config.state_sync_debounce);
    }

    fn handle_state_sync(&mut self, snapshot: serde_json::Value) {
        self.mirror.replace_from(&snapshot);
        self.broadcast_snapshot();
    }

    fn handle_map_sync(&mut self, conn_id: &str, map: MapPayload) {
        if self.shared_map.is_some() {
            debug!("[{}] Map already shared, ignoring map from {}", self.name(), conn_id);
            return;
        }
        if let Err(e) = Grid::from_payload(&map) {
            debug!("Rejecting map from {}: {}", conn_id, e);
            return;
        }
        info!("[{}] Received shared map from {}", self.name(), conn_id);
        // The sender already plays on this map.
        self.broadcast_except(conn_id, &Message::MapSync(map.clone()));
        self.shared_map = Some(map);
    }
}
