//! Shared state mirror: the server's copy of a session's in-match state.
//!
//! The server never simulates the match. It records what clients report
//! (positions from `move`, a rolling log of bomb events) so that late joiners
//! can be handed a snapshot, and it accepts wholesale replacements from
//! clients that send a `stateSync`.

use log::debug;
use serde_json::{json, Map, Value};
use shared::protocol::{ActionPayload, LobbyPhase, PlayerPosition};
use shared::GameEvent;
use std::collections::VecDeque;

pub const EVENT_LOG_CAP: usize = 200;

/// Snapshot keys owned by the server; a client snapshot cannot override them.
const RESERVED_KEYS: [&str; 7] = [
    "state",
    "countdown",
    "waitEndsAt",
    "startedAt",
    "seq",
    "players",
    "events",
];

#[derive(Debug, Clone, Default)]
pub struct GameState {
    seq: u64,
    players: Map<String, Value>,
    events: VecDeque<Value>,
    /// Any other fields a client put into its snapshot.
    extra: Map<String, Value>,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn players(&self) -> &Map<String, Value> {
        &self.players
    }

    pub fn events(&self) -> impl Iterator<Item = &Value> {
        self.events.iter()
    }

    /// Records the effect of a relayed action and returns the new sequence
    /// number.
    pub fn apply_action(&mut self, sender: &str, action: &ActionPayload, now: u64) -> u64 {
        match &action.event {
            GameEvent::Move {
                row,
                col,
                x,
                y,
                direction,
            } => {
                let position = PlayerPosition {
                    id: sender.to_string(),
                    row: *row,
                    col: *col,
                    x: *x,
                    y: *y,
                    direction: *direction,
                    last_update: now,
                };
                match serde_json::to_value(position) {
                    Ok(value) => {
                        self.players.insert(sender.to_string(), value);
                    }
                    Err(e) => debug!("Failed to record position for {}: {}", sender, e),
                }
            }
            GameEvent::PlaceBomb { row, col, .. } => {
                self.push_event(json!({
                    "type": "placeBomb",
                    "by": sender,
                    "row": row,
                    "col": col,
                    "ts": now,
                }));
            }
            GameEvent::Explode { row, col, range, .. } => {
                self.push_event(json!({
                    "type": "explode",
                    "by": sender,
                    "row": row,
                    "col": col,
                    "range": range,
                    "ts": now,
                }));
            }
            _ => {}
        }
        self.bump()
    }

    fn push_event(&mut self, event: Value) {
        self.events.push_back(event);
        while self.events.len() > EVENT_LOG_CAP {
            self.events.pop_front();
        }
    }

    fn bump(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Replaces the mirror with a client-provided snapshot. Phase and sequence
    /// fields in the snapshot are ignored. Returns the new sequence number.
    pub fn replace_from(&mut self, snapshot: &Value) -> u64 {
        self.players.clear();
        self.events.clear();
        self.extra.clear();

        if let Value::Object(fields) = snapshot {
            if let Some(Value::Object(players)) = fields.get("players") {
                self.players = players.clone();
            }
            if let Some(Value::Array(events)) = fields.get("events") {
                let skip = events.len().saturating_sub(EVENT_LOG_CAP);
                self.events = events.iter().skip(skip).cloned().collect();
            }
            for (key, value) in fields {
                if !RESERVED_KEYS.contains(&key.as_str()) {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
        self.bump()
    }

    /// Forgets a departed player's position. Returns true if one was recorded.
    pub fn remove_player(&mut self, id: &str) -> bool {
        let removed = self.players.remove(id).is_some();
        if removed {
            self.bump();
        }
        removed
    }

    /// Serializes the mirror together with the session phase.
    pub fn snapshot(&self, phase: &LobbyPhase) -> Value {
        let mut fields = self.extra.clone();
        if let Ok(Value::Object(phase_fields)) = serde_json::to_value(phase) {
            fields.extend(phase_fields);
        }
        fields.insert("seq".to_string(), json!(self.seq));
        fields.insert("players".to_string(), Value::Object(self.players.clone()));
        fields.insert(
            "events".to_string(),
            Value::Array(self.events.iter().cloned().collect()),
        );
        Value::Object(fields)
    }
}
