//! JSON wire protocol shared by the relay server and clients.
//!
//! Every frame is a text message shaped `{"type": ..., "payload": ...}`. Frames
//! with an unknown `type` or a payload that does not fit the type fail to
//! decode; receivers drop them without answering.

use crate::grid::{Cell, Tile};
use crate::powerups::PowerupKind;
use crate::Facing;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid map dimensions {rows}x{cols}")]
    InvalidMap { rows: usize, cols: usize },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Message {
    Join(JoinPayload),
    Joined(JoinedPayload),
    Presence(PresencePayload),
    Chat(ChatMessage),
    ChatHistory(Vec<ChatMessage>),
    Pause(PausePayload),
    Action(ActionPayload),
    /// Opaque snapshot of the session mirror.
    StateSync(serde_json::Value),
    MapSync(MapPayload),
    LobbyState(LobbyStatePayload),
    PlayerJoined(PlayerSummary),
    PlayerLeft(PlayerLeftPayload),
}

pub fn decode(text: &str) -> Result<Message, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinedPayload {
    pub id: String,
    pub nickname: String,
    pub player_index: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub in_lobby: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "text_from_any")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
    /// Sender connection id, stamped by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Chat text arrives from untrusted clients; any JSON scalar is rendered as text.
fn text_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PauseAction {
    Pause,
    Resume,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PausePayload {
    pub action: PauseAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ExplosionCenter {
    pub row: i32,
    pub col: i32,
    pub range: u32,
}

/// In-match events relayed between clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GameEvent {
    Move {
        row: i32,
        col: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<Facing>,
    },
    PlaceBomb {
        row: i32,
        col: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<u32>,
    },
    Explode {
        row: i32,
        col: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        affected_tiles: Option<Vec<Tile>>,
    },
    PowerupSpawned {
        row: i32,
        col: i32,
        powerup_type: PowerupKind,
    },
    PowerupCollected {
        row: i32,
        col: i32,
    },
    Died,
    MapUpdate {
        affected_tiles: Vec<Tile>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map_data: Option<Vec<Vec<Cell>>>,
        explosion_center: ExplosionCenter,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionPayload {
    #[serde(flatten)]
    pub event: GameEvent,
    /// Sender connection id, stamped by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Mirror sequence number after the server applied this action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl ActionPayload {
    pub fn new(event: GameEvent) -> Self {
        Self {
            event,
            player_id: None,
            timestamp: None,
            seq: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MapPayload {
    pub data: Vec<Vec<Cell>>,
    pub rows: usize,
    pub cols: usize,
}

/// Session phase as published to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LobbyPhase {
    #[default]
    Lobby,
    Waiting {
        wait_ends_at: u64,
    },
    Starting {
        countdown: u32,
    },
    Playing {
        started_at: u64,
    },
}

impl LobbyPhase {
    pub fn is_playing(&self) -> bool {
        matches!(self, LobbyPhase::Playing { .. })
    }
}

/// One row of a presence list.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub id: String,
    pub nickname: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_in_lobby")]
    pub in_lobby: bool,
    /// Display slot, recomputed for every list.
    #[serde(default)]
    pub player_index: u8,
    /// Ordinal assigned at join; never changes for a connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_index: Option<u8>,
}

fn default_in_lobby() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LobbyStatePayload {
    pub players: Vec<PlayerSummary>,
    pub game_state: LobbyPhase,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerLeftPayload {
    pub id: String,
}

/// Last reported position of a player, as stored in the session mirror.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPosition {
    pub id: String,
    pub row: i32,
    pub col: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Facing>,
    #[serde(default)]
    pub last_update: u64,
}

/// Player entry inside a snapshot, which may also carry presence fields.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPlayer {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub row: Option<i32>,
    #[serde(default)]
    pub col: Option<i32>,
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
    #[serde(default)]
    pub direction: Option<Facing>,
}

/// Snapshots list players either as an array or as an id-keyed object.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum SnapshotPlayers {
    List(Vec<SnapshotPlayer>),
    Keyed(BTreeMap<String, SnapshotPlayer>),
}

impl Default for SnapshotPlayers {
    fn default() -> Self {
        SnapshotPlayers::List(Vec::new())
    }
}

impl SnapshotPlayers {
    /// Flattens both forms into `(id, entry)` pairs; keyed entries inherit the key
    /// when their own id is missing.
    pub fn into_entries(self) -> Vec<(String, SnapshotPlayer)> {
        match self {
            SnapshotPlayers::List(list) => list
                .into_iter()
                .filter_map(|player| player.id.clone().map(|id| (id, player)))
                .collect(),
            SnapshotPlayers::Keyed(map) => map
                .into_iter()
                .map(|(key, player)| (player.id.clone().unwrap_or(key), player))
                .collect(),
        }
    }
}

/// The parts of a `stateSync` payload a client cares about.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView {
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub players: SnapshotPlayers,
}

impl SnapshotView {
    /// Reads a snapshot; anything that is not an object yields an empty view.
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}
