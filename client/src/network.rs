use crate::game::ClientGameState;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::Rng;
use shared::protocol::JoinPayload;
use shared::{decode, encode, now_millis, Grid, Message, PowerupManager, ProtocolError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

const CLIENT_ID_LEN: usize = 8;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("server closed the connection")]
    Closed,
    #[error("gave up after {0} reconnect attempts")]
    RetriesExhausted(u32),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub nickname: String,
    pub client_id: String,
    pub max_reconnect_attempts: u32,
    /// Backoff unit; attempt `n` waits `n` units, capped at `max_backoff_steps`.
    pub backoff_step: Duration,
    pub max_backoff_steps: u32,
    pub frame_interval: Duration,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            nickname: nickname.into(),
            client_id: generate_client_id(),
            max_reconnect_attempts: 5,
            backoff_step: Duration::from_secs(1),
            max_backoff_steps: 5,
            frame_interval: Duration::from_millis(16),
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * (attempt + 1).min(self.max_backoff_steps)
    }
}

/// Persistent identity kept across reconnects.
pub fn generate_client_id() -> String {
    let mut rng = rand::thread_rng();
    (0..CLIENT_ID_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
}

pub struct Client {
    config: ClientConfig,
    game_state: ClientGameState,
    status: ConnectionStatus,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let grid = Grid::generate(&mut rand::thread_rng());
        let game_state = ClientGameState::new(
            grid,
            PowerupManager::from_entropy(),
            Some(config.client_id.clone()),
        );
        Client {
            config,
            game_state,
            status: ConnectionStatus::Disconnected,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.game_state
    }

    /// Connects and plays until the retry budget is spent.
    pub async fn run(&mut self) -> Result<(), ConnectionError> {
        let mut attempt = 0;
        loop {
            self.status = if attempt == 0 {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Reconnecting { attempt }
            };

            match self.play_session(&mut attempt).await {
                Ok(()) => info!("Connection to {} closed", self.config.server_url),
                Err(e) => warn!("Connection to {} lost: {}", self.config.server_url, e),
            }

            if attempt >= self.config.max_reconnect_attempts {
                self.status = ConnectionStatus::Disconnected;
                error!("Giving up after {} reconnect attempts", attempt);
                return Err(ConnectionError::RetriesExhausted(attempt));
            }
            let delay = self.config.backoff(attempt);
            attempt += 1;
            info!(
                "Reconnecting in {}s (attempt {}/{})",
                delay.as_secs(),
                attempt,
                self.config.max_reconnect_attempts
            );
            sleep(delay).await;
        }
    }

    /// One socket lifetime. A successful handshake resets `attempt`.
    async fn play_session(&mut self, attempt: &mut u32) -> Result<(), ConnectionError> {
        info!("Connecting to {}...", self.config.server_url);
        let (socket, _) = tokio_tungstenite::connect_async(self.config.server_url.as_str()).await?;
        *attempt = 0;
        self.status = ConnectionStatus::Connected;
        info!("Connected to {}", self.config.server_url);

        let (mut sink, mut frames) = socket.split();
        let join = Message::Join(JoinPayload {
            nickname: self.config.nickname.clone(),
            client_id: Some(self.config.client_id.clone()),
        });
        sink.send(WsMessage::Text(encode(&join)?)).await?;

        let mut frame_timer = interval(self.config.frame_interval);
        frame_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let outgoing = tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => match decode(&text) {
                        Ok(message) => self.game_state.handle_message(message, now_millis()),
                        Err(e) => {
                            debug!("Dropping malformed message: {}", e);
                            Vec::new()
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        self.status = ConnectionStatus::Disconnected;
                        return Err(ConnectionError::Closed);
                    }
                    Some(Ok(_)) => Vec::new(),
                    Some(Err(e)) => {
                        self.status = ConnectionStatus::Disconnected;
                        return Err(e.into());
                    }
                },
                _ = frame_timer.tick() => self.game_state.step(now_millis()),
            };

            for message in outgoing {
                sink.send(WsMessage::Text(encode(&message)?)).await?;
            }
        }
    }
}
