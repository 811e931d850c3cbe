//! Server network layer: WebSocket accept loop, per-connection reader and
//! writer tasks, and the main loop that owns every session.

use crate::config::SessionConfig;
use crate::scheduler::TimerFired;
use crate::session::Connection;
use crate::session_manager::SessionManager;
use crate::utils::generate_connection_id;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Per-connection outbound queue depth. A client that falls this far behind
/// starts losing messages instead of stalling everyone else.
const OUTBOUND_QUEUE: usize = 256;

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Connected {
        conn_id: String,
        origin: Option<String>,
        outbound: mpsc::Sender<String>,
    },
    Text {
        conn_id: String,
        text: String,
    },
    Disconnected {
        conn_id: String,
    },
}

pub struct Server {
    listener: TcpListener,
    manager: SessionManager,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
}

impl Server {
    pub async fn new(addr: &str, config: SessionConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("WebSocket server listening on ws://{}", listener.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            manager: SessionManager::new(config, timer_tx),
            server_tx,
            server_rx,
            timer_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Main server loop. Runs until the accept task is gone.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Server {
            listener,
            mut manager,
            server_tx,
            mut server_rx,
            mut timer_rx,
        } = self;

        spawn_acceptor(listener, server_tx);
        info!("Server started successfully");

        loop {
            tokio::select! {
                message = server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Connected { conn_id, origin, outbound }) => {
                            manager.connect(&conn_id, Connection { outbound, origin });
                        }
                        Some(ServerMessage::Text { conn_id, text }) => {
                            manager.handle_text(&conn_id, &text);
                        }
                        Some(ServerMessage::Disconnected { conn_id }) => {
                            manager.disconnect(&conn_id);
                        }
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },
                Some(fired) = timer_rx.recv() => {
                    manager.on_timer(fired);
                },
            }
        }

        Ok(())
    }
}

/// Spawns the task that accepts TCP connections and upgrades them.
fn spawn_acceptor(listener: TcpListener, server_tx: mpsc::UnboundedSender<ServerMessage>) {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tokio::spawn(handle_connection(stream, addr, server_tx.clone()));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    });
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let conn_id = generate_connection_id();
    debug!("Client {} connected from {}", conn_id, addr);
    let (mut sink, mut frames) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

    let connected = ServerMessage::Connected {
        conn_id: conn_id.clone(),
        origin: Some(addr.ip().to_string()),
        outbound,
    };
    if server_tx.send(connected).is_err() {
        return;
    }

    let writer_id = conn_id.clone();
    tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if let Err(e) = sink.send(WsMessage::Text(text)).await {
                warn!("Failed to send to client {}: {}", writer_id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                let message = ServerMessage::Text {
                    conn_id: conn_id.clone(),
                    text,
                };
                if server_tx.send(message).is_err() {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Socket error on {}: {}", conn_id, e);
                break;
            }
        }
    }

    debug!("Client {} disconnected", conn_id);
    let _ = server_tx.send(ServerMessage::Disconnected { conn_id });
}
