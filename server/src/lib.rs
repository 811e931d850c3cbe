//! # Session Relay Server Library
//!
//! Lobby coordination and message relay for the grid bomb game. The server
//! does not simulate the match; clients do. It groups connections into
//! sessions, decides when a session's match starts, keeps a best-effort mirror
//! of in-match state for late joiners, and fans every message out to the
//! session's players.
//!
//! ## Architecture
//!
//! ### Single Owner Event Loop
//! All session state lives in a [`session_manager::SessionManager`] owned by
//! one task. Socket reader tasks and timer tasks talk to it through channels,
//! so no session data is ever shared or locked.
//!
//! ### Timers
//! Lobby timers (the wait period, the countdown and the debounced snapshot
//! broadcast) are tokio tasks tracked by a per-session
//! [`scheduler::Scheduler`]. A fired timer carries a ticket; cancelled or
//! superseded tickets are ignored when they arrive.
//!
//! ### Fan-out
//! Each connection has a bounded outbound queue drained by its own writer
//! task. Sends never wait: a closed or full queue loses the message and the
//! rest of the session is unaffected.
//!
//! ## Module Organization
//!
//! - `client_manager`: session roster and identity reconciliation
//! - `config`: per-session limits and timings
//! - `game`: the shared state mirror
//! - `network`: WebSocket transport and the main loop
//! - `relay`: per-message handling
//! - `scheduler`: cancellable named timers
//! - `session`: lobby state machine and broadcast
//! - `session_manager`: session registry and lobby assignment
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::SessionConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new("127.0.0.1:8081", SessionConfig::default()).await?;
//!     server.run().await.map_err(|e| e as Box<dyn std::error::Error>)
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod game;
pub mod network;
pub mod relay;
pub mod scheduler;
pub mod session;
pub mod session_manager;
pub mod utils;
