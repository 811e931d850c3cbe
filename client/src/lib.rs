//! # Game Client Library
//!
//! Headless client for the bomber relay server. It joins a session over a
//! WebSocket, keeps its own copy of the arena, and reconciles what the other
//! players report with what it simulates locally.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The local match state. The client runs the fuse, blast and powerup rolls
//! for its own bombs and its own damage, applies peers' reports verbatim, and
//! orders server snapshots by the mirror sequence number.
//!
//! ### Remote Module (`remote`)
//! One proxy per remote player, created on first sighting and removed only
//! when the server or the player says they are gone.
//!
//! ### Network Module (`network`)
//! The socket loop: join, dispatch, a 60 Hz frame step, and reconnects with
//! a bounded number of attempts and growing backoff.

pub mod game;
pub mod network;
pub mod remote;
