//! Registry of live sessions and the connection-to-session assignment.

use crate::config::SessionConfig;
use crate::scheduler::TimerFired;
use crate::session::{Connection, Session};
use log::{debug, info, warn};
use std::collections::HashMap;
use tokio::sync::mpsc;

const DEFAULT_SESSION: &str = "main";

pub struct SessionManager {
    config: SessionConfig,
    sessions: HashMap<String, Session>,
    /// Connection id to session name.
    assignments: HashMap<String, String>,
    timers: mpsc::UnboundedSender<TimerFired>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, timers: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            assignments: HashMap::new(),
            timers,
        }
    }

    pub fn session(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    pub fn session_of(&self, conn_id: &str) -> Option<&Session> {
        self.assignments
            .get(conn_id)
            .and_then(|name| self.sessions.get(name))
    }

    pub(crate) fn session_of_mut(&mut self, conn_id: &str) -> Option<&mut Session> {
        let name = self.assignments.get(conn_id)?;
        self.sessions.get_mut(name)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// First session, in `main`, `main-1`, `main-2`... order, that is neither
    /// in a match nor full.
    fn open_session_name(&self) -> String {
        let mut name = DEFAULT_SESSION.to_string();
        let mut index = 1;
        while let Some(session) = self.sessions.get(&name) {
            if !session.phase().is_playing() && session.connection_count() < self.config.max_players {
                break;
            }
            name = format!("{}-{}", DEFAULT_SESSION, index);
            index += 1;
        }
        name
    }

    /// Assigns a new connection to a session, creating it if needed, and
    /// returns the session name.
    pub fn connect(&mut self, conn_id: &str, connection: Connection) -> Option<String> {
        if self.assignments.contains_key(conn_id) {
            warn!("Duplicate connection id {}, ignoring", conn_id);
            return None;
        }
        let name = self.open_session_name();
        let session = self.sessions.entry(name.clone()).or_insert_with(|| {
            info!("[LOBBY] Created session {}", name);
            Session::new(name.clone(), self.config.clone(), self.timers.clone())
        });
        session.attach(conn_id, connection);
        self.assignments.insert(conn_id.to_string(), name.clone());
        info!("[LOBBY] Assigned {} to lobby: {}", conn_id, name);
        Some(name)
    }

    pub fn disconnect(&mut self, conn_id: &str) {
        let Some(name) = self.assignments.remove(conn_id) else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&name) else {
            return;
        };
        session.detach(conn_id);

        if session.is_empty() && session.phase().is_playing() {
            session.shutdown();
            self.sessions.remove(&name);
            info!("[LOBBY] Deleted empty lobby: {}", name);
        } else {
            session.evaluate();
        }
    }

    /// Delivers a fired timer to its session; a timer for a deleted session is
    /// ignored.
    pub fn on_timer(&mut self, fired: TimerFired) {
        match self.sessions.get_mut(&fired.session) {
            Some(session) => session.on_timer(fired.kind, fired.ticket),
            None => debug!("Timer for deleted session {} ignored", fired.session),
        }
    }
}
