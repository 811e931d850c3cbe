//! Named, cancellable session timers.
//!
//! A timer is a tokio task that sleeps and then posts a [`TimerFired`] into the
//! main loop. Each schedule hands out a fresh ticket; the main loop asks the
//! scheduler to [`Scheduler::take`] the ticket before acting, so a timer that
//! was cancelled or superseded while its message was in flight is ignored.

use log::debug;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Grace period before the countdown.
    Wait,
    /// One-second countdown step.
    CountdownTick,
    /// Debounced snapshot broadcast.
    StateSync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub session: String,
    pub kind: TimerKind,
    pub ticket: u64,
}

struct PendingTimer {
    ticket: u64,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    session: String,
    sender: mpsc::UnboundedSender<TimerFired>,
    pending: HashMap<TimerKind, PendingTimer>,
    next_ticket: u64,
}

impl Scheduler {
    pub fn new(session: impl Into<String>, sender: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            session: session.into(),
            sender,
            pending: HashMap::new(),
            next_ticket: 1,
        }
    }

    /// Schedules `kind` after `delay`, replacing any pending timer of that kind.
    pub fn schedule(&mut self, kind: TimerKind, delay: Duration) -> u64 {
        self.cancel(kind);

        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let sender = self.sender.clone();
        let fired = TimerFired {
            session: self.session.clone(),
            kind,
            ticket,
        };
        let deadline = Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // The main loop may already be gone during shutdown.
            let _ = sender.send(fired);
        });

        self.pending.insert(kind, PendingTimer { ticket, handle });
        ticket
    }

    pub fn is_scheduled(&self, kind: TimerKind) -> bool {
        self.pending.contains_key(&kind)
    }

    /// Consumes a fired timer. Returns false when the ticket is stale.
    pub fn take(&mut self, kind: TimerKind, ticket: u64) -> bool {
        match self.pending.get(&kind) {
            Some(timer) if timer.ticket == ticket => {
                self.pending.remove(&kind);
                true
            }
            _ => {
                debug!("Ignoring stale {:?} timer for session {}", kind, self.session);
                false
            }
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(timer) = self.pending.remove(&kind) {
            timer.handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.pending.drain() {
            timer.handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
