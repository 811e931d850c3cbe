//! Per-session tuning knobs.

use std::time::Duration;

/// Timing and occupancy limits shared by every session the server creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub min_players: usize,
    pub max_players: usize,
    /// Grace period once `min_players` are present before the countdown starts.
    pub wait_duration: Duration,
    /// Length of the pre-match countdown; ticks are whole seconds.
    pub countdown: Duration,
    pub state_sync_debounce: Duration,
    pub leave_sync_debounce: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: shared::MAX_PLAYERS,
            wait_duration: Duration::from_millis(20_000),
            countdown: Duration::from_millis(10_000),
            state_sync_debounce: Duration::from_millis(250),
            leave_sync_debounce: Duration::from_millis(50),
        }
    }
}

impl SessionConfig {
    /// Number of one-second countdown ticks.
    pub fn countdown_secs(&self) -> u32 {
        self.countdown.as_secs() as u32
    }

    /// Clamps occupancy limits into the range the arena supports.
    pub fn normalized(mut self) -> Self {
        self.max_players = self.max_players.clamp(1, shared::MAX_PLAYERS);
        self.min_players = self.min_players.clamp(1, self.max_players);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.min_players, 2);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.countdown_secs(), 10);
        assert_eq!(config.wait_duration, Duration::from_secs(20));
    }

    #[test]
    fn test_normalized_limits() {
        let config = SessionConfig {
            min_players: 9,
            max_players: 12,
            ..SessionConfig::default()
        }
        .normalized();
        assert_eq!(config.max_players, 4);
        assert_eq!(config.min_players, 4);
    }
}
