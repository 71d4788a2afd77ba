//! Reconnection policy and per-session attempt counters.

use std::time::Duration;

use dashmap::DashMap;

use crate::client::DisconnectReason;

/// What to do after a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp(GiveUpCause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpCause {
    LoggedOut,
    RetriesExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            interval: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
        }
    }

    /// Effective attempt budget; a configured zero still allows one retry.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Decide from a disconnect reason and the attempts already granted.
    pub fn decide(&self, reason: DisconnectReason, attempts: u32) -> RetryDecision {
        if reason == DisconnectReason::LoggedOut {
            return RetryDecision::GiveUp(GiveUpCause::LoggedOut);
        }
        if attempts >= self.max_attempts() {
            return RetryDecision::GiveUp(GiveUpCause::RetriesExhausted);
        }
        let delay = if reason == DisconnectReason::RestartRequired {
            Duration::ZERO
        } else {
            self.interval
        };
        RetryDecision::Retry { delay }
    }
}

/// Consecutive reconnect attempts per session id. Not persisted.
#[derive(Debug, Default)]
pub struct RetryCounter {
    attempts: DashMap<String, u32>,
}

impl RetryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> u32 {
        self.attempts.get(id).map(|a| *a).unwrap_or(0)
    }

    /// Record one more granted retry and return the new count.
    pub fn bump(&self, id: &str) -> u32 {
        let mut entry = self.attempts.entry(id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn clear(&self, id: &str) {
        self.attempts.remove(id);
    }
}
