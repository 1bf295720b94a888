//! Flood-control backoff.
//!
//! The server answers `error id=524` when a client sends commands too fast,
//! with a message such as `please wait 10 seconds`. The dispatcher keeps the
//! offending command active and re-sends it once the wait is over.

use std::time::Duration;
use tokio::time::Instant;
use tsquery_protocol::QueryError;

/// Added to the server's wait to absorb clock skew with its flood window.
pub const FLOOD_GRACE: Duration = Duration::from_millis(100);

/// Wait used when the message carries no `<N> second` hint.
pub const DEFAULT_FLOOD_WAIT_SECS: u64 = 1;

/// Upper bound on a server-supplied wait.
pub const MAX_FLOOD_WAIT_SECS: u64 = 3600;

/// Extracts the wait in seconds from a flood error message, capped at
/// [`MAX_FLOOD_WAIT_SECS`].
pub fn wait_secs(message: &str) -> u64 {
    let lower = message.to_lowercase();
    for (idx, _) in lower.match_indices(" second") {
        let digits: String = lower[..idx]
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if let Ok(secs) = digits.parse::<u64>() {
            return secs.min(MAX_FLOOD_WAIT_SECS);
        }
    }
    DEFAULT_FLOOD_WAIT_SECS
}

/// Returns how long to wait before re-sending after a flood error.
pub fn retry_delay(err: &QueryError) -> Duration {
    Duration::from_secs(wait_secs(&err.message())) + FLOOD_GRACE
}

/// Holds the single outstanding flood retry of a dispatcher.
#[derive(Debug, Default)]
pub struct FloodController {
    deadline: Option<Instant>,
}

impl FloodController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules the retry, replacing any previous one.
    pub fn schedule(&mut self, now: Instant, err: &QueryError) -> Instant {
        let deadline = now
            .checked_add(retry_delay(err))
            .unwrap_or_else(|| now + Duration::from_secs(DEFAULT_FLOOD_WAIT_SECS) + FLOOD_GRACE);
        if self.deadline.replace(deadline).is_some() {
            tracing::debug!("replacing pending flood retry");
        }
        deadline
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` exactly once, when the retry is due.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
