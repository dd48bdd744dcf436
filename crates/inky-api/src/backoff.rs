//! Capped exponential backoff.
//!
//! Shared by the bus session's reconnect loop (5s floor) and the
//! registration coordinator's retry loop (10s floor). No jitter: a
//! single device talking to its own broker gains nothing from spread.

use std::time::Duration;

/// Delay sequence `floor, 2*floor, 4*floor, ...` capped at `cap`.
///
/// [`next`](Self::next) returns the current delay and advances;
/// [`reset`](Self::reset) drops back to the floor after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, cap: Duration) -> Self {
        Self {
            floor,
            cap,
            current: floor,
        }
    }

    /// The delay to sleep now. Advances the sequence.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    /// Return to the floor delay after a successful attempt.
    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}
