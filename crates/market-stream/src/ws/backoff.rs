/*
[INPUT]:  Initial and maximum reconnect delays
[OUTPUT]: Successive wait durations between connection attempts
[POS]:    WebSocket layer - reconnection pacing
[UPDATE]: When changing the backoff curve or reset policy
*/

use std::time::Duration;

/// Exponential backoff: each failed attempt doubles the wait, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay the next wait would use, without advancing.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Delay to wait after a failed attempt; doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(2)
            .map_or(self.max, |doubled| doubled.min(self.max));
        delay
    }

    /// Called after every successful connect.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
