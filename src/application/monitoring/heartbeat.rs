use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Detects silent sources.
///
/// Only transitions are reported so callers can push them to the status
/// monitor without flooding it on every tick.
pub struct LivenessTracker {
    last_tick_at: Option<Instant>,
    silence_threshold: Duration,
    alive: bool,
    name: String,
}

impl LivenessTracker {
    pub fn new(name: &str, silence_threshold: Duration) -> Self {
        Self {
            last_tick_at: None,
            silence_threshold,
            alive: false,
            name: name.to_string(),
        }
    }

    /// Record a tick. Returns true if the source just became alive.
    pub fn observe(&mut self, now: Instant) -> bool {
        self.last_tick_at = Some(now);
        if self.alive {
            return false;
        }
        self.alive = true;
        true
    }

    /// Returns true if the source just went silent.
    pub fn check(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_tick_at else {
            return false;
        };
        let elapsed = now.saturating_duration_since(last);
        if self.alive && elapsed > self.silence_threshold {
            debug!(
                "LivenessTracker[{}]: silent for {:?} (threshold: {:?})",
                self.name, elapsed, self.silence_threshold
            );
            self.alive = false;
            return true;
        }
        false
    }

    /// Forget the stream, e.g. after it ended. Returns true if it was alive.
    pub fn reset(&mut self) -> bool {
        let was_alive = self.alive;
        self.alive = false;
        self.last_tick_at = None;
        was_alive
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn silence_threshold(&self) -> Duration {
        self.silence_threshold
    }
}
