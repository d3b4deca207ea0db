//! Leading+trailing edge coalescer for the re-quote trigger.
//!
//! High-rate fair-price events collapse into at most one firing per window:
//! the first trigger in an idle window fires immediately, further triggers
//! arm a single trailing firing at the window boundary so the final value is
//! never dropped. Implemented as a timer-plus-flag state machine; the owner
//! drives the timer from its event loop.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Idle window: fire now (leading edge).
    Fire,
    /// Window busy: a trailing firing is now armed for the returned deadline.
    Armed(Instant),
    /// Window busy and the trailing firing was already armed.
    Coalesced,
}

#[derive(Debug)]
pub struct Throttle {
    window: Duration,
    last_fire: Option<Instant>,
    trailing_armed: bool,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fire: None,
            trailing_armed: false,
        }
    }

    /// Register a trigger at `now`.
    pub fn trigger(&mut self, now: Instant) -> ThrottleDecision {
        match self.last_fire {
            Some(last) if now.duration_since(last) < self.window => {
                if self.trailing_armed {
                    ThrottleDecision::Coalesced
                } else {
                    self.trailing_armed = true;
                    ThrottleDecision::Armed(last + self.window)
                }
            }
            _ => {
                self.last_fire = Some(now);
                ThrottleDecision::Fire
            }
        }
    }

    /// Deadline of the armed trailing firing, if any.
    pub fn deadline(&self) -> Option<Instant> {
        if self.trailing_armed {
            self.last_fire.map(|last| last + self.window)
        } else {
            None
        }
    }

    /// Consume the armed trailing firing. Returns false when none is armed.
    pub fn fire_trailing(&mut self, now: Instant) -> bool {
        if !self.trailing_armed {
            return false;
        }
        self.trailing_armed = false;
        self.last_fire = Some(now);
        true
    }

    /// Drop any armed trailing firing (shutdown path).
    pub fn cancel(&mut self) {
        self.trailing_armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn leading_edge_fires_immediately() {
        let mut throttle = Throttle::new(WINDOW);
        assert_eq!(throttle.trigger(Instant::now()), ThrottleDecision::Fire);
    }

    #[tokio::test]
    async fn burst_collapses_to_one_trailing() {
        let mut throttle = Throttle::new(WINDOW);
        let start = Instant::now();
        assert_eq!(throttle.trigger(start), ThrottleDecision::Fire);
        assert_eq!(
            throttle.trigger(start + Duration::from_millis(10)),
            ThrottleDecision::Armed(start + WINDOW)
        );
        assert_eq!(
            throttle.trigger(start + Duration::from_millis(20)),
            ThrottleDecision::Coalesced
        );
        assert_eq!(throttle.deadline(), Some(start + WINDOW));

        assert!(throttle.fire_trailing(start + WINDOW));
        assert_eq!(throttle.deadline(), None);
        assert!(!throttle.fire_trailing(start + WINDOW));
    }

    #[tokio::test]
    async fn trailing_fire_restarts_the_window() {
        let mut throttle = Throttle::new(WINDOW);
        let start = Instant::now();
        throttle.trigger(start);
        throttle.trigger(start + Duration::from_millis(50));
        assert!(throttle.fire_trailing(start + WINDOW));

        // Still inside the window restarted by the trailing fire.
        assert!(matches!(
            throttle.trigger(start + WINDOW + Duration::from_millis(10)),
            ThrottleDecision::Armed(_)
        ));
    }

    #[tokio::test]
    async fn idle_window_fires_leading_again() {
        let mut throttle = Throttle::new(WINDOW);
        let start = Instant::now();
        assert_eq!(throttle.trigger(start), ThrottleDecision::Fire);
        assert_eq!(
            throttle.trigger(start + WINDOW + Duration::from_millis(1)),
            ThrottleDecision::Fire
        );
    }

    #[tokio::test]
    async fn cancel_drops_armed_trailing() {
        let mut throttle = Throttle::new(WINDOW);
        let start = Instant::now();
        throttle.trigger(start);
        throttle.trigger(start + Duration::from_millis(10));
        throttle.cancel();
        assert_eq!(throttle.deadline(), None);
        assert!(!throttle.fire_trailing(start + WINDOW));
    }
}
