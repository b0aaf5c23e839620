use std::time::{Duration, Instant};

pub const PUBLISH_INTERVAL: Duration = Duration::from_millis(60_000);

/// Gate allowing at most one publish per interval.
///
/// There is no timer behind it: the gate is only consulted when a
/// notification arrives, so without traffic nothing is published.
#[derive(Debug)]
pub struct PublishScheduler {
    interval: Duration,
    next_allowed: Option<Instant>,
}

impl Default for PublishScheduler {
    fn default() -> Self {
        Self::new(PUBLISH_INTERVAL)
    }
}

impl PublishScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_allowed: None,
        }
    }

    /// Returns true and opens the next window at `now + interval` if the
    /// current window has elapsed. The first call always succeeds.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.next_allowed {
            Some(next) if now < next => false,
            _ => {
                self.next_allowed = Some(now + self.interval);
                true
            }
        }
    }
}
