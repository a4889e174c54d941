//! Per-kind delivery throttle.
//!
//! Leading edge: the first event of a kind passes, further events of that
//! kind are dropped until `min_interval` has elapsed.

use livefeed_core::EventKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub struct Throttle {
    min_interval: Duration,
    /// Last time an event of each kind was let through.
    last_pass: Mutex<HashMap<EventKind, Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_pass: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an event of `kind` may be delivered now. Records the pass.
    pub fn allow(&self, kind: EventKind) -> bool {
        self.allow_at(kind, Instant::now())
    }

    pub fn allow_at(&self, kind: EventKind, now: Instant) -> bool {
        let mut last_pass = self.last_pass.lock();
        match last_pass.get(&kind) {
            Some(last) if now.saturating_duration_since(*last) < self.min_interval => false,
            _ => {
                last_pass.insert(kind, now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_edge_per_kind() {
        let throttle = Throttle::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(throttle.allow_at(EventKind::Metrics, t0));
        assert!(!throttle.allow_at(EventKind::Metrics, t0 + Duration::from_millis(50)));
        assert!(!throttle.allow_at(EventKind::Metrics, t0 + Duration::from_millis(99)));

        // Other kinds have their own window
        assert!(throttle.allow_at(EventKind::Chart, t0 + Duration::from_millis(50)));

        assert!(throttle.allow_at(EventKind::Metrics, t0 + Duration::from_millis(100)));
        assert!(!throttle.allow_at(EventKind::Metrics, t0 + Duration::from_millis(150)));
    }

    #[test]
    fn test_zero_interval_passes_everything() {
        let throttle = Throttle::new(Duration::ZERO);
        let t0 = Instant::now();
        assert!(throttle.allow_at(EventKind::Alert, t0));
        assert!(throttle.allow_at(EventKind::Alert, t0));
    }
}
