//! Fake platform implementation for testing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::pal::{ClockSample, Platform};

/// Fake platform whose clocks only move when a test advances them.
///
/// Clones share the same clocks, so a test can keep one clone and hand another to the code
/// under test.
#[derive(Clone, Debug)]
pub(crate) struct FakePlatform {
    state: Arc<Mutex<ClockSample>>,
}

impl FakePlatform {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockSample::default())),
        }
    }

    /// Moves all three clocks forward.
    pub(crate) fn advance(&self, wall: Duration, user: Duration, system: Duration) {
        let mut state = self
            .state
            .lock()
            .expect("FakePlatform state lock should not be poisoned");

        state.wall = state.wall.saturating_add(wall);
        state.user = state.user.saturating_add(user);
        state.system = state.system.saturating_add(system);
    }

    /// Moves only the wall clock forward, as if the process were sleeping.
    pub(crate) fn advance_wall(&self, wall: Duration) {
        self.advance(wall, Duration::ZERO, Duration::ZERO);
    }
}

impl Platform for FakePlatform {
    fn sample(&self) -> ClockSample {
        *self
            .state
            .lock()
            .expect("FakePlatform state lock should not be poisoned")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let platform = FakePlatform::new();
        assert_eq!(platform.sample(), ClockSample::default());
    }

    #[test]
    fn clones_share_clocks() {
        let platform1 = FakePlatform::new();
        let platform2 = platform1.clone();

        platform1.advance_wall(Duration::from_millis(100));
        platform2.advance(
            Duration::from_millis(1),
            Duration::from_millis(2),
            Duration::from_millis(3),
        );

        let sample = platform1.sample();
        assert_eq!(sample.wall, Duration::from_millis(101));
        assert_eq!(sample.user, Duration::from_millis(2));
        assert_eq!(sample.system, Duration::from_millis(3));
    }
}
