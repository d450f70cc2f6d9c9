use std::ops::{Add, AddAssign};
use std::time::Duration;

use crate::pal::{ClockSample, Platform, PlatformFacade};
use crate::{Error, Result};

/// Elapsed wall, user and system time of one measured interval.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use section_timings::Delta;
///
/// let a = Delta::new(Duration::from_millis(10), Duration::from_millis(8), Duration::ZERO);
/// let b = Delta::new(
///     Duration::from_millis(5),
///     Duration::from_millis(1),
///     Duration::from_millis(1),
/// );
///
/// let total = a + b;
/// assert_eq!(total.wall(), Duration::from_millis(15));
/// assert_eq!(total.user(), Duration::from_millis(9));
/// assert_eq!(total.system(), Duration::from_millis(1));
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Delta {
    wall: Duration,
    user: Duration,
    system: Duration,
}

impl Delta {
    /// Creates a delta from its three components.
    #[must_use]
    pub const fn new(wall: Duration, user: Duration, system: Duration) -> Self {
        Self { wall, user, system }
    }

    pub(crate) fn between(start: ClockSample, end: ClockSample) -> Self {
        Self {
            wall: end.wall.saturating_sub(start.wall),
            user: end.user.saturating_sub(start.user),
            system: end.system.saturating_sub(start.system),
        }
    }

    /// Elapsed time on the monotonic wall clock.
    #[must_use]
    pub const fn wall(&self) -> Duration {
        self.wall
    }

    /// Processor time spent in user mode by the whole process.
    #[must_use]
    pub const fn user(&self) -> Duration {
        self.user
    }

    /// Processor time spent in kernel mode by the whole process.
    #[must_use]
    pub const fn system(&self) -> Duration {
        self.system
    }

    /// Whether all three components are zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl Add for Delta {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            wall: self.wall.saturating_add(rhs.wall),
            user: self.user.saturating_add(rhs.user),
            system: self.system.saturating_add(rhs.system),
        }
    }
}

impl AddAssign for Delta {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Converts a duration to the fractional milliseconds used in reports.
pub(crate) fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Idle,
    Running { start: ClockSample },
    Stopped { delta: Delta },
}

/// One measurement interval of one named section.
///
/// # Examples
///
/// ```
/// use section_timings::TimingData;
///
/// let mut timing = TimingData::new("assemble");
/// assert!(timing.is_running());
///
/// let delta = timing.stop().unwrap();
/// assert!(!timing.is_running());
///
/// // Stopping again returns the same interval.
/// assert_eq!(timing.stop().unwrap(), delta);
/// ```
#[derive(Clone, Debug)]
pub struct TimingData {
    name: String,
    platform: PlatformFacade,
    state: State,
}

impl TimingData {
    /// Creates a timer for the section `name` and starts it.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut timing = Self::idle(name);
        timing.start();
        timing
    }

    /// Creates a timer for the section `name` without starting it.
    #[must_use]
    pub fn idle(name: impl Into<String>) -> Self {
        Self::with_platform(name.into(), PlatformFacade::real())
    }

    pub(crate) fn with_platform(name: String, platform: PlatformFacade) -> Self {
        Self {
            name,
            platform,
            state: State::Idle,
        }
    }

    /// Name of the measured section.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts a new interval, discarding any previous one.
    pub fn start(&mut self) {
        self.state = State::Running {
            start: self.platform.sample(),
        };
    }

    /// Ends the running interval and returns its delta.
    ///
    /// Stopping an interval that has already been stopped returns the recorded delta again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SectionNotStarted`] if the timer was never started.
    pub fn stop(&mut self) -> Result<Delta> {
        match self.state {
            State::Idle => Err(Error::SectionNotStarted {
                section: self.name.clone(),
            }),
            State::Running { .. } => Ok(self.stop_if_running().unwrap_or_default()),
            State::Stopped { delta } => Ok(delta),
        }
    }

    /// Ends the interval if one is running and returns its delta.
    pub(crate) fn stop_if_running(&mut self) -> Option<Delta> {
        let State::Running { start } = self.state else {
            return None;
        };

        let delta = Delta::between(start, self.platform.sample());
        self.state = State::Stopped { delta };

        Some(delta)
    }

    /// The elapsed time of the current interval.
    ///
    /// Zero if the timer was never started, the live value while it runs and the recorded
    /// value once it has stopped.
    #[must_use]
    pub fn delta(&self) -> Delta {
        match self.state {
            State::Idle => Delta::default(),
            State::Running { start } => Delta::between(start, self.platform.sample()),
            State::Stopped { delta } => delta,
        }
    }

    /// The recorded delta of the last completed interval, if the timer is stopped.
    pub(crate) fn completed(&self) -> Option<Delta> {
        match self.state {
            State::Stopped { delta } => Some(delta),
            State::Idle | State::Running { .. } => None,
        }
    }

    /// Returns the timer to the never-started state.
    pub fn reset(&mut self) {
        self.state = State::Idle;
    }

    /// Whether an interval is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }
}
