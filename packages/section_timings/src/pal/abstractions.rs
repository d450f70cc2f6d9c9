//! Platform abstraction trait definitions.

use std::fmt::Debug;
use std::time::Duration;

/// One reading of the three clocks a section is measured with.
///
/// The absolute values are relative to an arbitrary per-platform origin; only differences
/// between two samples from the same platform are meaningful.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct ClockSample {
    pub(crate) wall: Duration,
    pub(crate) user: Duration,
    pub(crate) system: Duration,
}

/// Provides clock readings for timing sections.
pub(crate) trait Platform: Debug + Send + Sync + 'static {
    /// Reads the monotonic wall clock and the process user and system processor times.
    fn sample(&self) -> ClockSample;
}
