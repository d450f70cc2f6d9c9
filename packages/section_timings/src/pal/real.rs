//! Real platform implementation using the operating system clocks.

#[cfg(unix)]
use std::io;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::pal::{ClockSample, Platform};

/// Reads the monotonic wall clock and the process processor times of the build target.
#[derive(Clone, Debug)]
pub(crate) struct RealPlatform;

impl Platform for RealPlatform {
    fn sample(&self) -> ClockSample {
        let (user, system) = processor_times();

        ClockSample {
            wall: wall_origin().elapsed(),
            user,
            system,
        }
    }
}

fn wall_origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();

    *ORIGIN.get_or_init(Instant::now)
}

#[cfg(unix)]
fn processor_times() -> (Duration, Duration) {
    use std::mem;

    // SAFETY: All-zero is a valid initial value for this type.
    let mut usage: libc::rusage = unsafe { mem::zeroed() };

    // SAFETY: We are passing valid arguments, no other safety requirements.
    let result = unsafe { libc::getrusage(libc::RUSAGE_SELF, &raw mut usage) };

    if result != 0 {
        return unavailable_processor_times(&io::Error::last_os_error());
    }

    (
        timeval_to_duration(usage.ru_utime),
        timeval_to_duration(usage.ru_stime),
    )
}

/// Reports processor times as zero when the operating system cannot provide them. Wall time
/// is still measured.
#[cfg(unix)]
fn unavailable_processor_times(error: &io::Error) -> (Duration, Duration) {
    tracing::warn!(%error, "cannot read process processor times, reporting them as zero");

    (Duration::ZERO, Duration::ZERO)
}

#[cfg(unix)]
fn timeval_to_duration(value: libc::timeval) -> Duration {
    // Negative components never come out of getrusage, clamp them to zero if they ever do.
    let secs = u64::try_from(value.tv_sec).unwrap_or_default();
    let micros = u32::try_from(value.tv_usec).unwrap_or_default();

    Duration::from_secs(secs).saturating_add(Duration::from_micros(u64::from(micros)))
}

// The `cpu_time` package does not split user and system time, so everything is reported as user.
#[cfg(not(unix))]
fn processor_times() -> (Duration, Duration) {
    (cpu_time::ProcessTime::now().as_duration(), Duration::ZERO)
}
