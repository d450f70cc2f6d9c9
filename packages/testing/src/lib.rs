#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and examples in the section timing packages.

use std::hint::black_box;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Fraction of a requested busy wait that a measured wall time must reach to be accepted.
///
/// Clock granularity and the moment at which a timer samples its start mean a measured interval
/// can come out slightly shorter than the wait it surrounds.
pub const CONFIDENCE_MARGIN: f64 = 0.90;

/// Busy wait used by timing tests, chosen to be well above scheduler and clock granularity.
pub const WAIT: Duration = Duration::from_millis(142);

/// Spins on the calling thread for at least `duration` of wall time.
///
/// Unlike `thread::sleep()`, this keeps the processor busy, so both wall time and user time
/// advance.
pub fn busy_wait(duration: Duration) {
    let start = Instant::now();
    let mut accumulator = 0_u64;

    while start.elapsed() < duration {
        for i in 0..1_000_u64 {
            accumulator = accumulator.wrapping_mul(31).wrapping_add(i);
        }

        black_box(accumulator);
    }
}

/// Whether `measured` is at least [`CONFIDENCE_MARGIN`] of `expected`.
#[must_use]
pub fn within_margin(measured: Duration, expected: Duration) -> bool {
    measured.as_secs_f64() >= expected.as_secs_f64() * CONFIDENCE_MARGIN
}

/// Runs a test with a timeout to prevent infinite hangs.
///
/// If the test takes longer than the timeout to complete, the calling test fails instead of
/// hanging the test run. The timeout is 10 seconds, or 60 seconds under Miri.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled and
/// the test function is executed directly, so that mutation testing can detect hanging mutants.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode) and resumes any
/// panic raised by the test itself.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out.
        drop(tx.send(result));
    });

    let timeout = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("Test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("Test exceeded {}-second timeout", timeout.as_secs());
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("Test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}
