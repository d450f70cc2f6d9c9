//! Per-thread isolation with the fixed-slot storage backend.
//!
//! Threads of this process reuse the indices of exited threads, so each test checks that the
//! successor of an exited thread sees none of its timer state.

#![cfg(feature = "fixed-slots")]

use std::thread;

use section_timings::{Error, Timings, thread_manager};
use testing::WAIT;

// Enough slots for the test harness threads plus the threads spawned by the tests.
const MAX_THREADS: usize = 8;

fn allow_test_threads() {
    // Every test sets the same value before allocating a bank, so whichever test allocates
    // first freezes this cap and later calls are no-ops.
    thread_manager().set_max_threads(MAX_THREADS).unwrap();
}

#[test]
fn successor_thread_measures_from_its_own_start() {
    allow_test_threads();
    let timings = Timings::new();

    // An explicit join waits for thread-local destructors, which return the index.
    thread::scope(|s| s.spawn(|| timings.start("abandoned")).join().unwrap());

    thread::sleep(WAIT);

    let measured = thread::scope(|s| {
        s.spawn(|| {
            timings.start("abandoned");
            timings.stop("abandoned").unwrap()
        })
        .join()
        .unwrap()
    });

    assert!(
        measured < WAIT / 2,
        "a fresh start and stop measured {measured:?}"
    );
}

#[test]
fn successor_thread_cannot_stop_section_of_exited_thread() {
    allow_test_threads();
    let timings = Timings::new();

    thread::scope(|s| s.spawn(|| timings.start("elsewhere")).join().unwrap());

    let error = thread::scope(|s| {
        s.spawn(|| timings.stop("elsewhere").unwrap_err())
            .join()
            .unwrap()
    });

    assert!(matches!(
        error,
        Error::SectionNotStarted { ref section } if section == "elsewhere"
    ));
    assert!(timings.stop("elsewhere").unwrap_err().is_range_error());
}
