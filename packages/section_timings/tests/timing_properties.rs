//! Timing behavior of `section_timings` against the real clocks of the operating system.
//!
//! Each test uses its own `Timings` instance because tests run in parallel and some of them
//! reset the run history.

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use section_timings::{Error, ScopedTiming, Timings};
use testing::{WAIT, busy_wait, with_watchdog, within_margin};

#[test]
fn measured_time_covers_busy_wait() {
    with_watchdog(|| {
        let timings = Timings::new();

        timings.start("busy");
        busy_wait(WAIT);
        let stopped = timings.stop("busy").unwrap();

        let measured = timings.get_timing("busy").unwrap();
        assert_eq!(measured, stopped);
        assert!(
            within_margin(measured, WAIT),
            "measured {measured:?} for a wait of {WAIT:?}"
        );

        let delta = timings.get_delta("busy").unwrap();
        assert!(delta.user().saturating_add(delta.system()) > Duration::ZERO);
    });
}

#[test]
fn outer_section_outlasts_nested_section() {
    with_watchdog(|| {
        let timings = Timings::new();

        timings.start("outer");
        timings.start("inner");
        busy_wait(Duration::from_millis(100));
        timings.stop("inner").unwrap();
        timings.stop("outer").unwrap();

        let inner = timings.get_timing("inner").unwrap();
        let outer = timings.get_timing("outer").unwrap();

        assert!(within_margin(inner, Duration::from_millis(100)));
        assert!(outer > inner, "outer {outer:?} should exceed inner {inner:?}");
    });
}

#[test]
fn running_section_can_be_queried() {
    with_watchdog(|| {
        let timings = Timings::new();

        timings.start("open");
        busy_wait(Duration::from_millis(20));

        assert!(within_margin(
            timings.get_timing("open").unwrap(),
            Duration::from_millis(20)
        ));

        timings.stop("open").unwrap();
    });
}

#[test]
fn stopping_unknown_section_is_range_error() {
    let timings = Timings::new();

    let error = timings.stop("never_started").unwrap_err();

    assert!(error.is_range_error());
    assert!(matches!(
        error,
        Error::SectionNotStarted { ref section } if section == "never_started"
    ));
}

#[test]
fn run_count_must_be_positive() {
    let timings = Timings::new();

    assert!(timings.reset(0).unwrap_err().is_range_error());
    assert!(timings.reset(-1).unwrap_err().is_range_error());

    timings.reset(1).unwrap();
    assert_eq!(timings.current_run_number(), 0);
}

#[test]
fn scoped_timing_stops_once_on_unwind() {
    let timings = Timings::new();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _timing = ScopedTiming::new(&timings, "unwinding");
        busy_wait(Duration::from_millis(5));
        panic!("simulated failure inside a timed section");
    }));

    result.unwrap_err();

    let measured = timings.get_timing("unwinding").unwrap();
    assert!(measured >= Duration::ZERO);

    // The guard already stopped the section, so stopping again only returns that interval.
    assert_eq!(timings.stop("unwinding").unwrap(), measured);
}

// The fixed-slot backend may have fewer slots than the threads of this test.
#[cfg(not(feature = "fixed-slots"))]
#[test]
fn threads_measure_independently() {
    with_watchdog(|| {
        let timings = Timings::new();
        let wait = Duration::from_millis(100);

        let per_thread: Vec<Duration> = thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        timings.start("parallel");
                        busy_wait(wait);
                        timings.stop("parallel").unwrap()
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for measured in per_thread {
            assert!(within_margin(measured, wait), "measured {measured:?}");
        }

        let sum = timings.thread_sum("parallel").unwrap().wall();
        assert!(within_margin(sum, wait * 2), "sum {sum:?}");
    });
}

// The fixed-slot backend may have fewer slots than the threads of this test.
#[cfg(not(feature = "fixed-slots"))]
#[test]
fn section_started_on_other_thread_cannot_be_stopped_here() {
    let timings = Timings::new();

    thread::scope(|s| {
        s.spawn(|| timings.start("elsewhere"));
    });

    assert!(timings.stop("elsewhere").unwrap_err().is_range_error());
}

#[test]
fn outputs_are_repeatable() {
    let timings = Timings::new();

    timings.start("a");
    busy_wait(Duration::from_millis(2));
    timings.stop("a").unwrap();
    timings.next_run();
    timings.start("b");
    timings.stop("b").unwrap();

    let render = |timings: &Timings| {
        let mut out = Vec::new();
        timings.output_timings(&mut out).unwrap();
        timings.output_timings_all(&mut out).unwrap();
        timings.output_thread_statistics(&mut out).unwrap();
        timings.output_simple(&mut out).unwrap();
        timings.write_averaged(&mut out, 1, 100, 1.0).unwrap();
        String::from_utf8(out).unwrap()
    };

    let first = render(&timings);
    let second = render(&timings);

    assert_eq!(first, second);
    assert!(first.starts_with("section,run_0,run_1\n"));
}

#[test]
fn history_survives_advancing_runs() {
    let timings = Timings::new();
    timings.reset(3).unwrap();

    timings.start("step");
    busy_wait(Duration::from_millis(3));
    let first = timings.stop("step").unwrap();

    for _ in 0..3 {
        timings.next_run();
    }

    assert_eq!(timings.current_run_number(), 3);
    assert_eq!(timings.get_timing_for_run("step", 0).unwrap(), first);
    assert!(timings.run_snapshot(1).unwrap().is_empty());
}
