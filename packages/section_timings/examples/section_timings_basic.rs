//! Times a simulated mesh refinement study with `section_timings`.
//!
//! Every refinement level is measured over several runs. After each level the averaged report
//! is written to a CSV file and the per-run table is printed.
//!
//! Run with: `cargo run --example section_timings_basic`.
//! Add `--features profile` to also record the `profile_scope!` sections.
#![expect(
    clippy::arithmetic_side_effects,
    reason = "this is example code that does not need production-level safety"
)]

use std::hint::black_box;
use std::io;

use section_timings::{ScopedTiming, Timings, profile_scope};

const RUNS_PER_LEVEL: u32 = 3;

fn main() -> section_timings::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let output = tempfile::tempdir()?;

    let timings = Timings::new();
    timings.set_output_dir(output.path())?;

    for level in 0..3_u32 {
        timings.reset(i64::from(RUNS_PER_LEVEL))?;

        for _ in 0..RUNS_PER_LEVEL {
            let total = ScopedTiming::new(&timings, "total");

            let cells = 1_000_u64 << (2 * level);
            assemble(&timings, cells);
            solve(&timings, cells);

            drop(total);
            timings.next_run();
        }

        let path = timings.output_averaged(level, 1_000 << (2 * level), 1.0)?;
        println!("level {level}: averaged report written to {}", path.display());

        timings.output_timings(&mut io::stdout().lock())?;
        println!();
    }

    println!("Thread statistics:");
    timings.output_thread_statistics(&mut io::stdout().lock())?;

    if section_timings::timings().get_timing("element_kernel").is_ok() {
        println!();
        println!("profile_scope! sections were recorded in the process-wide registry.");
    }

    Ok(())
}

fn assemble(timings: &Timings, cells: u64) {
    let _timing = ScopedTiming::new(timings, "assemble");

    let mut accumulator = 0_u64;
    for cell in 0..cells {
        accumulator = accumulator.wrapping_add(element_kernel(cell));
    }

    black_box(accumulator);
}

fn element_kernel(cell: u64) -> u64 {
    profile_scope!("element_kernel");

    (0..64_u64).fold(cell, |acc, i| acc.wrapping_mul(31).wrapping_add(i))
}

fn solve(timings: &Timings, cells: u64) {
    timings.start("solve");

    let mut residual = 1.0_f64;
    for _ in 0..cells {
        residual = black_box(residual * 0.999);
    }

    timings
        .stop("solve")
        .expect("solve was started above on this thread");
}
