#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Named timing sections for iterative numerical experiments.
//!
//! This package measures wall, user and system time of named code sections, keeps one timer per
//! thread for every section and collects the measured intervals over multiple runs of an
//! experiment, for example one run per mesh refinement level. The collected data can be written
//! out as CSV reports.
//!
//! The core functionality includes:
//! - [`Timings`] - Registry of sections, run history and CSV reports
//! - [`ScopedTiming`] - Times the scope it lives in
//! - [`profile_scope!`] - Scope instrumentation that compiles away without the `profile` feature
//! - [`PerThreadValue`] - One independently mutable value per thread
//! - [`ThreadManager`] - Thread count cap and small thread indices
//! - [`Configuration`] - Thread count cap and report settings from TOML or the environment
//!
//! This package is a development tool for experiments and benchmarks. It is not a tracing or
//! telemetry system.
//!
//! # Simple usage
//!
//! ```
//! use section_timings::{ScopedTiming, Timings};
//!
//! let timings = Timings::new();
//!
//! for _refinement in 0..3 {
//!     {
//!         let _solve = ScopedTiming::new(&timings, "solve");
//!         // ... solve ...
//!     }
//!
//!     timings.next_run();
//! }
//!
//! let mut report = Vec::new();
//! timings.output_timings(&mut report).unwrap();
//!
//! let report = String::from_utf8(report).unwrap();
//! assert!(report.starts_with("section,run_0,run_1,run_2,run_3\n"));
//! ```
//!
//! # Process-wide registry
//!
//! Code that cannot easily pass a [`Timings`] around can use the lazily created process-wide
//! instance returned by [`timings()`]:
//!
//! ```
//! use section_timings::timings;
//!
//! timings().start("global_section");
//! let elapsed = timings().stop("global_section").unwrap();
//!
//! assert_eq!(timings().get_timing("global_section").unwrap(), elapsed);
//! ```
//!
//! # Cargo features
//!
//! - `profile` - [`profile_scope!`] records into the process-wide registry. Without it, the
//!   macro produces an empty guard.
//! - `fixed-slots` - [`PerThreadValue`] allocates one slot per thread index up front instead of
//!   allocating slots lazily per thread.
//!
//! # Logging
//!
//! Diagnostics are emitted through `tracing`. The package never installs a subscriber.

use std::sync::OnceLock;

mod config;
mod error;
mod guards;
mod output;
mod pal;
mod per_thread_value;
mod thread_manager;
mod timing_data;
mod timings;

pub use config::{Configuration, ENV_CONFIG_FILE, ENV_OUTPUT_DIR, ENV_THREADING_MAX_COUNT};
pub use error::{Error, Result};
pub use guards::{OutputScopedTiming, ProfileScope, ScopedTiming};
pub use per_thread_value::PerThreadValue;
pub use thread_manager::{ThreadManager, thread_manager};
pub use timing_data::{Delta, TimingData};
pub use timings::Timings;

pub(crate) const ERR_POISONED_LOCK: &str =
    "encountered poisoned lock - program validity cannot be guaranteed";

/// Returns the process-wide [`Timings`] registry, creating it on first use.
///
/// The registry is configured from the environment (see [`Configuration::from_env()`]).
#[must_use]
pub fn timings() -> &'static Timings {
    static INSTANCE: OnceLock<Timings> = OnceLock::new();

    INSTANCE.get_or_init(Timings::new)
}

/// The configuration read from the environment, loaded once per process.
///
/// An invalid environment configuration is reported and replaced by the defaults.
#[cfg_attr(test, mutants::skip)] // The result depends on the environment of the test process.
pub(crate) fn global_configuration() -> &'static Configuration {
    static INSTANCE: OnceLock<Configuration> = OnceLock::new();

    INSTANCE.get_or_init(|| {
        Configuration::from_env().unwrap_or_else(|error| {
            tracing::warn!(
                %error,
                "ignoring invalid section timings configuration, using defaults"
            );
            Configuration::default()
        })
    })
}
