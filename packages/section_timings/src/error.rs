use thiserror::Error;

/// Errors that can occur when recording or reporting section timings.
///
/// Most variants indicate a defect in the calling code (stopping a section that was never
/// started, requesting zero runs) and are not meant to be retried. Use
/// [`is_range_error()`][Self::is_range_error] to distinguish the range category from the rest.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A section was stopped on a thread where it had never been started.
    #[error("trying to stop timer '{section}' that wasn't started")]
    SectionNotStarted {
        /// Name of the section the caller tried to stop.
        section: String,
    },

    /// The registry was reset to a run count below one or to more runs than can be allocated.
    #[error(
        "invalid run count {requested}: at least one run is required and the history must fit in memory"
    )]
    InvalidRunCount {
        /// The run count the caller asked for.
        requested: i64,
    },

    /// A historical run was requested that the registry has never reached.
    #[error("run {run} does not exist, only {runs} runs are recorded")]
    RunOutOfRange {
        /// The requested run index.
        run: usize,

        /// Number of runs in the history at the time of the request.
        runs: usize,
    },

    /// The thread count cap was set to zero.
    #[error("the maximum thread count must be at least one")]
    InvalidThreadCount,

    /// The thread count cap was changed after per-thread storage had been sized for it.
    #[error(
        "cannot change the maximum thread count from {current} to {requested}: fixed per-thread slots are already allocated"
    )]
    ThreadCountFrozen {
        /// The cap in effect.
        current: usize,

        /// The cap the caller asked for.
        requested: usize,
    },

    /// No timer and no recorded timing exists for the section.
    #[error("no timer found: {section}")]
    NoTimingFound {
        /// Name of the section the caller asked about.
        section: String,
    },

    /// The configuration could not be parsed or contained an invalid value.
    #[error("invalid configuration: {message}")]
    Config {
        /// A human-readable description of the problem.
        message: String,
    },

    /// Writing a report or creating the output directory failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error belongs to the range category: a section stopped before being
    /// started, an invalid run count or an out-of-range run index.
    #[must_use]
    pub fn is_range_error(&self) -> bool {
        matches!(
            self,
            Self::SectionNotStarted { .. }
                | Self::InvalidRunCount { .. }
                | Self::RunOutOfRange { .. }
        )
    }
}

/// A specialized `Result` type for section timing operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
