//! Guards that time the scope they live in.

use std::io::Write;
use std::marker::PhantomData;
use std::time::Duration;

use crate::{Timings, timings};

/// Starts a section when created and stops it when dropped.
///
/// Errors from stopping the section are logged and never propagated, so the guard is safe to
/// drop during unwinding.
///
/// # Examples
///
/// ```
/// use section_timings::{ScopedTiming, Timings};
///
/// let timings = Timings::new();
///
/// {
///     let _timing = ScopedTiming::new(&timings, "assemble");
///     // ... assemble the system ...
/// }
///
/// assert!(timings.get_timing("assemble").is_ok());
/// ```
#[derive(Debug)]
#[must_use = "the section is stopped as soon as the guard is dropped"]
pub struct ScopedTiming<'a> {
    timings: &'a Timings,
    section: String,

    // Timers are per thread, so the guard must be dropped on the thread that created it.
    _not_send: PhantomData<*const ()>,
}

impl<'a> ScopedTiming<'a> {
    /// Starts `section` in `timings`.
    pub fn new(timings: &'a Timings, section: impl Into<String>) -> Self {
        let section = section.into();
        timings.start(&section);

        Self {
            timings,
            section,
            _not_send: PhantomData,
        }
    }
}

impl ScopedTiming<'static> {
    /// Starts `section` in the process-wide registry returned by [`timings()`].
    pub fn global(section: impl Into<String>) -> Self {
        Self::new(timings(), section)
    }
}

impl Drop for ScopedTiming<'_> {
    fn drop(&mut self) {
        stop_logged(self.timings, &self.section);
    }
}

/// Like [`ScopedTiming`] but also reports the measured wall time to a writer when dropped, as
/// `Executing {section} took {seconds}s`.
///
/// # Examples
///
/// ```
/// use section_timings::{OutputScopedTiming, Timings};
///
/// let timings = Timings::new();
/// let mut log = Vec::new();
///
/// {
///     let _timing = OutputScopedTiming::new(&timings, "solve", &mut log);
/// }
///
/// let line = String::from_utf8(log).unwrap();
/// assert!(line.starts_with("Executing solve took "));
/// ```
#[derive(Debug)]
#[must_use = "the section is stopped as soon as the guard is dropped"]
pub struct OutputScopedTiming<'a, W>
where
    W: Write,
{
    timings: &'a Timings,
    section: String,
    out: &'a mut W,

    _not_send: PhantomData<*const ()>,
}

impl<'a, W> OutputScopedTiming<'a, W>
where
    W: Write,
{
    /// Starts `section` in `timings` and reports to `out` when dropped.
    pub fn new(timings: &'a Timings, section: impl Into<String>, out: &'a mut W) -> Self {
        let section = section.into();
        timings.start(&section);

        Self {
            timings,
            section,
            out,
            _not_send: PhantomData,
        }
    }
}

impl<W> Drop for OutputScopedTiming<'_, W>
where
    W: Write,
{
    fn drop(&mut self) {
        let Some(wall) = stop_logged(self.timings, &self.section) else {
            return;
        };

        if let Err(error) = writeln!(
            self.out,
            "Executing {} took {}s",
            self.section,
            wall.as_secs_f64()
        ) {
            tracing::warn!(
                section = %self.section,
                %error,
                "failed to report scoped section timing"
            );
        }
    }
}

fn stop_logged(timings: &Timings, section: &str) -> Option<Duration> {
    match timings.stop(section) {
        Ok(wall) => Some(wall),
        Err(error) => {
            tracing::warn!(section, %error, "failed to stop scoped section");
            None
        }
    }
}

/// Guard created by [`profile_scope!`][crate::profile_scope].
///
/// With the `profile` feature it times the enclosing scope in the process-wide registry.
/// Without it, the guard is an empty type and instrumentation compiles to nothing.
#[cfg(feature = "profile")]
#[derive(Debug)]
#[must_use = "the section is stopped as soon as the guard is dropped"]
pub struct ProfileScope {
    _timing: ScopedTiming<'static>,
}

#[cfg(feature = "profile")]
impl ProfileScope {
    #[doc(hidden)]
    pub fn enter(section: &str) -> Self {
        Self {
            _timing: ScopedTiming::global(section),
        }
    }
}

/// Guard created by [`profile_scope!`][crate::profile_scope].
///
/// With the `profile` feature it times the enclosing scope in the process-wide registry.
/// Without it, the guard is an empty type and instrumentation compiles to nothing.
#[cfg(not(feature = "profile"))]
#[derive(Debug)]
#[must_use = "the section is stopped as soon as the guard is dropped"]
pub struct ProfileScope {
    _not_send: PhantomData<*const ()>,
}

#[cfg(not(feature = "profile"))]
impl ProfileScope {
    #[doc(hidden)]
    #[inline(always)]
    pub fn enter(_section: &str) -> Self {
        Self {
            _not_send: PhantomData,
        }
    }
}

/// Times the rest of the enclosing scope as a section of the process-wide registry.
///
/// Expands to nothing observable unless the `profile` feature is enabled.
///
/// # Examples
///
/// ```
/// fn assemble() {
///     section_timings::profile_scope!("assemble");
///
///     // ... assemble the system ...
/// }
///
/// assemble();
/// ```
#[macro_export]
macro_rules! profile_scope {
    ($section:expr) => {
        let _profile_scope = $crate::ProfileScope::enter($section);
    };
}
