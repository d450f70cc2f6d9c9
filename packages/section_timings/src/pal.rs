//! Platform abstraction layer for clock sampling.
//!
//! Timing data reads wall, user and system time through [`Platform`] so that unit tests can
//! drive the clocks explicitly instead of busy-waiting.

mod abstractions;
mod facade;
#[cfg(test)]
mod fake;
mod real;

pub(crate) use abstractions::{ClockSample, Platform};
pub(crate) use facade::PlatformFacade;
#[cfg(test)]
pub(crate) use fake::FakePlatform;
