//! Platform facade for switching between real and fake implementations.

#[cfg(test)]
use crate::pal::FakePlatform;
use crate::pal::real::RealPlatform;
use crate::pal::{ClockSample, Platform};

/// Either the real platform or, in tests, a fake one whose clocks are set by the test.
#[derive(Clone, Debug)]
pub(crate) enum PlatformFacade {
    Real(RealPlatform),

    #[cfg(test)]
    Fake(FakePlatform),
}

impl PlatformFacade {
    pub(crate) fn real() -> Self {
        Self::Real(RealPlatform)
    }

    #[cfg(test)]
    pub(crate) fn fake(fake_platform: FakePlatform) -> Self {
        Self::Fake(fake_platform)
    }
}

impl Platform for PlatformFacade {
    fn sample(&self) -> ClockSample {
        match self {
            Self::Real(platform) => platform.sample(),
            #[cfg(test)]
            Self::Fake(platform) => platform.sample(),
        }
    }
}
