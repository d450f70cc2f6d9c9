//! Configuration of the thread count cap and report output.

use std::{env, fs};
use std::num::NonZero;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Environment variable naming a TOML file to load before applying other overrides.
pub const ENV_CONFIG_FILE: &str = "SECTION_TIMINGS_CONFIG";

/// Environment variable overriding `threading.max_count`.
pub const ENV_THREADING_MAX_COUNT: &str = "SECTION_TIMINGS_THREADING_MAX_COUNT";

/// Environment variable overriding `timings.output_dir`.
pub const ENV_OUTPUT_DIR: &str = "SECTION_TIMINGS_OUTPUT_DIR";

const DEFAULT_OUTPUT_DIR: &str = "profiling";
const DEFAULT_CSV_SEPARATOR: &str = ",";

/// Settings consumed by [`ThreadManager`][crate::ThreadManager] and [`Timings`][crate::Timings].
///
/// The TOML layout is:
///
/// ```toml
/// [threading]
/// max_count = 4
///
/// [timings]
/// output_dir = "profiling"
/// csv_separator = ","
/// ```
///
/// Every key is optional.
///
/// # Examples
///
/// ```
/// use section_timings::Configuration;
///
/// let config = Configuration::from_toml_str("[threading]\nmax_count = 2\n").unwrap();
/// assert_eq!(config.threading_max_count().map(|n| n.get()), Some(2));
/// assert_eq!(config.csv_separator(), ",");
/// ```
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    threading: ThreadingSection,
    timings: TimingsSection,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
struct ThreadingSection {
    max_count: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
struct TimingsSection {
    output_dir: PathBuf,
    csv_separator: String,
}

impl Default for TimingsSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            csv_separator: DEFAULT_CSV_SEPARATOR.to_string(),
        }
    }
}

impl Configuration {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not valid TOML, contains unknown keys or
    /// specifies a zero thread count or an empty CSV separator.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Config`] if its
    /// contents are invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Builds the configuration from the process environment.
    ///
    /// Starts from the defaults, loads the file named by [`ENV_CONFIG_FILE`] if set and then
    /// applies [`ENV_THREADING_MAX_COUNT`] and [`ENV_OUTPUT_DIR`].
    ///
    /// # Errors
    ///
    /// Returns an error if the named file cannot be loaded or an override is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env()`][Self::from_env] but reads variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if the named file cannot be loaded or an override is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup(ENV_CONFIG_FILE) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(raw) = lookup(ENV_THREADING_MAX_COUNT) {
            let count = raw.trim().parse::<usize>().map_err(|e| Error::Config {
                message: format!("{ENV_THREADING_MAX_COUNT}='{raw}' is not a thread count: {e}"),
            })?;

            config.threading.max_count = Some(count);
        }

        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            config.timings.output_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// The configured `threading.max_count`, if any.
    #[must_use]
    pub fn threading_max_count(&self) -> Option<NonZero<usize>> {
        self.threading.max_count.and_then(NonZero::new)
    }

    /// Directory that file-based reports are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.timings.output_dir
    }

    /// Separator placed between CSV columns.
    #[must_use]
    pub fn csv_separator(&self) -> &str {
        &self.timings.csv_separator
    }

    /// Returns a copy with `threading.max_count` replaced.
    #[must_use]
    pub fn with_threading_max_count(mut self, count: NonZero<usize>) -> Self {
        self.threading.max_count = Some(count.get());
        self
    }

    /// Returns a copy with the output directory replaced.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.timings.output_dir = dir.into();
        self
    }

    /// Returns a copy with the CSV separator replaced.
    #[must_use]
    pub fn with_csv_separator(mut self, separator: impl Into<String>) -> Self {
        self.timings.csv_separator = separator.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.threading.max_count == Some(0) {
            return Err(Error::Config {
                message: "threading.max_count must be at least 1".to_string(),
            });
        }

        if self.timings.csv_separator.is_empty() {
            return Err(Error::Config {
                message: "timings.csv_separator must not be empty".to_string(),
            });
        }

        Ok(())
    }
}
