//! CSV reports over the run history and the per-thread timers of a [`Timings`] registry.
//!
//! All reports are pure reads: generating one does not change the registry, so repeated calls
//! produce the same text.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::iter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::timing_data::millis;
use crate::timings::Datamap;
use crate::{Delta, Result, Timings, thread_manager};

impl Timings {
    /// Writes the averaged report to `p{threads}_refinelvl_{refine_level}.csv` in the output
    /// directory and returns the path of the file.
    ///
    /// See [`write_averaged()`][Self::write_averaged] for the format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`][crate::Error::Io] if the directory or the file cannot be written.
    pub fn output_averaged(
        &self,
        refine_level: u32,
        num_dofs: u64,
        scale_factor: f64,
    ) -> Result<PathBuf> {
        let threads = thread_manager().max_threads();
        let path = self.output_path(format!("p{threads}_refinelvl_{refine_level}.csv"))?;

        write_to_file(&path, |out| {
            self.write_averaged(out, refine_level, num_dofs, scale_factor)
        })?;

        Ok(path)
    }

    /// Writes the averaged report to `out`.
    ///
    /// The header is `refine,threads,numDofs` followed by every section committed in any run.
    /// The single data row holds `refine_level`, the thread count cap, `num_dofs` and, for each
    /// section, its mean wall time in milliseconds over the runs it was committed in, divided
    /// by `scale_factor`.
    ///
    /// The call counters are logged at debug level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`][crate::Error::Io] if writing fails.
    pub fn write_averaged(
        &self,
        out: &mut impl Write,
        refine_level: u32,
        num_dofs: u64,
        scale_factor: f64,
    ) -> Result<()> {
        let (datamaps, _, counters) = self.history();
        let sections = section_names(&datamaps);

        for (id, count) in &counters {
            tracing::debug!(id, count, "call counter");
        }

        let header = ["refine", "threads", "numDofs"]
            .into_iter()
            .map(str::to_string)
            .chain(sections.iter().cloned());
        self.write_row(out, header)?;

        let averages = sections.iter().map(|section| {
            let (total, runs) = datamaps
                .iter()
                .filter_map(|datamap| datamap.get(section))
                .fold((0.0, 0_u32), |(total, runs), delta| {
                    (total + millis(delta.wall()), runs.saturating_add(1))
                });

            // Every listed section was committed in at least one run.
            (total / f64::from(runs.max(1)) / scale_factor).to_string()
        });

        let row = [
            refine_level.to_string(),
            thread_manager().max_threads().to_string(),
            num_dofs.to_string(),
        ]
        .into_iter()
        .chain(averages);
        self.write_row(out, row)?;

        Ok(())
    }

    /// Writes the wall time in milliseconds of every section in every run.
    ///
    /// The header is `section,run_0,..,run_{n-1}`. Each following row starts with a section
    /// name; cells of runs in which the section was not committed are empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`][crate::Error::Io] if writing fails.
    pub fn output_timings(&self, out: &mut impl Write) -> Result<()> {
        let (datamaps, _, _) = self.history();

        let header = iter::once("section".to_string())
            .chain((0..datamaps.len()).map(|run| format!("run_{run}")));
        self.write_row(out, header)?;

        for section in section_names(&datamaps) {
            let cells = datamaps.iter().map(|datamap| {
                datamap
                    .get(&section)
                    .map(|delta| millis(delta.wall()).to_string())
                    .unwrap_or_default()
            });

            self.write_row(out, iter::once(section.clone()).chain(cells))?;
        }

        Ok(())
    }

    /// Writes the [`output_timings()`][Self::output_timings] table to `file_name` in the
    /// output directory and returns the path of the file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`][crate::Error::Io] if the directory or the file cannot be written.
    pub fn output_timings_to_file(&self, file_name: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.output_path(file_name)?;

        write_to_file(&path, |out| self.output_timings(out))?;

        Ok(path)
    }

    /// Like [`output_timings()`][Self::output_timings] but with wall, user and system time
    /// columns for each run: `run_0_wall,run_0_user,run_0_sys,..`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`][crate::Error::Io] if writing fails.
    pub fn output_timings_all(&self, out: &mut impl Write) -> Result<()> {
        let (datamaps, _, _) = self.history();

        let header = iter::once("section".to_string()).chain((0..datamaps.len()).flat_map(
            |run| {
                [
                    format!("run_{run}_wall"),
                    format!("run_{run}_user"),
                    format!("run_{run}_sys"),
                ]
            },
        ));
        self.write_row(out, header)?;

        for section in section_names(&datamaps) {
            let cells = datamaps.iter().flat_map(|datamap| match datamap.get(&section) {
                Some(delta) => [delta.wall(), delta.user(), delta.system()]
                    .map(|duration| millis(duration).to_string()),
                None => [String::new(), String::new(), String::new()],
            });

            self.write_row(out, iter::once(section.clone()).chain(cells))?;
        }

        Ok(())
    }

    /// Writes per-thread statistics of the latest completed interval of every section.
    ///
    /// The header is `threads` followed by `<section>_avg_usr,<section>_max_usr,
    /// <section>_avg_wall,<section>_max_wall,<section>_avg_sys,<section>_max_sys` for each
    /// known section. The data row holds the thread count cap and the statistics in
    /// milliseconds, taken over the threads whose last completed interval is not zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`][crate::Error::Io] if writing fails.
    pub fn output_thread_statistics(&self, out: &mut impl Write) -> Result<()> {
        let banks = self.banks();

        let header = iter::once("threads".to_string()).chain(banks.iter().flat_map(
            |(section, _)| {
                ["avg_usr", "max_usr", "avg_wall", "max_wall", "avg_sys", "max_sys"]
                    .map(|suffix| format!("{section}_{suffix}"))
            },
        ));
        self.write_row(out, header)?;

        let statistics = banks.iter().flat_map(|(_, bank)| {
            let intervals = bank.accumulate(Vec::new(), |mut intervals, timer| {
                if let Some(delta) = timer.completed().filter(|delta| !delta.is_zero()) {
                    intervals.push(delta);
                }
                intervals
            });

            let user = Statistic::over(&intervals, Delta::user);
            let wall = Statistic::over(&intervals, Delta::wall);
            let system = Statistic::over(&intervals, Delta::system);

            [
                user.average, user.max, wall.average, wall.max, system.average, system.max,
            ]
            .map(|value| value.to_string())
        });

        let row = iter::once(thread_manager().max_threads().to_string()).chain(statistics);
        self.write_row(out, row)?;

        Ok(())
    }

    /// Writes the sections committed in the current run as a header line and their wall times
    /// in milliseconds as a second line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`][crate::Error::Io] if writing fails.
    pub fn output_simple(&self, out: &mut impl Write) -> Result<()> {
        let (datamaps, current_run, _) = self.history();
        let current = datamaps.get(current_run).cloned().unwrap_or_default();

        self.write_row(out, current.keys())?;
        self.write_row(out, current.values().map(|delta| millis(delta.wall())))?;

        Ok(())
    }

    fn write_row<T: Display>(
        &self,
        out: &mut impl Write,
        cells: impl IntoIterator<Item = T>,
    ) -> Result<()> {
        for (index, cell) in cells.into_iter().enumerate() {
            if index > 0 {
                write!(out, "{}", self.csv_separator())?;
            }

            write!(out, "{cell}")?;
        }

        writeln!(out)?;
        Ok(())
    }
}

fn write_to_file(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> Result<()>,
) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);

    write(&mut out)?;
    out.flush()?;

    tracing::debug!(path = %path.display(), "timings report written");

    Ok(())
}

/// Every section committed in any run, sorted by name.
fn section_names(datamaps: &[Datamap]) -> BTreeSet<String> {
    datamaps
        .iter()
        .flat_map(|datamap| datamap.keys().cloned())
        .collect()
}

struct Statistic {
    average: f64,
    max: f64,
}

impl Statistic {
    fn over(intervals: &[Delta], component: impl Fn(&Delta) -> Duration) -> Self {
        let values: Vec<f64> = intervals.iter().map(|delta| millis(component(delta))).collect();

        let max = values.iter().copied().fold(0.0, f64::max);
        let total: f64 = values.iter().sum();

        #[expect(
            clippy::cast_precision_loss,
            reason = "thread counts are far below the 2^52 limit of exact conversion"
        )]
        let average = if values.is_empty() {
            0.0
        } else {
            total / values.len() as f64
        };

        Self { average, max }
    }
}
