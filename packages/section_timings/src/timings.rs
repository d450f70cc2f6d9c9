use std::collections::{BTreeMap, TryReserveError, btree_map};
use std::fs;
use std::path::{Path, PathBuf};
use std::result;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::pal::PlatformFacade;
use crate::{
    Configuration, Delta, ERR_POISONED_LOCK, Error, PerThreadValue, Result, TimingData,
    global_configuration,
};

/// Committed deltas of one run, keyed by section name.
pub(crate) type Datamap = BTreeMap<String, Delta>;

/// Registry of named timing sections with per-thread timers and a multi-run history.
///
/// Starting a section starts the calling thread's timer for that section. Stopping it commits
/// the measured [`Delta`] into the datamap of the current run, replacing any earlier commit of
/// the same section in that run. [`next_run()`][Self::next_run] moves on to the next run, and
/// the output methods aggregate across runs or threads.
///
/// A process-wide instance is available through [`timings()`][crate::timings]. Independent
/// instances can be created with [`Timings::new()`] and passed around explicitly.
///
/// # Examples
///
/// ```
/// use section_timings::Timings;
///
/// let timings = Timings::new();
///
/// timings.start("solve");
/// timings.start("assemble");
/// // ... assemble the system ...
/// timings.stop("assemble").unwrap();
/// // ... solve it ...
/// let solve = timings.stop("solve").unwrap();
///
/// assert!(solve >= timings.get_timing("assemble").unwrap());
/// ```
///
/// # Thread safety
///
/// Every operation takes `&self`. Timers of different threads are independent: a section
/// started on one thread cannot be stopped on another.
#[derive(Debug)]
pub struct Timings {
    platform: PlatformFacade,

    // The write lock is only taken when a section is seen for the first time.
    known_timers: RwLock<BTreeMap<String, Arc<PerThreadValue<TimingData>>>>,

    runs: Mutex<RunState>,

    output_dir: RwLock<PathBuf>,
    csv_separator: String,
}

#[derive(Debug)]
struct RunState {
    datamaps: Vec<Datamap>,
    current_run: usize,
    counters: BTreeMap<usize, usize>,
}

impl RunState {
    fn single_run() -> Self {
        Self {
            datamaps: vec![Datamap::new()],
            current_run: 0,
            counters: BTreeMap::new(),
        }
    }

    /// Fails instead of aborting when the history for `count` runs cannot be allocated.
    fn try_with_runs(count: usize) -> result::Result<Self, TryReserveError> {
        let mut datamaps = Vec::new();
        datamaps.try_reserve_exact(count)?;
        datamaps.resize_with(count, Datamap::new);

        Ok(Self {
            datamaps,
            current_run: 0,
            counters: BTreeMap::new(),
        })
    }

    fn current_mut(&mut self) -> &mut Datamap {
        let required = self.current_run.saturating_add(1);

        if self.datamaps.len() < required {
            self.datamaps.resize_with(required, Datamap::new);
        }

        self.datamaps
            .get_mut(self.current_run)
            .expect("history was just grown to include the current run")
    }

    fn current(&self) -> Option<&Datamap> {
        self.datamaps.get(self.current_run)
    }
}

impl Timings {
    /// Creates an empty registry using the configuration from the environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(global_configuration())
    }

    /// Creates an empty registry using the output directory and CSV separator of `config`.
    #[must_use]
    pub fn with_config(config: &Configuration) -> Self {
        Self::with_platform(config, PlatformFacade::real())
    }

    pub(crate) fn with_platform(config: &Configuration, platform: PlatformFacade) -> Self {
        Self {
            platform,
            known_timers: RwLock::new(BTreeMap::new()),
            runs: Mutex::new(RunState::single_run()),
            output_dir: RwLock::new(config.output_dir().to_path_buf()),
            csv_separator: config.csv_separator().to_string(),
        }
    }

    /// Starts the calling thread's timer for `section`.
    ///
    /// If the timer is already running on this thread, the call does nothing, so a section
    /// entered recursively is measured from its outermost start.
    pub fn start(&self, section: &str) {
        let bank = self.bank_or_register(section);

        bank.with_mut(|timer| {
            if !timer.is_running() {
                timer.start();
            }
        });
    }

    /// Stops the calling thread's timer for `section`, commits the measured delta into the
    /// current run and returns the wall time of the interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SectionNotStarted`] if `section` was never started on the calling
    /// thread.
    pub fn stop(&self, section: &str) -> Result<Duration> {
        let Some(bank) = self.bank(section) else {
            return Err(Error::SectionNotStarted {
                section: section.to_string(),
            });
        };

        let delta = bank.with_mut(TimingData::stop)?;
        self.commit(section, delta);

        Ok(delta.wall())
    }

    /// Stops every section running on the calling thread and commits each of them. Returns
    /// how many sections were stopped.
    pub fn stop_all(&self) -> usize {
        let stopped: Vec<(String, Delta)> = {
            let known_timers = self.known_timers.read().expect(ERR_POISONED_LOCK);

            known_timers
                .iter()
                .filter_map(|(section, bank)| {
                    bank.with_mut(TimingData::stop_if_running)
                        .map(|delta| (section.clone(), delta))
                })
                .collect()
        };

        let mut runs = self.runs.lock().expect(ERR_POISONED_LOCK);
        let datamap = runs.current_mut();

        for (section, delta) in &stopped {
            datamap.insert(section.clone(), *delta);
        }

        stopped.len()
    }

    /// Stops the calling thread's timer for `section` if it runs, discards its interval and
    /// zeroes the section's delta in the current run.
    pub fn reset_timing(&self, section: &str) {
        let bank = self.bank_or_register(section);
        bank.with_mut(TimingData::reset);

        self.commit(section, Delta::default());
    }

    /// Wall time of `section` in the current run.
    ///
    /// If nothing has been committed for the section in the current run, the calling thread's
    /// running or last interval is used, so sections that are still open can be queried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoTimingFound`] if `section` is unknown to this registry.
    pub fn get_timing(&self, section: &str) -> Result<Duration> {
        self.get_delta(section).map(|delta| delta.wall())
    }

    /// Full delta of `section` in the current run, looked up like
    /// [`get_timing()`][Self::get_timing].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoTimingFound`] if `section` is unknown to this registry.
    pub fn get_delta(&self, section: &str) -> Result<Delta> {
        let committed = self
            .runs
            .lock()
            .expect(ERR_POISONED_LOCK)
            .current()
            .and_then(|datamap| datamap.get(section).copied());

        if let Some(delta) = committed {
            return Ok(delta);
        }

        self.bank(section)
            .map(|bank| bank.with(TimingData::delta))
            .ok_or_else(|| Error::NoTimingFound {
                section: section.to_string(),
            })
    }

    /// Wall time of `section` as committed in the historical run `run`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RunOutOfRange`] if the history does not contain `run` and
    /// [`Error::NoTimingFound`] if nothing was committed for `section` in that run.
    pub fn get_timing_for_run(&self, section: &str, run: usize) -> Result<Duration> {
        let snapshot = self.run_snapshot(run)?;

        snapshot
            .get(section)
            .map(Delta::wall)
            .ok_or_else(|| Error::NoTimingFound {
                section: section.to_string(),
            })
    }

    /// Sum of the latest interval of every thread that has touched `section`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoTimingFound`] if `section` is unknown to this registry.
    pub fn thread_sum(&self, section: &str) -> Result<Delta> {
        let bank = self.bank(section).ok_or_else(|| Error::NoTimingFound {
            section: section.to_string(),
        })?;

        Ok(bank.accumulate(Delta::default(), |total, timer| total + timer.delta()))
    }

    /// Replaces the run history with `num_runs` empty runs, returns to run 0 and clears the
    /// call counters. Known sections are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRunCount`] if `num_runs` is less than one or the history for
    /// `num_runs` runs cannot be allocated. The current history is kept in that case.
    pub fn reset(&self, num_runs: i64) -> Result<()> {
        let invalid = || Error::InvalidRunCount {
            requested: num_runs,
        };

        let count = usize::try_from(num_runs)
            .ok()
            .filter(|count| *count >= 1)
            .ok_or_else(invalid)?;

        let state = RunState::try_with_runs(count).map_err(|_| invalid())?;

        *self.runs.lock().expect(ERR_POISONED_LOCK) = state;

        tracing::debug!(runs = count, "timings reset");

        Ok(())
    }

    /// Moves on to the next run, growing the history if it was not sized for it up front.
    pub fn next_run(&self) {
        let mut runs = self.runs.lock().expect(ERR_POISONED_LOCK);

        runs.current_run = runs.current_run.saturating_add(1);
        runs.current_mut();

        tracing::debug!(run = runs.current_run, "advanced to next run");
    }

    /// Index of the run that stops are committed into.
    #[must_use]
    pub fn current_run_number(&self) -> usize {
        self.runs.lock().expect(ERR_POISONED_LOCK).current_run
    }

    /// Number of runs in the history.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.lock().expect(ERR_POISONED_LOCK).datamaps.len()
    }

    /// A copy of the deltas committed in run `run`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RunOutOfRange`] if the history does not contain `run`.
    pub fn run_snapshot(&self, run: usize) -> Result<BTreeMap<String, Delta>> {
        let runs = self.runs.lock().expect(ERR_POISONED_LOCK);

        runs.datamaps
            .get(run)
            .cloned()
            .ok_or(Error::RunOutOfRange {
                run,
                runs: runs.datamaps.len(),
            })
    }

    /// Increments the call counter `id`.
    pub fn add_count(&self, id: usize) {
        let mut runs = self.runs.lock().expect(ERR_POISONED_LOCK);

        let counter = runs.counters.entry(id).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    /// Current value of the call counter `id`, zero if it was never incremented.
    #[must_use]
    pub fn count(&self, id: usize) -> usize {
        self.runs
            .lock()
            .expect(ERR_POISONED_LOCK)
            .counters
            .get(&id)
            .copied()
            .unwrap_or_default()
    }

    /// Sets the directory that file-based reports are written to, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be created. The previous directory stays
    /// in effect in that case.
    pub fn set_output_dir(&self, dir: impl Into<PathBuf>) -> Result<()> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        tracing::debug!(dir = %dir.display(), "timings output directory set");
        *self.output_dir.write().expect(ERR_POISONED_LOCK) = dir;

        Ok(())
    }

    /// The directory that file-based reports are written to.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.read().expect(ERR_POISONED_LOCK).clone()
    }

    pub(crate) fn csv_separator(&self) -> &str {
        &self.csv_separator
    }

    /// Creates the output directory if needed and returns the path of `file_name` in it.
    pub(crate) fn output_path(&self, file_name: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = self.output_dir();
        fs::create_dir_all(&dir)?;

        Ok(dir.join(file_name))
    }

    /// Copy of the run history and the counters.
    pub(crate) fn history(&self) -> (Vec<Datamap>, usize, BTreeMap<usize, usize>) {
        let runs = self.runs.lock().expect(ERR_POISONED_LOCK);

        (runs.datamaps.clone(), runs.current_run, runs.counters.clone())
    }

    /// The per-thread banks of all known sections, sorted by name.
    pub(crate) fn banks(&self) -> Vec<(String, Arc<PerThreadValue<TimingData>>)> {
        self.known_timers
            .read()
            .expect(ERR_POISONED_LOCK)
            .iter()
            .map(|(section, bank)| (section.clone(), Arc::clone(bank)))
            .collect()
    }

    fn commit(&self, section: &str, delta: Delta) {
        let mut runs = self.runs.lock().expect(ERR_POISONED_LOCK);

        runs.current_mut().insert(section.to_string(), delta);
    }

    fn bank(&self, section: &str) -> Option<Arc<PerThreadValue<TimingData>>> {
        self.known_timers
            .read()
            .expect(ERR_POISONED_LOCK)
            .get(section)
            .map(Arc::clone)
    }

    fn bank_or_register(&self, section: &str) -> Arc<PerThreadValue<TimingData>> {
        if let Some(bank) = self.bank(section) {
            return bank;
        }

        let mut known_timers = self.known_timers.write().expect(ERR_POISONED_LOCK);

        match known_timers.entry(section.to_string()) {
            btree_map::Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            btree_map::Entry::Vacant(vacant) => {
                tracing::debug!(section, "registering timing section");

                let name = section.to_string();
                let platform = self.platform.clone();

                let bank = Arc::new(PerThreadValue::with_init(move || {
                    TimingData::with_platform(name.clone(), platform.clone())
                }));

                Arc::clone(vacant.insert(bank))
            }
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::pal::FakePlatform;

    assert_impl_all!(Timings: Send, Sync);

    const MS: Duration = Duration::from_millis(1);

    fn fake_timings() -> (FakePlatform, Timings) {
        let platform = FakePlatform::new();
        let timings = Timings::with_platform(
            &Configuration::default(),
            PlatformFacade::fake(platform.clone()),
        );

        (platform, timings)
    }

    #[test]
    fn start_stop_measures_wall_time() {
        let (platform, timings) = fake_timings();

        timings.start("a");
        platform.advance_wall(MS * 142);

        assert_eq!(timings.stop("a").unwrap(), MS * 142);
        assert_eq!(timings.get_timing("a").unwrap(), MS * 142);
    }

    #[test]
    fn nested_sections_are_independent() {
        let (platform, timings) = fake_timings();

        timings.start("outer");
        platform.advance_wall(MS * 10);
        timings.start("inner");
        platform.advance_wall(MS * 100);

        // The inner section is still running and its live value is visible.
        assert_eq!(timings.get_timing("inner").unwrap(), MS * 100);

        timings.stop("inner").unwrap();
        platform.advance_wall(MS * 5);
        timings.stop("outer").unwrap();

        assert_eq!(timings.get_timing("inner").unwrap(), MS * 100);
        assert_eq!(timings.get_timing("outer").unwrap(), MS * 115);
        assert!(timings.get_timing("outer").unwrap() > timings.get_timing("inner").unwrap());
    }

    #[test]
    fn restarting_running_section_keeps_outer_start() {
        let (platform, timings) = fake_timings();

        timings.start("recursive");
        platform.advance_wall(MS * 20);
        timings.start("recursive");
        platform.advance_wall(MS * 30);

        assert_eq!(timings.stop("recursive").unwrap(), MS * 50);
    }

    #[test]
    fn stopping_unknown_section_is_range_error() {
        let (_, timings) = fake_timings();

        let error = timings.stop("unknown").unwrap_err();

        assert!(error.is_range_error());
        assert!(matches!(error, Error::SectionNotStarted { .. }));
    }

    #[test]
    fn stopping_section_registered_but_not_started_here_is_range_error() {
        let (_, timings) = fake_timings();
        timings.reset_timing("only_registered");

        assert!(timings.stop("only_registered").unwrap_err().is_range_error());
    }

    #[test]
    fn later_stop_overwrites_commit() {
        let (platform, timings) = fake_timings();

        timings.start("a");
        platform.advance_wall(MS * 40);
        timings.stop("a").unwrap();

        timings.start("a");
        platform.advance_wall(MS * 3);
        timings.stop("a").unwrap();

        assert_eq!(timings.get_timing("a").unwrap(), MS * 3);
    }

    #[test]
    fn stop_all_stops_running_sections_only() {
        let (platform, timings) = fake_timings();

        timings.start("done");
        platform.advance_wall(MS);
        timings.stop("done").unwrap();

        timings.start("x");
        timings.start("y");
        platform.advance_wall(MS * 9);

        assert_eq!(timings.stop_all(), 2);
        assert_eq!(timings.get_timing("x").unwrap(), MS * 9);
        assert_eq!(timings.get_timing("y").unwrap(), MS * 9);
        assert_eq!(timings.get_timing("done").unwrap(), MS);
        assert_eq!(timings.stop_all(), 0);
    }

    #[test]
    fn reset_timing_zeroes_current_run() {
        let (platform, timings) = fake_timings();

        timings.start("a");
        platform.advance_wall(MS * 12);
        timings.stop("a").unwrap();

        timings.start("a");
        timings.reset_timing("a");

        assert_eq!(timings.get_timing("a").unwrap(), Duration::ZERO);
        timings.stop("a").unwrap_err();
    }

    #[test]
    fn unknown_section_has_no_timing() {
        let (_, timings) = fake_timings();

        assert!(matches!(
            timings.get_timing("missing"),
            Err(Error::NoTimingFound { .. })
        ));
        assert!(matches!(
            timings.thread_sum("missing"),
            Err(Error::NoTimingFound { .. })
        ));
    }

    #[test]
    fn delta_carries_processor_times() {
        let (platform, timings) = fake_timings();

        timings.start("a");
        platform.advance(MS * 10, MS * 7, MS * 2);
        timings.stop("a").unwrap();

        assert_eq!(timings.get_delta("a").unwrap(), Delta::new(MS * 10, MS * 7, MS * 2));
    }

    #[test]
    fn reset_rejects_non_positive_run_counts() {
        let (_, timings) = fake_timings();

        for requested in [0, -1, i64::MIN] {
            let error = timings.reset(requested).unwrap_err();
            assert!(error.is_range_error());
            assert!(matches!(error, Error::InvalidRunCount { requested: r } if r == requested));
        }

        timings.reset(1).unwrap();
        assert_eq!(timings.current_run_number(), 0);
        assert_eq!(timings.run_count(), 1);
    }

    #[test]
    fn reset_rejects_run_counts_too_large_to_allocate() {
        let (_, timings) = fake_timings();
        timings.start("kept");
        timings.stop("kept").unwrap();

        let error = timings.reset(i64::MAX).unwrap_err();

        assert!(error.is_range_error());
        assert!(matches!(error, Error::InvalidRunCount { requested } if requested == i64::MAX));

        // The failed reset leaves the history untouched.
        assert_eq!(timings.run_count(), 1);
        timings.get_timing("kept").unwrap();
    }

    #[test]
    fn reset_clears_history_and_counters_but_keeps_sections() {
        let (platform, timings) = fake_timings();

        timings.start("a");
        platform.advance_wall(MS);
        timings.stop("a").unwrap();
        timings.add_count(4);
        timings.next_run();

        timings.reset(2).unwrap();

        assert_eq!(timings.current_run_number(), 0);
        assert_eq!(timings.run_count(), 2);
        assert_eq!(timings.count(4), 0);
        assert!(timings.run_snapshot(0).unwrap().is_empty());

        // Still known, so the last interval of this thread is reported.
        assert_eq!(timings.get_timing("a").unwrap(), MS);
    }

    #[test]
    fn runs_keep_their_own_data() {
        let (platform, timings) = fake_timings();
        timings.reset(3).unwrap();

        for run in 0..3_u32 {
            timings.start("a");
            platform.advance_wall(MS * (run + 1));
            timings.stop("a").unwrap();
            timings.next_run();
        }

        assert_eq!(timings.current_run_number(), 3);
        assert_eq!(timings.run_count(), 4);
        assert_eq!(timings.get_timing_for_run("a", 0).unwrap(), MS);
        assert_eq!(timings.get_timing_for_run("a", 1).unwrap(), MS * 2);
        assert_eq!(timings.get_timing_for_run("a", 2).unwrap(), MS * 3);
        assert!(matches!(
            timings.get_timing_for_run("a", 3),
            Err(Error::NoTimingFound { .. })
        ));
    }

    #[test]
    fn next_run_grows_history_without_reset() {
        let (_, timings) = fake_timings();
        assert_eq!(timings.run_count(), 1);

        timings.next_run();
        timings.next_run();

        assert_eq!(timings.current_run_number(), 2);
        assert_eq!(timings.run_count(), 3);
    }

    #[test]
    fn historical_run_out_of_range() {
        let (_, timings) = fake_timings();

        let error = timings.get_timing_for_run("a", 5).unwrap_err();

        assert!(error.is_range_error());
        assert!(matches!(error, Error::RunOutOfRange { run: 5, runs: 1 }));
        timings.run_snapshot(1).unwrap_err();
    }

    #[test]
    fn counters_count() {
        let (_, timings) = fake_timings();

        timings.add_count(1);
        timings.add_count(1);
        timings.add_count(9);

        assert_eq!(timings.count(1), 2);
        assert_eq!(timings.count(9), 1);
        assert_eq!(timings.count(2), 0);
    }

    #[test]
    fn output_dir_is_created() {
        let (_, timings) = fake_timings();
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("profiling");

        timings.set_output_dir(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(timings.output_dir(), dir);
    }

    #[test]
    fn output_dir_comes_from_config() {
        let config = Configuration::default().with_output_dir("reports");
        let timings = Timings::with_platform(&config, PlatformFacade::real());

        assert_eq!(timings.output_dir(), PathBuf::from("reports"));
    }

    #[cfg(not(feature = "fixed-slots"))]
    #[test]
    fn threads_time_independently() {
        let (platform, timings) = fake_timings();

        timings.start("work");

        thread::scope(|s| {
            s.spawn(|| {
                // This thread has its own timer, so the main thread's start does not count.
                timings.stop("work").unwrap_err();

                timings.start("work");
            });
        });

        platform.advance_wall(MS * 50);

        timings.stop("work").unwrap();

        // Both threads' latest intervals, one stopped and one still running.
        assert_eq!(timings.thread_sum("work").unwrap().wall(), MS * 100);
    }
}
